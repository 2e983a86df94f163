use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::error::StoreError;
use crate::types::{
    Asset, AssetId, OrderBucketEntry, Position, PositionId, PositionState, Side, StopBucketEntry, StopType,
};

use super::{ListOrder, PositionBuckets, Store, StoreOp};

/// In-memory `Store` for unit-testing the state machine and reconciler
/// without a live database. Bucket rows are kept in side tables rather
/// than recomputed from the position row, mirroring the real schema.
#[derive(Default)]
pub struct MockStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    positions: HashMap<PositionId, Position>,
    order_buckets: HashMap<PositionId, OrderBucketEntry>,
    stop_buckets: HashMap<PositionId, Vec<StopBucketEntry>>,
    assets: HashMap<AssetId, Asset>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, position: Position) {
        let mut inner = self.inner.lock().unwrap();
        inner.positions.insert(position.id, position);
    }

    pub fn seed_asset(&self, asset: Asset) {
        let mut inner = self.inner.lock().unwrap();
        inner.assets.insert(asset.asset_id, asset);
    }
}

#[async_trait::async_trait]
impl Store for MockStore {
    async fn apply(&self, op: StoreOp) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match op {
            StoreOp::IngestOpened(op) => {
                inner.order_buckets.remove(&op.id);
                inner.stop_buckets.remove(&op.id);

                if op.state == PositionState::Order {
                    if let Some(bucket_id) = op.target_bucket {
                        inner.order_buckets.insert(
                            op.id,
                            OrderBucketEntry {
                                asset_id: op.asset_id,
                                bucket_id,
                                position_id: op.id,
                                lots: op.lots,
                                side: Side::of(op.long_side),
                            },
                        );
                    }
                } else if op.state == PositionState::Open {
                    let antagonistic = Side::antagonistic(op.long_side);
                    let mut stops = Vec::new();
                    push_stop(&mut stops, op.asset_id, op.id, StopType::Sl, op.sl_x6, op.sl_bucket, op.lots, antagonistic);
                    push_stop(&mut stops, op.asset_id, op.id, StopType::Tp, op.tp_x6, op.tp_bucket, op.lots, antagonistic);
                    push_stop(&mut stops, op.asset_id, op.id, StopType::Liq, op.liq_x6, op.liq_bucket, op.lots, antagonistic);
                    inner.stop_buckets.insert(op.id, stops);
                }

                inner.positions.insert(
                    op.id,
                    Position {
                        id: op.id,
                        state: op.state,
                        asset_id: op.asset_id,
                        trader_addr: op.trader,
                        long_side: op.long_side,
                        lots: op.lots,
                        leverage_x: op.leverage_x,
                        entry_x6: op.entry_x6,
                        target_x6: op.target_x6,
                        sl_x6: op.sl_x6,
                        tp_x6: op.tp_x6,
                        liq_x6: op.liq_x6,
                        notional_usd6: op.notional_usd6,
                        margin_usd6: op.margin_usd6,
                        close_reason: None,
                        opened_at: Utc::now(),
                        executed_at: None,
                        closed_at: None,
                        cancelled_at: None,
                        last_tx_hash: Some(op.seen_at.tx_hash.to_string()),
                        last_block_num: Some(op.seen_at.block as i64),
                        target_bucket: op.target_bucket,
                        sl_bucket: op.sl_bucket,
                        tp_bucket: op.tp_bucket,
                        liq_bucket: op.liq_bucket,
                    },
                );
            }
            StoreOp::IngestExecuted(op) => {
                inner.order_buckets.remove(&op.id);
                let (asset_id, lots, long_side) = {
                    let pos = inner
                        .positions
                        .get(&op.id)
                        .ok_or_else(|| StoreError::Constraint(format!("no such position {}", op.id)))?;
                    (pos.asset_id, pos.lots, pos.long_side)
                };
                let antagonistic = Side::antagonistic(long_side);
                let mut stops = Vec::new();
                push_stop(&mut stops, asset_id, op.id, StopType::Sl, op.sl_x6, op.sl_bucket, lots, antagonistic);
                push_stop(&mut stops, asset_id, op.id, StopType::Tp, op.tp_x6, op.tp_bucket, lots, antagonistic);
                push_stop(&mut stops, asset_id, op.id, StopType::Liq, op.liq_x6, op.liq_bucket, lots, antagonistic);
                inner.stop_buckets.insert(op.id, stops);

                let pos = inner.positions.get_mut(&op.id).expect("checked above");
                pos.state = PositionState::Open;
                pos.entry_x6 = op.entry_x6;
                pos.target_x6 = 0;
                pos.notional_usd6 = Some(op.notional_usd6);
                pos.margin_usd6 = Some(op.margin_usd6);
                pos.executed_at.get_or_insert(Utc::now());
                pos.last_tx_hash = Some(op.seen_at.tx_hash.to_string());
                pos.last_block_num = Some(op.seen_at.block as i64);
            }
            StoreOp::IngestStopsUpdated(op) => {
                let (asset_id, lots, long_side, liq) = {
                    let pos = inner
                        .positions
                        .get(&op.id)
                        .ok_or_else(|| StoreError::Constraint(format!("no such position {}", op.id)))?;
                    (pos.asset_id, pos.lots, pos.long_side, (pos.liq_x6, pos.liq_bucket))
                };
                let antagonistic = Side::antagonistic(long_side);
                let mut stops: Vec<StopBucketEntry> = inner
                    .stop_buckets
                    .get(&op.id)
                    .map(|v| v.iter().filter(|s| s.stop_type == StopType::Liq).cloned().collect())
                    .unwrap_or_default();
                if stops.is_empty() && liq.0 != 0 {
                    push_stop(&mut stops, asset_id, op.id, StopType::Liq, liq.0, liq.1, lots, antagonistic);
                }
                push_stop(&mut stops, asset_id, op.id, StopType::Sl, op.sl_x6, op.sl_bucket, lots, antagonistic);
                push_stop(&mut stops, asset_id, op.id, StopType::Tp, op.tp_x6, op.tp_bucket, lots, antagonistic);
                inner.stop_buckets.insert(op.id, stops);

                let pos = inner.positions.get_mut(&op.id).expect("checked above");
                pos.sl_x6 = op.sl_x6;
                pos.tp_x6 = op.tp_x6;
                pos.sl_bucket = op.sl_bucket;
                pos.tp_bucket = op.tp_bucket;
                pos.last_tx_hash = Some(op.seen_at.tx_hash.to_string());
                pos.last_block_num = Some(op.seen_at.block as i64);
            }
            StoreOp::IngestRemoved(op) => {
                inner.order_buckets.remove(&op.id);
                inner.stop_buckets.remove(&op.id);
                let terminal = op.reason.terminal_state();
                let pos = inner
                    .positions
                    .get_mut(&op.id)
                    .ok_or_else(|| StoreError::Constraint(format!("no such position {}", op.id)))?;
                pos.state = terminal;
                pos.close_reason = Some(op.reason);
                match terminal {
                    PositionState::Cancelled => {
                        pos.cancelled_at.get_or_insert(Utc::now());
                    }
                    _ => {
                        pos.closed_at.get_or_insert(Utc::now());
                    }
                }
                pos.last_tx_hash = Some(op.seen_at.tx_hash.to_string());
                pos.last_block_num = Some(op.seen_at.block as i64);
            }
            StoreOp::PatchState { id, state } => {
                if let Some(pos) = inner.positions.get_mut(&id) {
                    pos.state = state;
                }
            }
        }
        Ok(())
    }

    async fn read_position(&self, id: PositionId) -> Result<Option<Position>, StoreError> {
        Ok(self.inner.lock().unwrap().positions.get(&id).cloned())
    }

    async fn read_asset(&self, asset_id: AssetId) -> Result<Option<Asset>, StoreError> {
        Ok(self.inner.lock().unwrap().assets.get(&asset_id).cloned())
    }

    async fn read_buckets(&self, id: PositionId) -> Result<PositionBuckets, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(PositionBuckets {
            order: inner.order_buckets.get(&id).cloned().into_iter().collect(),
            stops: inner.stop_buckets.get(&id).cloned().unwrap_or_default(),
        })
    }

    async fn list_ids(
        &self,
        limit: i64,
        offset: i64,
        order: ListOrder,
    ) -> Result<Vec<PositionId>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<PositionId> = inner.positions.keys().copied().collect();
        ids.sort_unstable();
        if order == ListOrder::Desc {
            ids.reverse();
        }
        Ok(ids
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn max_id(&self) -> Result<Option<PositionId>, StoreError> {
        Ok(self.inner.lock().unwrap().positions.keys().copied().max())
    }
}

#[allow(clippy::too_many_arguments)]
fn push_stop(
    stops: &mut Vec<StopBucketEntry>,
    asset_id: crate::types::AssetId,
    position_id: PositionId,
    stop_type: StopType,
    price_x6: i64,
    bucket_id: Option<crate::types::BucketId>,
    lots: i16,
    side: Side,
) {
    if price_x6 == 0 {
        return;
    }
    stops.retain(|s| s.stop_type != stop_type);
    if let Some(bucket_id) = bucket_id {
        stops.push(StopBucketEntry {
            asset_id,
            bucket_id,
            position_id,
            stop_type,
            lots,
            side,
        });
    }
}
