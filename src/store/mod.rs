//! The projection store: the trait every consumer, reconciler and backfill
//! operation writes through, plus the operation vocabulary
//! (`StoreOp`) the pure state machine emits.

mod mock;
mod pg;

pub use mock::MockStore;
pub use pg::PgStore;

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::StoreError;
use crate::types::{
    Asset, AssetId, BucketId, CloseReason, EventId, FixedX6, OrderBucketEntry, Position,
    PositionId, PositionState, StopBucketEntry, TraderAddr,
};

/// One atomic store mutation. Produced by `state_machine::apply` (the
/// consumer path) or synthesized directly by the reconciler from observed
/// chain truth — both funnel through `Store::apply`.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreOp {
    IngestOpened(IngestOpened),
    IngestExecuted(IngestExecuted),
    IngestStopsUpdated(IngestStopsUpdated),
    IngestRemoved(IngestRemoved),
    /// Reconciler-only escape hatch for "any other mismatch ⇒ patch state
    /// directly" (§4.5); never produced by `state_machine::apply`.
    PatchState { id: PositionId, state: PositionState },
}

#[derive(Clone, Debug, PartialEq)]
pub struct IngestOpened {
    pub id: PositionId,
    pub state: PositionState,
    pub asset_id: AssetId,
    pub trader: TraderAddr,
    pub long_side: bool,
    pub lots: i16,
    pub leverage_x: i16,
    pub entry_x6: FixedX6,
    pub target_x6: FixedX6,
    pub sl_x6: FixedX6,
    pub tp_x6: FixedX6,
    pub liq_x6: FixedX6,
    pub target_bucket: Option<BucketId>,
    pub sl_bucket: Option<BucketId>,
    pub tp_bucket: Option<BucketId>,
    pub liq_bucket: Option<BucketId>,
    pub notional_usd6: Option<i128>,
    pub margin_usd6: Option<i128>,
    pub seen_at: EventId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IngestExecuted {
    pub id: PositionId,
    pub entry_x6: FixedX6,
    pub notional_usd6: i128,
    pub margin_usd6: i128,
    pub sl_x6: FixedX6,
    pub tp_x6: FixedX6,
    pub liq_x6: FixedX6,
    pub sl_bucket: Option<BucketId>,
    pub tp_bucket: Option<BucketId>,
    pub liq_bucket: Option<BucketId>,
    pub seen_at: EventId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IngestStopsUpdated {
    pub id: PositionId,
    pub sl_x6: FixedX6,
    pub tp_x6: FixedX6,
    pub sl_bucket: Option<BucketId>,
    pub tp_bucket: Option<BucketId>,
    pub seen_at: EventId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IngestRemoved {
    pub id: PositionId,
    pub reason: CloseReason,
    pub exec_x6: FixedX6,
    pub pnl_usd6: i128,
    pub seen_at: EventId,
}

/// Bucket rows currently on file for a position, as read by the
/// reconciler's index-invariant assertions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PositionBuckets {
    pub order: Vec<OrderBucketEntry>,
    pub stops: Vec<StopBucketEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListOrder {
    Asc,
    Desc,
}

/// Storage interface every write and every reconciler/backfill read goes
/// through. One transaction per `apply` call; never partially committed.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn apply(&self, op: StoreOp) -> Result<(), StoreError>;

    async fn read_position(&self, id: PositionId) -> Result<Option<Position>, StoreError>;

    /// Falls through here on an `AssetCache` miss.
    async fn read_asset(&self, asset_id: AssetId) -> Result<Option<Asset>, StoreError>;

    async fn read_buckets(&self, id: PositionId) -> Result<PositionBuckets, StoreError>;

    async fn list_ids(
        &self,
        limit: i64,
        offset: i64,
        order: ListOrder,
    ) -> Result<Vec<PositionId>, StoreError>;

    async fn max_id(&self) -> Result<Option<PositionId>, StoreError>;
}

/// In-memory, never-invalidated-within-a-run cache of static asset
/// metadata. Concurrent reads are lock-free; a miss falls through to the
/// store.
#[derive(Clone, Default)]
pub struct AssetCache {
    inner: Arc<DashMap<AssetId, Asset>>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, asset_id: AssetId) -> Option<Asset> {
        self.inner.get(&asset_id).map(|entry| entry.clone())
    }

    pub fn insert(&self, asset: Asset) {
        self.inner.insert(asset.asset_id, asset);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
