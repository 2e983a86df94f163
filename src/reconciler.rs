//! Converges the projection to authoritative on-chain state for a set of
//! ids (§4.5). Two modes share one worker pool and one pair of semaphores;
//! both funnel corrections through `state_machine::apply` so on-stream,
//! on-demand and backfill ingestion share one code path (§2).

use std::future::Future;
use std::sync::Arc;

use alloy::primitives::TxHash;
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::chain_client::{ChainReads, Trade};
use crate::error::{ChainError, StateMachineError, StoreError};
use crate::state_machine;
use crate::store::{AssetCache, Store, StoreOp};
use crate::types::{
    Asset, ChainState, CloseReason, EventId, Executed, Opened, Position, PositionEvent,
    PositionId, PositionState, Removed, Side, StopType, StopsUpdated,
};

/// Which chain reads a reconciliation pass performs per id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// `stateOf` only — cheap, used for the `/verify` read-API endpoint.
    StateOnly,
    /// `stateOf` + `getTrade` — compares every field against ground truth.
    Full,
}

/// Bounds on concurrent chain reads / store writes for one reconciler
/// invocation (§5's semaphore pair), plus the worker pool width.
#[derive(Clone, Copy, Debug)]
pub struct Concurrency {
    pub rpc: usize,
    pub db: usize,
}

impl Concurrency {
    pub fn worker_count(&self, ids: usize) -> usize {
        ids.min(self.db).max(1)
    }
}

/// Output summary per run (§4.5: "the tested contract of the reconciler").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub scanned: u64,
    pub created: u64,
    pub executed: u64,
    pub stops: u64,
    pub removed: u64,
    pub state_patched: u64,
    pub skipped: u64,
    pub missing_db: u64,
    pub rpc_failed: u64,
    /// Store-side timeouts/failures, additional to the spec's literal
    /// counter set; zero in the documented scenarios.
    pub store_failed: u64,
}

impl Summary {
    /// Folds another run's summary into this one — used by the backfill
    /// controller to aggregate per-chunk results (§4.7).
    pub fn add(&mut self, other: Summary) {
        self.scanned += other.scanned;
        self.created += other.created;
        self.executed += other.executed;
        self.stops += other.stops;
        self.removed += other.removed;
        self.state_patched += other.state_patched;
        self.skipped += other.skipped;
        self.missing_db += other.missing_db;
        self.rpc_failed += other.rpc_failed;
        self.store_failed += other.store_failed;
    }

    /// `true` if this run surfaced anything a caller should treat as a
    /// failed chunk (§4.7's "reconciler exits non-zero").
    pub fn had_failures(&self) -> bool {
        self.rpc_failed > 0 || self.store_failed > 0
    }

    fn merge(&mut self, other: Tally) {
        self.scanned += other.scanned;
        self.created += other.created;
        self.executed += other.executed;
        self.stops += other.stops;
        self.removed += other.removed;
        self.state_patched += other.state_patched;
        self.skipped += other.skipped;
        self.missing_db += other.missing_db;
        self.rpc_failed += other.rpc_failed;
        self.store_failed += other.store_failed;
    }

    /// `true` if nothing needed correcting — the fixed-point test of
    /// reconciler convergence (§8).
    pub fn is_clean(&self) -> bool {
        self.created == 0
            && self.executed == 0
            && self.stops == 0
            && self.removed == 0
            && self.state_patched == 0
            && self.missing_db == 0
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Tally {
    scanned: u64,
    created: u64,
    executed: u64,
    stops: u64,
    removed: u64,
    state_patched: u64,
    skipped: u64,
    missing_db: u64,
    rpc_failed: u64,
    store_failed: u64,
}

/// Synthesizes the audit-trail coordinates for a reconciler-injected event
/// — there is no real `(block, tx, logIndex)` since this didn't come off
/// the log stream. Block 0 with the position id as log index keeps these
/// distinguishable from genuine events without colliding with each other.
fn synthetic_event_id(id: PositionId) -> EventId {
    EventId::new(0, TxHash::ZERO, id as u64)
}

/// Runs one reconciliation pass over `ids` with bounded concurrency on
/// both the chain-read and store-write sides (§5).
pub async fn reconcile(
    ids: &[PositionId],
    store: &dyn Store,
    chain: &dyn ChainReads,
    assets: &AssetCache,
    mode: Mode,
    concurrency: Concurrency,
) -> Summary {
    let rpc_sem = Arc::new(Semaphore::new(concurrency.rpc.max(1)));
    let db_sem = Arc::new(Semaphore::new(concurrency.db.max(1)));
    let workers = concurrency.worker_count(ids.len());

    let tallies: Vec<Tally> = stream::iter(ids.iter().copied())
        .map(|id| {
            let rpc_sem = rpc_sem.clone();
            let db_sem = db_sem.clone();
            async move {
                match mode {
                    Mode::StateOnly => reconcile_state_only(id, store, chain, assets, &rpc_sem, &db_sem).await,
                    Mode::Full => reconcile_full(id, store, chain, assets, &rpc_sem, &db_sem).await,
                }
            }
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    let mut summary = Summary::default();
    for tally in tallies {
        summary.merge(tally);
    }
    summary
}

async fn with_rpc<T>(sem: &Semaphore, fut: impl Future<Output = Result<T, ChainError>>) -> Result<T, ChainError> {
    let _permit = sem.acquire().await.expect("semaphore never closed");
    fut.await
}

async fn get_asset(
    store: &dyn Store,
    assets: &AssetCache,
    db_sem: &Semaphore,
    asset_id: crate::types::AssetId,
) -> Result<Asset, StoreError> {
    if let Some(asset) = assets.get(asset_id) {
        return Ok(asset);
    }
    let _permit = db_sem.acquire().await.expect("semaphore never closed");
    match store.read_asset(asset_id).await? {
        Some(asset) => {
            assets.insert(asset.clone());
            Ok(asset)
        }
        None => Err(StoreError::Constraint(format!("unknown asset {asset_id}"))),
    }
}

async fn apply_op(store: &dyn Store, db_sem: &Semaphore, op: StoreOp) -> Result<(), StoreError> {
    let _permit = db_sem.acquire().await.expect("semaphore never closed");
    store.apply(op).await
}

/// `reason` for a `Removed` synthesized purely from `stateOf`/chain state
/// (no `Trade.reason` field exists) — CANCELLED for chain state 3, MARKET
/// for everything else, per §4.5 and §9's Open Question #2.
fn reason_from_chain_state(chain_state: ChainState) -> CloseReason {
    if chain_state == ChainState::Cancelled {
        CloseReason::Cancelled
    } else {
        CloseReason::Market
    }
}

async fn reconcile_state_only(
    id: PositionId,
    store: &dyn Store,
    chain: &dyn ChainReads,
    assets: &AssetCache,
    rpc_sem: &Semaphore,
    db_sem: &Semaphore,
) -> Tally {
    let mut tally = Tally { scanned: 1, ..Default::default() };

    let chain_state_raw = match with_rpc(rpc_sem, async { chain.state_of(id).await }).await {
        Ok(v) => v,
        Err(e) => {
            warn!(position_id = id, error = %e, "state_of failed");
            tally.rpc_failed = 1;
            return tally;
        }
    };
    let chain_state = match ChainState::try_from(chain_state_raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(position_id = id, error = %e, "malformed stateOf response");
            tally.rpc_failed = 1;
            return tally;
        }
    };

    let position = {
        let _permit = db_sem.acquire().await.expect("semaphore never closed");
        match store.read_position(id).await {
            Ok(v) => v,
            Err(e) => {
                warn!(position_id = id, error = %e, "read_position failed");
                tally.store_failed = 1;
                return tally;
            }
        }
    };

    let Some(position) = position else {
        tally.missing_db = 1;
        return tally;
    };

    reconcile_against_chain_state(id, position, chain_state, None, store, assets, db_sem, &mut tally).await;
    tally
}

async fn reconcile_full(
    id: PositionId,
    store: &dyn Store,
    chain: &dyn ChainReads,
    assets: &AssetCache,
    rpc_sem: &Semaphore,
    db_sem: &Semaphore,
) -> Tally {
    let mut tally = Tally { scanned: 1, ..Default::default() };

    let trade = match with_rpc(rpc_sem, async { chain.get_trade(id).await }).await {
        Ok(v) => v,
        Err(e) => {
            warn!(position_id = id, error = %e, "get_trade failed");
            tally.rpc_failed = 1;
            return tally;
        }
    };

    let Some(trade) = trade else {
        // Empty trade (zero owner) means "no such position" (§4.5).
        tally.skipped = 1;
        return tally;
    };

    let chain_state = match ChainState::try_from(trade.state) {
        Ok(v) => v,
        Err(e) => {
            warn!(position_id = id, error = %e, "malformed trade state");
            tally.rpc_failed = 1;
            return tally;
        }
    };

    let position = {
        let _permit = db_sem.acquire().await.expect("semaphore never closed");
        match store.read_position(id).await {
            Ok(v) => v,
            Err(e) => {
                warn!(position_id = id, error = %e, "read_position failed");
                tally.store_failed = 1;
                return tally;
            }
        }
    };

    match position {
        None => create_from_trade(id, &trade, chain_state, store, assets, db_sem, &mut tally).await,
        Some(position) => {
            reconcile_against_chain_state(id, position, chain_state, Some(&trade), store, assets, db_sem, &mut tally)
                .await
        }
    }
    tally
}

async fn create_from_trade(
    id: PositionId,
    trade: &Trade,
    chain_state: ChainState,
    store: &dyn Store,
    assets: &AssetCache,
    db_sem: &Semaphore,
    tally: &mut Tally,
) {
    let asset = match get_asset(store, assets, db_sem, trade.asset).await {
        Ok(a) => a,
        Err(e) => {
            warn!(position_id = id, error = %e, "unknown asset, cannot create from trade");
            tally.store_failed = 1;
            return;
        }
    };

    let initial_state = if chain_state == ChainState::Order {
        crate::types::InitialState::Order
    } else {
        crate::types::InitialState::Open
    };
    let entry_or_target = match initial_state {
        crate::types::InitialState::Order => trade.target_x6,
        crate::types::InitialState::Open => {
            if trade.entry_x6 != 0 { trade.entry_x6 } else { trade.target_x6 }
        }
    };

    let opened = PositionEvent::Opened(Opened {
        id,
        initial_state,
        asset: trade.asset,
        long_side: trade.long_side,
        lots: trade.lots,
        leverage_x: trade.leverage_x,
        entry_or_target_x6: entry_or_target,
        sl_x6: trade.sl_x6,
        tp_x6: trade.tp_x6,
        liq_x6: trade.liq_x6,
        trader: trade.owner_addr(),
    });

    if !run_ops(id, None, &asset, &opened, store, db_sem, tally, |t| t.created += 1).await {
        return;
    }

    if matches!(chain_state, ChainState::Closed | ChainState::Cancelled) {
        let reason = reason_from_chain_state(chain_state);
        let refreshed = {
            let _permit = db_sem.acquire().await.expect("semaphore never closed");
            store.read_position(id).await
        };
        let Ok(Some(refreshed)) = refreshed else {
            tally.store_failed = 1;
            return;
        };
        let removed = PositionEvent::Removed(Removed { id, reason, exec_x6: 0, pnl_usd6: 0 });
        run_ops(id, Some(&refreshed), &asset, &removed, store, db_sem, tally, |t| t.removed += 1).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn reconcile_against_chain_state(
    id: PositionId,
    position: Position,
    chain_state: ChainState,
    trade: Option<&Trade>,
    store: &dyn Store,
    assets: &AssetCache,
    db_sem: &Semaphore,
    tally: &mut Tally,
) {
    let asset = match get_asset(store, assets, db_sem, position.asset_id).await {
        Ok(a) => a,
        Err(e) => {
            warn!(position_id = id, error = %e, "unknown asset during reconciliation");
            tally.store_failed = 1;
            return;
        }
    };

    if position.state == PositionState::Order && chain_state == ChainState::Open {
        let entry_x6 = trade
            .map(|t| t.entry_x6)
            .filter(|v| *v != 0)
            .unwrap_or(if position.entry_x6 != 0 { position.entry_x6 } else { position.target_x6 });
        let executed = PositionEvent::Executed(Executed { id, entry_x6 });
        if !run_ops(id, Some(&position), &asset, &executed, store, db_sem, tally, |t| t.executed += 1).await {
            return;
        }

        let (sl, tp) = trade.map(|t| (t.sl_x6, t.tp_x6)).unwrap_or((position.sl_x6, position.tp_x6));
        if sl != 0 || tp != 0 {
            if let Ok(Some(refreshed)) = {
                let _permit = db_sem.acquire().await.expect("semaphore never closed");
                store.read_position(id).await
            } {
                let stops = PositionEvent::StopsUpdated(StopsUpdated { id, sl_x6: sl, tp_x6: tp });
                run_ops(id, Some(&refreshed), &asset, &stops, store, db_sem, tally, |t| t.stops += 1).await;
            }
        }
        return;
    }

    if position.state == PositionState::Open && matches!(chain_state, ChainState::Closed | ChainState::Cancelled) {
        let reason = reason_from_chain_state(chain_state);
        let removed = PositionEvent::Removed(Removed { id, reason, exec_x6: 0, pnl_usd6: 0 });
        run_ops(id, Some(&position), &asset, &removed, store, db_sem, tally, |t| t.removed += 1).await;
        return;
    }

    let target_state = PositionState::from(chain_state);
    if position.state != target_state {
        let op = StoreOp::PatchState { id, state: target_state };
        if apply_op(store, db_sem, op).await.is_err() {
            tally.store_failed = 1;
        } else {
            tally.state_patched += 1;
        }
        return;
    }

    // Equal states: for `Full` mode, reconcile field-level drift before
    // falling through to the bucket-invariant assertion both modes share.
    if let Some(trade) = trade {
        match position.state {
            PositionState::Open => {
                if position.entry_x6 != trade.entry_x6 {
                    let executed = PositionEvent::Executed(Executed { id, entry_x6: trade.entry_x6 });
                    if !run_ops(id, Some(&position), &asset, &executed, store, db_sem, tally, |t| t.executed += 1).await
                    {
                        return;
                    }
                }
                if position.sl_x6 != trade.sl_x6 || position.tp_x6 != trade.tp_x6 {
                    if let Ok(Some(refreshed)) = {
                        let _permit = db_sem.acquire().await.expect("semaphore never closed");
                        store.read_position(id).await
                    } {
                        let stops = PositionEvent::StopsUpdated(StopsUpdated {
                            id,
                            sl_x6: trade.sl_x6,
                            tp_x6: trade.tp_x6,
                        });
                        run_ops(id, Some(&refreshed), &asset, &stops, store, db_sem, tally, |t| t.stops += 1).await;
                    }
                    return;
                }
            }
            PositionState::Order if position.target_x6 != trade.target_x6 => {
                let opened = PositionEvent::Opened(Opened {
                    id,
                    initial_state: crate::types::InitialState::Order,
                    asset: position.asset_id,
                    long_side: position.long_side,
                    lots: position.lots,
                    leverage_x: position.leverage_x,
                    entry_or_target_x6: trade.target_x6,
                    sl_x6: trade.sl_x6,
                    tp_x6: trade.tp_x6,
                    liq_x6: trade.liq_x6,
                    trader: trade.owner_addr(),
                });
                run_ops(id, Some(&position), &asset, &opened, store, db_sem, tally, |t| t.created += 1).await;
                return;
            }
            _ => {}
        }
    }

    assert_index_invariants(id, &position, &asset, store, db_sem, tally).await;
}

/// Applies `state_machine::apply`'s resulting ops through the bounded
/// store side. Returns `false` (and sets `store_failed`) if any op failed,
/// so callers can stop chaining further ops for this id.
async fn run_ops(
    id: PositionId,
    current: Option<&Position>,
    asset: &Asset,
    event: &PositionEvent,
    store: &dyn Store,
    db_sem: &Semaphore,
    tally: &mut Tally,
    mut on_applied: impl FnMut(&mut Tally),
) -> bool {
    let ops = match state_machine::apply(current, asset, event, synthetic_event_id(id)) {
        Ok(ops) => ops,
        Err(StateMachineError::Pricing(e)) => {
            warn!(position_id = id, error = %e, "bad tick during reconciliation");
            tally.store_failed = 1;
            return false;
        }
        Err(e) => {
            warn!(position_id = id, error = %e, "state machine rejected reconciler-synthesized event");
            tally.store_failed = 1;
            return false;
        }
    };

    if ops.is_empty() {
        // Already converged; the caller's counter increment still reflects
        // intent, but nothing changed — count as skipped instead.
        tally.skipped += 1;
        return true;
    }

    for op in ops {
        if apply_op(store, db_sem, op).await.is_err() {
            tally.store_failed = 1;
            return false;
        }
    }
    on_applied(tally);
    true
}

async fn assert_index_invariants(
    id: PositionId,
    position: &Position,
    asset: &Asset,
    store: &dyn Store,
    db_sem: &Semaphore,
    tally: &mut Tally,
) {
    let buckets = {
        let _permit = db_sem.acquire().await.expect("semaphore never closed");
        match store.read_buckets(id).await {
            Ok(b) => b,
            Err(e) => {
                warn!(position_id = id, error = %e, "read_buckets failed");
                tally.store_failed = 1;
                return;
            }
        }
    };

    match position.state {
        PositionState::Order => {
            let own_side = Side::of(position.long_side);
            let ok = buckets.order.len() == 1
                && buckets.order[0].lots == position.lots
                && buckets.order[0].side == own_side
                && buckets.stops.is_empty();
            if ok {
                tally.skipped += 1;
                return;
            }
            let opened = PositionEvent::Opened(Opened {
                id,
                initial_state: crate::types::InitialState::Order,
                asset: position.asset_id,
                long_side: position.long_side,
                lots: position.lots,
                leverage_x: position.leverage_x,
                entry_or_target_x6: position.target_x6,
                sl_x6: position.sl_x6,
                tp_x6: position.tp_x6,
                liq_x6: position.liq_x6,
                trader: position.trader_addr,
            });
            run_ops(id, Some(position), asset, &opened, store, db_sem, tally, |t| t.created += 1).await;
        }
        PositionState::Open => {
            let antagonistic = Side::antagonistic(position.long_side);
            let has_stop = |stop_type: StopType| {
                buckets
                    .stops
                    .iter()
                    .any(|s| s.stop_type == stop_type && s.lots == position.lots && s.side == antagonistic)
            };
            let ok = buckets.order.is_empty()
                && has_stop(StopType::Sl) == (position.sl_x6 != 0)
                && has_stop(StopType::Tp) == (position.tp_x6 != 0)
                && has_stop(StopType::Liq) == (position.liq_x6 != 0);
            if ok {
                tally.skipped += 1;
                return;
            }
            let stops = PositionEvent::StopsUpdated(StopsUpdated {
                id,
                sl_x6: position.sl_x6,
                tp_x6: position.tp_x6,
            });
            run_ops(id, Some(position), asset, &stops, store, db_sem, tally, |t| t.stops += 1).await;
        }
        PositionState::Closed | PositionState::Cancelled => {
            if buckets.order.is_empty() && buckets.stops.is_empty() {
                tally.skipped += 1;
                return;
            }
            let reason = position.close_reason.unwrap_or(CloseReason::Market);
            let removed = PositionEvent::Removed(Removed { id, reason, exec_x6: 0, pnl_usd6: 0 });
            run_ops(id, Some(position), asset, &removed, store, db_sem, tally, |t| t.removed += 1).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use crate::testing::{FakeChain, TradeBuilder};
    use alloy::primitives::Address;
    use chrono::Utc;

    fn asset() -> Asset {
        Asset { asset_id: 1, symbol: "ETH".into(), tick_x6: 100_000, lot_num: 1, lot_den: 1 }
    }

    fn default_concurrency() -> Concurrency {
        Concurrency { rpc: 4, db: 4 }
    }

    fn open_position(id: PositionId, entry_x6: i64, sl_x6: i64, tp_x6: i64) -> Position {
        Position {
            id,
            state: PositionState::Open,
            asset_id: 1,
            trader_addr: crate::types::TraderAddr::new(Address::with_last_byte(1)),
            long_side: true,
            lots: 2,
            leverage_x: 5,
            entry_x6,
            target_x6: 0,
            sl_x6,
            tp_x6,
            liq_x6: 0,
            notional_usd6: Some(0),
            margin_usd6: Some(0),
            close_reason: None,
            opened_at: Utc::now(),
            executed_at: Some(Utc::now()),
            closed_at: None,
            cancelled_at: None,
            last_tx_hash: None,
            last_block_num: None,
            target_bucket: None,
            sl_bucket: None,
            tp_bucket: None,
            liq_bucket: None,
        }
    }

    #[tokio::test]
    async fn s6_open_db_vs_cancelled_chain_removes_only() {
        let store = MockStore::new();
        store.seed_asset(asset());
        store.seed(open_position(6, 1_000_000, 0, 0));

        let chain = FakeChain::new();
        chain.seed(6, TradeBuilder::new(Address::with_last_byte(1), 1).state(3).build());

        let summary = reconcile(&[6], &store, &chain, &AssetCache::new(), Mode::StateOnly, default_concurrency()).await;

        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.created, 0);
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.stops, 0);
        assert_eq!(summary.state_patched, 0);
        assert_eq!(summary.missing_db, 0);

        let position = store.read_position(6).await.unwrap().unwrap();
        assert_eq!(position.state, PositionState::Cancelled);
    }

    #[tokio::test]
    async fn full_mode_creates_missing_order_from_chain() {
        let store = MockStore::new();
        store.seed_asset(asset());

        let chain = FakeChain::new();
        chain.seed(
            9,
            TradeBuilder::new(Address::with_last_byte(2), 1)
                .state(0)
                .target_x6(1_000_000)
                .build(),
        );

        let summary = reconcile(&[9], &store, &chain, &AssetCache::new(), Mode::Full, default_concurrency()).await;

        assert_eq!(summary.created, 1);
        assert_eq!(summary.missing_db, 0);
        let position = store.read_position(9).await.unwrap().unwrap();
        assert_eq!(position.state, PositionState::Order);
        assert_eq!(position.target_x6, 1_000_000);
    }

    #[tokio::test]
    async fn full_mode_skips_ids_with_no_chain_trade() {
        let store = MockStore::new();
        let chain = FakeChain::new();

        let summary = reconcile(&[42], &store, &chain, &AssetCache::new(), Mode::Full, default_concurrency()).await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.created, 0);
        assert_eq!(summary.rpc_failed, 0);
    }

    #[tokio::test]
    async fn full_mode_corrects_entry_drift_on_equal_states() {
        let store = MockStore::new();
        store.seed_asset(asset());
        store.seed(open_position(11, 1_000_000, 0, 0));

        let chain = FakeChain::new();
        chain.seed(
            11,
            TradeBuilder::new(Address::with_last_byte(1), 1)
                .state(1)
                .entry_x6(1_100_000)
                .build(),
        );

        let summary = reconcile(&[11], &store, &chain, &AssetCache::new(), Mode::Full, default_concurrency()).await;

        assert_eq!(summary.executed, 1);
        let position = store.read_position(11).await.unwrap().unwrap();
        assert_eq!(position.entry_x6, 1_100_000);
    }

    #[tokio::test]
    async fn rpc_failure_is_tallied_and_leaves_store_untouched() {
        let store = MockStore::new();
        store.seed_asset(asset());
        store.seed(open_position(3, 1_000_000, 0, 0));

        let chain = FakeChain::new();
        chain.seed(3, TradeBuilder::new(Address::with_last_byte(1), 1).state(1).build());
        chain.fail_next(3, 1);

        let summary = reconcile(&[3], &store, &chain, &AssetCache::new(), Mode::StateOnly, default_concurrency()).await;

        assert_eq!(summary.rpc_failed, 1);
        assert_eq!(summary.scanned, 1);
        let position = store.read_position(3).await.unwrap().unwrap();
        assert_eq!(position.state, PositionState::Open);
    }

    #[tokio::test]
    async fn converges_to_clean_on_second_pass() {
        let store = MockStore::new();
        store.seed_asset(asset());

        let chain = FakeChain::new();
        chain.seed(
            20,
            TradeBuilder::new(Address::with_last_byte(3), 1)
                .state(1)
                .entry_x6(1_000_000)
                .stops(900_000, 1_100_000, 0)
                .build(),
        );

        let first = reconcile(&[20], &store, &chain, &AssetCache::new(), Mode::Full, default_concurrency()).await;
        assert!(!first.is_clean());

        let second = reconcile(&[20], &store, &chain, &AssetCache::new(), Mode::Full, default_concurrency()).await;
        assert!(second.is_clean());
    }
}

