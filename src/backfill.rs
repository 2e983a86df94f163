//! Finds and closes gaps between the projection and the chain (§4.7).
//! Mirrors the shape of `margin_topup/bot.rs::run`'s outer loop: build from
//! current state, then drive the work to completion, reporting via
//! `tracing` as it goes.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::chain_client::ChainReads;
use crate::error::Result as IndexerResult;
use crate::reconciler::{self, Concurrency, Mode, Summary};
use crate::store::{AssetCache, ListOrder, Store};
use crate::types::PositionId;

/// Id 0 is never chain-assigned (§4.7); excluded from hole detection by
/// convention.
const FIRST_ID: PositionId = 1;

#[derive(Clone, Copy, Debug)]
pub struct BackfillConfig {
    /// Ids per reconciler dispatch (default 400).
    pub chunk_size: usize,
    /// Page size when listing present ids to find holes (default 10,000).
    pub page_size: i64,
    pub concurrency: Concurrency,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self { chunk_size: 400, page_size: 10_000, concurrency: Concurrency { rpc: 100, db: 500 } }
    }
}

/// Aggregate result of one backfill run, across every chunk dispatched.
#[derive(Clone, Debug, Default)]
pub struct BackfillReport {
    pub summary: Summary,
    pub holes_found: usize,
    pub tail_found: usize,
    pub chunks_run: usize,
    pub chunks_failed: usize,
}

impl BackfillReport {
    /// Non-zero iff any chunk failed — the process exit code this report
    /// should drive (§4.7: "continue with remaining chunks; final exit code
    /// reflects whether any chunk failed").
    pub fn exit_code(&self) -> i32 {
        if self.chunks_failed > 0 { 1 } else { 0 }
    }
}

/// Runs the full gap/hole-detection + chunked-reconcile algorithm once.
pub async fn run(
    store: &dyn Store,
    chain: &dyn ChainReads,
    assets: &AssetCache,
    config: BackfillConfig,
) -> IndexerResult<BackfillReport> {
    let ids = diff(store, chain, config.page_size).await?;
    info!(holes = ids.holes.len(), tail = ids.tail.len(), "backfill scope computed");

    let mut report = BackfillReport { holes_found: ids.holes.len(), tail_found: ids.tail.len(), ..Default::default() };

    let all: Vec<PositionId> = ids.holes.into_iter().chain(ids.tail).collect();
    for chunk in all.chunks(config.chunk_size.max(1)) {
        let chunk_summary = reconciler::reconcile(chunk, store, chain, assets, Mode::Full, config.concurrency).await;
        report.chunks_run += 1;
        if chunk_summary.had_failures() {
            report.chunks_failed += 1;
            warn!(
                chunk_len = chunk.len(),
                rpc_failed = chunk_summary.rpc_failed,
                store_failed = chunk_summary.store_failed,
                "backfill chunk had failures, continuing with remaining chunks"
            );
        }
        report.summary.add(chunk_summary);
    }

    info!(
        chunks_run = report.chunks_run,
        chunks_failed = report.chunks_failed,
        created = report.summary.created,
        executed = report.summary.executed,
        removed = report.summary.removed,
        "backfill complete"
    );
    Ok(report)
}

struct IdDiff {
    holes: Vec<PositionId>,
    tail: Vec<PositionId>,
}

/// Steps 1-4 of §4.7's algorithm: `chainMax = nextId() - 1`, `dbMax` +
/// present ids via paginated listing, `holes = {1..dbMax} \ present`, and
/// the tail `[dbMax+1..chainMax]` if the chain is ahead.
async fn diff(store: &dyn Store, chain: &dyn ChainReads, page_size: i64) -> IndexerResult<IdDiff> {
    let next_id = chain.next_id().await?;
    let chain_max = next_id.saturating_sub(1);

    let db_max = store.max_id().await?.unwrap_or(0);

    let mut present = HashSet::with_capacity(db_max as usize);
    let mut offset = 0i64;
    loop {
        let page = store.list_ids(page_size, offset, ListOrder::Asc).await?;
        let page_len = page.len();
        present.extend(page);
        if (page_len as i64) < page_size {
            break;
        }
        offset += page_size;
    }

    let holes: Vec<PositionId> = (FIRST_ID..=db_max).filter(|id| !present.contains(id)).collect();

    let tail: Vec<PositionId> =
        if db_max < chain_max { ((db_max + 1)..=chain_max).collect() } else { Vec::new() };

    Ok(IdDiff { holes, tail })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use crate::testing::{FakeChain, TradeBuilder};
    use crate::types::{Asset, Position, PositionState, TraderAddr};
    use alloy::primitives::Address;
    use chrono::Utc;

    fn asset() -> Asset {
        Asset { asset_id: 1, symbol: "ETH".into(), tick_x6: 100_000, lot_num: 1, lot_den: 1 }
    }

    fn order_position(id: PositionId) -> Position {
        Position {
            id,
            state: PositionState::Order,
            asset_id: 1,
            trader_addr: TraderAddr::new(Address::with_last_byte(1)),
            long_side: true,
            lots: 1,
            leverage_x: 1,
            entry_x6: 0,
            target_x6: 1_000_000,
            sl_x6: 0,
            tp_x6: 0,
            liq_x6: 0,
            notional_usd6: None,
            margin_usd6: None,
            close_reason: None,
            opened_at: Utc::now(),
            executed_at: None,
            closed_at: None,
            cancelled_at: None,
            last_tx_hash: None,
            last_block_num: None,
            target_bucket: Some(10),
            sl_bucket: None,
            tp_bucket: None,
            liq_bucket: None,
        }
    }

    #[tokio::test]
    async fn finds_holes_and_tail_and_reconciles_both() {
        let store = MockStore::new();
        store.seed_asset(asset());
        store.seed(order_position(1));
        store.seed(order_position(3));
        // id 2 is a hole below dbMax=3; chain nextId=5 makes id 4 a tail entry.

        let chain = FakeChain::new();
        chain.set_next_id(5);
        for id in [2u32, 4u32] {
            chain.seed(id, TradeBuilder::new(Address::with_last_byte(1), 1).state(0).target_x6(1_000_000).build());
        }

        let assets = AssetCache::new();
        let report = run(
            &store,
            &chain,
            &assets,
            BackfillConfig { chunk_size: 10, page_size: 10_000, ..Default::default() },
        )
        .await
        .unwrap();

        assert_eq!(report.holes_found, 1);
        assert_eq!(report.tail_found, 1);
        assert_eq!(report.chunks_failed, 0);
        assert_eq!(report.summary.created, 2);
        assert_eq!(report.exit_code(), 0);

        assert!(store.read_position(2).await.unwrap().is_some());
        assert!(store.read_position(4).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn no_gaps_when_projection_matches_chain() {
        let store = MockStore::new();
        store.seed_asset(asset());
        store.seed(order_position(1));

        let chain = FakeChain::new();
        chain.set_next_id(2);

        let assets = AssetCache::new();
        let report = run(&store, &chain, &assets, BackfillConfig::default()).await.unwrap();

        assert_eq!(report.holes_found, 0);
        assert_eq!(report.tail_found, 0);
        assert_eq!(report.chunks_run, 0);
    }
}
