//! End-to-end coverage across consumer ingestion, reconciliation and
//! backfill, wired together the way `bin/indexer.rs` and `bin/reconcile.rs`
//! do, but against `MockStore`/`FakeChain` instead of a live chain.

use alloy::primitives::{Address, TxHash};
use perp_book_indexer::consumer::{self, Outcome};
use perp_book_indexer::dedup::DedupSet;
use perp_book_indexer::reconciler::{self, Concurrency, Mode};
use perp_book_indexer::store::{AssetCache, MockStore, Store};
use perp_book_indexer::testing::{FakeChain, TradeBuilder};
use perp_book_indexer::types::{
    Asset, CloseReason, Envelope, EventId, Executed, InitialState, Opened, PositionEvent,
    PositionState, Removed, TraderAddr,
};

fn asset() -> Asset {
    Asset { asset_id: 1, symbol: "ETH".into(), tick_x6: 100_000, lot_num: 1, lot_den: 1 }
}

fn event_id(n: u64) -> EventId {
    EventId::new(n, TxHash::with_last_byte(n as u8), 0)
}

fn trader() -> TraderAddr {
    TraderAddr::new(Address::with_last_byte(1))
}

/// Full lifecycle through the consumer path alone: Opened(ORDER) ->
/// Executed -> StopsUpdated -> Removed(TP), each applied as its own
/// envelope the way four separate topic subscriptions would deliver them.
#[tokio::test]
async fn consumer_drives_full_lifecycle_to_closed() {
    let store = MockStore::new();
    let assets = AssetCache::new();
    assets.insert(asset());
    let dedup = DedupSet::with_defaults();

    let opened = Envelope::new(
        event_id(1),
        PositionEvent::Opened(Opened {
            id: 100,
            initial_state: InitialState::Order,
            asset: 1,
            long_side: true,
            lots: 10,
            leverage_x: 5,
            entry_or_target_x6: 1_000_000,
            sl_x6: 900_000,
            tp_x6: 1_100_000,
            liq_x6: 800_000,
            trader: trader(),
        }),
    );
    assert_eq!(consumer::ingest_event(&store, &assets, &dedup, &opened).await, Outcome::Applied);
    assert_eq!(store.read_position(100).await.unwrap().unwrap().state, PositionState::Order);

    let executed = Envelope::new(
        event_id(2),
        PositionEvent::Executed(Executed { id: 100, entry_x6: 1_005_000 }),
    );
    assert_eq!(consumer::ingest_event(&store, &assets, &dedup, &executed).await, Outcome::Applied);
    let position = store.read_position(100).await.unwrap().unwrap();
    assert_eq!(position.state, PositionState::Open);
    assert_eq!(position.entry_x6, 1_005_000);

    let stops_updated = Envelope::new(
        event_id(3),
        PositionEvent::StopsUpdated(perp_book_indexer::types::StopsUpdated {
            id: 100,
            sl_x6: 950_000,
            tp_x6: 1_150_000,
        }),
    );
    assert_eq!(consumer::ingest_event(&store, &assets, &dedup, &stops_updated).await, Outcome::Applied);
    let position = store.read_position(100).await.unwrap().unwrap();
    assert_eq!(position.sl_x6, 950_000);
    assert_eq!(position.tp_x6, 1_150_000);
    assert_eq!(position.liq_x6, 800_000, "StopsUpdated never touches LIQ");

    let removed = Envelope::new(
        event_id(4),
        PositionEvent::Removed(Removed { id: 100, reason: CloseReason::Tp, exec_x6: 1_150_000, pnl_usd6: 725_000 }),
    );
    assert_eq!(consumer::ingest_event(&store, &assets, &dedup, &removed).await, Outcome::Applied);
    let position = store.read_position(100).await.unwrap().unwrap();
    assert_eq!(position.state, PositionState::Closed);
    assert_eq!(position.close_reason, Some(CloseReason::Tp));

    let buckets = store.read_buckets(100).await.unwrap();
    assert!(buckets.order.is_empty());
    assert!(buckets.stops.is_empty(), "terminal position keeps no bucket rows");
}

/// Drift fixed in place: the consumer applies Opened(ORDER), but the
/// chain has already moved the position to OPEN by the time the
/// reconciler runs (Executed was missed). `Mode::Full` should both
/// transition the state and backfill the entry price from `getTrade`.
#[tokio::test]
async fn reconciler_repairs_drift_the_consumer_missed() {
    let store = MockStore::new();
    store.seed_asset(asset());
    let assets = AssetCache::new();
    let dedup = DedupSet::with_defaults();

    let opened = Envelope::new(
        event_id(1),
        PositionEvent::Opened(Opened {
            id: 200,
            initial_state: InitialState::Order,
            asset: 1,
            long_side: true,
            lots: 2,
            leverage_x: 3,
            entry_or_target_x6: 1_000_000,
            sl_x6: 0,
            tp_x6: 0,
            liq_x6: 0,
            trader: trader(),
        }),
    );
    assert_eq!(consumer::ingest_event(&store, &assets, &dedup, &opened).await, Outcome::Applied);
    assert_eq!(store.read_position(200).await.unwrap().unwrap().state, PositionState::Order);

    let chain = FakeChain::new();
    chain.seed(
        200,
        TradeBuilder::new(trader().as_address(), 1)
            .state(1) // OPEN on chain; the consumer's copy is still ORDER
            .long_side(true)
            .lots(2)
            .leverage_x(3)
            .entry_x6(1_010_000)
            .build(),
    );

    let concurrency = Concurrency { rpc: 10, db: 10 };
    let summary = reconciler::reconcile(&[200], &store, &chain, &assets, Mode::Full, concurrency).await;

    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.executed, 1);

    let position = store.read_position(200).await.unwrap().unwrap();
    assert_eq!(position.state, PositionState::Open);
    assert_eq!(position.entry_x6, 1_010_000);

    // Converges to a clean no-op on a second pass against the same chain state.
    let second = reconciler::reconcile(&[200], &store, &chain, &assets, Mode::Full, concurrency).await;
    assert!(second.is_clean());
    assert_eq!(second.executed, 0);
}

/// A position the consumer never saw at all (e.g. the process was down
/// when `Opened` fired) is fully materialized by `Mode::Full`
/// reconciliation from `getTrade` alone.
#[tokio::test]
async fn reconciler_creates_position_missing_entirely_from_consumer() {
    let store = MockStore::new();
    store.seed_asset(asset());
    let assets = AssetCache::new();

    let chain = FakeChain::new();
    chain.seed(
        300,
        TradeBuilder::new(trader().as_address(), 1)
            .state(0)
            .target_x6(2_000_000)
            .build(),
    );

    let concurrency = Concurrency { rpc: 10, db: 10 };
    let summary = reconciler::reconcile(&[300], &store, &chain, &assets, Mode::Full, concurrency).await;

    assert_eq!(summary.created, 1);
    assert!(store.read_position(300).await.unwrap().is_some());
}
