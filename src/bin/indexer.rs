//! Long-running process: one `consumer::run_consumer` task per lifecycle
//! event topic, plus the lighter restart policy from §4.4 (a sliding
//! window reconcile every 10th `Opened` id) and a full `backfill::run` at
//! startup to close whatever gap accumulated while the process was down.

use std::sync::Arc;

use alloy::providers::ProviderBuilder;
use clap::Parser;
use perp_book_indexer::abi::exchange::Exchange;
use perp_book_indexer::backfill::{self, BackfillConfig};
use perp_book_indexer::chain_client::AlloyChainReader;
use perp_book_indexer::config::{CliConfig, EnvConfig};
use perp_book_indexer::consumer;
use perp_book_indexer::dedup::DedupSet;
use perp_book_indexer::error::Result as IndexerResult;
use perp_book_indexer::reconciler::{self, Concurrency, Mode};
use perp_book_indexer::store::{AssetCache, PgStore, Store};
use perp_book_indexer::types::{CloseReason, Executed, InitialState, Opened, PositionEvent, PositionId, Removed, StopsUpdated, TraderAddr};
use perp_book_indexer::Deployment;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// `InitialState::try_from`/`CloseReason::try_from` can fail on a
/// malformed enum byte, but `gateway::watch_topic`'s `decode` closure must
/// be infallible. The contract only ever emits the values its own enums
/// define, so a bad byte here means a decode-time bug, not a real
/// occurrence: log it and fall back to the conservative default rather
/// than panic the consumer task.
fn decode_opened(event: Exchange::Opened) -> PositionEvent {
    let initial_state = InitialState::try_from(event.state).unwrap_or_else(|e| {
        warn!(id = event.id, error = %e, "Opened.state out of range, defaulting to Order");
        InitialState::Order
    });
    PositionEvent::Opened(Opened {
        id: event.id,
        initial_state,
        asset: event.asset,
        long_side: event.longSide,
        lots: event.lots as i16,
        leverage_x: event.leverageX as i16,
        entry_or_target_x6: event.entryOrTargetX6,
        sl_x6: event.slX6,
        tp_x6: event.tpX6,
        liq_x6: event.liqX6,
        trader: TraderAddr::new(event.trader),
    })
}

fn decode_executed(event: Exchange::Executed) -> PositionEvent {
    PositionEvent::Executed(Executed { id: event.id, entry_x6: event.entryX6 })
}

fn decode_stops_updated(event: Exchange::StopsUpdated) -> PositionEvent {
    PositionEvent::StopsUpdated(StopsUpdated { id: event.id, sl_x6: event.slX6, tp_x6: event.tpX6 })
}

fn decode_removed(event: Exchange::Removed) -> PositionEvent {
    let reason = CloseReason::try_from(event.reason).unwrap_or_else(|e| {
        warn!(id = event.id, error = %e, "Removed.reason out of range, defaulting to Market");
        CloseReason::Market
    });
    PositionEvent::Removed(Removed {
        id: event.id,
        reason,
        exec_x6: event.execX6,
        // `I256` round-trips through its decimal `Display` impl the same
        // way `pg::decimal_to_i128` round-trips `NUMERIC` strings.
        pnl_usd6: event.pnlUsd6.to_string().parse().unwrap_or(0),
    })
}

#[tokio::main]
async fn main() -> IndexerResult<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let env = EnvConfig::from_env()?;
    let cli = CliConfig::parse();
    let deployment = Deployment::from_env(&env)?;

    info!(chain_id = deployment.chain_id(), contract = %deployment.contract_address(), "starting indexer");

    let store: Arc<dyn Store> = Arc::new(connect_store(&env).await?);

    let ws_provider = ProviderBuilder::new()
        .connect(&env.chain_ws_url)
        .await
        .map_err(|e| perp_book_indexer::error::ChainError::Transport(e.to_string()))?;
    let http_provider = ProviderBuilder::new()
        .connect(&env.chain_http_url)
        .await
        .map_err(|e| perp_book_indexer::error::ChainError::Transport(e.to_string()))?;

    let chain_reader: Arc<dyn perp_book_indexer::chain_client::ChainReads> =
        Arc::new(AlloyChainReader::new(http_provider.clone(), deployment.contract_address(), cli.rpc_conc));

    let assets = AssetCache::new();
    let dedup = Arc::new(DedupSet::with_defaults());

    // Step 1 of the §4.4 restart policy: close whatever gap accumulated
    // while this process was down before subscribing to new events.
    run_startup_backfill(store.as_ref(), chain_reader.as_ref(), &assets, &cli).await;

    let from_block = deployment.deployed_at_block();
    let contract_address = deployment.contract_address();
    let watchdog_timeout = cli.watchdog_timeout();

    let opened_window = spawn_window_reconciler(store.clone(), chain_reader.clone(), assets.clone(), cli.rpc_conc, cli.db_conc);

    let opened = tokio::spawn(consumer::run_consumer(
        "opened",
        ws_provider.clone(),
        contract_address,
        from_block,
        decode_opened,
        store.clone(),
        assets.clone(),
        dedup.clone(),
        watchdog_timeout,
        opened_window,
    ));
    let executed = tokio::spawn(consumer::run_consumer(
        "executed",
        ws_provider.clone(),
        contract_address,
        from_block,
        decode_executed,
        store.clone(),
        assets.clone(),
        dedup.clone(),
        watchdog_timeout,
        |_| {},
    ));
    let stops_updated = tokio::spawn(consumer::run_consumer(
        "stops_updated",
        ws_provider.clone(),
        contract_address,
        from_block,
        decode_stops_updated,
        store.clone(),
        assets.clone(),
        dedup.clone(),
        watchdog_timeout,
        |_| {},
    ));
    let removed = tokio::spawn(consumer::run_consumer(
        "removed",
        ws_provider.clone(),
        contract_address,
        from_block,
        decode_removed,
        store.clone(),
        assets.clone(),
        dedup.clone(),
        watchdog_timeout,
        |_| {},
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        res = opened => warn!(?res, "opened consumer exited"),
        res = executed => warn!(?res, "executed consumer exited"),
        res = stops_updated => warn!(?res, "stops_updated consumer exited"),
        res = removed => warn!(?res, "removed consumer exited"),
    }

    Ok(())
}

async fn connect_store(env: &EnvConfig) -> IndexerResult<PgStore> {
    let store = PgStore::connect(&env.database_url).await?;
    store.run_migrations().await?;
    Ok(store)
}

async fn run_startup_backfill(
    store: &dyn Store,
    chain: &dyn perp_book_indexer::chain_client::ChainReads,
    assets: &AssetCache,
    cli: &CliConfig,
) {
    let config = BackfillConfig {
        chunk_size: cli.backfill_chunk_size,
        page_size: cli.backfill_page_size,
        concurrency: Concurrency { rpc: cli.rpc_conc, db: cli.db_conc },
    };
    match backfill::run(store, chain, assets, config).await {
        Ok(report) => info!(
            holes = report.holes_found,
            tail = report.tail_found,
            chunks_failed = report.chunks_failed,
            "startup backfill complete"
        ),
        Err(e) => warn!(error = %e, "startup backfill failed, proceeding to live subscription anyway"),
    }
}

/// The lighter restart policy (§4.4): every `Opened` id that lands on a
/// multiple of 10 triggers a `Mode::Full` reconcile of the sliding window
/// `[id-9, id]`, in the background, instead of a full backfill pass.
fn spawn_window_reconciler(
    store: Arc<dyn Store>,
    chain: Arc<dyn perp_book_indexer::chain_client::ChainReads>,
    assets: AssetCache,
    rpc_conc: usize,
    db_conc: usize,
) -> impl FnMut(PositionId) {
    move |id: PositionId| {
        if id == 0 || id % 10 != 0 {
            return;
        }
        let store = store.clone();
        let chain = chain.clone();
        let assets = assets.clone();
        tokio::spawn(async move {
            let window: Vec<PositionId> = ((id.saturating_sub(9))..=id).collect();
            let concurrency = Concurrency { rpc: rpc_conc, db: db_conc };
            let summary = reconciler::reconcile(&window, store.as_ref(), chain.as_ref(), &assets, Mode::Full, concurrency).await;
            if summary.had_failures() {
                warn!(?summary, window_end = id, "restart-window reconcile had failures");
            }
        });
    }
}
