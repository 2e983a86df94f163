//! On-demand reconciliation CLI: either a list of ids (`--ids`) or a full
//! gap-detection pass (`--backfill`), both driving the same
//! `reconciler`/`backfill` entry points the long-running indexer uses.

use clap::Parser;
use perp_book_indexer::backfill::{self, BackfillConfig};
use perp_book_indexer::chain_client::AlloyChainReader;
use perp_book_indexer::config::EnvConfig;
use perp_book_indexer::error::Result as IndexerResult;
use perp_book_indexer::reconciler::{self, Concurrency, Mode};
use perp_book_indexer::store::{AssetCache, PgStore};
use perp_book_indexer::types::PositionId;
use perp_book_indexer::Deployment;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "perp-reconcile")]
struct Args {
    /// Comma-separated position ids to reconcile. Ignored if `--backfill`
    /// is set.
    #[arg(long, value_delimiter = ',')]
    ids: Vec<PositionId>,

    /// Run the full gap/hole-detection backfill pass instead of
    /// reconciling an explicit id list.
    #[arg(long)]
    backfill: bool,

    /// `stateOf` only, skipping the `getTrade` field comparison.
    #[arg(long)]
    state_only: bool,

    #[arg(long, env = "DB_CONC", default_value_t = 500)]
    db_conc: usize,

    #[arg(long, env = "RPC_CONC", default_value_t = 100)]
    rpc_conc: usize,

    #[arg(long, env = "BACKFILL_CHUNK_SIZE", default_value_t = 400)]
    backfill_chunk_size: usize,

    #[arg(long, env = "BACKFILL_PAGE_SIZE", default_value_t = 10_000)]
    backfill_page_size: i64,
}

#[tokio::main]
async fn main() -> IndexerResult<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let env = EnvConfig::from_env()?;
    let deployment = Deployment::from_env(&env)?;

    let store = PgStore::connect(&env.database_url).await?;
    store.run_migrations().await?;

    let http_provider = alloy::providers::ProviderBuilder::new()
        .connect(&env.chain_http_url)
        .await
        .map_err(|e| perp_book_indexer::error::ChainError::Transport(e.to_string()))?;
    let chain = AlloyChainReader::new(http_provider, deployment.contract_address(), args.rpc_conc);
    let assets = AssetCache::new();
    let concurrency = Concurrency { rpc: args.rpc_conc, db: args.db_conc };

    let exit_code = if args.backfill {
        let config = BackfillConfig {
            chunk_size: args.backfill_chunk_size,
            page_size: args.backfill_page_size,
            concurrency,
        };
        let report = backfill::run(&store, &chain, &assets, config).await?;
        println!("{report:#?}");
        report.exit_code()
    } else {
        let mode = if args.state_only { Mode::StateOnly } else { Mode::Full };
        let summary = reconciler::reconcile(&args.ids, &store, &chain, &assets, mode, concurrency).await;
        println!("{summary:#?}");
        if summary.had_failures() { 1 } else { 0 }
    };

    std::process::exit(exit_code);
}
