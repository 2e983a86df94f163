//! Configuration for the indexer and reconciler binaries.
//!
//! Split the same way `margin_topup::config` splits it: connection and
//! credential details come from the environment (`envy`, with `dotenvy`
//! loading a local `.env` first), process-level knobs are `clap` flags.

use std::time::Duration;

use alloy::primitives::Address;
use clap::Parser;

use crate::error::ConfigError;

/// Connection/credential details, loaded from the environment.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EnvConfig {
    pub database_url: String,
    pub chain_ws_url: String,
    pub chain_http_url: String,
    pub contract_address: String,
    pub chain_id: u64,
    pub deployed_at_block: u64,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        envy::from_env().map_err(ConfigError::from)
    }

    pub fn contract_address(&self) -> Result<Address, ConfigError> {
        self.contract_address
            .parse()
            .map_err(|_| ConfigError::InvalidEnv("CONTRACT_ADDRESS".into(), self.contract_address.clone()))
    }
}

/// Process-wide concurrency caps and chunk sizes (§5, §4.7), as CLI flags
/// with env fallback via `clap`'s `env` feature.
#[derive(Debug, Clone, Parser)]
#[command(name = "perp-indexer")]
pub struct CliConfig {
    /// Concurrent store writes per reconciler invocation.
    #[arg(long, env = "DB_CONC", default_value_t = 500)]
    pub db_conc: usize,

    /// Concurrent chain reads per reconciler invocation.
    #[arg(long, env = "RPC_CONC", default_value_t = 100)]
    pub rpc_conc: usize,

    /// IDs per reconciler dispatch during backfill.
    #[arg(long, env = "BACKFILL_CHUNK_SIZE", default_value_t = 400)]
    pub backfill_chunk_size: usize,

    /// Page size when listing present IDs to find holes.
    #[arg(long, env = "BACKFILL_PAGE_SIZE", default_value_t = 10_000)]
    pub backfill_page_size: i64,

    /// No-event idle timeout before a consumer task is restarted.
    #[arg(long, env = "WATCHDOG_TIMEOUT_SECS", default_value_t = 15)]
    pub watchdog_timeout_secs: u64,

    /// API bind port. Unused by this crate directly (the read API is an
    /// external collaborator, §1) but kept here so one `.env` configures
    /// the whole deployment.
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    pub api_port: u16,
}

impl CliConfig {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_config_defaults_match_spec() {
        let cli = CliConfig::parse_from(["perp-indexer"]);
        assert_eq!(cli.db_conc, 500);
        assert_eq!(cli.rpc_conc, 100);
        assert_eq!(cli.backfill_chunk_size, 400);
        assert_eq!(cli.backfill_page_size, 10_000);
        assert_eq!(cli.watchdog_timeout_secs, 15);
    }
}
