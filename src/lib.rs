//! Perpetual order book indexer/reconciler.
//!
//! # Overview
//!
//! Folds the four position-lifecycle events emitted by a perpetual-futures
//! exchange contract (`Opened`, `Executed`, `StopsUpdated`, `Removed`) into a
//! relational projection — `positions`, `order_buckets`, `stop_buckets`,
//! `exposure_agg` — and keeps that projection converged with authoritative
//! on-chain state.
//!
//! [`gateway::watch_topic`] delivers a gap-free, at-least-once sequence of
//! decoded events per topic; [`consumer::run_consumer`] drives each topic
//! through [`state_machine::apply`] into a [`store::Store`].
//! [`reconciler::reconcile`] and [`backfill::run`] converge the same
//! projection against [`chain_client::ChainReads`] truth, on-demand or by
//! gap detection, through the same state-machine entry points.
//!
//! # Testing
//!
//! [`testing`] provides an in-memory [`chain_client::ChainReads`] fake;
//! [`store::MockStore`] is the matching in-memory [`store::Store`].

pub mod abi;
pub mod backfill;
pub mod chain_client;
pub mod config;
pub mod consumer;
pub mod dedup;
pub mod error;
pub mod gateway;
pub mod num;
pub mod reconciler;
pub mod state_machine;
pub mod store;
pub mod testing;
pub mod types;
pub mod watchdog;

use crate::config::EnvConfig;
use crate::error::ConfigError;
use alloy::primitives::Address;

/// The chain + contract coordinates a running indexer is pinned to, parsed
/// once at startup from [`EnvConfig`].
#[derive(Clone, Debug)]
pub struct Deployment {
    chain_id: u64,
    contract_address: Address,
    deployed_at_block: u64,
}

impl Deployment {
    pub fn from_env(config: &EnvConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            chain_id: config.chain_id,
            contract_address: config.contract_address()?,
            deployed_at_block: config.deployed_at_block,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub fn deployed_at_block(&self) -> u64 {
        self.deployed_at_block
    }
}
