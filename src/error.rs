use std::fmt::Display;

use alloy::{contract, providers::PendingTransactionError, transports};

/// Whether a failure is worth retrying.
///
/// The reconciler and the consumers both branch on this instead of
/// matching on error variants directly, so adding a new transport-level
/// failure mode never requires touching call sites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Transient,
    Permanent,
}

/// Failures from the chain gateway and read client (TransientChain /
/// PermanentChain).
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("chain transport error: {0}")]
    Transport(String),

    #[error("chain request timed out")]
    Timeout,

    #[error("unexpected empty RPC response")]
    NullResp,

    #[error("malformed log or struct: {0}")]
    Decode(String),

    #[error("contract call failed: {0}")]
    Call(String),
}

impl ChainError {
    pub fn severity(&self) -> Severity {
        match self {
            ChainError::Transport(_) | ChainError::Timeout | ChainError::NullResp => {
                Severity::Transient
            }
            ChainError::Decode(_) | ChainError::Call(_) => Severity::Permanent,
        }
    }
}

impl From<contract::Error> for ChainError {
    fn from(value: contract::Error) -> Self {
        match value {
            contract::Error::UnknownFunction(_)
            | contract::Error::UnknownSelector(_)
            | contract::Error::NotADeploymentTransaction
            | contract::Error::ContractNotDeployed
            | contract::Error::ZeroData(_, _)
            | contract::Error::AbiError(_) => Self::Decode(value.to_string()),
            contract::Error::TransportError(rpc_err) => Self::from(rpc_err),
            contract::Error::PendingTransactionError(err) => err.into(),
        }
    }
}

impl From<PendingTransactionError> for ChainError {
    fn from(value: PendingTransactionError) -> Self {
        match value {
            PendingTransactionError::FailedToRegister => Self::Call(value.to_string()),
            PendingTransactionError::TransportError(rpc_err) => Self::from(rpc_err),
            PendingTransactionError::Recv(_) => Self::Transport(value.to_string()),
            PendingTransactionError::TxWatcher(_) => Self::Timeout,
        }
    }
}

impl<E: Display> From<transports::RpcError<E>> for ChainError {
    fn from(value: transports::RpcError<E>) -> Self {
        match value {
            transports::RpcError::ErrorResp(ref resp) => {
                let msg = resp.message.to_ascii_lowercase();
                if resp.code == -32603 && (msg.contains("gas") || msg.contains("oog")) {
                    Self::Call(msg)
                } else {
                    Self::Transport(value.to_string())
                }
            }
            transports::RpcError::NullResp => Self::NullResp,
            _ => Self::Transport(value.to_string()),
        }
    }
}

/// Failures from the projection store (StoreTransient / StorePermanent).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store deadlock, retry: {0}")]
    Deadlock(String),

    #[error("store constraint violation: {0}")]
    Constraint(String),

    #[error("store row decode error: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn severity(&self) -> Severity {
        match self {
            StoreError::Connection(_) | StoreError::Deadlock(_) => Severity::Transient,
            StoreError::Constraint(_) | StoreError::Decode(_) => Severity::Permanent,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        match &value {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Connection(value.to_string())
            }
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // deadlock_detected / serialization_failure
                Some("40P01") | Some("40001") => Self::Deadlock(value.to_string()),
                _ => Self::Constraint(value.to_string()),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Decode(value.to_string())
            }
            _ => Self::Connection(value.to_string()),
        }
    }
}

/// Position-lifecycle invariants violated by an incoming event
/// (StateMachineViolation), e.g. `Executed` on an id with no prior
/// `Opened`.
#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("event for unknown position {0}: missing predecessor")]
    MissingPredecessor(crate::types::PositionId),

    #[error("asset {0} not found in cache")]
    UnknownAsset(crate::types::AssetId),

    #[error(transparent)]
    Pricing(#[from] PricingError),
}

/// Pricing/bucket math failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("fixed-point value out of range: {0}")]
    Overflow(String),

    #[error("bad tick_x6 (must be > 0): {0}")]
    BadTick(i64),
}

/// Startup-only configuration failures (BadConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    MissingEnv(String),

    #[error("invalid env var {0}: {1}")]
    InvalidEnv(String, String),

    #[error(transparent)]
    Env(#[from] envy::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid address: {0}")]
    Address(#[from] alloy::primitives::AddressError),
}

/// Top-level error for the binaries; composes every other taxonomy so
/// `main` has one type to match on.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pricing(#[from] PricingError),
}

pub type Result<T> = std::result::Result<T, IndexerError>;
