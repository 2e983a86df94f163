mod asset;
mod event;
mod position;

pub use asset::*;
pub use event::*;
pub use position::*;

use alloy::primitives::{Address, TxHash};

/// Chain-assigned ID of a position (32-bit on the wire).
pub type PositionId = u32;

/// ID of a statically configured asset/perpetual market.
pub type AssetId = u32;

/// Price bucket, `floor(price_x6 / tick_x6)`.
pub type BucketId = i64;

/// Fixed-point price/money quantity, scaled by 10^6.
pub type FixedX6 = i64;

/// Point in chain history a log was observed at.
///
/// Doubles as the cross-restart idempotency key for a single event,
/// per `(block, tx, logIndex)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventId {
    pub block: u64,
    pub tx_hash: TxHash,
    pub log_index: u64,
}

impl EventId {
    pub fn new(block: u64, tx_hash: TxHash, log_index: u64) -> Self {
        Self {
            block,
            tx_hash,
            log_index,
        }
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.block, self.tx_hash, self.log_index)
    }
}

/// Normalized trader address: always lowercased, matching the generated
/// lowercase column the store keys case-insensitive lookups on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TraderAddr(Address);

impl TraderAddr {
    pub fn new(address: Address) -> Self {
        Self(address)
    }

    pub fn as_address(&self) -> Address {
        self.0
    }

    /// Lowercase `0x`-prefixed hex representation, as persisted.
    pub fn lowercase_hex(&self) -> String {
        format!("{:#x}", self.0)
    }
}

impl std::fmt::Display for TraderAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lowercase_hex())
    }
}
