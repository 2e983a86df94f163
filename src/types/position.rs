use chrono::{DateTime, Utc};

use super::{AssetId, BucketId, EventId, FixedX6, PositionId, TraderAddr};

/// Lifecycle state of a position.
///
/// Transitions are one-way: `Order -> Open`, `{Order, Open} -> {Closed,
/// Cancelled}`. No other edge is valid; see `crate::state_machine`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "position_state", rename_all = "UPPERCASE")]
pub enum PositionState {
    Order,
    Open,
    Closed,
    Cancelled,
}

impl PositionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionState::Closed | PositionState::Cancelled)
    }
}

/// Why a position left the book, set once on `Removed`.
///
/// Maps 1:1 to the chain's `Removed.reason` (0..4); unknown values are
/// rejected rather than defaulted, per the stringly-typed-in-source design
/// note.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "close_reason", rename_all = "UPPERCASE")]
pub enum CloseReason {
    Cancelled,
    Market,
    Sl,
    Tp,
    Liq,
}

impl TryFrom<u8> for CloseReason {
    type Error = InvalidCloseReason;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CloseReason::Cancelled),
            1 => Ok(CloseReason::Market),
            2 => Ok(CloseReason::Sl),
            3 => Ok(CloseReason::Tp),
            4 => Ok(CloseReason::Liq),
            other => Err(InvalidCloseReason(other)),
        }
    }
}

impl CloseReason {
    /// The terminal `PositionState` implied by this reason.
    pub fn terminal_state(&self) -> PositionState {
        match self {
            CloseReason::Cancelled => PositionState::Cancelled,
            _ => PositionState::Closed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown Removed.reason value: {0}")]
pub struct InvalidCloseReason(pub u8);

/// Which stop a `stop_buckets` row represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StopType {
    Sl = 1,
    Tp = 2,
    Liq = 3,
}

impl StopType {
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }
}

/// On-chain `stateOf()` result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChainState {
    Order,
    Open,
    Closed,
    Cancelled,
}

impl TryFrom<u8> for ChainState {
    type Error = InvalidChainState;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChainState::Order),
            1 => Ok(ChainState::Open),
            2 => Ok(ChainState::Closed),
            3 => Ok(ChainState::Cancelled),
            other => Err(InvalidChainState(other)),
        }
    }
}

impl From<ChainState> for PositionState {
    fn from(value: ChainState) -> Self {
        match value {
            ChainState::Order => PositionState::Order,
            ChainState::Open => PositionState::Open,
            ChainState::Closed => PositionState::Closed,
            ChainState::Cancelled => PositionState::Cancelled,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown stateOf() value: {0}")]
pub struct InvalidChainState(pub u8);

/// Full projection row. Never hard-deleted; terminal states keep their last
/// values and simply stop taking further mutating transitions.
#[derive(Clone, Debug, PartialEq)]
pub struct Position {
    pub id: PositionId,
    pub state: PositionState,
    pub asset_id: AssetId,
    pub trader_addr: TraderAddr,
    pub long_side: bool,
    pub lots: i16,
    pub leverage_x: i16,
    pub entry_x6: FixedX6,
    pub target_x6: FixedX6,
    pub sl_x6: FixedX6,
    pub tp_x6: FixedX6,
    pub liq_x6: FixedX6,
    /// Only meaningful while `state == Open`.
    pub notional_usd6: Option<i128>,
    pub margin_usd6: Option<i128>,
    pub close_reason: Option<CloseReason>,
    pub opened_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub last_tx_hash: Option<String>,
    pub last_block_num: Option<i64>,
    pub target_bucket: Option<BucketId>,
    pub sl_bucket: Option<BucketId>,
    pub tp_bucket: Option<BucketId>,
    pub liq_bucket: Option<BucketId>,
}

impl Position {
    /// Records where an event was last observed, for the audit trail
    /// columns. Called by every `ingest*` store operation.
    pub(crate) fn mark_seen(&mut self, seen_at: &EventId) {
        self.last_tx_hash = Some(seen_at.tx_hash.to_string());
        self.last_block_num = Some(seen_at.block as i64);
    }
}

/// Side a bucket row is filed under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn of(long_side: bool) -> Self {
        if long_side { Side::Long } else { Side::Short }
    }

    /// The antagonistic side a stop trades into.
    pub fn antagonistic(long_side: bool) -> Self {
        Side::of(!long_side)
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Side::Long)
    }
}

/// A `order_buckets` row: present iff `state = ORDER` and `target_x6 != 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderBucketEntry {
    pub asset_id: AssetId,
    pub bucket_id: BucketId,
    pub position_id: PositionId,
    pub lots: i16,
    pub side: Side,
}

/// A `stop_buckets` row: present iff `state = OPEN` and the corresponding
/// stop price is non-zero. `side` is always the antagonistic side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopBucketEntry {
    pub asset_id: AssetId,
    pub bucket_id: BucketId,
    pub position_id: PositionId,
    pub stop_type: StopType,
    pub lots: i16,
    pub side: Side,
}

/// Running per-`(asset_id, side)` sums over `OPEN` positions only,
/// maintained by a store-side trigger rather than application code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExposureAgg {
    pub asset_id: AssetId,
    pub side: Side,
    pub sum_lots: i64,
    pub sum_entry_x6_lots: i128,
    pub sum_leverage_lots: i64,
    pub sum_liq_x6_lots: i128,
    pub sum_liq_lots: i64,
    pub positions_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_maps_chain_values() {
        assert_eq!(CloseReason::try_from(0).unwrap(), CloseReason::Cancelled);
        assert_eq!(CloseReason::try_from(3).unwrap(), CloseReason::Tp);
        assert!(CloseReason::try_from(5).is_err());
    }

    #[test]
    fn close_reason_terminal_state() {
        assert_eq!(
            CloseReason::Cancelled.terminal_state(),
            PositionState::Cancelled
        );
        assert_eq!(CloseReason::Market.terminal_state(), PositionState::Closed);
        assert_eq!(CloseReason::Liq.terminal_state(), PositionState::Closed);
    }

    #[test]
    fn chain_state_3_is_cancelled_2_is_closed() {
        assert_eq!(ChainState::try_from(3).unwrap(), ChainState::Cancelled);
        assert_eq!(ChainState::try_from(2).unwrap(), ChainState::Closed);
        assert_eq!(
            PositionState::from(ChainState::try_from(3).unwrap()),
            PositionState::Cancelled
        );
    }
}
