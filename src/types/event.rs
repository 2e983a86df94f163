use super::{AssetId, CloseReason, EventId, PositionId, PositionState, TraderAddr};

/// A decoded position-lifecycle event together with the log coordinates it
/// was observed at.
///
/// The coordinates are the cross-restart idempotency key (`dedup`,
/// §4.4) and are also what every consumer, reconciler-injected event and
/// `last_tx_hash`/`last_block_num` audit trail is keyed on.
#[derive(Clone, Debug)]
pub struct Envelope<T> {
    pub id: EventId,
    pub event: T,
}

impl<T> Envelope<T> {
    pub fn new(id: EventId, event: T) -> Self {
        Self { id, event }
    }

    pub(crate) fn map<U>(&self, event: U) -> Envelope<U> {
        Envelope {
            id: self.id,
            event,
        }
    }
}

/// One of the four logical position-lifecycle events, strongly typed (the
/// duck-typed payloads of the original source become variants here).
#[derive(Clone, Copy, Debug)]
pub enum PositionEvent {
    Opened(Opened),
    Executed(Executed),
    StopsUpdated(StopsUpdated),
    Removed(Removed),
}

impl PositionEvent {
    pub fn position_id(&self) -> PositionId {
        match self {
            PositionEvent::Opened(e) => e.id,
            PositionEvent::Executed(e) => e.id,
            PositionEvent::StopsUpdated(e) => e.id,
            PositionEvent::Removed(e) => e.id,
        }
    }
}

/// Initial state a freshly opened position is created in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitialState {
    Order,
    Open,
}

impl TryFrom<u8> for InitialState {
    type Error = InvalidInitialState;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InitialState::Order),
            1 => Ok(InitialState::Open),
            other => Err(InvalidInitialState(other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown Opened.state value: {0}")]
pub struct InvalidInitialState(pub u8);

impl From<InitialState> for PositionState {
    fn from(value: InitialState) -> Self {
        match value {
            InitialState::Order => PositionState::Order,
            InitialState::Open => PositionState::Open,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Opened {
    pub id: PositionId,
    pub initial_state: InitialState,
    pub asset: AssetId,
    pub long_side: bool,
    pub lots: i16,
    pub leverage_x: i16,
    /// `target_x6` if `initial_state == Order`, `entry_x6` if `Open`.
    pub entry_or_target_x6: i64,
    pub sl_x6: i64,
    pub tp_x6: i64,
    pub liq_x6: i64,
    pub trader: TraderAddr,
}

#[derive(Clone, Copy, Debug)]
pub struct Executed {
    pub id: PositionId,
    pub entry_x6: i64,
}

#[derive(Clone, Copy, Debug)]
pub struct StopsUpdated {
    pub id: PositionId,
    pub sl_x6: i64,
    pub tp_x6: i64,
}

#[derive(Clone, Copy, Debug)]
pub struct Removed {
    pub id: PositionId,
    pub reason: CloseReason,
    pub exec_x6: i64,
    pub pnl_usd6: i128,
}
