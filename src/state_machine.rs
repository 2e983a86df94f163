//! The pure position-lifecycle transition table. Takes the position's
//! current row (if any), its asset's tick metadata, and an incoming event;
//! returns the exact store operations that apply it. No I/O, no
//! suspension points — the same split the teacher draws between
//! `TradeProcessor::process_event` and the task that drives it.

use crate::error::StateMachineError;
use crate::num;
use crate::store::{IngestExecuted, IngestOpened, IngestRemoved, IngestStopsUpdated, StoreOp};
use crate::types::{
    Asset, EventId, Executed, InitialState, Opened, Position, PositionEvent, PositionState,
    Removed, StopsUpdated,
};

/// Applies one event against the current state. Returns the store
/// operations needed to converge, or nothing when the event is already
/// reflected (idempotent re-application).
pub fn apply(
    current: Option<&Position>,
    asset: &Asset,
    event: &PositionEvent,
    seen_at: EventId,
) -> Result<Vec<StoreOp>, StateMachineError> {
    // Terminal states never change again; re-asserting index cleanliness
    // for a terminal id is the reconciler's job, not the consumer path's.
    if current.is_some_and(|p| p.state.is_terminal()) {
        return Ok(vec![]);
    }

    match event {
        PositionEvent::Opened(event) => apply_opened(current, asset, event, seen_at),
        PositionEvent::Executed(event) => apply_executed(current, asset, event, seen_at),
        PositionEvent::StopsUpdated(event) => apply_stops_updated(current, asset, event, seen_at),
        PositionEvent::Removed(event) => apply_removed(current, event, seen_at),
    }
}

fn apply_opened(
    current: Option<&Position>,
    asset: &Asset,
    event: &Opened,
    seen_at: EventId,
) -> Result<Vec<StoreOp>, StateMachineError> {
    // Opened is an upsert: re-applying with identical fields is harmless,
    // so we don't special-case `current.is_some()` here.
    let state = PositionState::from(event.initial_state);
    let (entry_x6, target_x6) = match event.initial_state {
        InitialState::Order => (0, event.entry_or_target_x6),
        InitialState::Open => (event.entry_or_target_x6, 0),
    };

    let target_bucket = non_zero_bucket(target_x6, asset.tick_x6)?;
    let sl_bucket = non_zero_bucket(event.sl_x6, asset.tick_x6)?;
    let tp_bucket = non_zero_bucket(event.tp_x6, asset.tick_x6)?;
    let liq_bucket = non_zero_bucket(event.liq_x6, asset.tick_x6)?;

    let (notional_usd6, margin_usd6) = if state == PositionState::Open {
        let notional = num::notional_usd6(entry_x6, event.lots, asset.lot_num, asset.lot_den)?;
        (Some(notional), Some(num::margin_usd6(notional, event.leverage_x)?))
    } else {
        (None, None)
    };

    Ok(vec![StoreOp::IngestOpened(IngestOpened {
        id: event.id,
        state,
        asset_id: event.asset,
        trader: event.trader,
        long_side: event.long_side,
        lots: event.lots,
        leverage_x: event.leverage_x,
        entry_x6,
        target_x6,
        sl_x6: event.sl_x6,
        tp_x6: event.tp_x6,
        liq_x6: event.liq_x6,
        target_bucket,
        sl_bucket,
        tp_bucket,
        liq_bucket,
        notional_usd6,
        margin_usd6,
        seen_at,
    })])
}

fn apply_executed(
    current: Option<&Position>,
    asset: &Asset,
    event: &Executed,
    seen_at: EventId,
) -> Result<Vec<StoreOp>, StateMachineError> {
    let Some(current) = current else {
        return Err(StateMachineError::MissingPredecessor(event.id));
    };

    // No-op if already OPEN with the same entry price (idempotent
    // re-application, e.g. at-least-once redelivery).
    if current.state == PositionState::Open && current.entry_x6 == event.entry_x6 {
        return Ok(vec![]);
    }

    let notional = num::notional_usd6(event.entry_x6, current.lots, asset.lot_num, asset.lot_den)?;
    let margin = num::margin_usd6(notional, current.leverage_x)?;

    Ok(vec![StoreOp::IngestExecuted(IngestExecuted {
        id: event.id,
        entry_x6: event.entry_x6,
        notional_usd6: notional,
        margin_usd6: margin,
        sl_x6: current.sl_x6,
        tp_x6: current.tp_x6,
        liq_x6: current.liq_x6,
        sl_bucket: non_zero_bucket(current.sl_x6, asset.tick_x6)?,
        tp_bucket: non_zero_bucket(current.tp_x6, asset.tick_x6)?,
        liq_bucket: non_zero_bucket(current.liq_x6, asset.tick_x6)?,
        seen_at,
    })])
}

fn apply_stops_updated(
    current: Option<&Position>,
    asset: &Asset,
    event: &StopsUpdated,
    seen_at: EventId,
) -> Result<Vec<StoreOp>, StateMachineError> {
    let Some(current) = current else {
        return Err(StateMachineError::MissingPredecessor(event.id));
    };

    if current.sl_x6 == event.sl_x6 && current.tp_x6 == event.tp_x6 {
        return Ok(vec![]);
    }

    Ok(vec![StoreOp::IngestStopsUpdated(IngestStopsUpdated {
        id: event.id,
        sl_x6: event.sl_x6,
        tp_x6: event.tp_x6,
        sl_bucket: non_zero_bucket(event.sl_x6, asset.tick_x6)?,
        tp_bucket: non_zero_bucket(event.tp_x6, asset.tick_x6)?,
        seen_at,
    })])
}

fn apply_removed(
    current: Option<&Position>,
    event: &Removed,
    seen_at: EventId,
) -> Result<Vec<StoreOp>, StateMachineError> {
    let Some(current) = current else {
        return Err(StateMachineError::MissingPredecessor(event.id));
    };

    if current.state.is_terminal() && current.close_reason == Some(event.reason) {
        return Ok(vec![]);
    }

    Ok(vec![StoreOp::IngestRemoved(IngestRemoved {
        id: event.id,
        reason: event.reason,
        exec_x6: event.exec_x6,
        pnl_usd6: event.pnl_usd6,
        seen_at,
    })])
}

fn non_zero_bucket(
    price_x6: i64,
    tick_x6: i64,
) -> Result<Option<i64>, StateMachineError> {
    if price_x6 == 0 {
        return Ok(None);
    }
    Ok(Some(num::bucket(price_x6, tick_x6)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CloseReason, Side, TraderAddr};
    use alloy::primitives::{Address, TxHash};

    fn asset() -> Asset {
        Asset {
            asset_id: 1,
            symbol: "ETH".into(),
            tick_x6: 100_000,
            lot_num: 1,
            lot_den: 1,
        }
    }

    fn event_id(n: u64) -> EventId {
        EventId::new(n, TxHash::with_last_byte(n as u8), 0)
    }

    fn trader() -> TraderAddr {
        TraderAddr::new(Address::with_last_byte(1))
    }

    /// S1-shaped scenario: Opened(ORDER) creates a row with no entry and a
    /// populated target bucket.
    #[test]
    fn opened_order_inserts_order_bucket_only() {
        let event = PositionEvent::Opened(Opened {
            id: 1,
            initial_state: InitialState::Order,
            asset: 1,
            long_side: true,
            lots: 10,
            leverage_x: 5,
            entry_or_target_x6: 2_000_000,
            sl_x6: 0,
            tp_x6: 0,
            liq_x6: 0,
            trader: trader(),
        });
        let ops = apply(None, &asset(), &event, event_id(1)).unwrap();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            StoreOp::IngestOpened(op) => {
                assert_eq!(op.state, PositionState::Order);
                assert_eq!(op.target_x6, 2_000_000);
                assert_eq!(op.entry_x6, 0);
                assert_eq!(op.target_bucket, Some(20));
                assert!(op.notional_usd6.is_none());
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    /// S2-shaped scenario: Opened(OPEN) inserts stop_buckets with the
    /// antagonistic side and computes notional/margin.
    #[test]
    fn opened_open_inserts_stops_with_antagonistic_side() {
        let event = PositionEvent::Opened(Opened {
            id: 2,
            initial_state: InitialState::Open,
            asset: 1,
            long_side: true,
            lots: 4,
            leverage_x: 2,
            entry_or_target_x6: 1_000_000,
            sl_x6: 900_000,
            tp_x6: 1_100_000,
            liq_x6: 800_000,
            trader: trader(),
        });
        let ops = apply(None, &asset(), &event, event_id(2)).unwrap();
        match &ops[0] {
            StoreOp::IngestOpened(op) => {
                assert_eq!(op.state, PositionState::Open);
                assert_eq!(op.entry_x6, 1_000_000);
                assert_eq!(op.target_x6, 0);
                assert_eq!(op.notional_usd6, Some(4_000_000));
                assert_eq!(op.margin_usd6, Some(2_000_000));
                assert_eq!(op.sl_bucket, Some(9));
                assert_eq!(op.liq_bucket, Some(8));
            }
            other => panic!("unexpected op: {other:?}"),
        }
        let _ = Side::antagonistic(true);
    }

    fn open_position(id: u32) -> Position {
        Position {
            id,
            state: PositionState::Order,
            asset_id: 1,
            trader_addr: trader(),
            long_side: true,
            lots: 4,
            leverage_x: 2,
            entry_x6: 0,
            target_x6: 1_000_000,
            sl_x6: 900_000,
            tp_x6: 1_100_000,
            liq_x6: 800_000,
            notional_usd6: None,
            margin_usd6: None,
            close_reason: None,
            opened_at: chrono::Utc::now(),
            executed_at: None,
            closed_at: None,
            cancelled_at: None,
            last_tx_hash: None,
            last_block_num: None,
            target_bucket: Some(10),
            sl_bucket: Some(9),
            tp_bucket: Some(11),
            liq_bucket: Some(8),
        }
    }

    /// S3-shaped scenario: Executed transitions ORDER -> OPEN, deletes
    /// order_buckets (handled store-side) and reinserts stops from the
    /// position's own stop prices.
    #[test]
    fn executed_transitions_order_to_open() {
        let position = open_position(3);
        let event = PositionEvent::Executed(Executed { id: 3, entry_x6: 1_005_000 });
        let ops = apply(Some(&position), &asset(), &event, event_id(3)).unwrap();
        match &ops[0] {
            StoreOp::IngestExecuted(op) => {
                assert_eq!(op.entry_x6, 1_005_000);
                assert_eq!(op.notional_usd6, 4_020_000);
                assert_eq!(op.margin_usd6, 2_010_000);
                assert_eq!(op.sl_x6, 900_000);
                assert_eq!(op.liq_x6, 800_000);
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn executed_is_idempotent_when_already_open_with_same_entry() {
        let mut position = open_position(4);
        position.state = PositionState::Open;
        position.entry_x6 = 1_005_000;
        let event = PositionEvent::Executed(Executed { id: 4, entry_x6: 1_005_000 });
        let ops = apply(Some(&position), &asset(), &event, event_id(4)).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn executed_on_missing_position_is_missing_predecessor() {
        let event = PositionEvent::Executed(Executed { id: 5, entry_x6: 1_000_000 });
        let err = apply(None, &asset(), &event, event_id(5)).unwrap_err();
        assert!(matches!(err, StateMachineError::MissingPredecessor(5)));
    }

    /// S4-shaped scenario: StopsUpdated replaces SL/TP but LIQ is
    /// untouched (never present in the op).
    #[test]
    fn stops_updated_replaces_sl_tp_never_touches_liq() {
        let mut position = open_position(6);
        position.state = PositionState::Open;
        position.entry_x6 = 1_000_000;
        position.target_x6 = 0;
        let event = PositionEvent::StopsUpdated(StopsUpdated {
            id: 6,
            sl_x6: 950_000,
            tp_x6: 1_150_000,
        });
        let ops = apply(Some(&position), &asset(), &event, event_id(6)).unwrap();
        match &ops[0] {
            StoreOp::IngestStopsUpdated(op) => {
                assert_eq!(op.sl_x6, 950_000);
                assert_eq!(op.tp_x6, 1_150_000);
                assert_eq!(op.sl_bucket, Some(9));
                assert_eq!(op.tp_bucket, Some(11));
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    /// S5-shaped scenario: Removed(CANCELLED) moves to CANCELLED.
    #[test]
    fn removed_cancelled_sets_cancelled_state() {
        let position = open_position(7);
        let event = PositionEvent::Removed(Removed {
            id: 7,
            reason: CloseReason::Cancelled,
            exec_x6: 0,
            pnl_usd6: 0,
        });
        let ops = apply(Some(&position), &asset(), &event, event_id(7)).unwrap();
        match &ops[0] {
            StoreOp::IngestRemoved(op) => assert_eq!(op.reason, CloseReason::Cancelled),
            other => panic!("unexpected op: {other:?}"),
        }
    }

    /// S6-shaped scenario: Removed(LIQ) moves to CLOSED and is idempotent
    /// on re-application.
    #[test]
    fn removed_liq_sets_closed_and_is_idempotent() {
        let mut position = open_position(8);
        position.state = PositionState::Open;
        let event = PositionEvent::Removed(Removed {
            id: 8,
            reason: CloseReason::Liq,
            exec_x6: 790_000,
            pnl_usd6: -50_000,
        });
        let ops = apply(Some(&position), &asset(), &event, event_id(8)).unwrap();
        assert_eq!(ops.len(), 1);

        position.state = PositionState::Closed;
        position.close_reason = Some(CloseReason::Liq);
        let ops = apply(Some(&position), &asset(), &event, event_id(8)).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn bad_tick_propagates_from_bucket_mapping() {
        let mut broken_asset = asset();
        broken_asset.tick_x6 = 0;
        let event = PositionEvent::Opened(Opened {
            id: 9,
            initial_state: InitialState::Order,
            asset: 1,
            long_side: true,
            lots: 1,
            leverage_x: 1,
            entry_or_target_x6: 1_000_000,
            sl_x6: 0,
            tp_x6: 0,
            liq_x6: 0,
            trader: trader(),
        });
        let err = apply(None, &broken_asset, &event, event_id(9)).unwrap_err();
        assert!(matches!(
            err,
            StateMachineError::Pricing(crate::error::PricingError::BadTick(0))
        ));
    }
}
