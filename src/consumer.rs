//! Long-lived, per-topic subscriber tasks (§4.4) driving the state machine.
//!
//! `ingest_event` is the pure-ish, store-bound core — apply one decoded
//! event to the projection — kept separate from `run_consumer`'s I/O loop
//! the same way `state_machine::apply` is kept separate from its callers.
//! This split is what lets the consumer's actual logic be unit-tested with
//! `MockStore` instead of a live chain subscription, mirroring the
//! `TradeProcessor` / `listener::run_listener` split in the teacher.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::sol_types::SolEvent;
use tracing::{debug, info, warn};

use crate::dedup::DedupSet;
use crate::error::{ChainError, Severity, StateMachineError};
use crate::gateway;
use crate::state_machine;
use crate::store::{AssetCache, Store};
use crate::types::{Envelope, PositionEvent, PositionId};
use crate::watchdog::{self, WatchdogError};

/// Bounded retry budget for `StoreError::Transient` before an event is
/// dropped for this attempt (the reconciler will eventually repair it).
const STORE_RETRY_BUDGET: usize = 3;
const STORE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// What happened to one decoded envelope, for logging and tests.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    DuplicateSuppressed,
    MissingPredecessor,
    UnknownAsset,
    BadTick,
    StoreDropped,
}

/// Applies one decoded event to the projection: dedup, load current state
/// + asset, run the state machine, apply the resulting ops with a bounded
/// retry on transient store errors.
pub async fn ingest_event(
    store: &dyn Store,
    assets: &AssetCache,
    dedup: &DedupSet,
    envelope: &Envelope<PositionEvent>,
) -> Outcome {
    if dedup.seen(envelope.id) {
        debug!(event_id = %envelope.id, "suppressing same-process duplicate");
        return Outcome::DuplicateSuppressed;
    }

    let id = envelope.event.position_id();
    let current = match store.read_position(id).await {
        Ok(current) => current,
        Err(e) => {
            warn!(position_id = id, error = %e, "failed reading current position, dropping event for this attempt");
            return Outcome::StoreDropped;
        }
    };

    let asset_id = match (&envelope.event, &current) {
        (PositionEvent::Opened(opened), _) => opened.asset,
        (_, Some(position)) => position.asset_id,
        (_, None) => {
            warn!(position_id = id, "event for unknown position: missing predecessor");
            return Outcome::MissingPredecessor;
        }
    };

    let asset = match assets.get(asset_id) {
        Some(asset) => asset,
        None => match store.read_asset(asset_id).await {
            Ok(Some(asset)) => {
                assets.insert(asset.clone());
                asset
            }
            Ok(None) => {
                warn!(asset_id, "unknown asset, dropping event");
                return Outcome::UnknownAsset;
            }
            Err(e) => {
                warn!(asset_id, error = %e, "failed reading asset, dropping event");
                return Outcome::StoreDropped;
            }
        },
    };

    let ops = match state_machine::apply(current.as_ref(), &asset, &envelope.event, envelope.id) {
        Ok(ops) => ops,
        Err(StateMachineError::MissingPredecessor(id)) => {
            warn!(position_id = id, "missing predecessor, reconciler will repair");
            return Outcome::MissingPredecessor;
        }
        Err(StateMachineError::UnknownAsset(asset_id)) => {
            warn!(asset_id, "unknown asset during apply");
            return Outcome::UnknownAsset;
        }
        Err(StateMachineError::Pricing(e)) => {
            warn!(position_id = id, error = %e, "bad tick, dropping event");
            return Outcome::BadTick;
        }
    };

    for op in ops {
        if !apply_with_retry(store, op).await {
            return Outcome::StoreDropped;
        }
    }

    info!(position_id = id, event_id = %envelope.id, "applied position event");
    Outcome::Applied
}

async fn apply_with_retry(store: &dyn Store, op: crate::store::StoreOp) -> bool {
    let mut attempt = 0;
    loop {
        match store.apply(op.clone()).await {
            Ok(()) => return true,
            Err(e) if e.severity() == Severity::Transient && attempt < STORE_RETRY_BUDGET => {
                attempt += 1;
                warn!(attempt, error = %e, "transient store error, retrying");
                tokio::time::sleep(STORE_RETRY_DELAY).await;
            }
            Err(e) => {
                warn!(error = %e, "store error exhausted retry budget or permanent, dropping event");
                return false;
            }
        }
    }
}

/// Drives one topic end-to-end: gateway stream -> watchdog -> dedup ->
/// state machine -> store, restarting on idle/closed/transport error. Runs
/// until cancelled; the caller spawns one of these per topic so a stuck
/// subscription can't starve the others (§9).
#[allow(clippy::too_many_arguments)]
pub async fn run_consumer<P, E>(
    label: &'static str,
    provider: P,
    contract_address: Address,
    mut from_block: u64,
    decode: impl Fn(E) -> PositionEvent + Copy + Send + Sync + 'static,
    store: Arc<dyn Store>,
    assets: AssetCache,
    dedup: Arc<DedupSet>,
    watchdog_timeout: Duration,
    mut on_applied: impl FnMut(PositionId),
) where
    P: Provider + Clone + 'static,
    E: SolEvent + Send + 'static,
{
    loop {
        info!(consumer = label, from_block, "starting subscription");
        let stream = gateway::watch_topic(provider.clone(), contract_address, from_block, decode, tokio::time::sleep);
        let mut stream = pin!(stream);

        loop {
            match watchdog::next_or_idle(&mut stream, watchdog_timeout).await {
                Ok(envelopes) => {
                    for envelope in &envelopes {
                        from_block = envelope.id.block + 1;
                        let outcome = ingest_event(store.as_ref(), &assets, &dedup, envelope).await;
                        if outcome == Outcome::Applied {
                            on_applied(envelope.event.position_id());
                        }
                    }
                }
                Err(WatchdogError::Idle) => {
                    warn!(consumer = label, "no event within watchdog timeout, restarting");
                    break;
                }
                Err(WatchdogError::StreamClosed) => {
                    warn!(consumer = label, "event stream closed, restarting");
                    break;
                }
                Err(WatchdogError::Upstream(err)) => {
                    let severity = match &err {
                        ChainError::Decode(_) | ChainError::Call(_) => "permanent",
                        _ => "transient",
                    };
                    warn!(consumer = label, error = %err, severity, "gateway error, restarting");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use crate::types::{Asset, EventId, InitialState, Opened, PositionEvent, TraderAddr};
    use alloy::primitives::{Address, TxHash};

    fn assets_with(asset: Asset) -> AssetCache {
        let cache = AssetCache::new();
        cache.insert(asset);
        cache
    }

    fn event_id(n: u64) -> EventId {
        EventId::new(n, TxHash::with_last_byte(n as u8), 0)
    }

    fn opened_envelope(id: u32) -> Envelope<PositionEvent> {
        Envelope::new(
            event_id(id as u64),
            PositionEvent::Opened(Opened {
                id,
                initial_state: InitialState::Order,
                asset: 1,
                long_side: true,
                lots: 2,
                leverage_x: 5,
                entry_or_target_x6: 1_000_000,
                sl_x6: 0,
                tp_x6: 0,
                liq_x6: 0,
                trader: TraderAddr::new(Address::with_last_byte(9)),
            }),
        )
    }

    #[tokio::test]
    async fn applies_opened_and_creates_position() {
        let store = MockStore::new();
        let assets = assets_with(Asset {
            asset_id: 1,
            symbol: "ETH".into(),
            tick_x6: 100_000,
            lot_num: 1,
            lot_den: 1,
        });
        let dedup = DedupSet::with_defaults();
        let envelope = opened_envelope(42);

        let outcome = ingest_event(&store, &assets, &dedup, &envelope).await;
        assert_eq!(outcome, Outcome::Applied);

        let pos = store.read_position(42).await.unwrap().unwrap();
        assert_eq!(pos.target_x6, 1_000_000);
    }

    #[tokio::test]
    async fn same_process_redelivery_is_suppressed() {
        let store = MockStore::new();
        let assets = assets_with(Asset {
            asset_id: 1,
            symbol: "ETH".into(),
            tick_x6: 100_000,
            lot_num: 1,
            lot_den: 1,
        });
        let dedup = DedupSet::with_defaults();
        let envelope = opened_envelope(7);

        assert_eq!(ingest_event(&store, &assets, &dedup, &envelope).await, Outcome::Applied);
        assert_eq!(
            ingest_event(&store, &assets, &dedup, &envelope).await,
            Outcome::DuplicateSuppressed
        );
    }

    #[tokio::test]
    async fn executed_without_predecessor_is_reported_missing() {
        let store = MockStore::new();
        let assets = assets_with(Asset {
            asset_id: 1,
            symbol: "ETH".into(),
            tick_x6: 100_000,
            lot_num: 1,
            lot_den: 1,
        });
        let dedup = DedupSet::with_defaults();
        let envelope = Envelope::new(
            event_id(1),
            PositionEvent::Executed(crate::types::Executed { id: 99, entry_x6: 1_000_000 }),
        );

        let outcome = ingest_event(&store, &assets, &dedup, &envelope).await;
        assert_eq!(outcome, Outcome::MissingPredecessor);
    }

    #[tokio::test]
    async fn unknown_asset_is_dropped_without_panicking() {
        let store = MockStore::new();
        let assets = AssetCache::new();
        let dedup = DedupSet::with_defaults();
        let envelope = opened_envelope(5);

        let outcome = ingest_event(&store, &assets, &dedup, &envelope).await;
        assert_eq!(outcome, Outcome::UnknownAsset);
        assert!(store.read_position(5).await.unwrap().is_none());
    }
}
