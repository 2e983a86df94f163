//! In-memory fakes for the chain-read client, so the reconciler and
//! backfill controller can be unit-tested without a live chain — the same
//! separation the teacher draws between `TradeProcessor` (pure logic) and
//! `listener::start`/`testing::TestExchange` (I/O).

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::Address;

use crate::chain_client::{ChainReads, Trade};
use crate::error::ChainError;
use crate::types::{AssetId, PositionId};

/// A scripted, in-memory stand-in for `AlloyChainReader`. Tests seed it
/// with the "authoritative" chain state for a set of ids; the reconciler
/// and backfill controller drive against it exactly as they would a live
/// `ChainReads` impl.
#[derive(Default)]
pub struct FakeChain {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    trades: HashMap<PositionId, Trade>,
    states: HashMap<PositionId, u8>,
    next_id: u32,
    /// Ids that should surface a transient RPC failure on the next call.
    failing: HashMap<PositionId, usize>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_next_id(&self, next_id: u32) {
        self.inner.lock().unwrap().next_id = next_id;
    }

    /// Seeds both `getTrade` and `stateOf` for `id` from one `Trade`.
    pub fn seed(&self, id: PositionId, trade: Trade) {
        let mut inner = self.inner.lock().unwrap();
        inner.states.insert(id, trade.state);
        inner.trades.insert(id, trade);
    }

    pub fn remove(&self, id: PositionId) {
        let mut inner = self.inner.lock().unwrap();
        inner.trades.remove(&id);
        inner.states.remove(&id);
    }

    /// `id` fails with a transient error for the next `times` calls to
    /// either read, then serves normally.
    pub fn fail_next(&self, id: PositionId, times: usize) {
        self.inner.lock().unwrap().failing.insert(id, times);
    }

    fn take_failure(&self, id: PositionId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if let Some(remaining) = inner.failing.get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        false
    }
}

#[async_trait::async_trait]
impl ChainReads for FakeChain {
    async fn get_trade(&self, id: PositionId) -> Result<Option<Trade>, ChainError> {
        if self.take_failure(id) {
            return Err(ChainError::Timeout);
        }
        Ok(self.inner.lock().unwrap().trades.get(&id).cloned())
    }

    async fn state_of(&self, id: PositionId) -> Result<u8, ChainError> {
        if self.take_failure(id) {
            return Err(ChainError::Timeout);
        }
        self.inner
            .lock()
            .unwrap()
            .states
            .get(&id)
            .copied()
            .ok_or_else(|| ChainError::Call(format!("no such position {id}")))
    }

    async fn next_id(&self) -> Result<u32, ChainError> {
        Ok(self.inner.lock().unwrap().next_id)
    }
}

/// Builds a `Trade` with sane defaults, overridden field-by-field — avoids
/// an 11-field struct literal in every test.
pub struct TradeBuilder {
    trade: Trade,
}

impl TradeBuilder {
    pub fn new(owner: Address, asset: AssetId) -> Self {
        Self {
            trade: Trade {
                owner,
                asset,
                long_side: true,
                state: 0,
                lots: 1,
                leverage_x: 1,
                entry_x6: 0,
                target_x6: 0,
                sl_x6: 0,
                tp_x6: 0,
                liq_x6: 0,
            },
        }
    }

    pub fn state(mut self, state: u8) -> Self {
        self.trade.state = state;
        self
    }

    pub fn long_side(mut self, long_side: bool) -> Self {
        self.trade.long_side = long_side;
        self
    }

    pub fn lots(mut self, lots: i16) -> Self {
        self.trade.lots = lots;
        self
    }

    pub fn leverage_x(mut self, leverage_x: i16) -> Self {
        self.trade.leverage_x = leverage_x;
        self
    }

    pub fn entry_x6(mut self, entry_x6: i64) -> Self {
        self.trade.entry_x6 = entry_x6;
        self
    }

    pub fn target_x6(mut self, target_x6: i64) -> Self {
        self.trade.target_x6 = target_x6;
        self
    }

    pub fn stops(mut self, sl_x6: i64, tp_x6: i64, liq_x6: i64) -> Self {
        self.trade.sl_x6 = sl_x6;
        self.trade.tp_x6 = tp_x6;
        self.trade.liq_x6 = liq_x6;
        self
    }

    pub fn build(self) -> Trade {
        self.trade
    }
}
