//! Per-consumer-process duplicate suppression for `(block, tx, logIndex)`
//! keys. This only guards against same-process redelivery; true
//! idempotency comes from the store (upsert on id, no-op transitions) —
//! this is purely an optimization to avoid redundant store round-trips.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::types::EventId;

pub struct DedupSet {
    inner: Mutex<LruCache<EventId, Instant>>,
    ttl: Duration,
}

impl DedupSet {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).expect("capacity > 0");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Default sizing per §4.4: 5,000 entries, 5 minute TTL.
    pub fn with_defaults() -> Self {
        Self::new(5_000, Duration::from_secs(5 * 60))
    }

    /// Returns `true` if `id` was already seen within the TTL (the caller
    /// should skip reprocessing it), and records it as seen either way.
    pub fn seen(&self, id: EventId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        if let Some(seen_at) = inner.get(&id) {
            if now.duration_since(*seen_at) < self.ttl {
                return true;
            }
        }
        inner.put(id, now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::TxHash;

    fn id(n: u64) -> EventId {
        EventId::new(n, TxHash::with_last_byte(n as u8), 0)
    }

    #[test]
    fn suppresses_repeat_within_ttl() {
        let set = DedupSet::new(10, Duration::from_secs(300));
        assert!(!set.seen(id(1)));
        assert!(set.seen(id(1)));
    }

    #[test]
    fn distinct_ids_are_independent() {
        let set = DedupSet::new(10, Duration::from_secs(300));
        assert!(!set.seen(id(1)));
        assert!(!set.seen(id(2)));
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let set = DedupSet::new(2, Duration::from_secs(300));
        assert!(!set.seen(id(1)));
        assert!(!set.seen(id(2)));
        assert!(!set.seen(id(3)));
        // id(1) was evicted to make room for id(3); it's no longer tracked.
        assert!(!set.seen(id(1)));
    }
}
