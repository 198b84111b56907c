//! Bounded deduplication window for inbound completion events.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::types::IdempotencyKey;

/// Bounded recent-window cache of observed idempotency keys.
///
/// The only structure in the crate mutated concurrently across unrelated
/// instances, so it takes its own lock and nothing else. Capacity bounds
/// memory: once full, the oldest observed key is evicted first. The window
/// should be sized to the expected number of deliveries in flight — a key
/// evicted while its duplicate is still in transit would be accepted again
/// at this layer, which is why the coordinator re-checks keys against its
/// in-flight table before accepting effects.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    seen: FxHashSet<IdempotencyKey>,
    order: VecDeque<IdempotencyKey>,
}

impl DedupCache {
    /// A zero capacity is clamped to one entry.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Record `key`; returns `true` the first time a key is seen within the
    /// window and `false` for duplicates.
    pub fn observe(&self, key: IdempotencyKey) -> bool {
        let mut inner = self.inner.lock();
        if inner.seen.contains(&key) {
            return false;
        }
        inner.seen.insert(key.clone());
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
        true
    }

    /// Number of keys currently held in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstanceId, NodeId};

    fn key(n: u64) -> IdempotencyKey {
        IdempotencyKey::mint(&InstanceId::from("i"), &NodeId::from("n"), n)
    }

    #[test]
    fn first_observation_accepts_duplicate_rejects() {
        let cache = DedupCache::new(8);
        assert!(cache.observe(key(1)));
        assert!(!cache.observe(key(1)));
        assert!(cache.observe(key(2)));
    }

    #[test]
    fn oldest_keys_evicted_first() {
        let cache = DedupCache::new(2);
        assert!(cache.observe(key(1)));
        assert!(cache.observe(key(2)));
        assert!(cache.observe(key(3))); // evicts key(1)
        assert_eq!(cache.len(), 2);
        assert!(cache.observe(key(1)), "evicted key is observable again");
        assert!(!cache.observe(key(3)));
    }
}
