//! Duplicate-delivery suppression.
//!
//! The upstream transport redelivers on slow acknowledgements, so an
//! identical raw body can arrive more than once. Payloads are keyed by
//! content hash in a bounded insertion-ordered set; the oldest entries
//! are evicted first, which bounds memory in long-running deployments.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

/// Default number of payload hashes retained.
pub const DEFAULT_CAPACITY: usize = 4096;

type Key = [u8; 32];

/// Bounded set of recently-seen payload hashes.
pub struct DedupSet {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    seen: HashSet<Key>,
    order: VecDeque<Key>,
}

impl DedupSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Record a payload. Returns `true` the first time a body is seen,
    /// `false` for a duplicate.
    pub fn insert(&self, payload: &[u8]) -> bool {
        let key: Key = Sha256::digest(payload).into();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.seen.insert(key) {
            return false;
        }
        inner.order.push_back(key);
        if inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        true
    }
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_detected() {
        let dedup = DedupSet::new(16);
        assert!(dedup.insert(b"payload"));
        assert!(!dedup.insert(b"payload"));
        assert!(dedup.insert(b"other"));
    }

    #[test]
    fn test_bounded_eviction() {
        let dedup = DedupSet::new(2);
        assert!(dedup.insert(b"a"));
        assert!(dedup.insert(b"b"));
        assert!(dedup.insert(b"c")); // evicts "a"
        assert!(dedup.insert(b"a"));
        assert!(!dedup.insert(b"c"));
    }
}
