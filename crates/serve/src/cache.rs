//! Bounded two-queue cache for resolution results.
//!
//! Entries land in a probationary queue and only graduate to the protected
//! queue when they are accessed a second time. A one-off crawl over many
//! distinct paths therefore churns the probationary queue without evicting
//! the long-term hot set. Both queues evict least-recently-used on pressure.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Fraction of the total capacity reserved for probationary entries.
const PROBATIONARY_SHARE: usize = 4;

pub struct TwoQueueCache<K: Hash + Eq, V> {
    probationary: LruCache<K, V>,
    protected: LruCache<K, V>,
}

impl<K: Hash + Eq, V: Clone> TwoQueueCache<K, V> {
    /// Capacities below 4 entries are raised to 4 so both queues exist.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(4);
        let probationary = (capacity / PROBATIONARY_SHARE).max(1);
        let protected = (capacity - probationary).max(1);
        Self {
            probationary: LruCache::new(NonZeroUsize::new(probationary).expect("non-zero")),
            protected: LruCache::new(NonZeroUsize::new(protected).expect("non-zero")),
        }
    }

    /// A hit in the probationary queue graduates the entry to the protected
    /// queue; a protected hit only refreshes recency.
    pub fn get(&mut self, key: &K) -> Option<V> {
        if let Some(value) = self.protected.get(key) {
            return Some(value.clone());
        }
        if let Some((key, value)) = self.probationary.pop_entry(key) {
            self.protected.push(key, value.clone());
            return Some(value);
        }
        None
    }

    /// Insert without changing queue membership of an existing entry.
    pub fn put(&mut self, key: K, value: V) {
        if self.protected.contains(&key) {
            self.protected.put(key, value);
        } else {
            self.probationary.put(key, value);
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.protected.contains(key) || self.probationary.contains(key)
    }

    pub fn len(&self) -> usize {
        self.protected.len() + self.probationary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
