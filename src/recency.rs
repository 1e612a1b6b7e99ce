//! Recency ordering of cached keys.
//!
//! The tracker only remembers *order*; the decoded images themselves live in
//! [`DecodedImageStore`](crate::store::DecodedImageStore). Every operation is
//! O(1) thanks to the hash-indexed linked list inside [`lru::LruCache`].

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

/// A bounded, most-recently-used ordering of keys.
pub struct RecencyTracker<K: Hash + Eq> {
    order: LruCache<K, ()>,
}

impl<K: Hash + Eq + Clone> RecencyTracker<K> {
    /// Create a tracker holding at most `capacity` keys.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            order: LruCache::new(capacity),
        }
    }

    /// Mark `key` as most recently used, inserting it if absent.
    ///
    /// If the tracker was full and `key` is new, the least recently used key
    /// is dropped to make room and returned.
    pub fn promote(&mut self, key: K) -> Option<K> {
        if self.order.contains(&key) {
            self.order.promote(&key);
            return None;
        }
        self.order.push(key, ()).map(|(evicted, _)| evicted)
    }

    /// Remove and return the least recently used key.
    pub fn evict_least_recent(&mut self) -> Option<K> {
        self.order.pop_lru().map(|(key, _)| key)
    }

    /// Remove `key`. Returns `false` if it was not tracked.
    pub fn remove(&mut self, key: &K) -> bool {
        self.order.pop(key).is_some()
    }

    /// Whether the tracker holds `capacity` keys.
    pub fn is_full(&self) -> bool {
        self.order.len() >= self.order.cap().get()
    }

    /// Whether `key` is tracked. Does not change its recency.
    pub fn contains(&self, key: &K) -> bool {
        self.order.contains(key)
    }

    /// The key that would be evicted next.
    pub fn least_recent(&self) -> Option<&K> {
        self.order.peek_lru().map(|(key, _)| key)
    }

    pub fn most_recent(&self) -> Option<&K> {
        self.order.iter().next().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.order.cap().get()
    }

    /// Keys from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.order.iter().map(|(key, _)| key)
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}
