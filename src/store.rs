//! Decoded-image storage.
//!
//! [`DecodedImageStore`] is a concurrent map from file id to bitmap that can be
//! read while a prefetch worker writes. [`BitmapCache`] pairs it with a
//! [`RecencyTracker`] and keeps the two in lock-step: every mutation of the
//! pair happens under one mutex, so "check capacity, evict, insert" is atomic.

use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::bitmap::Bitmap;
use crate::file_table::FileId;
use crate::recency::RecencyTracker;

/// Concurrent map of decoded bitmaps keyed by file id.
#[derive(Default)]
pub struct DecodedImageStore {
    images: DashMap<FileId, Arc<Bitmap>>,
}

impl DecodedImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FileId) -> Option<Arc<Bitmap>> {
        self.images.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Store a bitmap, replacing any previous one for `id`.
    pub fn put(&self, id: FileId, bitmap: Arc<Bitmap>) {
        self.images.insert(id, bitmap);
    }

    pub fn remove(&self, id: FileId) -> Option<Arc<Bitmap>> {
        self.images.remove(&id).map(|(_, bitmap)| bitmap)
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.images.contains_key(&id)
    }

    pub fn clear(&self) {
        self.images.clear();
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Snapshot of the stored ids, in no particular order.
    pub fn ids(&self) -> Vec<FileId> {
        self.images.iter().map(|entry| *entry.key()).collect()
    }
}

/// A capacity-bounded bitmap cache with least-recently-used eviction.
pub struct BitmapCache {
    images: DecodedImageStore,
    recency: Mutex<RecencyTracker<FileId>>,
}

impl BitmapCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            images: DecodedImageStore::new(),
            recency: Mutex::new(RecencyTracker::new(capacity)),
        }
    }

    /// Cache a bitmap, evicting the least recently used one if full.
    pub fn insert(&self, id: FileId, bitmap: Arc<Bitmap>) {
        let mut recency = self.recency.lock();
        if !self.images.contains(id) && recency.is_full() {
            if let Some(evicted) = recency.evict_least_recent() {
                self.images.remove(evicted);
                log::debug!("Evicted bitmap {} to make room for {}", evicted, id);
            }
        }
        self.images.put(id, bitmap);
        if let Some(dropped) = recency.promote(id) {
            // The eviction above already made room; reaching this means the
            // store held a key the tracker did not.
            log::warn!("Recency tracker overflowed, dropping {}", dropped);
            self.images.remove(dropped);
        }
    }

    /// Look up a bitmap and mark it most recently used.
    ///
    /// A bitmap found in the store but not in the tracker is an inconsistency;
    /// it is dropped and reported as a miss.
    pub fn get(&self, id: FileId) -> Option<Arc<Bitmap>> {
        let bitmap = self.images.get(id)?;
        let mut recency = self.recency.lock();
        if recency.contains(&id) {
            recency.promote(id);
            return Some(bitmap);
        }
        if self.images.contains(id) {
            log::warn!("Bitmap {} cached without recency entry, treating as miss", id);
            self.images.remove(id);
            return None;
        }
        // Evicted between the read and taking the lock; the bitmap we already
        // hold is still valid.
        Some(bitmap)
    }

    /// Look up a bitmap without touching its recency.
    pub fn peek(&self, id: FileId) -> Option<Arc<Bitmap>> {
        self.images.get(id)
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.images.contains(id)
    }

    /// Remove a bitmap from both the store and the tracker.
    ///
    /// Returns `false` if it was not cached.
    pub fn invalidate(&self, id: FileId) -> bool {
        let mut recency = self.recency.lock();
        let stored = self.images.remove(id).is_some();
        let tracked = recency.remove(&id);
        if stored != tracked {
            log::warn!(
                "Bitmap {} was only partially cached (store: {}, tracker: {})",
                id,
                stored,
                tracked
            );
        }
        stored || tracked
    }

    pub fn clear(&self) {
        let mut recency = self.recency.lock();
        self.images.clear();
        recency.clear();
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.recency.lock().capacity()
    }

    /// Ids from most to least recently used.
    pub fn recency_order(&self) -> Vec<FileId> {
        self.recency.lock().iter().copied().collect()
    }

    /// Whether every tracked id is stored and vice versa.
    pub fn is_consistent(&self) -> bool {
        let recency = self.recency.lock();
        recency.len() == self.images.len() && recency.iter().all(|id| self.images.contains(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::PixelFormat;
    use std::thread;

    fn bitmap(value: u8) -> Arc<Bitmap> {
        Arc::new(Bitmap::filled(2, 2, PixelFormat::Rgb24, &[value, value, value]))
    }

    fn cache(capacity: usize) -> BitmapCache {
        BitmapCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_store_last_writer_wins() {
        let store = DecodedImageStore::new();
        store.put(FileId(1), bitmap(1));
        store.put(FileId(1), bitmap(2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(FileId(1)).unwrap().pixels()[0], 2);
        assert!(store.remove(FileId(1)).is_some());
        assert!(store.get(FileId(1)).is_none());
    }

    #[test]
    fn test_insert_beyond_capacity_evicts_least_recent() {
        let c = cache(3);
        for id in 1..=3 {
            c.insert(FileId(id), bitmap(id as u8));
        }
        // Touch 1 so that 2 becomes least recent
        assert!(c.get(FileId(1)).is_some());
        c.insert(FileId(4), bitmap(4));

        assert_eq!(c.len(), 3);
        assert!(!c.contains(FileId(2)));
        assert!(c.contains(FileId(1)));
        assert_eq!(c.recency_order(), vec![FileId(4), FileId(1), FileId(3)]);
        assert!(c.is_consistent());
    }

    #[test]
    fn test_reinsert_existing_key_does_not_evict() {
        let c = cache(2);
        c.insert(FileId(1), bitmap(1));
        c.insert(FileId(2), bitmap(2));
        c.insert(FileId(1), bitmap(9));
        assert_eq!(c.len(), 2);
        assert_eq!(c.peek(FileId(1)).unwrap().pixels()[0], 9);
        assert!(c.contains(FileId(2)));
    }

    #[test]
    fn test_invalidate_removes_from_both() {
        let c = cache(2);
        c.insert(FileId(1), bitmap(1));
        assert!(c.invalidate(FileId(1)));
        assert!(!c.invalidate(FileId(1)));
        assert!(c.is_empty());
        assert!(c.recency_order().is_empty());
        assert!(c.is_consistent());
    }

    #[test]
    fn test_peek_does_not_promote() {
        let c = cache(2);
        c.insert(FileId(1), bitmap(1));
        c.insert(FileId(2), bitmap(2));
        c.peek(FileId(1));
        c.insert(FileId(3), bitmap(3));
        assert!(!c.contains(FileId(1)));
    }

    #[test]
    fn test_concurrent_inserts_respect_capacity() {
        let c = Arc::new(cache(5));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..200 {
                        let id = FileId(t * 1000 + i);
                        c.insert(id, bitmap(1));
                        c.get(FileId(t * 1000 + i / 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(c.len(), 5);
        assert!(c.is_consistent());
    }
}
