//! Background decoding of neighbor images.
//!
//! The coordinator keeps one in-flight entry per file id while a decode is
//! outstanding. A second request for the same id joins the existing decode
//! instead of starting another one. Decodes run on a small rayon pool and
//! write their result into the shared [`BitmapCache`].
//!
//! On completion the entry is removed from the map *before* waiters are woken,
//! so a decode that failed or panicked never blocks a later attempt.
//!
//! Started decodes are never cancelled. [`PrefetchCoordinator::reset`] bumps a
//! generation counter instead; decodes started under an older generation still
//! wake their waiters but do not populate the cache.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::bitmap::Bitmap;
use crate::config::CacheSettings;
use crate::error::CacheError;
use crate::file_table::FileId;
use crate::loader::DecodeOutcome;
use crate::store::BitmapCache;

/// Which decode results get written into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Cache every result, placeholders included
    Always,
    /// Skip placeholders for missing or corrupt files
    UnlessCorrupt,
}

impl CachePolicy {
    fn should_cache(self, outcome: &DecodeOutcome) -> bool {
        match self {
            CachePolicy::Always => true,
            CachePolicy::UnlessCorrupt => !outcome.is_corrupt_or_missing,
        }
    }
}

enum Slot {
    Pending,
    /// `None` when the decode panicked
    Done(Option<Arc<Bitmap>>),
}

/// One outstanding decode.
struct InFlight {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: Option<Arc<Bitmap>>) {
        *self.slot.lock() = Slot::Done(result);
        self.ready.notify_all();
    }

    fn wait(&self) -> Option<Arc<Bitmap>> {
        let mut slot = self.slot.lock();
        loop {
            if let Slot::Done(result) = &*slot {
                return result.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    fn is_done(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Done(_))
    }
}

/// A caller's view of an outstanding decode.
pub struct PrefetchHandle {
    id: FileId,
    inner: Arc<InFlight>,
}

impl PrefetchHandle {
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Block until the decode finishes.
    ///
    /// Returns `None` if the decode panicked.
    pub fn wait(&self) -> Option<Arc<Bitmap>> {
        self.inner.wait()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_done()
    }
}

struct Shared {
    cache: Arc<BitmapCache>,
    in_flight: DashMap<FileId, Arc<InFlight>>,
    /// Held for reading while a result is written into the cache
    generation: RwLock<u64>,
}

/// Finishes an in-flight entry when dropped, even during a panic.
struct Completion {
    shared: Arc<Shared>,
    id: FileId,
    entry: Arc<InFlight>,
    generation: u64,
    result: Option<Arc<Bitmap>>,
}

impl Completion {
    fn finish(mut self, outcome: DecodeOutcome, policy: CachePolicy) -> Arc<Bitmap> {
        let cache_it = policy.should_cache(&outcome);
        let bitmap = Arc::new(outcome.bitmap);
        if cache_it {
            let generation = self.shared.generation.read();
            if *generation == self.generation {
                self.shared.cache.insert(self.id, Arc::clone(&bitmap));
            } else {
                log::debug!("Discarding stale decode of {}", self.id);
            }
        }
        self.result = Some(Arc::clone(&bitmap));
        bitmap
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.result.is_none() {
            log::error!("Decode of {} did not complete", self.id);
        }
        self.shared
            .in_flight
            .remove_if(&self.id, |_, entry| Arc::ptr_eq(entry, &self.entry));
        self.entry.complete(self.result.take());
    }
}

/// Tracks outstanding decodes and runs prefetches on a worker pool.
pub struct PrefetchCoordinator {
    shared: Arc<Shared>,
    pool: rayon::ThreadPool,
    max_in_flight: usize,
}

impl PrefetchCoordinator {
    pub fn new(cache: Arc<BitmapCache>, settings: &CacheSettings) -> Result<Self, CacheError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.prefetch_workers.max(1))
            .thread_name(|i| format!("trapcache-prefetch-{}", i))
            .panic_handler(|_| log::error!("Prefetch worker panicked"))
            .build()?;

        Ok(Self {
            shared: Arc::new(Shared {
                cache,
                in_flight: DashMap::new(),
                generation: RwLock::new(0),
            }),
            pool,
            max_in_flight: settings.max_in_flight_prefetches.max(1),
        })
    }

    /// Register a new in-flight entry, or return the existing one.
    fn register(&self, id: FileId) -> Result<Completion, Arc<InFlight>> {
        let generation = *self.shared.generation.read();
        match self.shared.in_flight.entry(id) {
            Entry::Occupied(existing) => Err(Arc::clone(existing.get())),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(InFlight::new());
                vacant.insert(Arc::clone(&entry));
                Ok(Completion {
                    shared: Arc::clone(&self.shared),
                    id,
                    entry,
                    generation,
                    result: None,
                })
            }
        }
    }

    /// Start decoding `id` in the background.
    ///
    /// Returns `false` without doing anything if `id` is already cached or in
    /// flight, or if too many prefetches are outstanding. The result is always
    /// cached, placeholders included.
    pub fn try_start<F>(&self, id: FileId, decode: F) -> bool
    where
        F: FnOnce() -> DecodeOutcome + Send + 'static,
    {
        if self.shared.cache.contains(id) {
            return false;
        }
        // Approximate bound: the count and the insert are not one atomic step
        if self.shared.in_flight.len() >= self.max_in_flight {
            log::debug!("Prefetch of {} skipped, {} in flight", id, self.max_in_flight);
            return false;
        }
        let completion = match self.register(id) {
            Ok(completion) => completion,
            Err(_) => return false,
        };

        log::debug!("Prefetching {}", id);
        self.pool.spawn(move || {
            let outcome = decode();
            completion.finish(outcome, CachePolicy::Always);
        });
        true
    }

    /// Handle to the outstanding decode of `id`, if any.
    pub fn join_if_in_flight(&self, id: FileId) -> Option<PrefetchHandle> {
        self.shared
            .in_flight
            .get(&id)
            .map(|entry| PrefetchHandle {
                id,
                inner: Arc::clone(entry.value()),
            })
    }

    /// Get the bitmap for `id`, decoding on the calling thread if needed.
    ///
    /// A cache hit returns immediately. If a decode for `id` is already in
    /// flight the caller blocks on it. Otherwise the caller registers its own
    /// decode, so concurrent callers for the same id share one decode.
    pub fn load_or_join<F>(&self, id: FileId, decode: F, policy: CachePolicy) -> Arc<Bitmap>
    where
        F: FnOnce() -> DecodeOutcome,
    {
        if let Some(bitmap) = self.shared.cache.get(id) {
            return bitmap;
        }

        match self.register(id) {
            Ok(completion) => {
                // A decode may have finished between the lookup and registering
                if let Some(bitmap) = self.shared.cache.get(id) {
                    let mut completion = completion;
                    completion.result = Some(Arc::clone(&bitmap));
                    return bitmap;
                }
                log::debug!("Cache miss for {}, decoding synchronously", id);
                completion.finish(decode(), policy)
            }
            Err(entry) => {
                log::debug!("Joining in-flight decode of {}", id);
                match entry.wait() {
                    Some(bitmap) => bitmap,
                    None => {
                        log::warn!("Joined decode of {} failed, decoding again", id);
                        let outcome = decode();
                        let bitmap = Arc::new(outcome.bitmap);
                        if !outcome.is_corrupt_or_missing || policy == CachePolicy::Always {
                            self.shared.cache.insert(id, Arc::clone(&bitmap));
                        }
                        bitmap
                    }
                }
            }
        }
    }

    /// Forget every outstanding decode and every cached bitmap.
    ///
    /// Decodes already running keep going but their results are discarded.
    pub fn reset(&self) {
        let mut generation = self.shared.generation.write();
        *generation += 1;
        let dropped = self.shared.in_flight.len();
        self.shared.in_flight.clear();
        self.shared.cache.clear();
        log::debug!(
            "Prefetch generation {} started, {} in-flight decodes orphaned",
            *generation,
            dropped
        );
    }

    pub fn is_in_flight(&self, id: FileId) -> bool {
        self.shared.in_flight.contains_key(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.in_flight.len()
    }

    /// Block until no decode is in flight.
    pub fn wait_idle(&self) {
        loop {
            let pending: Vec<Arc<InFlight>> = self
                .shared
                .in_flight
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            if pending.is_empty() {
                return;
            }
            for entry in pending {
                entry.wait();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{PixelFormat, PlaceholderKind};
    use std::num::NonZeroUsize;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn coordinator(capacity: usize) -> (Arc<BitmapCache>, PrefetchCoordinator) {
        let cache = Arc::new(BitmapCache::new(NonZeroUsize::new(capacity).unwrap()));
        let settings = CacheSettings {
            capacity,
            prefetch_workers: 2,
            max_in_flight_prefetches: 8,
        };
        let coordinator = PrefetchCoordinator::new(Arc::clone(&cache), &settings).unwrap();
        (cache, coordinator)
    }

    fn decoded(value: u8) -> DecodeOutcome {
        DecodeOutcome::decoded(Bitmap::filled(2, 2, PixelFormat::Rgb24, &[value, value, value]))
    }

    #[test]
    fn test_prefetch_populates_cache() {
        let (cache, coordinator) = coordinator(4);
        assert!(coordinator.try_start(FileId(1), || decoded(1)));
        coordinator.wait_idle();
        assert!(cache.contains(FileId(1)));
        assert!(!coordinator.is_in_flight(FileId(1)));
        // Already cached
        assert!(!coordinator.try_start(FileId(1), || decoded(1)));
    }

    #[test]
    fn test_second_start_for_same_id_is_rejected() {
        let (_cache, coordinator) = coordinator(4);
        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        assert!(coordinator.try_start(FileId(5), move || {
            worker_gate.wait();
            decoded(5)
        }));
        assert!(coordinator.is_in_flight(FileId(5)));
        assert!(!coordinator.try_start(FileId(5), || decoded(6)));

        let handle = coordinator.join_if_in_flight(FileId(5)).unwrap();
        assert_eq!(handle.id(), FileId(5));
        gate.wait();
        assert_eq!(handle.wait().unwrap().pixels()[0], 5);
        assert!(handle.is_finished());
    }

    #[test]
    fn test_prefetch_caches_placeholders() {
        let (cache, coordinator) = coordinator(4);
        coordinator.try_start(FileId(3), || DecodeOutcome::placeholder(PlaceholderKind::Corrupt, 4, 4));
        coordinator.wait_idle();
        assert!(cache.peek(FileId(3)).unwrap().is_placeholder());
    }

    #[test]
    fn test_sync_load_skips_corrupt_placeholders() {
        let (cache, coordinator) = coordinator(4);
        let bitmap = coordinator.load_or_join(
            FileId(3),
            || DecodeOutcome::placeholder(PlaceholderKind::Missing, 4, 4),
            CachePolicy::UnlessCorrupt,
        );
        assert!(bitmap.is_placeholder());
        assert!(!cache.contains(FileId(3)));
        assert!(!coordinator.is_in_flight(FileId(3)));
    }

    #[test]
    fn test_concurrent_loads_share_one_decode() {
        const THREADS: usize = 8;
        let (_cache, coordinator) = coordinator(4);
        let coordinator = Arc::new(coordinator);
        let decodes = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let decodes = Arc::clone(&decodes);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    coordinator.load_or_join(
                        FileId(9),
                        || {
                            decodes.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            decoded(9)
                        },
                        CachePolicy::UnlessCorrupt,
                    )
                })
            })
            .collect();

        let results: Vec<Arc<Bitmap>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(decodes.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|b| Arc::ptr_eq(b, &results[0])));
    }

    #[test]
    fn test_panicking_decode_does_not_block_retry() {
        let (cache, coordinator) = coordinator(4);
        assert!(coordinator.try_start(FileId(2), || -> DecodeOutcome { panic!("boom") }));
        coordinator.wait_idle();
        assert!(!coordinator.is_in_flight(FileId(2)));
        assert!(!cache.contains(FileId(2)));

        let bitmap = coordinator.load_or_join(FileId(2), || decoded(2), CachePolicy::UnlessCorrupt);
        assert_eq!(bitmap.pixels()[0], 2);
        assert!(cache.contains(FileId(2)));
    }

    #[test]
    fn test_reset_discards_running_decodes() {
        let (cache, coordinator) = coordinator(4);
        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        coordinator.try_start(FileId(4), move || {
            worker_gate.wait();
            decoded(4)
        });
        let handle = coordinator.join_if_in_flight(FileId(4)).unwrap();

        coordinator.reset();
        assert_eq!(coordinator.in_flight_count(), 0);
        gate.wait();

        // Waiters still get the result, the cache does not
        assert!(handle.wait().is_some());
        assert!(!cache.contains(FileId(4)));
    }

    #[test]
    fn test_in_flight_bound() {
        let cache = Arc::new(BitmapCache::new(NonZeroUsize::new(4).unwrap()));
        let settings = CacheSettings {
            capacity: 4,
            prefetch_workers: 1,
            max_in_flight_prefetches: 1,
        };
        let coordinator = PrefetchCoordinator::new(Arc::clone(&cache), &settings).unwrap();
        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        assert!(coordinator.try_start(FileId(1), move || {
            worker_gate.wait();
            decoded(1)
        }));
        assert!(!coordinator.try_start(FileId(2), || decoded(2)));
        gate.wait();
        coordinator.wait_idle();
        assert!(coordinator.try_start(FileId(2), || decoded(2)));
        coordinator.wait_idle();
        assert!(cache.contains(FileId(2)));
    }
}
