//! The image cache the viewer navigates through.
//!
//! [`ImageCache`] owns the bitmap cache, the prefetch coordinator and the
//! cursor over the file table. Moving to a file returns the cached bitmap, joins
//! a running prefetch or decodes on the spot, then prefetches both neighbors.
//!
//! It also holds the difference view state of the current file. Difference
//! results are kept per state until the next navigation.

mod state;


use std::sync::Arc;

pub use state::{DifferenceResult, DifferenceState, Navigation};
use state::DifferenceCache;

use crate::bitmap::Bitmap;
use crate::config::{CacheConfig, DarknessSettings};
use crate::darkness::{self, DarknessReport};
use crate::difference;
use crate::error::{CacheError, DifferenceError};
use crate::file_table::{FileId, FileRecord, FileTable, FileTableEnumerator};
use crate::loader::ImageDecoder;
use crate::prefetch::{CachePolicy, PrefetchCoordinator};
use crate::store::BitmapCache;

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Bitmaps currently cached
    pub cached: usize,
    /// Maximum number of cached bitmaps
    pub capacity: usize,
    /// Decodes currently running
    pub in_flight: usize,
}

/// Navigation, caching and difference views over an ordered file table.
pub struct ImageCache<T: FileTable, D: ImageDecoder> {
    enumerator: FileTableEnumerator<T>,
    decoder: Arc<D>,
    bitmaps: Arc<BitmapCache>,
    prefetch: PrefetchCoordinator,
    difference_state: DifferenceState,
    differences: DifferenceCache,
    difference_threshold: u8,
}

impl<T: FileTable, D: ImageDecoder> ImageCache<T, D> {
    pub fn new(table: Arc<T>, decoder: D, config: &CacheConfig) -> Result<Self, CacheError> {
        let capacity = config.cache.capacity().ok_or(CacheError::InvalidCapacity)?;
        let bitmaps = Arc::new(BitmapCache::new(capacity));
        let prefetch = PrefetchCoordinator::new(Arc::clone(&bitmaps), &config.cache)?;

        log::debug!(
            "Image cache created: capacity {}, {} prefetch workers",
            capacity,
            config.cache.prefetch_workers
        );

        Ok(Self {
            enumerator: FileTableEnumerator::new(table),
            decoder: Arc::new(decoder),
            bitmaps,
            prefetch,
            difference_state: DifferenceState::Unaltered,
            differences: DifferenceCache::default(),
            difference_threshold: config.difference.threshold,
        })
    }

    pub fn table(&self) -> &Arc<T> {
        self.enumerator.table()
    }

    pub fn current(&self) -> Option<&FileRecord> {
        self.enumerator.current()
    }

    pub fn current_row(&self) -> Option<usize> {
        self.enumerator.current_row()
    }

    pub fn current_difference_state(&self) -> DifferenceState {
        self.difference_state
    }

    /// Image to display: the current state's result, else the unaltered image.
    pub fn current_image(&self) -> Option<Arc<Bitmap>> {
        self.differences
            .get(self.difference_state)
            .or_else(|| self.differences.get(DifferenceState::Unaltered))
    }

    /// Threshold used by [`compute_difference`](Self::compute_difference) in
    /// the combined state.
    pub fn difference_threshold(&self) -> u8 {
        self.difference_threshold
    }

    pub fn set_difference_threshold(&mut self, threshold: u8) {
        self.difference_threshold = threshold;
    }

    /// Move to the file at `row`.
    pub fn move_to_file(&mut self, row: usize) -> Navigation {
        self.move_to_file_with(row, false)
    }

    /// Move to the file at `row`, optionally discarding everything cached.
    ///
    /// With `force_update` the bitmap cache and all prefetch bookkeeping are
    /// cleared and the file is decoded again even if it is already current.
    pub fn move_to_file_with(&mut self, row: usize, force_update: bool) -> Navigation {
        let Some(record) = self.table().record_at(row) else {
            log::debug!("Row {} out of range", row);
            return Navigation::Failed;
        };

        let previous_id = self.current().map(|r| r.id);
        if !self.enumerator.try_move_to_file(row) {
            return Navigation::Failed;
        }

        let is_new_file = force_update || previous_id != Some(record.id);
        if is_new_file {
            if force_update {
                log::info!("Forced reload of {} at row {}", record.id, row);
                self.prefetch.reset();
            }

            let unaltered = if record.is_video {
                None
            } else {
                Some(self.load_bitmap(&record))
            };
            self.differences.reset(unaltered);
            self.difference_state = DifferenceState::Unaltered;
        }

        self.prefetch_neighbors(row);

        if is_new_file {
            Navigation::NewFile
        } else {
            Navigation::SameFile
        }
    }

    /// Current bitmap for `record`, from the cache or by decoding it.
    fn load_bitmap(&self, record: &FileRecord) -> Arc<Bitmap> {
        let root = self.table().root_path();
        self.prefetch.load_or_join(
            record.id,
            || self.decoder.decode(record, root),
            CachePolicy::UnlessCorrupt,
        )
    }

    fn prefetch_neighbors(&self, row: usize) {
        let neighbors = [row.checked_add(1), row.checked_sub(1)];
        for neighbor in neighbors.into_iter().flatten() {
            let Some(record) = self.table().record_at(neighbor) else {
                continue;
            };
            if record.is_video || self.prefetch.is_in_flight(record.id) {
                continue;
            }
            let decoder = Arc::clone(&self.decoder);
            let root = self.table().root_path().to_path_buf();
            self.prefetch
                .try_start(record.id, move || decoder.decode(&record, &root));
        }
    }

    /// Drop a cached bitmap so it is decoded again next time.
    ///
    /// Returns `false` if it was not cached. Invalidating the current file
    /// also resets the cursor.
    pub fn invalidate(&mut self, id: FileId) -> bool {
        if !self.bitmaps.invalidate(id) {
            return false;
        }
        if self.current().is_none_or(|r| r.id == id) {
            self.reset();
        }
        log::debug!("Invalidated {}", id);
        true
    }

    /// Move the cursor before the first file and clear the difference view.
    pub fn reset(&mut self) {
        self.enumerator.reset();
        self.differences.reset(None);
        self.difference_state = DifferenceState::Unaltered;
    }

    /// The current record if it is a displayable still image.
    fn displayable_current(&self) -> Option<FileRecord> {
        self.current()
            .filter(|r| !r.is_video && self.table().is_displayable(r.row))
            .cloned()
    }

    fn neighbor_row(row: usize, state: DifferenceState) -> Option<usize> {
        match state {
            DifferenceState::Previous => row.checked_sub(1),
            DifferenceState::Next => row.checked_add(1),
            DifferenceState::Unaltered | DifferenceState::Combined => Some(row),
        }
    }

    /// Whether the neighbor a state compares against can be differenced.
    fn neighbor_qualifies(&self, row: usize, state: DifferenceState) -> bool {
        match state {
            DifferenceState::Unaltered => true,
            DifferenceState::Combined => false,
            DifferenceState::Previous | DifferenceState::Next => {
                Self::neighbor_row(row, state).is_some_and(|neighbor| {
                    self.table()
                        .record_at(neighbor)
                        .is_some_and(|r| r.displayable && !r.is_video)
                })
            }
        }
    }

    /// Bitmap of the neighbor a state compares against, ready for differencing.
    fn neighbor_bitmap(&self, row: usize, state: DifferenceState) -> Option<Arc<Bitmap>> {
        if !self.neighbor_qualifies(row, state) {
            return None;
        }
        let record = self.table().record_at(Self::neighbor_row(row, state)?)?;
        Some(difference::materialize(&self.load_bitmap(&record)))
    }

    /// Step the previous/next difference toggle.
    ///
    /// Unaltered goes to previous, previous to next, next back to previous.
    /// States whose neighbor is missing or not displayable are skipped; if none
    /// qualifies the view falls back to unaltered.
    pub fn advance_previous_next_cycle(&mut self) -> DifferenceState {
        let Some(current) = self.displayable_current() else {
            self.difference_state = DifferenceState::Unaltered;
            return self.difference_state;
        };
        if self.difference_state == DifferenceState::Combined {
            self.difference_state = DifferenceState::Unaltered;
            return self.difference_state;
        }

        let mut candidate = self.difference_state;
        for _ in 0..DifferenceState::ALL.len() {
            candidate = candidate.previous_next_successor();
            if self.neighbor_qualifies(current.row, candidate) {
                self.difference_state = candidate;
                return candidate;
            }
        }

        log::debug!("No neighbor of row {} can be differenced", current.row);
        self.difference_state = DifferenceState::Unaltered;
        self.difference_state
    }

    /// Toggle between unaltered and combined.
    pub fn advance_combined_cycle(&mut self) -> DifferenceState {
        self.difference_state = match self.difference_state {
            DifferenceState::Unaltered => DifferenceState::Combined,
            _ => DifferenceState::Unaltered,
        };
        self.difference_state
    }

    /// Unaltered image prepared as a difference operand.
    fn difference_ready_unaltered(&self) -> Option<Arc<Bitmap>> {
        self.differences
            .get(DifferenceState::Unaltered)
            .map(|bitmap| difference::materialize(&bitmap))
    }

    /// Replace the unaltered slot with its difference-ready form.
    fn normalize_unaltered(&mut self, unaltered: Arc<Bitmap>) {
        self.differences.set(DifferenceState::Unaltered, unaltered);
    }

    fn current_unavailable(&mut self) -> DifferenceResult {
        self.difference_state = DifferenceState::Unaltered;
        DifferenceResult::CurrentImageNotAvailable
    }

    /// Compute the difference for the current state.
    ///
    /// In the combined state this uses the configured threshold.
    pub fn compute_difference(&mut self) -> DifferenceResult {
        let Some(current) = self.displayable_current() else {
            return self.current_unavailable();
        };

        let state = self.difference_state;
        let missing_neighbor = match state {
            DifferenceState::Unaltered => return DifferenceResult::NotCalculable,
            DifferenceState::Combined => {
                return self.compute_combined_difference(self.difference_threshold);
            }
            DifferenceState::Previous => DifferenceResult::PreviousImageNotAvailable,
            DifferenceState::Next => DifferenceResult::NextImageNotAvailable,
        };

        if self.differences.get(state).is_some() {
            return DifferenceResult::Success;
        }

        let Some(neighbor) = self.neighbor_bitmap(current.row, state) else {
            return missing_neighbor;
        };
        let Some(unaltered) = self.difference_ready_unaltered() else {
            return self.current_unavailable();
        };

        match difference::subtract(&unaltered, &neighbor) {
            Ok(result) => {
                self.differences.set(state, Arc::new(result));
                self.normalize_unaltered(unaltered);
                DifferenceResult::Success
            }
            Err(e) => {
                log::warn!("Cannot compute {} difference for {}: {}", state, current.id, e);
                DifferenceResult::NotCalculable
            }
        }
    }

    /// Compute the combined difference with an explicit threshold.
    ///
    /// Only valid in the combined state.
    pub fn compute_combined_difference(&mut self, threshold: u8) -> DifferenceResult {
        let Some(current) = self.displayable_current() else {
            return self.current_unavailable();
        };
        if self.difference_state != DifferenceState::Combined {
            return DifferenceResult::NotCalculable;
        }
        if self.differences.combined_for(threshold).is_some() {
            return DifferenceResult::Success;
        }

        let Some(previous) = self.neighbor_bitmap(current.row, DifferenceState::Previous) else {
            return DifferenceResult::PreviousImageNotAvailable;
        };
        let Some(next) = self.neighbor_bitmap(current.row, DifferenceState::Next) else {
            return DifferenceResult::NextImageNotAvailable;
        };
        let Some(unaltered) = self.difference_ready_unaltered() else {
            return self.current_unavailable();
        };

        match difference::combined_difference(&unaltered, &previous, &next, threshold) {
            Ok(result) => {
                self.differences.set_combined(threshold, Arc::new(result));
                self.normalize_unaltered(unaltered);
                DifferenceResult::Success
            }
            Err(e) => {
                log::warn!("Cannot compute combined difference for {}: {}", current.id, e);
                DifferenceResult::NotCalculable
            }
        }
    }

    /// Classify the current unaltered image as dark or not.
    ///
    /// Returns `None` when there is no current image.
    pub fn classify_current_darkness(
        &self,
        settings: &DarknessSettings,
    ) -> Option<Result<DarknessReport, DifferenceError>> {
        let bitmap = self.difference_ready_unaltered()?;
        Some(darkness::classify(&bitmap, settings))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached: self.bitmaps.len(),
            capacity: self.bitmaps.capacity(),
            in_flight: self.prefetch.in_flight_count(),
        }
    }

    pub fn is_cached(&self, id: FileId) -> bool {
        self.bitmaps.contains(id)
    }

    pub fn is_prefetching(&self, id: FileId) -> bool {
        self.prefetch.is_in_flight(id)
    }

    /// Block until every running prefetch has finished.
    pub fn wait_for_prefetches(&self) {
        self.prefetch.wait_idle();
    }
}
