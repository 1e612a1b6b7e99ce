//! Difference view state and the per-file result slots.

use std::sync::Arc;

use crate::bitmap::Bitmap;

/// What the viewer currently shows for the current file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DifferenceState {
    /// The image itself
    #[default]
    Unaltered,
    /// Difference against the previous file
    Previous,
    /// Difference against the next file
    Next,
    /// Change common to both neighbors
    Combined,
}

impl DifferenceState {
    pub const ALL: [DifferenceState; 4] = [
        DifferenceState::Unaltered,
        DifferenceState::Previous,
        DifferenceState::Next,
        DifferenceState::Combined,
    ];

    fn index(self) -> usize {
        match self {
            DifferenceState::Unaltered => 0,
            DifferenceState::Previous => 1,
            DifferenceState::Next => 2,
            DifferenceState::Combined => 3,
        }
    }

    /// Next state in the previous/next toggle, before any skipping.
    pub(crate) fn previous_next_successor(self) -> Self {
        match self {
            DifferenceState::Unaltered | DifferenceState::Next => DifferenceState::Previous,
            DifferenceState::Previous => DifferenceState::Next,
            DifferenceState::Combined => DifferenceState::Unaltered,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DifferenceState::Unaltered => "unaltered",
            DifferenceState::Previous => "previous",
            DifferenceState::Next => "next",
            DifferenceState::Combined => "combined",
        }
    }
}

impl std::fmt::Display for DifferenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a difference computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferenceResult {
    Success,
    /// No current file, or it is a video or not displayable
    CurrentImageNotAvailable,
    PreviousImageNotAvailable,
    NextImageNotAvailable,
    /// Wrong state, or the images cannot be differenced
    NotCalculable,
}

impl DifferenceResult {
    pub fn is_success(&self) -> bool {
        *self == DifferenceResult::Success
    }
}

impl std::fmt::Display for DifferenceResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DifferenceResult::Success => "success",
            DifferenceResult::CurrentImageNotAvailable => "current image not available",
            DifferenceResult::PreviousImageNotAvailable => "previous image not available",
            DifferenceResult::NextImageNotAvailable => "next image not available",
            DifferenceResult::NotCalculable => "difference not calculable",
        };
        f.write_str(text)
    }
}

/// Result of a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    /// Row out of range; nothing changed
    Failed,
    /// Already on that file
    SameFile,
    /// Moved to a different file, or reloaded it
    NewFile,
}

impl Navigation {
    pub fn is_success(&self) -> bool {
        *self != Navigation::Failed
    }

    pub fn is_new_file(&self) -> bool {
        *self == Navigation::NewFile
    }
}

/// One image slot per [`DifferenceState`] for the current file.
#[derive(Debug, Default)]
pub(crate) struct DifferenceCache {
    slots: [Option<Arc<Bitmap>>; 4],
    /// Threshold the combined slot was computed with
    combined_threshold: Option<u8>,
}

impl DifferenceCache {
    /// Drop all results and start over with a new base image.
    pub(crate) fn reset(&mut self, unaltered: Option<Arc<Bitmap>>) {
        self.slots = Default::default();
        self.slots[DifferenceState::Unaltered.index()] = unaltered;
        self.combined_threshold = None;
    }

    pub(crate) fn get(&self, state: DifferenceState) -> Option<Arc<Bitmap>> {
        self.slots[state.index()].clone()
    }

    pub(crate) fn set(&mut self, state: DifferenceState, bitmap: Arc<Bitmap>) {
        self.slots[state.index()] = Some(bitmap);
    }

    pub(crate) fn combined_for(&self, threshold: u8) -> Option<Arc<Bitmap>> {
        if self.combined_threshold == Some(threshold) {
            self.get(DifferenceState::Combined)
        } else {
            None
        }
    }

    pub(crate) fn set_combined(&mut self, threshold: u8, bitmap: Arc<Bitmap>) {
        self.set(DifferenceState::Combined, bitmap);
        self.combined_threshold = Some(threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::PixelFormat;

    #[test]
    fn test_previous_next_successor() {
        use DifferenceState::*;
        assert_eq!(Unaltered.previous_next_successor(), Previous);
        assert_eq!(Previous.previous_next_successor(), Next);
        assert_eq!(Next.previous_next_successor(), Previous);
        assert_eq!(Combined.previous_next_successor(), Unaltered);
    }

    #[test]
    fn test_difference_cache_reset() {
        let mut cache = DifferenceCache::default();
        let base = Arc::new(Bitmap::blank(1, 1, PixelFormat::Rgb24));
        cache.reset(Some(Arc::clone(&base)));
        cache.set(DifferenceState::Next, Arc::clone(&base));
        cache.set_combined(20, Arc::clone(&base));
        assert!(cache.combined_for(20).is_some());
        assert!(cache.combined_for(21).is_none());

        cache.reset(None);
        assert!(DifferenceState::ALL.iter().all(|s| cache.get(*s).is_none()));
        assert!(cache.combined_for(20).is_none());
    }
}
