//! Decoding files into bitmaps.
//!
//! Decoding never fails from the cache's point of view: a missing or corrupt
//! file decodes to a placeholder [`Bitmap`] and the outcome is flagged.

use std::path::Path;

use crate::bitmap::{Bitmap, PlaceholderKind};
use crate::constants::{PLACEHOLDER_HEIGHT, PLACEHOLDER_WIDTH};
use crate::error::DecodeError;
use crate::file_table::FileRecord;

/// Result of decoding one file.
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    /// Decoded pixels, or a placeholder
    pub bitmap: Bitmap,
    /// Set when `bitmap` is a stand-in for a missing or undecodable file
    pub is_corrupt_or_missing: bool,
}

impl DecodeOutcome {
    pub fn decoded(bitmap: Bitmap) -> Self {
        Self {
            bitmap,
            is_corrupt_or_missing: false,
        }
    }

    /// A placeholder outcome. Video placeholders are not treated as failures.
    pub fn placeholder(kind: PlaceholderKind, width: u32, height: u32) -> Self {
        Self {
            bitmap: Bitmap::placeholder(kind, width, height),
            is_corrupt_or_missing: kind != PlaceholderKind::Video,
        }
    }
}

/// Turns a file record into pixels.
///
/// Implementations run on both the navigation thread and the prefetch
/// workers, so they must be shareable.
pub trait ImageDecoder: Send + Sync + 'static {
    fn decode(&self, record: &FileRecord, root: &Path) -> DecodeOutcome;
}

impl<F> ImageDecoder for F
where
    F: Fn(&FileRecord, &Path) -> DecodeOutcome + Send + Sync + 'static,
{
    fn decode(&self, record: &FileRecord, root: &Path) -> DecodeOutcome {
        self(record, root)
    }
}

/// Decodes image files from disk with the `image` crate.
#[derive(Debug, Clone)]
pub struct DiskDecoder {
    placeholder_width: u32,
    placeholder_height: u32,
}

impl Default for DiskDecoder {
    fn default() -> Self {
        Self {
            placeholder_width: PLACEHOLDER_WIDTH,
            placeholder_height: PLACEHOLDER_HEIGHT,
        }
    }
}

impl DiskDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom size for placeholder images.
    pub fn with_placeholder_size(mut self, width: u32, height: u32) -> Self {
        self.placeholder_width = width.max(1);
        self.placeholder_height = height.max(1);
        self
    }

    fn load(path: &Path) -> Result<Bitmap, DecodeError> {
        if !path.exists() {
            return Err(DecodeError::Missing(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        let img = image::load_from_memory(&bytes)?;
        Ok(Bitmap::from_rgba_image(img.to_rgba8()))
    }
}

impl ImageDecoder for DiskDecoder {
    fn decode(&self, record: &FileRecord, root: &Path) -> DecodeOutcome {
        let (w, h) = (self.placeholder_width, self.placeholder_height);
        if record.is_video {
            return DecodeOutcome::placeholder(PlaceholderKind::Video, w, h);
        }

        let path = record.path_in(root);
        match Self::load(&path) {
            Ok(bitmap) => {
                log::debug!(
                    "Decoded {:?}: {}x{}",
                    path,
                    bitmap.width(),
                    bitmap.height()
                );
                DecodeOutcome::decoded(bitmap)
            }
            Err(DecodeError::Missing(_)) => {
                log::warn!("File {:?} is missing, using placeholder", path);
                DecodeOutcome::placeholder(PlaceholderKind::Missing, w, h)
            }
            Err(e) => {
                log::warn!("Failed to decode {:?}: {}", path, e);
                DecodeOutcome::placeholder(PlaceholderKind::Corrupt, w, h)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::PixelFormat;

    fn write_png(path: &Path, rgb: [u8; 3]) {
        let img = image::RgbImage::from_pixel(4, 3, image::Rgb(rgb));
        img.save(path).unwrap();
    }

    #[test]
    fn test_decode_png() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), [10, 20, 30]);

        let outcome = DiskDecoder::new().decode(&FileRecord::image(1, 0, "a.png"), dir.path());
        assert!(!outcome.is_corrupt_or_missing);
        assert_eq!(outcome.bitmap.dimensions(), (4, 3));
        assert_eq!(outcome.bitmap.format(), PixelFormat::Rgba32);
        assert_eq!(outcome.bitmap.pixel(0, 0), Some(&[10u8, 20, 30, 255][..]));
    }

    #[test]
    fn test_missing_file_is_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = DiskDecoder::new().with_placeholder_size(8, 6);
        let outcome = decoder.decode(&FileRecord::image(1, 0, "gone.jpg"), dir.path());
        assert!(outcome.is_corrupt_or_missing);
        assert_eq!(outcome.bitmap.placeholder_kind(), Some(PlaceholderKind::Missing));
        assert_eq!(outcome.bitmap.dimensions(), (8, 6));
    }

    #[test]
    fn test_corrupt_file_is_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.jpg"), b"not a jpeg at all").unwrap();
        let outcome = DiskDecoder::new()
            .with_placeholder_size(8, 6)
            .decode(&FileRecord::image(1, 0, "bad.jpg"), dir.path());
        assert!(outcome.is_corrupt_or_missing);
        assert_eq!(outcome.bitmap.placeholder_kind(), Some(PlaceholderKind::Corrupt));
    }

    #[test]
    fn test_video_is_not_a_failure() {
        let mut record = FileRecord::image(1, 0, "clip.mp4");
        record.is_video = true;
        let outcome = DiskDecoder::new()
            .with_placeholder_size(8, 6)
            .decode(&record, Path::new("/nowhere"));
        assert!(!outcome.is_corrupt_or_missing);
        assert_eq!(outcome.bitmap.placeholder_kind(), Some(PlaceholderKind::Video));
    }

    #[test]
    fn test_closure_decoder() {
        let decoder = |_: &FileRecord, _: &Path| {
            DecodeOutcome::decoded(Bitmap::blank(2, 2, PixelFormat::Bgr24))
        };
        let outcome = decoder.decode(&FileRecord::image(1, 0, "x.png"), Path::new("/"));
        assert_eq!(outcome.bitmap.dimensions(), (2, 2));
    }
}
