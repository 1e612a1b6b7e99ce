//! Error types for the cache, decoder and difference engine.

use std::path::PathBuf;

use crate::bitmap::PixelFormat;

/// Errors produced by the pixel-level difference functions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DifferenceError {
    /// Operands differ in width, height or pixel format
    #[error(
        "bitmaps differ: {left_width}x{left_height} {left_format:?} vs {right_width}x{right_height} {right_format:?}"
    )]
    DimensionMismatch {
        left_width: u32,
        left_height: u32,
        left_format: PixelFormat,
        right_width: u32,
        right_height: u32,
        right_format: PixelFormat,
    },

    /// The pixel format has no known red/green/blue byte layout
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
}

/// Errors raised while decoding a file from disk.
///
/// These never cross the cache boundary: the decoder turns them into
/// placeholder bitmaps.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The file does not exist
    #[error("file not found: {0}")]
    Missing(PathBuf),

    /// The file exists but could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file could not be decoded as an image
    #[error("decode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Errors that can occur when constructing an [`ImageCache`](crate::ImageCache).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The bitmap cache must hold at least one image
    #[error("cache capacity must be at least 1")]
    InvalidCapacity,

    /// The background worker pool could not be started
    #[error("failed to start prefetch workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
