//! trapcache - image cache and difference imaging for camera-trap review
//!
//! Keeps a bounded set of decoded images around the one being viewed, decodes
//! neighbors in the background, and computes difference views that highlight
//! what changed between consecutive shots.

pub mod bitmap;
pub mod cache;
pub mod config;
pub mod constants;
pub mod darkness;
pub mod difference;
pub mod error;
pub mod file_table;
pub mod loader;
pub mod prefetch;
pub mod recency;
pub mod store;

pub use bitmap::{Bitmap, PixelFormat, PlaceholderKind};
pub use cache::{CacheStats, DifferenceResult, DifferenceState, ImageCache, Navigation};
pub use config::{CacheConfig, ConfigError, LogLevel};
pub use error::{CacheError, DecodeError, DifferenceError};
pub use file_table::{FileId, FileRecord, FileTable, InMemoryFileTable};
pub use loader::{DecodeOutcome, DiskDecoder, ImageDecoder};
