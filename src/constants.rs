//! Global constants for the trapcache engine

/// Number of decoded images kept in the bitmap cache
pub const BITMAP_CACHE_SIZE: usize = 9;

/// Default number of background prefetch workers
pub const DEFAULT_PREFETCH_WORKERS: usize = 2;

/// Default upper bound on outstanding background prefetches
pub const DEFAULT_MAX_IN_FLIGHT_PREFETCHES: usize = 4;

/// Default per-channel threshold for the combined difference (0-255)
pub const DIFFERENCE_THRESHOLD_DEFAULT: u8 = 20;

/// Luminosity at or below which a pixel counts as dark (0 black - 255 white)
pub const DARK_PIXEL_THRESHOLD_DEFAULT: u8 = 60;

/// Fraction of dark pixels at which an image is classified as dark
pub const DARK_PIXEL_RATIO_DEFAULT: f64 = 0.9;

/// Only every Nth pixel is examined when classifying darkness
pub const DARK_PIXEL_SAMPLE_STRIDE_DEFAULT: usize = 20;

/// Allowed |r-g| + |g-b| + |b-r| slop for a pixel to still count as grey
pub const GREYSCALE_PIXEL_THRESHOLD: u32 = 40;

/// Fraction of grey pixels above which an image counts as greyscale
pub const GREYSCALE_IMAGE_THRESHOLD: f64 = 0.9;

/// Placeholder image width in pixels
pub const PLACEHOLDER_WIDTH: u32 = 640;

/// Placeholder image height in pixels
pub const PLACEHOLDER_HEIGHT: u32 = 480;
