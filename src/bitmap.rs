//! Decoded pixel buffers.
//!
//! A [`Bitmap`] is a tightly packed, row-major pixel buffer tagged with its
//! [`PixelFormat`]. Cached bitmaps are shared behind `Arc` and never mutated;
//! anything that needs different pixels produces a new bitmap.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DifferenceError;

/// Pixel layouts a bitmap can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 3 bytes per pixel: blue, green, red
    Bgr24,
    /// 4 bytes per pixel: blue, green, red, unused
    Bgr32,
    /// 4 bytes per pixel: blue, green, red, alpha
    Bgra32,
    /// 4 bytes per pixel: premultiplied blue, green, red, alpha
    Pbgra32,
    /// 3 bytes per pixel: red, green, blue
    Rgb24,
    /// 4 bytes per pixel: red, green, blue, alpha
    Rgba32,
    /// 1 byte per pixel: luminance
    Gray8,
}

/// Byte positions of the color channels within one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOffsets {
    pub red: usize,
    pub green: usize,
    pub blue: usize,
}

const BGR_OFFSETS: ChannelOffsets = ChannelOffsets {
    blue: 0,
    green: 1,
    red: 2,
};

const RGB_OFFSETS: ChannelOffsets = ChannelOffsets {
    red: 0,
    green: 1,
    blue: 2,
};

impl PixelFormat {
    /// Number of bytes one pixel occupies.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => 3,
            PixelFormat::Bgr32
            | PixelFormat::Bgra32
            | PixelFormat::Pbgra32
            | PixelFormat::Rgba32 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Resolve where red, green and blue live inside a pixel.
    ///
    /// Formats without three separate color channels are rejected.
    pub fn channel_offsets(self) -> Result<ChannelOffsets, DifferenceError> {
        match self {
            PixelFormat::Bgr24
            | PixelFormat::Bgr32
            | PixelFormat::Bgra32
            | PixelFormat::Pbgra32 => Ok(BGR_OFFSETS),
            PixelFormat::Rgb24 | PixelFormat::Rgba32 => Ok(RGB_OFFSETS),
            PixelFormat::Gray8 => Err(DifferenceError::UnsupportedFormat(self)),
        }
    }

    /// Byte position of the alpha channel, if the format has one.
    pub fn alpha_offset(self) -> Option<usize> {
        match self {
            PixelFormat::Bgra32 | PixelFormat::Pbgra32 | PixelFormat::Rgba32 => Some(3),
            _ => None,
        }
    }
}

/// Why a bitmap is a stand-in rather than the file's real pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaceholderKind {
    /// The file could not be found
    Missing,
    /// The file exists but could not be decoded
    Corrupt,
    /// The file is a video; frames are not decoded by this crate
    Video,
}

impl PlaceholderKind {
    /// Background and stroke colors (RGB) used when drawing the placeholder.
    fn colors(self) -> ([u8; 3], [u8; 3]) {
        match self {
            PlaceholderKind::Missing => ([48, 48, 48], [160, 160, 160]),
            PlaceholderKind::Corrupt => ([72, 16, 16], [220, 80, 80]),
            PlaceholderKind::Video => ([16, 24, 56], [96, 128, 220]),
        }
    }
}

/// A decoded, tightly packed pixel buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
    placeholder: Option<PlaceholderKind>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.pixels.len())
            .field("placeholder", &self.placeholder)
            .finish()
    }
}

impl Bitmap {
    /// Wrap raw pixel bytes.
    ///
    /// Returns `None` if the buffer length does not match
    /// `width * height * bytes_per_pixel`.
    pub fn from_raw(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if pixels.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            format,
            pixels,
            placeholder: None,
        })
    }

    /// An all-zero bitmap.
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            pixels: vec![0; len],
            placeholder: None,
        }
    }

    /// A bitmap where every pixel holds the given bytes.
    ///
    /// # Panics
    ///
    /// Panics if `pixel.len()` does not equal the format's pixel size.
    pub fn filled(width: u32, height: u32, format: PixelFormat, pixel: &[u8]) -> Self {
        assert_eq!(
            pixel.len(),
            format.bytes_per_pixel(),
            "fill pixel does not match format"
        );
        let count = width as usize * height as usize;
        Self {
            width,
            height,
            format,
            pixels: pixel.repeat(count),
            placeholder: None,
        }
    }

    /// Build a sentinel image shown in place of a file that cannot be displayed.
    ///
    /// The image is a flat background crossed by two diagonals, colored by kind.
    pub fn placeholder(kind: PlaceholderKind, width: u32, height: u32) -> Self {
        let (background, stroke) = kind.colors();
        let mut image = image::RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([background[0], background[1], background[2], 255]),
        );

        let stroke = image::Rgba([stroke[0], stroke[1], stroke[2], 255]);
        let (w, h) = (width as f32, height as f32);
        for y in 0..height {
            for x in 0..width {
                // Distance from the two diagonals, in pixels along x
                let along = x as f32 - y as f32 * w / h.max(1.0);
                let across = x as f32 - (h - 1.0 - y as f32) * w / h.max(1.0);
                if along.abs() < 2.0 || across.abs() < 2.0 {
                    image.put_pixel(x, y, stroke);
                }
            }
        }

        let mut bitmap = Self::from_rgba_image(image);
        bitmap.placeholder = Some(kind);
        bitmap
    }

    /// Take ownership of an RGBA image decoded by the `image` crate.
    pub fn from_rgba_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgba32,
            pixels: image.into_raw(),
            placeholder: None,
        }
    }

    /// Convert to an RGBA image, e.g. for saving to disk.
    pub fn to_rgba_image(&self) -> image::RgbaImage {
        let bpp = self.format.bytes_per_pixel();
        let offsets = self.format.channel_offsets().ok();
        let alpha_offset = self.format.alpha_offset();
        let mut out = Vec::with_capacity(self.pixel_count() * 4);
        for px in self.pixels.chunks_exact(bpp) {
            match offsets {
                Some(offsets) => {
                    let alpha = alpha_offset.map_or(255, |a| px[a]);
                    out.extend_from_slice(&[
                        px[offsets.red],
                        px[offsets.green],
                        px[offsets.blue],
                        alpha,
                    ]);
                }
                None => out.extend_from_slice(&[px[0], px[0], px[0], 255]),
            }
        }
        // Length is width * height * 4 by construction
        image::RgbaImage::from_raw(self.width, self.height, out)
            .unwrap_or_else(|| image::RgbaImage::new(self.width, self.height))
    }

    /// Mark this bitmap as a placeholder of the given kind.
    pub fn with_placeholder(mut self, kind: PlaceholderKind) -> Self {
        self.placeholder = Some(kind);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Raw pixel bytes, row-major with no row padding.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Number of pixels (width * height).
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes of one pixel row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Bytes of the pixel at (x, y), or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let start = y as usize * self.stride() + x as usize * bpp;
        self.pixels.get(start..start + bpp)
    }

    /// Whether this is a sentinel rather than decoded file content.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }

    pub fn placeholder_kind(&self) -> Option<PlaceholderKind> {
        self.placeholder
    }

    /// Whether `other` has the same width, height and pixel format.
    pub fn same_layout(&self, other: &Bitmap) -> bool {
        self.width == other.width && self.height == other.height && self.format == other.format
    }

    /// Approximate heap size in bytes.
    pub fn memory_size(&self) -> usize {
        self.pixels.len()
    }
}
