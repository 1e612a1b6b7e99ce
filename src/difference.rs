//! Pixel differencing between neighboring images.
//!
//! All functions here are pure: they read their operands and allocate a new
//! grayscale "heat" bitmap in the operands' pixel format. Operands must share
//! width, height and format.
//!
//! ## Combined difference
//!
//! For every pixel and color channel, `d1 = |unaltered - previous|` and
//! `d2 = |unaltered - next|`. The channel keeps `(d1 + d2) / 2` only when both
//! differences are strictly above the threshold, otherwise it is zero. Change
//! that appears against one neighbor only (noise, a passing shadow) is dropped.

use std::sync::Arc;

use crate::bitmap::{Bitmap, ChannelOffsets, PixelFormat};
use crate::error::DifferenceError;

/// Check that two bitmaps can be differenced against each other.
fn check_layout(left: &Bitmap, right: &Bitmap) -> Result<(), DifferenceError> {
    if left.same_layout(right) {
        return Ok(());
    }
    Err(DifferenceError::DimensionMismatch {
        left_width: left.width(),
        left_height: left.height(),
        left_format: left.format(),
        right_width: right.width(),
        right_height: right.height(),
        right_format: right.format(),
    })
}

/// Write a grayscale value into the color channels of one output pixel.
#[inline]
fn write_gray(out: &mut [u8], offsets: ChannelOffsets, alpha: Option<usize>, value: u8) {
    out[offsets.red] = value;
    out[offsets.green] = value;
    out[offsets.blue] = value;
    if let Some(alpha) = alpha {
        out[alpha] = u8::MAX;
    }
}

#[inline]
fn average(r: u8, g: u8, b: u8) -> u8 {
    ((u16::from(r) + u16::from(g) + u16::from(b)) / 3) as u8
}

#[inline]
fn difference_if_above_threshold(threshold: u8, previous: u8, next: u8) -> u8 {
    if previous > threshold && next > threshold {
        ((u16::from(previous) + u16::from(next)) / 2) as u8
    } else {
        0
    }
}

/// Per-pixel absolute difference between two bitmaps, as grayscale.
///
/// Each output pixel is the mean of the three channel differences.
pub fn subtract(a: &Bitmap, b: &Bitmap) -> Result<Bitmap, DifferenceError> {
    check_layout(a, b)?;
    let format = a.format();
    let offsets = format.channel_offsets()?;
    let alpha = format.alpha_offset();
    let bpp = format.bytes_per_pixel();

    let mut out = vec![0u8; a.pixels().len()];
    for ((pa, pb), po) in a
        .pixels()
        .chunks_exact(bpp)
        .zip(b.pixels().chunks_exact(bpp))
        .zip(out.chunks_exact_mut(bpp))
    {
        let r = pa[offsets.red].abs_diff(pb[offsets.red]);
        let g = pa[offsets.green].abs_diff(pb[offsets.green]);
        let bl = pa[offsets.blue].abs_diff(pb[offsets.blue]);
        write_gray(po, offsets, alpha, average(r, g, bl));
    }

    Ok(Bitmap::from_raw(a.width(), a.height(), format, out)
        .unwrap_or_else(|| Bitmap::blank(a.width(), a.height(), format)))
}

/// Change common to both neighbors, as grayscale.
///
/// See the module docs for the thresholding rule. The threshold bound is
/// exclusive: a difference equal to `threshold` counts as no change.
pub fn combined_difference(
    unaltered: &Bitmap,
    previous: &Bitmap,
    next: &Bitmap,
    threshold: u8,
) -> Result<Bitmap, DifferenceError> {
    check_layout(unaltered, previous)?;
    check_layout(unaltered, next)?;
    let format = unaltered.format();
    let offsets = format.channel_offsets()?;
    let alpha = format.alpha_offset();
    let bpp = format.bytes_per_pixel();

    let mut out = vec![0u8; unaltered.pixels().len()];
    for (((pu, pp), pn), po) in unaltered
        .pixels()
        .chunks_exact(bpp)
        .zip(previous.pixels().chunks_exact(bpp))
        .zip(next.pixels().chunks_exact(bpp))
        .zip(out.chunks_exact_mut(bpp))
    {
        let channel = |offset: usize| {
            let d1 = pu[offset].abs_diff(pp[offset]);
            let d2 = pu[offset].abs_diff(pn[offset]);
            difference_if_above_threshold(threshold, d1, d2)
        };
        let value = average(
            channel(offsets.red),
            channel(offsets.green),
            channel(offsets.blue),
        );
        write_gray(po, offsets, alpha, value);
    }

    Ok(
        Bitmap::from_raw(unaltered.width(), unaltered.height(), format, out)
            .unwrap_or_else(|| Bitmap::blank(unaltered.width(), unaltered.height(), format)),
    )
}

/// Prepare a cached bitmap for use as a difference operand.
///
/// Bitmaps already in a differencable format are returned as-is (shared).
/// Others get a private converted copy; the cached bitmap is never touched.
pub fn materialize(bitmap: &Arc<Bitmap>) -> Arc<Bitmap> {
    match bitmap.format() {
        PixelFormat::Gray8 => {
            let expanded: Vec<u8> = bitmap.pixels().iter().flat_map(|&v| [v, v, v]).collect();
            let converted =
                Bitmap::from_raw(bitmap.width(), bitmap.height(), PixelFormat::Rgb24, expanded)
                    .unwrap_or_else(|| {
                        Bitmap::blank(bitmap.width(), bitmap.height(), PixelFormat::Rgb24)
                    });
            let converted = match bitmap.placeholder_kind() {
                Some(kind) => converted.with_placeholder(kind),
                None => converted,
            };
            Arc::new(converted)
        }
        _ => Arc::clone(bitmap),
    }
}

/// Whether a bitmap can be used directly as a difference operand.
pub fn is_differencable(bitmap: &Bitmap) -> bool {
    bitmap.format().channel_offsets().is_ok()
}
