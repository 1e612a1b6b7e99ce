//! Night-shot detection.
//!
//! Camera traps take many infrared night images. These are nearly greyscale
//! and mostly dark, which is what [`classify`] looks for. Only every
//! `sample_stride`-th pixel is examined.

use crate::bitmap::Bitmap;
use crate::config::DarknessSettings;
use crate::error::DifferenceError;

/// Outcome of a darkness check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DarknessReport {
    /// Whether the image counts as dark
    pub is_dark: bool,
    /// For greyscale images the fraction of dark pixels; for color images
    /// the fraction of colored pixels
    pub dark_pixel_fraction: f64,
    /// Whether the image is predominantly color
    pub is_color: bool,
}

/// Perceived luminosity of an RGB pixel (0-255).
fn luminosity(r: u8, g: u8, b: u8) -> u32 {
    (0.299 * f64::from(r) + 0.5876 * f64::from(g) + 0.114 * f64::from(b)).round() as u32
}

/// Classify an image as dark or not.
pub fn classify(
    bitmap: &Bitmap,
    settings: &DarknessSettings,
) -> Result<DarknessReport, DifferenceError> {
    let offsets = bitmap.format().channel_offsets()?;
    let bpp = bitmap.format().bytes_per_pixel();
    let stride = settings.sample_stride.max(1);

    let mut dark_pixels = 0usize;
    let mut uncolored_pixels = 0usize;
    let mut counted_pixels = 0usize;

    for px in bitmap.pixels().chunks_exact(bpp).step_by(stride) {
        let (r, g, b) = (px[offsets.red], px[offsets.green], px[offsets.blue]);

        if luminosity(r, g, b) <= u32::from(settings.pixel_threshold) {
            dark_pixels += 1;
        }

        let rgb_delta = u32::from(r.abs_diff(g)) + u32::from(g.abs_diff(b)) + u32::from(b.abs_diff(r));
        if rgb_delta <= settings.greyscale_pixel_slop {
            uncolored_pixels += 1;
        }

        counted_pixels += 1;
    }

    if counted_pixels == 0 {
        return Ok(DarknessReport {
            is_dark: false,
            dark_pixel_fraction: 0.0,
            is_color: false,
        });
    }

    let uncolored_fraction = uncolored_pixels as f64 / counted_pixels as f64;
    if uncolored_fraction < settings.greyscale_image_ratio {
        return Ok(DarknessReport {
            is_dark: false,
            dark_pixel_fraction: 1.0 - uncolored_fraction,
            is_color: true,
        });
    }

    let dark_pixel_fraction = dark_pixels as f64 / counted_pixels as f64;
    Ok(DarknessReport {
        is_dark: dark_pixel_fraction >= settings.dark_ratio,
        dark_pixel_fraction,
        is_color: false,
    })
}

/// Whether every sampled pixel is pure black.
///
/// Sampling runs from the last pixel backwards since most cameras stamp a
/// non-black info bar along the bottom of the frame.
pub fn is_black(bitmap: &Bitmap, sample_stride: usize) -> Result<bool, DifferenceError> {
    let offsets = bitmap.format().channel_offsets()?;
    let bpp = bitmap.format().bytes_per_pixel();
    let stride = sample_stride.max(1);

    let all_black = bitmap
        .pixels()
        .chunks_exact(bpp)
        .skip(1)
        .rev()
        .step_by(stride)
        .all(|px| px[offsets.red] == 0 && px[offsets.green] == 0 && px[offsets.blue] == 0);
    Ok(all_black)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::PixelFormat;

    fn settings() -> DarknessSettings {
        DarknessSettings {
            sample_stride: 1,
            ..DarknessSettings::default()
        }
    }

    #[test]
    fn test_dark_greyscale_image() {
        let night = Bitmap::filled(10, 10, PixelFormat::Rgb24, &[20, 22, 21]);
        let report = classify(&night, &settings()).unwrap();
        assert!(report.is_dark);
        assert!(!report.is_color);
        assert_eq!(report.dark_pixel_fraction, 1.0);
    }

    #[test]
    fn test_bright_greyscale_image() {
        let day = Bitmap::filled(10, 10, PixelFormat::Bgr24, &[200, 200, 200]);
        let report = classify(&day, &settings()).unwrap();
        assert!(!report.is_dark);
        assert!(!report.is_color);
        assert_eq!(report.dark_pixel_fraction, 0.0);
    }

    #[test]
    fn test_dark_color_image_is_not_dark() {
        let dusk = Bitmap::filled(10, 10, PixelFormat::Rgb24, &[60, 10, 0]);
        let report = classify(&dusk, &settings()).unwrap();
        assert!(!report.is_dark);
        assert!(report.is_color);
        assert_eq!(report.dark_pixel_fraction, 1.0);
    }

    #[test]
    fn test_dark_ratio_boundary() {
        // 9 of 10 pixels dark, ratio 0.9 is inclusive
        let mut pixels = [10u8, 10, 10].repeat(9);
        pixels.extend_from_slice(&[250, 250, 250]);
        let bitmap = Bitmap::from_raw(10, 1, PixelFormat::Rgb24, pixels).unwrap();
        let report = classify(&bitmap, &settings()).unwrap();
        assert!(report.is_dark);
        assert!((report.dark_pixel_fraction - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_empty_image_is_not_dark() {
        let empty = Bitmap::blank(0, 0, PixelFormat::Rgb24);
        assert!(!classify(&empty, &settings()).unwrap().is_dark);
    }

    #[test]
    fn test_gray8_is_unsupported() {
        let gray = Bitmap::blank(2, 2, PixelFormat::Gray8);
        assert!(classify(&gray, &settings()).is_err());
        assert!(is_black(&gray, 1).is_err());
    }

    #[test]
    fn test_is_black() {
        let black = Bitmap::blank(5, 5, PixelFormat::Bgra32);
        assert!(is_black(&black, 1).unwrap());

        let mut pixels = vec![0u8; 5 * 5 * 3];
        let last = pixels.len() - 1;
        pixels[last] = 1;
        let almost = Bitmap::from_raw(5, 5, PixelFormat::Rgb24, pixels).unwrap();
        assert!(!is_black(&almost, 1).unwrap());
    }
}
