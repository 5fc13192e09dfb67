//! Aspect-preserving downscale followed by a centered square crop.
//!
//! Resampling is always bilinear ([`FilterType::Triangle`]) so the same
//! input and bound give the same pixels.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::debug;

pub const RESAMPLE_FILTER: FilterType = FilterType::Triangle;

/// Dimensions after bounding the longer side by `max_dimension`.
///
/// The shorter side is rounded to the nearest pixel and never drops below 1.
pub fn fit_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    let scaled = |side: u32, longer: u32| {
        ((side as f64 * max_dimension as f64 / longer as f64).round() as u32).max(1)
    };

    if width >= height {
        (max_dimension, scaled(height, width))
    } else {
        (scaled(width, height), max_dimension)
    }
}

pub fn resize_to_fit(bitmap: RgbaImage, max_dimension: u32) -> RgbaImage {
    let (width, height) = bitmap.dimensions();
    let (target_width, target_height) = fit_dimensions(width, height, max_dimension);

    if (target_width, target_height) == (width, height) {
        return bitmap;
    }

    debug!("Resizing {}x{} -> {}x{}", width, height, target_width, target_height);
    imageops::resize(&bitmap, target_width, target_height, RESAMPLE_FILTER)
}

/// Scale by a linear factor, flooring each side (minimum 1 px).
pub fn scale_by(bitmap: &RgbaImage, scale: f64) -> RgbaImage {
    let width = ((bitmap.width() as f64 * scale).floor() as u32).max(1);
    let height = ((bitmap.height() as f64 * scale).floor() as u32).max(1);
    imageops::resize(bitmap, width, height, RESAMPLE_FILTER)
}

pub fn center_crop_square(bitmap: RgbaImage) -> RgbaImage {
    let (width, height) = bitmap.dimensions();
    if width == height {
        return bitmap;
    }

    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    imageops::crop_imm(&bitmap, x, y, side, side).to_image()
}

/// Bound by `max_dimension`, then square. Output is always `s × s` with
/// `s <= max_dimension`.
pub fn normalize(bitmap: RgbaImage, max_dimension: u32) -> RgbaImage {
    center_crop_square(resize_to_fit(bitmap, max_dimension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8, 255])
        })
    }

    #[test]
    fn test_fit_dimensions() {
        assert_eq!(fit_dimensions(4000, 3000, 1200), (1200, 900));
        assert_eq!(fit_dimensions(3000, 4000, 1200), (900, 1200));
        assert_eq!(fit_dimensions(1200, 1200, 1200), (1200, 1200));
        assert_eq!(fit_dimensions(800, 600, 1200), (800, 600));
        // 1001 * 1200 / 3000 = 400.4 rounds to 400
        assert_eq!(fit_dimensions(3000, 1001, 1200), (1200, 400));
        assert_eq!(fit_dimensions(5000, 1, 100), (100, 1));
    }

    #[test]
    fn test_longer_side_maps_to_max() {
        for (w, h) in [(4000, 3000), (301, 1999), (1201, 1201), (2500, 10)] {
            let (fw, fh) = fit_dimensions(w, h, 1200);
            assert_eq!(fw.max(fh), 1200, "{}x{}", w, h);
        }
    }

    #[test]
    fn test_normalize_is_square() {
        for (w, h) in [(400, 300), (300, 400), (50, 50), (1, 7), (129, 64)] {
            let out = normalize(gradient(w, h), 120);
            assert_eq!(out.width(), out.height(), "{}x{}", w, h);
            assert!(out.width() <= 120);
        }
    }

    #[test]
    fn test_scaled_scenario() {
        // 400x300 bounded to 120 -> 120x90 -> 90x90
        let out = normalize(gradient(400, 300), 120);
        assert_eq!(out.dimensions(), (90, 90));
    }

    #[test]
    fn test_small_image_only_cropped() {
        let out = normalize(gradient(60, 40), 1200);
        assert_eq!(out.dimensions(), (40, 40));
    }

    #[test]
    fn test_crop_is_centered() {
        let src = gradient(10, 4);
        let out = center_crop_square(src.clone());
        assert_eq!(out.dimensions(), (4, 4));
        // offset (10 - 4) / 2 = 3
        assert_eq!(out.get_pixel(0, 0), src.get_pixel(3, 0));
        assert_eq!(out.get_pixel(3, 3), src.get_pixel(6, 3));

        // odd remainder truncates toward zero: (7 - 4) / 2 = 1
        let src = gradient(4, 7);
        let out = center_crop_square(src.clone());
        assert_eq!(out.get_pixel(0, 0), src.get_pixel(0, 1));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let a = normalize(gradient(333, 217), 100);
        let b = normalize(gradient(333, 217), 100);
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_scale_by_floors_and_clamps() {
        let src = gradient(100, 100);
        assert_eq!(scale_by(&src, 0.555).dimensions(), (55, 55));
        assert_eq!(scale_by(&src, 0.001).dimensions(), (1, 1));
    }
}
