//! Size normalisation: bound the longer raster side before alignment.

use image::imageops;
use image::RgbImage;
use tracing::debug;

/// Downscale `raster` so its longer side is at most `max_dimension`.
///
/// Uses area averaging (`imageops::thumbnail`) and keeps the aspect ratio;
/// new side lengths are truncated, never rounded up. Rasters already within
/// bounds are returned untouched.
pub fn normalize(raster: RgbImage, max_dimension: u32) -> RgbImage {
    let (w, h) = raster.dimensions();
    let longer = w.max(h);
    if longer <= max_dimension || max_dimension == 0 {
        return raster;
    }

    let scale = max_dimension as f64 / longer as f64;
    let new_w = ((w as f64 * scale) as u32).max(1);
    let new_h = ((h as f64 * scale) as u32).max(1);

    debug!("Normalising {}x{} → {}x{} (max {})", w, h, new_w, new_h, max_dimension);
    imageops::thumbnail(&raster, new_w, new_h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn long_side_is_capped() {
        let img = RgbImage::from_pixel(8000, 120, Rgb([255, 255, 255]));
        let out = normalize(img, 4000);
        assert_eq!(out.dimensions(), (4000, 60));
    }

    #[test]
    fn portrait_sides_truncate() {
        let img = RgbImage::from_pixel(333, 1000, Rgb([0, 0, 0]));
        let out = normalize(img, 500);
        // 333 * 0.5 = 166.5 → 166
        assert_eq!(out.dimensions(), (166, 500));
    }

    #[test]
    fn small_rasters_pass_through() {
        let img = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8, y as u8, 7]));
        let out = normalize(img.clone(), 4000);
        assert_eq!(out, img);
    }

    #[test]
    fn area_average_preserves_flat_colour() {
        let img = RgbImage::from_pixel(900, 300, Rgb([120, 60, 30]));
        let out = normalize(img, 300);
        assert_eq!(out.dimensions(), (300, 100));
        assert_eq!(*out.get_pixel(150, 50), Rgb([120, 60, 30]));
    }
}
