//! Geometric alignment of the second document onto the first.
//!
//! [`align`] is the feature path: ORB keypoints on both luminance images,
//! ratio-tested matches, a RANSAC homography from target to reference, and a
//! bilinear warp into the reference grid. It never errors; every way it can
//! fall short is reported as `warped: None` with a match quality, and the
//! orchestrator decides whether to use [`fallback_align`] instead.

use crate::pipeline::features::{self, OrbParams};
use crate::pipeline::homography::{self, RansacParams};
use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::Matrix3;
use tracing::{debug, info};

/// Lowe's ratio for the nearest-neighbour test.
pub const RATIO_TEST: f32 = 0.75;
/// Ratio-test survivors needed before a homography is attempted.
pub const MIN_MATCHES: usize = 10;
/// Keypoints needed on each side before matching is attempted.
pub const MIN_KEYPOINTS: usize = 4;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Outcome of feature alignment.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// The reference raster, handed back unchanged.
    pub reference: RgbImage,
    /// Target warped into the reference grid; `None` when alignment failed.
    pub warped: Option<RgbImage>,
    /// Target → reference transform, when one was estimated.
    pub homography: Option<Matrix3<f64>>,
    /// In `[0, 1]`. Inlier fraction on success, `matches / 10` when too few
    /// matches survived, 0 otherwise.
    pub match_quality: f64,
    pub keypoints: [usize; 2],
    pub matches: usize,
    pub inliers: usize,
}

impl AlignmentResult {
    fn failed(reference: RgbImage, keypoints: [usize; 2], matches: usize, quality: f64) -> Self {
        Self {
            reference,
            warped: None,
            homography: None,
            match_quality: quality,
            keypoints,
            matches,
            inliers: 0,
        }
    }
}

/// BT.601 luma with 14-bit integer weights.
pub fn luminance(img: &RgbImage) -> GrayImage {
    let (w, h) = img.dimensions();
    let data = img
        .as_raw()
        .chunks_exact(3)
        .map(|p| luma(p[0], p[1], p[2]))
        .collect();
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
}

#[inline]
pub(crate) fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + 8192) >> 14) as u8
}

/// Align `target` onto `reference` with up to `feature_count` keypoints per
/// image.
pub fn align(reference: RgbImage, target: &RgbImage, feature_count: usize) -> AlignmentResult {
    let params = OrbParams::with_max_features(feature_count);
    let (ref_features, tgt_features) = rayon::join(
        || features::detect_and_describe(&luminance(&reference), &params),
        || features::detect_and_describe(&luminance(target), &params),
    );
    let keypoints = [ref_features.len(), tgt_features.len()];

    if keypoints[0] < MIN_KEYPOINTS || keypoints[1] < MIN_KEYPOINTS {
        info!(
            ref_keypoints = keypoints[0],
            target_keypoints = keypoints[1],
            "Too few keypoints for feature alignment"
        );
        return AlignmentResult::failed(reference, keypoints, 0, 0.0);
    }

    let matches = features::match_ratio_test(
        &ref_features.descriptors,
        &tgt_features.descriptors,
        RATIO_TEST,
    );
    if matches.len() < MIN_MATCHES {
        let quality = matches.len() as f64 / MIN_MATCHES as f64;
        info!(matches = matches.len(), "Too few ratio-test matches");
        return AlignmentResult::failed(reference, keypoints, matches.len(), quality);
    }

    let (src, dst): (Vec<(f64, f64)>, Vec<(f64, f64)>) = matches
        .iter()
        .map(|m| {
            let t = tgt_features.keypoints[m.train];
            let r = ref_features.keypoints[m.query];
            ((t.x as f64, t.y as f64), (r.x as f64, r.y as f64))
        })
        .unzip();

    let Some(estimate) = homography::find_homography_ransac(&src, &dst, &RansacParams::default())
    else {
        info!(matches = matches.len(), "Homography estimation failed");
        return AlignmentResult::failed(reference, keypoints, matches.len(), 0.0);
    };

    let inliers = estimate.inlier_count();
    let quality = inliers as f64 / matches.len() as f64;
    let Some(warped) = warp_to_reference(target, &estimate.matrix, reference.dimensions()) else {
        info!("Homography is not invertible as a warp");
        return AlignmentResult::failed(reference, keypoints, matches.len(), 0.0);
    };

    debug!(
        keypoints_ref = keypoints[0],
        keypoints_target = keypoints[1],
        matches = matches.len(),
        inliers,
        quality,
        "Feature alignment complete"
    );

    AlignmentResult {
        reference,
        warped: Some(warped),
        homography: Some(estimate.matrix),
        match_quality: quality,
        keypoints,
        matches: matches.len(),
        inliers,
    }
}

/// Bilinear warp of `target` by `h` into a white canvas of `size`.
fn warp_to_reference(target: &RgbImage, h: &Matrix3<f64>, size: (u32, u32)) -> Option<RgbImage> {
    let m = [
        h[(0, 0)] as f32,
        h[(0, 1)] as f32,
        h[(0, 2)] as f32,
        h[(1, 0)] as f32,
        h[(1, 1)] as f32,
        h[(1, 2)] as f32,
        h[(2, 0)] as f32,
        h[(2, 1)] as f32,
        h[(2, 2)] as f32,
    ];
    let projection = Projection::from_matrix(m)?;
    let mut out = RgbImage::from_pixel(size.0, size.1, WHITE);
    warp_into(target, &projection, Interpolation::Bilinear, WHITE, &mut out);
    Some(out)
}

/// Scale `target` to fit inside the reference's dimensions, keeping its
/// aspect ratio, and centre it on a white canvas of exactly that size.
pub fn fallback_align(reference: &RgbImage, target: &RgbImage) -> RgbImage {
    let (ref_w, ref_h) = reference.dimensions();
    let (tgt_w, tgt_h) = target.dimensions();
    let scale = (ref_w as f64 / tgt_w as f64).min(ref_h as f64 / tgt_h as f64);
    let new_w = ((tgt_w as f64 * scale) as u32).clamp(1, ref_w);
    let new_h = ((tgt_h as f64 * scale) as u32).clamp(1, ref_h);

    let resized;
    let placed = if (new_w, new_h) == (tgt_w, tgt_h) {
        target
    } else {
        resized = imageops::resize(target, new_w, new_h, FilterType::Triangle);
        &resized
    };

    let mut canvas = RgbImage::from_pixel(ref_w, ref_h, WHITE);
    let x = ((ref_w - new_w) / 2) as i64;
    let y = ((ref_h - new_h) / 2) as i64;
    imageops::overlay(&mut canvas, placed, x, y);

    debug!(
        "Fallback alignment: {}x{} → {}x{} at ({}, {}) on {}x{}",
        tgt_w, tgt_h, new_w, new_h, x, y, ref_w, ref_h
    );
    canvas
}
