//! Oriented FAST keypoints with rotated BRIEF descriptors, plus a
//! brute-force Hamming matcher with Lowe's ratio test.
//!
//! ## Detection
//!
//! Each level of a scale pyramid (default 8 levels, factor 1.2) runs FAST-9
//! from `imageproc`. Corners inside the border margin are dropped, the rest
//! ranked by Harris response, thinned by a greedy radius suppression and cut
//! to the level's share of the feature budget. Budgets shrink geometrically
//! with the level so coarse levels do not crowd out fine detail.
//!
//! ## Description
//!
//! Orientation comes from the intensity centroid of a circular patch. The
//! descriptor compares 256 fixed point pairs, rotated by that orientation,
//! on a Gaussian-smoothed copy of the level. The pair pattern is generated
//! once from a fixed seed, so descriptors are stable across runs and
//! processes.

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

/// Radius of the orientation patch.
const PATCH_RADIUS: i32 = 15;
/// Radius containing every BRIEF sample point before rotation.
const PATTERN_RADIUS: i32 = 13;
const PATTERN_SEED: u64 = 0x5EED_0B1E_F000_0256;
const HARRIS_HALF_BLOCK: i32 = 3;
const HARRIS_K: f32 = 0.04;
const BLUR_SIGMA: f32 = 2.0;

/// Detector settings.
#[derive(Debug, Clone)]
pub struct OrbParams {
    /// Total keypoint budget across all pyramid levels.
    pub max_features: usize,
    pub levels: usize,
    pub scale_factor: f32,
    pub fast_threshold: u8,
    /// Corners closer than this to a border are discarded.
    pub edge_margin: u32,
    /// Minimum distance between retained corners on one level.
    pub nms_radius: f32,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            max_features: 500,
            levels: 8,
            scale_factor: 1.2,
            fast_threshold: 20,
            edge_margin: 31,
            nms_radius: 3.0,
        }
    }
}

impl OrbParams {
    pub fn with_max_features(max_features: usize) -> Self {
        Self {
            max_features,
            ..Self::default()
        }
    }
}

/// A detected keypoint in level-0 pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub level: usize,
    /// Radians, from the intensity centroid.
    pub angle: f32,
    /// Harris corner response.
    pub response: f32,
}

/// 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Keypoints with their descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// A correspondence that survived the ratio test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

static BRIEF_PATTERN: LazyLock<Vec<[(f32, f32); 2]>> = LazyLock::new(|| {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let r2 = PATTERN_RADIUS * PATTERN_RADIUS;
    let mut point = move || loop {
        let x = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        let y = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        if x * x + y * y <= r2 {
            return (x as f32, y as f32);
        }
    };
    let mut pairs = Vec::with_capacity(256);
    while pairs.len() < 256 {
        let (p, q) = (point(), point());
        if p != q {
            pairs.push([p, q]);
        }
    }
    pairs
});

/// Half-width of the orientation patch for each row offset.
static PATCH_EXTENT: LazyLock<Vec<i32>> = LazyLock::new(|| {
    (0..=PATCH_RADIUS)
        .map(|dy| (((PATCH_RADIUS * PATCH_RADIUS - dy * dy) as f32).sqrt()).floor() as i32)
        .collect()
});

/// Detect keypoints and compute their descriptors.
pub fn detect_and_describe(gray: &GrayImage, params: &OrbParams) -> Features {
    if params.max_features == 0 {
        return Features::default();
    }
    let margin = params.edge_margin.max(PATCH_RADIUS as u32 + 2);
    let budgets = level_budgets(params.max_features, params.levels, params.scale_factor);

    let per_level: Vec<(Vec<Keypoint>, Vec<Descriptor>)> = budgets
        .par_iter()
        .enumerate()
        .filter_map(|(level, &budget)| {
            let scale = params.scale_factor.powi(level as i32);
            let w = (gray.width() as f32 / scale).round() as u32;
            let h = (gray.height() as f32 / scale).round() as u32;
            if budget == 0 || w <= 2 * margin + 1 || h <= 2 * margin + 1 {
                return None;
            }
            let img: Cow<GrayImage> = if level == 0 {
                Cow::Borrowed(gray)
            } else {
                Cow::Owned(imageops::resize(gray, w, h, FilterType::Triangle))
            };
            Some(detect_level(&img, level, scale, budget, margin, params))
        })
        .collect();

    let mut features = Features::default();
    for (kps, descs) in per_level {
        features.keypoints.extend(kps);
        features.descriptors.extend(descs);
    }
    debug!(
        "Detected {} keypoints on {}x{} (budget {})",
        features.len(),
        gray.width(),
        gray.height(),
        params.max_features
    );
    features
}

fn detect_level(
    img: &GrayImage,
    level: usize,
    scale: f32,
    budget: usize,
    margin: u32,
    params: &OrbParams,
) -> (Vec<Keypoint>, Vec<Descriptor>) {
    let (w, h) = img.dimensions();
    let mut candidates: Vec<(u32, u32, f32)> = corners_fast9(img, params.fast_threshold)
        .into_iter()
        .filter(|c| c.x >= margin && c.y >= margin && c.x < w - margin && c.y < h - margin)
        .map(|c| (c.x, c.y, harris_response(img, c.x, c.y)))
        .collect();
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

    let kept = suppress_neighbours(&candidates, params.nms_radius, budget);
    if kept.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let blurred = gaussian_blur_f32(img, BLUR_SIGMA);
    kept.into_iter()
        .map(|(x, y, response)| {
            let angle = orientation(img, x, y);
            let keypoint = Keypoint {
                x: x as f32 * scale,
                y: y as f32 * scale,
                level,
                angle,
                response,
            };
            (keypoint, steered_brief(&blurred, x, y, angle))
        })
        .unzip()
}

/// Split `total` across `levels` with a geometric falloff of `1/scale_factor`.
fn level_budgets(total: usize, levels: usize, scale_factor: f32) -> Vec<usize> {
    let levels = levels.max(1);
    let factor = 1.0 / scale_factor.max(1.0) as f64;
    let mut desired = if (1.0 - factor).abs() < 1e-9 {
        total as f64 / levels as f64
    } else {
        total as f64 * (1.0 - factor) / (1.0 - factor.powi(levels as i32))
    };

    let mut budgets = Vec::with_capacity(levels);
    let mut assigned = 0usize;
    for _ in 0..levels - 1 {
        let n = (desired.round() as usize).min(total - assigned);
        budgets.push(n);
        assigned += n;
        desired *= factor;
    }
    budgets.push(total - assigned);
    budgets
}

fn harris_response(img: &GrayImage, cx: u32, cy: u32) -> f32 {
    let p = |x: i32, y: i32| img.get_pixel(x as u32, y as u32)[0] as f32;
    let (mut sxx, mut syy, mut sxy) = (0f32, 0f32, 0f32);
    for dy in -HARRIS_HALF_BLOCK..=HARRIS_HALF_BLOCK {
        for dx in -HARRIS_HALF_BLOCK..=HARRIS_HALF_BLOCK {
            let x = cx as i32 + dx;
            let y = cy as i32 + dy;
            let ix = (p(x + 1, y - 1) + 2.0 * p(x + 1, y) + p(x + 1, y + 1))
                - (p(x - 1, y - 1) + 2.0 * p(x - 1, y) + p(x - 1, y + 1));
            let iy = (p(x - 1, y + 1) + 2.0 * p(x, y + 1) + p(x + 1, y + 1))
                - (p(x - 1, y - 1) + 2.0 * p(x, y - 1) + p(x + 1, y - 1));
            sxx += ix * ix;
            syy += iy * iy;
            sxy += ix * iy;
        }
    }
    let trace = sxx + syy;
    sxx * syy - sxy * sxy - HARRIS_K * trace * trace
}

/// Greedy radius suppression over candidates sorted by descending response.
fn suppress_neighbours(
    sorted: &[(u32, u32, f32)],
    radius: f32,
    budget: usize,
) -> Vec<(u32, u32, f32)> {
    let cell = radius.max(1.0);
    let r2 = radius * radius;
    let mut grid: HashMap<(i32, i32), Vec<(f32, f32)>> = HashMap::new();
    let mut kept = Vec::with_capacity(budget.min(sorted.len()));

    for &(x, y, response) in sorted {
        if kept.len() >= budget {
            break;
        }
        let (fx, fy) = (x as f32, y as f32);
        let (gx, gy) = ((fx / cell) as i32, (fy / cell) as i32);
        let crowded = (-1..=1).any(|oy| {
            (-1..=1).any(|ox| {
                grid.get(&(gx + ox, gy + oy)).is_some_and(|pts| {
                    pts.iter()
                        .any(|&(px, py)| (px - fx).powi(2) + (py - fy).powi(2) < r2)
                })
            })
        });
        if !crowded {
            grid.entry((gx, gy)).or_default().push((fx, fy));
            kept.push((x, y, response));
        }
    }
    kept
}

fn orientation(img: &GrayImage, cx: u32, cy: u32) -> f32 {
    let (mut m10, mut m01) = (0i64, 0i64);
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        let extent = PATCH_EXTENT[dy.unsigned_abs() as usize];
        let y = (cy as i32 + dy) as u32;
        for dx in -extent..=extent {
            let v = img.get_pixel((cx as i32 + dx) as u32, y)[0] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }
    (m01 as f32).atan2(m10 as f32)
}

fn steered_brief(blurred: &GrayImage, cx: u32, cy: u32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |(px, py): (f32, f32)| {
        let x = (cx as f32 + px * cos - py * sin).round() as u32;
        let y = (cy as f32 + px * sin + py * cos).round() as u32;
        blurred.get_pixel(x, y)[0]
    };

    let mut words = [0u64; 4];
    for (i, [p, q]) in BRIEF_PATTERN.iter().enumerate() {
        if sample(*p) < sample(*q) {
            words[i / 64] |= 1u64 << (i % 64);
        }
    }
    Descriptor(words)
}

/// For every query descriptor find its two nearest train descriptors and
/// keep the pair when `best < ratio * second`. Needs at least two train
/// descriptors.
pub fn match_ratio_test(
    query: &[Descriptor],
    train: &[Descriptor],
    ratio: f32,
) -> Vec<FeatureMatch> {
    if train.len() < 2 {
        return Vec::new();
    }
    query
        .par_iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let (mut best, mut best_idx, mut second) = (u32::MAX, 0usize, u32::MAX);
            for (ti, t) in train.iter().enumerate() {
                let d = q.hamming(t);
                if d < best {
                    second = best;
                    best = d;
                    best_idx = ti;
                } else if d < second {
                    second = d;
                }
            }
            ((best as f32) < ratio * second as f32).then_some(FeatureMatch {
                query: qi,
                train: best_idx,
                distance: best,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blocks(w: u32, h: u32, seed: u64) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..40 {
            let bw = rng.random_range(8..40);
            let bh = rng.random_range(8..40);
            let x0 = rng.random_range(40..w - 40 - bw);
            let y0 = rng.random_range(40..h - 40 - bh);
            let shade = rng.random_range(0..120u8);
            for y in y0..y0 + bh {
                for x in x0..x0 + bw {
                    img.put_pixel(x, y, Luma([shade]));
                }
            }
        }
        img
    }

    #[test]
    fn budgets_sum_to_total() {
        for total in [1, 7, 500, 4000] {
            let b = level_budgets(total, 8, 1.2);
            assert_eq!(b.len(), 8);
            assert_eq!(b.iter().sum::<usize>(), total);
        }
        assert!(level_budgets(4000, 8, 1.2)[0] > level_budgets(4000, 8, 1.2)[7]);
    }

    #[test]
    fn pattern_stays_inside_radius() {
        assert_eq!(BRIEF_PATTERN.len(), 256);
        let r2 = (PATTERN_RADIUS * PATTERN_RADIUS) as f32;
        for [p, q] in BRIEF_PATTERN.iter() {
            assert!(p.0 * p.0 + p.1 * p.1 <= r2);
            assert!(q.0 * q.0 + q.1 * q.1 <= r2);
            assert_ne!(p, q);
        }
    }

    #[test]
    fn hamming_counts_differing_bits() {
        let a = Descriptor([0, 0, 0, 0]);
        let b = Descriptor([0b1011, 0, u64::MAX, 1]);
        assert_eq!(a.hamming(&b), 3 + 64 + 1);
        assert_eq!(b.hamming(&b), 0);
    }

    #[test]
    fn blank_image_has_no_keypoints() {
        let img = GrayImage::from_pixel(200, 200, Luma([255]));
        assert!(detect_and_describe(&img, &OrbParams::default()).is_empty());
    }

    #[test]
    fn detection_respects_budget_and_is_deterministic() {
        let img = blocks(400, 300, 7);
        let params = OrbParams::with_max_features(150);
        let a = detect_and_describe(&img, &params);
        let b = detect_and_describe(&img, &params);
        assert!(a.len() >= 20, "only {} keypoints", a.len());
        assert!(a.len() <= 150);
        assert_eq!(a.keypoints.len(), a.descriptors.len());
        assert_eq!(a.keypoints, b.keypoints);
        assert_eq!(a.descriptors, b.descriptors);
        for kp in &a.keypoints {
            assert!(kp.x >= 0.0 && kp.x < 400.0 && kp.y >= 0.0 && kp.y < 300.0);
        }
    }

    #[test]
    fn ratio_test_matches_identical_sets() {
        let mut rng = StdRng::seed_from_u64(3);
        let descs: Vec<Descriptor> = (0..50)
            .map(|_| Descriptor([rng.random(), rng.random(), rng.random(), rng.random()]))
            .collect();
        let matches = match_ratio_test(&descs, &descs, 0.75);
        assert_eq!(matches.len(), 50);
        assert!(matches.iter().all(|m| m.query == m.train && m.distance == 0));
    }

    #[test]
    fn ratio_test_rejects_ambiguous_matches() {
        let d = Descriptor([1, 2, 3, 4]);
        let matches = match_ratio_test(&[d], &[d, d], 0.75);
        assert!(matches.is_empty());
        assert!(match_ratio_test(&[d], &[d], 0.75).is_empty());
    }
}
