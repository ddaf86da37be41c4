//! Planar homography estimation: normalised DLT inside a seeded RANSAC loop.
//!
//! The direct linear transform stacks two equations per correspondence and
//! takes the null vector of `AᵀA` (eigenvector of the smallest eigenvalue).
//! Points are first shifted to their centroid and scaled to a mean distance
//! of √2, which keeps `AᵀA` well conditioned for page-sized coordinates.

use nalgebra::{Matrix3, SMatrix, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use tracing::debug;

type Point = (f64, f64);

/// RANSAC settings.
#[derive(Debug, Clone)]
pub struct RansacParams {
    /// Maximum forward reprojection error, in pixels, for an inlier.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Stop early once this probability of having drawn an all-inlier
    /// sample is reached.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0x00D0_CD1F,
        }
    }
}

/// A fitted model and its inlier mask.
#[derive(Debug, Clone)]
pub struct HomographyEstimate {
    /// Maps `src` points onto `dst` points.
    pub matrix: Matrix3<f64>,
    pub inliers: Vec<bool>,
}

impl HomographyEstimate {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&b| b).count()
    }
}

/// Apply `h` to a point. `None` when the point maps to infinity.
pub fn project(h: &Matrix3<f64>, (x, y): Point) -> Option<Point> {
    let p = h * Vector3::new(x, y, 1.0);
    if p.z.abs() < 1e-12 {
        return None;
    }
    Some((p.x / p.z, p.y / p.z))
}

/// Similarity transform moving `pts` to zero mean and √2 mean distance.
fn normalising_transform(pts: &[Point]) -> Option<Matrix3<f64>> {
    let n = pts.len() as f64;
    let (cx, cy) = pts
        .iter()
        .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
    let (cx, cy) = (cx / n, cy / n);
    let mean_dist = pts
        .iter()
        .map(|&(x, y)| ((x - cx).powi(2) + (y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// Least-squares homography from at least four correspondences.
pub fn estimate_dlt(src: &[Point], dst: &[Point]) -> Option<Matrix3<f64>> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }
    let t_src = normalising_transform(src)?;
    let t_dst = normalising_transform(dst)?;

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (&s, &d) in src.iter().zip(dst) {
        let (x, y) = project(&t_src, s)?;
        let (u, v) = project(&t_dst, d)?;
        let rows = [
            [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
            [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
        ];
        for row in &rows {
            for i in 0..9 {
                for j in 0..9 {
                    ata[(i, j)] += row[i] * row[j];
                }
            }
        }
    }

    let eigen = SymmetricEigen::new(ata);
    let smallest = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;
    let h = eigen.eigenvectors.column(smallest);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst.try_inverse()?;
    let mut h = t_dst_inv * h_norm * t_src;
    let scale = if h[(2, 2)].abs() > 1e-12 {
        h[(2, 2)]
    } else {
        h.norm()
    };
    h /= scale;

    let finite = h.iter().all(|v| v.is_finite());
    (finite && h.determinant().abs() > 1e-12).then_some(h)
}

/// Twice the signed area of triangle `abc`.
fn cross(a: Point, b: Point, c: Point) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

/// `true` when any three of the four points are (nearly) collinear.
fn degenerate_sample(pts: &[Point; 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES
        .iter()
        .any(|&[a, b, c]| cross(pts[a], pts[b], pts[c]).abs() < 1.0)
}

fn mark_inliers(h: &Matrix3<f64>, src: &[Point], dst: &[Point], threshold: f64) -> Vec<bool> {
    let t2 = threshold * threshold;
    src.iter()
        .zip(dst)
        .map(|(&s, &d)| match project(h, s) {
            Some((x, y)) => (x - d.0).powi(2) + (y - d.1).powi(2) <= t2,
            None => false,
        })
        .collect()
}

fn required_iterations(inlier_ratio: f64, confidence: f64, cap: usize) -> usize {
    let w4 = inlier_ratio.powi(4);
    if w4 >= 1.0 - f64::EPSILON {
        return 1;
    }
    if w4 <= f64::EPSILON {
        return cap;
    }
    let k = (1.0 - confidence).ln() / (1.0 - w4).ln();
    if k.is_finite() {
        (k.ceil() as usize).clamp(1, cap)
    } else {
        cap
    }
}

/// Robustly fit `dst ≈ H·src` with RANSAC.
///
/// Returns `None` when fewer than four correspondences are given, no
/// non-degenerate sample can be drawn, or the best model has fewer than four
/// inliers. The final model is refitted on all inliers of the best sample.
pub fn find_homography_ransac(
    src: &[Point],
    dst: &[Point],
    params: &RansacParams,
) -> Option<HomographyEstimate> {
    let n = src.len();
    if n < 4 || n != dst.len() {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
    let mut needed = params.max_iterations;
    let mut iteration = 0;

    while iteration < needed {
        iteration += 1;
        let sample = index::sample(&mut rng, n, 4);
        let idx: Vec<usize> = sample.iter().collect();
        let s = [src[idx[0]], src[idx[1]], src[idx[2]], src[idx[3]]];
        let d = [dst[idx[0]], dst[idx[1]], dst[idx[2]], dst[idx[3]]];
        if degenerate_sample(&s) || degenerate_sample(&d) {
            continue;
        }
        let Some(h) = estimate_dlt(&s, &d) else {
            continue;
        };

        let mask = mark_inliers(&h, src, dst, params.threshold);
        let count = mask.iter().filter(|&&b| b).count();
        if best.as_ref().is_none_or(|(_, _, c)| count > *c) {
            let ratio = count as f64 / n as f64;
            needed = required_iterations(ratio, params.confidence, params.max_iterations)
                .max(iteration);
            best = Some((h, mask, count));
        }
    }

    let (h, mask, count) = best?;
    if count < 4 {
        return None;
    }

    let (in_src, in_dst): (Vec<Point>, Vec<Point>) = src
        .iter()
        .zip(dst)
        .zip(&mask)
        .filter(|(_, keep)| **keep)
        .map(|((&s, &d), _)| (s, d))
        .unzip();

    let (matrix, inliers) = match estimate_dlt(&in_src, &in_dst) {
        Some(refined) => {
            let refined_mask = mark_inliers(&refined, src, dst, params.threshold);
            if refined_mask.iter().filter(|&&b| b).count() >= count {
                (refined, refined_mask)
            } else {
                (h, mask)
            }
        }
        None => (h, mask),
    };

    let estimate = HomographyEstimate { matrix, inliers };
    debug!(
        "RANSAC: {}/{} inliers after {} iterations",
        estimate.inlier_count(),
        n,
        iteration
    );
    (estimate.inlier_count() >= 4).then_some(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn grid() -> Vec<Point> {
        let mut pts = Vec::new();
        for i in 0..6 {
            for j in 0..5 {
                pts.push((30.0 + i as f64 * 57.0, 20.0 + j as f64 * 43.0 + (i * j) as f64));
            }
        }
        pts
    }

    fn known() -> Matrix3<f64> {
        Matrix3::new(1.02, 0.03, 12.0, -0.02, 0.98, -7.5, 1e-5, -2e-5, 1.0)
    }

    fn assert_close(a: &Matrix3<f64>, b: &Matrix3<f64>, tol: f64) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{a} vs {b}");
        }
    }

    #[test]
    fn dlt_recovers_exact_transform() {
        let h = known();
        let src = grid();
        let dst: Vec<Point> = src.iter().map(|&p| project(&h, p).unwrap()).collect();
        let est = estimate_dlt(&src, &dst).expect("fit");
        assert_close(&est, &h, 1e-6);
    }

    #[test]
    fn dlt_rejects_too_few_points() {
        let pts = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)];
        assert!(estimate_dlt(&pts, &pts).is_none());
    }

    #[test]
    fn ransac_ignores_outliers() {
        let h = known();
        let src = grid();
        let mut dst: Vec<Point> = src.iter().map(|&p| project(&h, p).unwrap()).collect();
        let mut rng = StdRng::seed_from_u64(11);
        for d in dst.iter_mut().step_by(4) {
            *d = (rng.random_range(0.0..400.0), rng.random_range(0.0..300.0));
        }

        let est = find_homography_ransac(&src, &dst, &RansacParams::default()).expect("fit");
        assert!(est.inlier_count() >= 22, "inliers {}", est.inlier_count());
        let (x, y) = project(&est.matrix, (200.0, 150.0)).unwrap();
        let (ex, ey) = project(&h, (200.0, 150.0)).unwrap();
        assert!((x - ex).abs() < 0.5 && (y - ey).abs() < 0.5);
    }

    #[test]
    fn ransac_is_deterministic() {
        let src = grid();
        let dst: Vec<Point> = src.iter().map(|&(x, y)| (x + 3.0, y - 2.0)).collect();
        let a = find_homography_ransac(&src, &dst, &RansacParams::default()).unwrap();
        let b = find_homography_ransac(&src, &dst, &RansacParams::default()).unwrap();
        assert_eq!(a.matrix, b.matrix);
        assert_eq!(a.inliers, b.inliers);
    }

    #[test]
    fn collinear_input_fails() {
        let src: Vec<Point> = (0..20).map(|i| (i as f64 * 10.0, i as f64 * 5.0)).collect();
        assert!(find_homography_ransac(&src, &src, &RansacParams::default()).is_none());
    }

    #[test]
    fn iteration_estimate_shrinks_with_inlier_ratio() {
        assert_eq!(required_iterations(1.0, 0.995, 2000), 1);
        assert_eq!(required_iterations(0.0, 0.995, 2000), 2000);
        assert!(required_iterations(0.9, 0.995, 2000) < required_iterations(0.5, 0.995, 2000));
    }
}
