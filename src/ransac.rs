/// Robust similarity fitting over noisy point correspondences
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use crate::transform::AffineTransform;

/// Points needed to pin down a similarity transform
const MIN_SAMPLES: usize = 2;

#[derive(Debug, Clone)]
pub struct RansacConfig {
    pub max_iterations: usize,
    /// Reprojection distance in pixels below which a pair is an inlier
    pub inlier_threshold: f64,
    /// Stop early once this probability of having drawn an all-inlier sample is reached
    pub confidence: f64,
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            inlier_threshold: 3.0,
            confidence: 0.99,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult {
    /// Least-squares fit over all inliers of the best hypothesis
    pub transform: AffineTransform,
    pub inliers: Vec<usize>,
    pub iterations: usize,
}

pub struct RansacEstimator {
    config: RansacConfig,
}

impl RansacEstimator {
    pub fn new(config: RansacConfig) -> Self {
        Self { config }
    }

    /// Fit `dst ≈ T(src)` with T a rotation, uniform scale and translation.
    /// Returns `None` when there are too few points or no hypothesis
    /// gathers at least two inliers.
    pub fn estimate(&self, src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<RansacResult> {
        let n = src.len().min(dst.len());
        if n < MIN_SAMPLES {
            return None;
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let threshold_sq = self.config.inlier_threshold * self.config.inlier_threshold;
        let mut best_inliers: Vec<usize> = Vec::new();
        let mut max_iterations = self.config.max_iterations;
        let mut iterations = 0;

        while iterations < max_iterations {
            iterations += 1;

            let picked = sample(&mut rng, n, MIN_SAMPLES);
            let (i, j) = (picked.index(0), picked.index(1));
            let Some(model) = estimate_similarity(&[src[i], src[j]], &[dst[i], dst[j]]) else {
                continue;
            };

            let inliers = collect_inliers(src, dst, &model, threshold_sq);
            if inliers.len() > best_inliers.len() {
                best_inliers = inliers;
                let ratio = best_inliers.len() as f64 / n as f64;
                max_iterations = max_iterations.min(adaptive_iterations(
                    ratio,
                    MIN_SAMPLES,
                    self.config.confidence,
                ));
            }
        }

        if best_inliers.len() < MIN_SAMPLES {
            return None;
        }

        // Refit on the consensus set, then re-collect inliers once with the
        // refined model
        let (src_in, dst_in) = gather(src, dst, &best_inliers);
        let mut transform = estimate_similarity(&src_in, &dst_in)?;
        let refined = collect_inliers(src, dst, &transform, threshold_sq);
        if refined.len() >= best_inliers.len() {
            let (src_in, dst_in) = gather(src, dst, &refined);
            if let Some(t) = estimate_similarity(&src_in, &dst_in) {
                transform = t;
                best_inliers = refined;
            }
        }

        Some(RansacResult {
            transform,
            inliers: best_inliers,
            iterations,
        })
    }
}

fn gather(src: &[(f64, f64)], dst: &[(f64, f64)], indices: &[usize]) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    indices.iter().map(|&i| (src[i], dst[i])).unzip()
}

fn collect_inliers(
    src: &[(f64, f64)],
    dst: &[(f64, f64)],
    model: &AffineTransform,
    threshold_sq: f64,
) -> Vec<usize> {
    src.iter()
        .zip(dst)
        .enumerate()
        .filter_map(|(i, (&(sx, sy), &(dx, dy)))| {
            let (px, py) = model.apply(sx, sy);
            let err = (px - dx).powi(2) + (py - dy).powi(2);
            (err <= threshold_sq).then_some(i)
        })
        .collect()
}

/// Iterations needed to draw one all-inlier sample with `confidence`:
/// N = ln(1 - confidence) / ln(1 - w^n)
pub fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_outlier = (1.0 - w_n).ln();
    if log_outlier >= 0.0 {
        return usize::MAX;
    }
    ((1.0 - confidence).ln() / log_outlier).ceil().max(1.0) as usize
}

fn centroid(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    (sx / n, sy / n)
}

/// Closed-form least-squares similarity from centered cross-covariance
pub fn estimate_similarity(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<AffineTransform> {
    if src.len() < MIN_SAMPLES || src.len() != dst.len() {
        return None;
    }

    let (scx, scy) = centroid(src);
    let (dcx, dcy) = centroid(dst);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syx = 0.0;
    let mut syy = 0.0;
    let mut src_var = 0.0;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
        let (rx, ry) = (sx - scx, sy - scy);
        let (tx, ty) = (dx - dcx, dy - dcy);
        sxx += rx * tx;
        sxy += rx * ty;
        syx += ry * tx;
        syy += ry * ty;
        src_var += rx * rx + ry * ry;
    }

    if src_var < 1e-10 {
        return None;
    }

    let angle = (sxy - syx).atan2(sxx + syy);
    let (sin, cos) = angle.sin_cos();
    let scale = ((sxx + syy) * cos + (sxy - syx) * sin) / src_var;
    if scale <= 0.0 || !scale.is_finite() {
        return None;
    }

    let tx = dcx - scale * (cos * scx - sin * scy);
    let ty = dcy - scale * (sin * scx + cos * scy);
    Some(AffineTransform::similarity(scale, angle, tx, ty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn grid(n: usize) -> Vec<(f64, f64)> {
        (0..n)
            .map(|i| ((i % 10) as f64 * 13.0 + 5.0, (i / 10) as f64 * 11.0 + 7.0))
            .collect()
    }

    #[test]
    fn test_similarity_exact_fit() {
        let truth = AffineTransform::similarity(1.01, 0.02, 4.5, -2.0);
        let src = grid(20);
        let dst: Vec<_> = src.iter().map(|&(x, y)| truth.apply(x, y)).collect();
        let fit = estimate_similarity(&src, &dst).unwrap();
        assert!((fit.scale() - 1.01).abs() < 1e-9);
        assert!((fit.rotation() - 0.02).abs() < 1e-9);
        let (tx, ty) = fit.translation_components();
        assert!((tx - 4.5).abs() < 1e-6 && (ty + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_points() {
        let same = vec![(3.0, 3.0), (3.0, 3.0)];
        assert!(estimate_similarity(&same, &same).is_none());
        assert!(estimate_similarity(&[(1.0, 1.0)], &[(2.0, 2.0)]).is_none());
    }

    #[test]
    fn test_ransac_rejects_outliers() {
        let truth = AffineTransform::translation(-5.0, -3.0);
        let src = grid(60);
        let mut dst: Vec<_> = src.iter().map(|&(x, y)| truth.apply(x, y)).collect();
        let mut rng = StdRng::seed_from_u64(11);
        for p in dst.iter_mut().take(20) {
            *p = (rng.gen_range(0.0..150.0), rng.gen_range(0.0..150.0));
        }

        let estimator = RansacEstimator::new(RansacConfig {
            seed: Some(42),
            ..RansacConfig::default()
        });
        let result = estimator.estimate(&src, &dst).unwrap();
        let (tx, ty) = result.transform.translation_components();
        assert!((tx + 5.0).abs() < 0.1, "tx = {}", tx);
        assert!((ty + 3.0).abs() < 0.1, "ty = {}", ty);
        assert!(result.inliers.len() >= 40);
        assert!(result.inliers.iter().all(|&i| i >= 20 || {
            let (px, py) = truth.apply(src[i].0, src[i].1);
            (px - dst[i].0).hypot(py - dst[i].1) <= 3.0
        }));
    }

    #[test]
    fn test_too_few_points() {
        let estimator = RansacEstimator::new(RansacConfig::default());
        assert!(estimator.estimate(&[(0.0, 0.0)], &[(1.0, 1.0)]).is_none());
    }

    #[test]
    fn test_adaptive_iterations() {
        assert_eq!(adaptive_iterations(1.0, 2, 0.99), 1);
        assert_eq!(adaptive_iterations(0.0, 2, 0.99), usize::MAX);
        let half = adaptive_iterations(0.5, 2, 0.99);
        // ln(0.01) / ln(0.75) = 16.0078...
        assert_eq!(half, 17);
        assert!(adaptive_iterations(0.2, 2, 0.99) > half);
    }
}
