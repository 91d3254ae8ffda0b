/// Frame registration against a fixed reference.
///
/// The primary path matches binary feature descriptors between the frame and
/// the reference and fits a similarity transform with RANSAC. `align_simple`
/// refines a pure translation by intensity correlation at half resolution,
/// and `detect_shift` only reports the phase-correlation shift.
///
/// Registration never fails hard: every problem is reported through
/// [`AlignmentResult`] and the input frame is handed back unchanged.
use image::imageops::{self, FilterType};
use image::GrayImage;
use nalgebra::{Matrix2, Vector2};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

use crate::config::AlignmentConfig;
use crate::features::match_cross_checked;
use crate::frame::Frame;
use crate::phase_correlation::{phase_correlate, PhaseShift};
use crate::ransac::{RansacConfig, RansacEstimator};
use crate::transform::{warp_frame, AffineTransform, BorderMode};

/// Iteration cap for the translation-only refinement
pub const SIMPLE_MAX_ITERATIONS: usize = 1000;

/// Step size below which the translation-only refinement has converged
pub const SIMPLE_EPSILON: f64 = 1e-7;

/// Downscale factor used by `align_simple`
pub const SIMPLE_SCALE: f64 = 0.5;

/// Phase correlation peaks below this are not used as a starting point
const MIN_SEED_RESPONSE: f64 = 0.05;

/// Why a frame could not be registered
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AlignmentFailure {
    ShapeMismatch,
    InsufficientKeypoints { image: usize, reference: usize },
    InsufficientMatches(usize),
    NoTransform,
    ExcessiveShift { shift: f64, max: f64 },
    NoConvergence,
}

impl fmt::Display for AlignmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentFailure::ShapeMismatch => write!(f, "frame and reference differ in size"),
            AlignmentFailure::InsufficientKeypoints { image, reference } => write!(
                f,
                "too few keypoints (frame {}, reference {})",
                image, reference
            ),
            AlignmentFailure::InsufficientMatches(n) => write!(f, "too few matches ({})", n),
            AlignmentFailure::NoTransform => write!(f, "no consistent transform found"),
            AlignmentFailure::ExcessiveShift { shift, max } => {
                write!(f, "shift of {:.1}px exceeds limit of {:.1}px", shift, max)
            }
            AlignmentFailure::NoConvergence => write!(f, "translation refinement did not converge"),
        }
    }
}

/// Outcome of one registration attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentResult {
    /// Motion of the frame relative to the reference: maps reference
    /// coordinates to frame coordinates. The applied correction is its inverse.
    pub transform: AffineTransform,
    pub success: bool,
    pub inlier_count: usize,
    pub match_count: usize,
    pub translation_magnitude: f64,
    pub failure: Option<AlignmentFailure>,
}

impl AlignmentResult {
    pub fn failed(failure: AlignmentFailure) -> Self {
        Self {
            transform: AffineTransform::identity(),
            success: false,
            inlier_count: 0,
            match_count: 0,
            translation_magnitude: 0.0,
            failure: Some(failure),
        }
    }

    fn accepted(transform: AffineTransform, inlier_count: usize, match_count: usize) -> Self {
        Self {
            translation_magnitude: transform.translation_magnitude(),
            transform,
            success: true,
            inlier_count,
            match_count,
            failure: None,
        }
    }

    pub fn describe_failure(&self) -> String {
        match &self.failure {
            Some(failure) => failure.to_string(),
            None => "none".to_string(),
        }
    }
}

/// Stateless registration engine. Holds configuration only; frames and the
/// reference are borrowed per call.
#[derive(Debug, Clone)]
pub struct Aligner {
    config: AlignmentConfig,
}

impl Default for Aligner {
    fn default() -> Self {
        Self::new(AlignmentConfig::default())
    }
}

impl Aligner {
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Register `frame` onto `reference` and warp it, zero filling exposed
    /// borders. On failure the input frame is returned as is.
    pub fn align<'a>(
        &self,
        frame: &'a Frame,
        reference: &Frame,
        max_shift: f64,
    ) -> (Cow<'a, Frame>, AlignmentResult) {
        let result = self.estimate(frame, reference, max_shift);
        if !result.success {
            return (Cow::Borrowed(frame), result);
        }

        match result.transform.inverse() {
            Some(correction) => {
                let aligned = warp_frame(frame, &correction, BorderMode::Constant);
                (Cow::Owned(aligned), result)
            }
            None => (
                Cow::Borrowed(frame),
                AlignmentResult::failed(AlignmentFailure::NoTransform),
            ),
        }
    }

    /// Estimate the frame's motion relative to the reference without warping
    pub fn estimate(&self, frame: &Frame, reference: &Frame, max_shift: f64) -> AlignmentResult {
        if !frame.same_shape(reference) {
            return AlignmentResult::failed(AlignmentFailure::ShapeMismatch);
        }

        let (image_features, reference_features) = {
            let detector = self.config.detector.create();
            (
                detector.detect_and_describe(&frame.to_gray8()),
                detector.detect_and_describe(&reference.to_gray8()),
            )
        };

        if image_features.len() < self.config.min_keypoints
            || reference_features.len() < self.config.min_keypoints
        {
            return AlignmentResult::failed(AlignmentFailure::InsufficientKeypoints {
                image: image_features.len(),
                reference: reference_features.len(),
            });
        }

        let mut matches = match_cross_checked(&reference_features.descriptors, &image_features.descriptors);
        if matches.len() < self.config.min_matches {
            return AlignmentResult::failed(AlignmentFailure::InsufficientMatches(matches.len()));
        }
        matches.sort_by_key(|m| m.distance);
        matches.truncate(self.config.max_matches);

        let (src, dst): (Vec<(f64, f64)>, Vec<(f64, f64)>) = matches
            .iter()
            .map(|m| {
                let r = &reference_features.keypoints[m.query];
                let i = &image_features.keypoints[m.train];
                ((r.x as f64, r.y as f64), (i.x as f64, i.y as f64))
            })
            .unzip();

        let estimator = RansacEstimator::new(RansacConfig {
            max_iterations: self.config.ransac_iterations,
            inlier_threshold: self.config.ransac_threshold,
            seed: self.config.seed,
            ..RansacConfig::default()
        });
        let Some(fit) = estimator.estimate(&src, &dst) else {
            return AlignmentResult::failed(AlignmentFailure::NoTransform);
        };
        if fit.inliers.len() < self.config.min_inliers {
            return AlignmentResult::failed(AlignmentFailure::NoTransform);
        }

        let shift = fit.transform.translation_magnitude();
        if shift > max_shift {
            return AlignmentResult::failed(AlignmentFailure::ExcessiveShift {
                shift,
                max: max_shift,
            });
        }

        let (tx, ty) = fit.transform.translation_components();
        tracing::debug!(
            "Aligned: shift ({:.2}, {:.2}) rotation {:.4} rad scale {:.4}, {} inliers of {} matches",
            tx,
            ty,
            fit.transform.rotation(),
            fit.transform.scale(),
            fit.inliers.len(),
            matches.len()
        );

        AlignmentResult::accepted(fit.transform, fit.inliers.len(), matches.len())
    }

    /// Translation-only registration for small drift. Works on half
    /// resolution grayscale, seeds the search with phase correlation, refines
    /// by Gauss-Newton on zero-mean intensities and warps with replicated
    /// borders.
    pub fn align_simple<'a>(&self, frame: &'a Frame, reference: &Frame) -> (Cow<'a, Frame>, AlignmentResult) {
        if !frame.same_shape(reference) {
            return (
                Cow::Borrowed(frame),
                AlignmentResult::failed(AlignmentFailure::ShapeMismatch),
            );
        }

        let (moving, width, height, scale) = downscale(frame.to_gray8());
        let (template, _, _, _) = downscale(reference.to_gray8());

        let seed = phase_correlate(&template, &moving, width, height)
            .filter(|shift| shift.response >= MIN_SEED_RESPONSE)
            .map(|shift| (shift.dx, shift.dy))
            .unwrap_or((0.0, 0.0));

        let Some((tx, ty)) = refine_translation(
            &template,
            &moving,
            width,
            height,
            seed,
            SIMPLE_MAX_ITERATIONS,
            SIMPLE_EPSILON,
        ) else {
            return (
                Cow::Borrowed(frame),
                AlignmentResult::failed(AlignmentFailure::NoConvergence),
            );
        };

        let (tx, ty) = (tx / scale, ty / scale);
        tracing::debug!("Simple alignment shift ({:.2}, {:.2})", tx, ty);

        let motion = AffineTransform::translation(tx, ty);
        let correction = AffineTransform::translation(-tx, -ty);
        let aligned = warp_frame(frame, &correction, BorderMode::Replicate);
        (Cow::Owned(aligned), AlignmentResult::accepted(motion, 0, 0))
    }

    /// Sub-pixel shift of `frame` relative to `reference` by phase
    /// correlation. Diagnostic only, nothing is warped.
    pub fn detect_shift(&self, frame: &Frame, reference: &Frame) -> Option<PhaseShift> {
        if !frame.same_shape(reference) {
            return None;
        }
        let image = gray_to_f32(&frame.to_gray8());
        let template = gray_to_f32(&reference.to_gray8());
        phase_correlate(&template, &image, frame.width, frame.height)
    }
}

fn gray_to_f32(image: &GrayImage) -> Vec<f32> {
    image.as_raw().iter().map(|&v| v as f32).collect()
}

/// Halve a grayscale image when it is large enough, returning the samples,
/// new size and the applied scale
fn downscale(gray: GrayImage) -> (Vec<f32>, usize, usize, f64) {
    let (w, h) = gray.dimensions();
    let (sw, sh) = (
        (w as f64 * SIMPLE_SCALE) as u32,
        (h as f64 * SIMPLE_SCALE) as u32,
    );
    if sw < 16 || sh < 16 {
        return (gray_to_f32(&gray), w as usize, h as usize, 1.0);
    }
    let small = imageops::resize(&gray, sw, sh, FilterType::Triangle);
    (gray_to_f32(&small), sw as usize, sh as usize, SIMPLE_SCALE)
}

fn bilinear(image: &[f32], width: usize, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let x1 = (x0 + 1).min(width - 1);
    let height = image.len() / width;
    let y1 = (y0 + 1).min(height - 1);

    let at = |xx: usize, yy: usize| image[yy * width + xx] as f64;
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

fn gradients(image: &[f32], width: usize, height: usize) -> (Vec<f32>, Vec<f32>) {
    let mut gx = vec![0.0f32; width * height];
    let mut gy = vec![0.0f32; width * height];
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let i = y * width + x;
            gx[i] = (image[i + 1] - image[i - 1]) * 0.5;
            gy[i] = (image[i + width] - image[i - width]) * 0.5;
        }
    }
    (gx, gy)
}

/// Find p such that `image(x + p)` best matches `template(x)` up to gain and
/// offset. Gauss-Newton on zero-mean intensities, the template rescaled to
/// the warped image's contrast on every step.
fn refine_translation(
    template: &[f32],
    image: &[f32],
    width: usize,
    height: usize,
    initial: (f64, f64),
    max_iterations: usize,
    epsilon: f64,
) -> Option<(f64, f64)> {
    if width < 3 || height < 3 {
        return None;
    }

    let (gx, gy) = gradients(image, width, height);
    let (max_x, max_y) = ((width - 1) as f64, (height - 1) as f64);
    let mut p = Vector2::new(initial.0, initial.1);
    // (template, warped, grad x, grad y)
    let mut samples: Vec<(f64, f64, f64, f64)> = Vec::with_capacity(width * height);

    for _ in 0..max_iterations {
        samples.clear();
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let sx = x as f64 + p.x;
                let sy = y as f64 + p.y;
                if sx < 0.0 || sy < 0.0 || sx > max_x || sy > max_y {
                    continue;
                }
                samples.push((
                    template[y * width + x] as f64,
                    bilinear(image, width, sx, sy),
                    bilinear(&gx, width, sx, sy),
                    bilinear(&gy, width, sx, sy),
                ));
            }
        }
        if samples.len() < 16 {
            return None;
        }

        let n = samples.len() as f64;
        let t_mean = samples.iter().map(|s| s.0).sum::<f64>() / n;
        let w_mean = samples.iter().map(|s| s.1).sum::<f64>() / n;
        let t_norm = samples.iter().map(|s| (s.0 - t_mean).powi(2)).sum::<f64>().sqrt();
        let w_norm = samples.iter().map(|s| (s.1 - w_mean).powi(2)).sum::<f64>().sqrt();
        if t_norm < 1e-9 || w_norm < 1e-9 {
            return None;
        }
        let gain = w_norm / t_norm;

        let mut hessian = Matrix2::<f64>::zeros();
        let mut rhs = Vector2::<f64>::zeros();
        for &(t, w, dx, dy) in &samples {
            let g = Vector2::new(dx, dy);
            let error = (t - t_mean) * gain - (w - w_mean);
            hessian += g * g.transpose();
            rhs += g * error;
        }

        let step = hessian.try_inverse()? * rhs;
        p += step;
        if !p.x.is_finite() || !p.y.is_finite() {
            return None;
        }
        if step.norm() < epsilon {
            break;
        }
    }

    Some((p.x, p.y))
}
