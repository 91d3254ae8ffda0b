/// Trail smoothing on top of gap filling
use crate::frame::{clip_to_u16, Frame};
use crate::gap_filling::{GapFillMethod, GapFiller};

/// Weight of the unblurred frame in the smoothing blend
const ORIGINAL_WEIGHT: f32 = 0.7;

/// Gap size used by each continuity pass
const CONTINUITY_GAP: usize = 3;

/// Blur strength used by each continuity pass
const CONTINUITY_SIGMA: f64 = 0.5;

/// Anisotropic Gaussian smoothing, stronger along rows than columns, blended
/// back with the original so trail brightness is kept
#[derive(Debug, Clone, Copy, Default)]
pub struct StarTrailSmoother;

impl StarTrailSmoother {
    pub fn new() -> Self {
        Self
    }

    /// Blur with sigma / 2 vertically and 2 * sigma horizontally, then blend
    /// 70% original with 30% blurred.
    ///
    /// Each kernel has radius ceil(4 sigma) truncated to `window_size`, so a
    /// small window narrows the blur: with `window_size` 3 and sigma 1 the
    /// horizontal kernel spans 7 taps instead of 17. A window of at least
    /// 8 sigma gives the untruncated Gaussian.
    pub fn smooth_trails(&self, frame: &Frame, window_size: usize, sigma: f64) -> Frame {
        if sigma <= 0.0 {
            return frame.clone();
        }

        let (width, height) = (frame.width, frame.height);
        let kernel_x = gaussian_kernel(2.0 * sigma, window_size);
        let kernel_y = gaussian_kernel(sigma / 2.0, window_size);

        frame.map_channels(|channel| {
            let horizontal = convolve_horizontal(channel, width, height, &kernel_x);
            let blurred = convolve_vertical(&horizontal, width, height, &kernel_y);
            channel
                .iter()
                .zip(&blurred)
                .map(|(&o, &b)| clip_to_u16(o as f32 * ORIGINAL_WEIGHT + b * (1.0 - ORIGINAL_WEIGHT)))
                .collect()
        })
    }

    /// Alternate morphological gap filling and light smoothing
    pub fn enhance_continuity(&self, frame: &Frame, iterations: usize) -> Frame {
        let filler = GapFiller::new(GapFillMethod::Morphological);
        let mut result = frame.clone();
        for _ in 0..iterations {
            result = filler.fill_gaps(&result, CONTINUITY_GAP, 0.1);
            result = self.smooth_trails(&result, 3, CONTINUITY_SIGMA);
        }
        result
    }
}

/// Normalized 1D Gaussian of radius min(ceil(4 sigma), max_radius)
fn gaussian_kernel(sigma: f64, max_radius: usize) -> Vec<f32> {
    let radius = ((4.0 * sigma).ceil() as usize).min(max_radius.max(1));
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel.into_iter().map(|k| k as f32).collect()
}

/// Mirror an out-of-range index back inside [0, len), edge sample repeated
fn reflect(i: isize, len: usize) -> usize {
    let len = len as isize;
    let period = 2 * len;
    let mut i = i.rem_euclid(period);
    if i >= len {
        i = period - 1 - i;
    }
    i as usize
}

fn convolve_horizontal(image: &[u16], width: usize, height: usize, kernel: &[f32]) -> Vec<f32> {
    let radius = (kernel.len() / 2) as isize;
    let mut result = vec![0.0f32; width * height];
    for y in 0..height {
        let row = &image[y * width..(y + 1) * width];
        for x in 0..width {
            let mut sum = 0.0;
            for (k, &weight) in kernel.iter().enumerate() {
                let sx = reflect(x as isize + k as isize - radius, width);
                sum += row[sx] as f32 * weight;
            }
            result[y * width + x] = sum;
        }
    }
    result
}

fn convolve_vertical(image: &[f32], width: usize, height: usize, kernel: &[f32]) -> Vec<f32> {
    let radius = (kernel.len() / 2) as isize;
    let mut result = vec![0.0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for (k, &weight) in kernel.iter().enumerate() {
                let sy = reflect(y as isize + k as isize - radius, height);
                sum += image[sy * width + x] * weight;
            }
            result[y * width + x] = sum;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_frame_is_unchanged() {
        let frame = Frame::filled(12, 8, 4321);
        let smoother = StarTrailSmoother::new();
        assert_eq!(smoother.smooth_trails(&frame, 5, 1.0), frame);
        assert_eq!(smoother.enhance_continuity(&frame, 2), frame);
    }

    #[test]
    fn test_smoothing_spreads_more_horizontally() {
        let mut frame = Frame::filled(21, 21, 0);
        frame.set_pixel(10, 10, [60000, 60000, 60000]);
        let smoothed = StarTrailSmoother::new().smooth_trails(&frame, 5, 1.0);

        let center = smoothed.pixel(10, 10)[0];
        assert!(center >= 42000 && center < 60000);
        // Two pixels sideways keeps more light than two pixels up
        assert!(smoothed.pixel(12, 10)[0] > smoothed.pixel(10, 12)[0]);
    }

    #[test]
    fn test_brightness_is_roughly_kept() {
        let mut frame = Frame::filled(30, 10, 1000);
        for x in 5..25 {
            frame.set_pixel(x, 5, [30000, 30000, 30000]);
        }
        let before: u64 = frame.data.iter().map(|&v| v as u64).sum();
        let smoothed = StarTrailSmoother::new().smooth_trails(&frame, 5, 1.0);
        let after: u64 = smoothed.data.iter().map(|&v| v as u64).sum();
        let ratio = after as f64 / before as f64;
        assert!((ratio - 1.0).abs() < 0.01, "ratio = {}", ratio);
    }

    #[test]
    fn test_zero_sigma_is_identity() {
        let mut frame = Frame::filled(5, 5, 0);
        frame.set_pixel(2, 2, [9, 9, 9]);
        assert_eq!(StarTrailSmoother::new().smooth_trails(&frame, 5, 0.0), frame);
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect(-1, 5), 0);
        assert_eq!(reflect(-2, 5), 1);
        assert_eq!(reflect(5, 5), 4);
        assert_eq!(reflect(6, 5), 3);
        assert_eq!(reflect(2, 5), 2);
    }

    #[test]
    fn test_kernel_is_normalized() {
        let kernel = gaussian_kernel(2.0, 5);
        assert_eq!(kernel.len(), 11);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_window_truncates_kernel_radius() {
        assert_eq!(gaussian_kernel(2.0, 3).len(), 7);
        assert_eq!(gaussian_kernel(2.0, 8).len(), 17);
        assert_eq!(gaussian_kernel(2.0, 100).len(), 17);
        assert_eq!(gaussian_kernel(0.5, 0).len(), 3);
    }

    #[test]
    fn test_narrow_window_limits_spread() {
        let mut frame = Frame::filled(21, 21, 0);
        frame.set_pixel(10, 10, [60000, 60000, 60000]);
        let smoother = StarTrailSmoother::new();

        let narrow = smoother.smooth_trails(&frame, 1, 1.0);
        assert_eq!(narrow.pixel(12, 10), [0, 0, 0]);
        assert!(narrow.pixel(11, 10)[0] > 0);

        let full = smoother.smooth_trails(&frame, 8, 1.0);
        assert!(full.pixel(12, 10)[0] > 0);
        assert!(full.pixel(14, 10)[0] > 0);
    }
}
