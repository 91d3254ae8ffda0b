/// Translation estimation by phase correlation.
///
/// Both images are mean-subtracted, Hann windowed and zero padded to power of
/// two sizes. The peak of the inverse transform of the normalized cross-power
/// spectrum gives the shift, refined to sub-pixel precision with a parabola
/// through the peak and its neighbors.
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use std::sync::Arc;

/// Translation of an image relative to a reference: content at (x, y) in the
/// reference appears at (x + dx, y + dy) in the image
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseShift {
    pub dx: f64,
    pub dy: f64,
    /// Height of the correlation peak, 1.0 for a perfect match
    pub response: f64,
}

impl PhaseShift {
    pub fn magnitude(&self) -> f64 {
        self.dx.hypot(self.dy)
    }
}

/// Phase correlator sized for one image shape. FFT plans are built once.
pub struct PhaseCorrelator {
    width: usize,
    height: usize,
    fft_width: usize,
    fft_height: usize,
    row_fft: Arc<dyn Fft<f32>>,
    col_fft: Arc<dyn Fft<f32>>,
    row_ifft: Arc<dyn Fft<f32>>,
    col_ifft: Arc<dyn Fft<f32>>,
    window_x: Vec<f32>,
    window_y: Vec<f32>,
}

impl PhaseCorrelator {
    pub fn new(width: usize, height: usize) -> Self {
        let fft_width = width.max(1).next_power_of_two();
        let fft_height = height.max(1).next_power_of_two();

        let mut planner = FftPlanner::new();
        Self {
            width,
            height,
            fft_width,
            fft_height,
            row_fft: planner.plan_fft_forward(fft_width),
            col_fft: planner.plan_fft_forward(fft_height),
            row_ifft: planner.plan_fft_inverse(fft_width),
            col_ifft: planner.plan_fft_inverse(fft_height),
            window_x: hann_window(width),
            window_y: hann_window(height),
        }
    }

    /// Shift of `image` relative to `reference`, both row-major of the size
    /// given to `new`. `None` for mismatched buffers, degenerate sizes or
    /// featureless input.
    pub fn correlate(&self, reference: &[f32], image: &[f32]) -> Option<PhaseShift> {
        let expected = self.width * self.height;
        if reference.len() != expected || image.len() != expected || self.width < 2 || self.height < 2 {
            return None;
        }

        let ref_spectrum = self.forward(reference);
        let img_spectrum = self.forward(image);

        let mut cross: Vec<Complex<f32>> = img_spectrum
            .iter()
            .zip(&ref_spectrum)
            .map(|(&a, &b)| {
                let product = a * b.conj();
                let magnitude = product.norm();
                if magnitude > 1e-10 {
                    product / magnitude
                } else {
                    Complex::new(0.0, 0.0)
                }
            })
            .collect();

        let surface = self.inverse(&mut cross);
        let (peak_x, peak_y, peak) = find_peak(&surface, self.fft_width);
        if !peak.is_finite() || peak <= 0.0 {
            return None;
        }

        let (nx, ny) = (self.fft_width, self.fft_height);
        let at = |x: isize, y: isize| -> f32 {
            let xx = x.rem_euclid(nx as isize) as usize;
            let yy = y.rem_euclid(ny as isize) as usize;
            surface[yy * nx + xx]
        };
        let (px, py) = (peak_x as isize, peak_y as isize);
        let sub_x = parabolic_offset(at(px - 1, py), peak, at(px + 1, py));
        let sub_y = parabolic_offset(at(px, py - 1), peak, at(px, py + 1));

        Some(PhaseShift {
            dx: wrap(peak_x, nx) + sub_x,
            dy: wrap(peak_y, ny) + sub_y,
            response: peak as f64,
        })
    }

    fn forward(&self, image: &[f32]) -> Vec<Complex<f32>> {
        let (nx, ny) = (self.fft_width, self.fft_height);
        let mean = image.iter().map(|&v| v as f64).sum::<f64>() / image.len() as f64;

        let mut data = vec![Complex::new(0.0f32, 0.0); nx * ny];
        for y in 0..self.height {
            for x in 0..self.width {
                let v = (image[y * self.width + x] as f64 - mean) as f32;
                data[y * nx + x] = Complex::new(v * self.window_x[x] * self.window_y[y], 0.0);
            }
        }

        self.transform_2d(&mut data, &self.row_fft, &self.col_fft);
        data
    }

    fn inverse(&self, data: &mut [Complex<f32>]) -> Vec<f32> {
        self.transform_2d(data, &self.row_ifft, &self.col_ifft);
        let norm = 1.0 / (self.fft_width * self.fft_height) as f32;
        data.iter().map(|c| c.re * norm).collect()
    }

    /// Row-column 2D transform in place
    fn transform_2d(&self, data: &mut [Complex<f32>], rows: &Arc<dyn Fft<f32>>, cols: &Arc<dyn Fft<f32>>) {
        let (nx, ny) = (self.fft_width, self.fft_height);
        for row in data.chunks_exact_mut(nx) {
            rows.process(row);
        }

        let mut column = vec![Complex::new(0.0f32, 0.0); ny];
        for x in 0..nx {
            for (y, c) in column.iter_mut().enumerate() {
                *c = data[y * nx + x];
            }
            cols.process(&mut column);
            for (y, c) in column.iter().enumerate() {
                data[y * nx + x] = *c;
            }
        }
    }
}

/// Shift of `image` relative to `reference` for two equally sized planes
pub fn phase_correlate(reference: &[f32], image: &[f32], width: usize, height: usize) -> Option<PhaseShift> {
    PhaseCorrelator::new(width, height).correlate(reference, image)
}

/// Periodic Hann window
pub fn hann_window(size: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            0.5 * (1.0 - (2.0 * PI * x).cos())
        })
        .collect()
}

fn find_peak(surface: &[f32], width: usize) -> (usize, usize, f32) {
    let mut best = (0, 0, f32::NEG_INFINITY);
    for (i, &v) in surface.iter().enumerate() {
        if v > best.2 {
            best = (i % width, i / width, v);
        }
    }
    best
}

/// Peak index to signed shift, upper half wraps to negative
fn wrap(index: usize, size: usize) -> f64 {
    if index > size / 2 {
        index as f64 - size as f64
    } else {
        index as f64
    }
}

fn parabolic_offset(left: f32, center: f32, right: f32) -> f64 {
    let denom = 2.0 * (left + right - 2.0 * center);
    if denom.abs() > 1e-10 {
        ((left - right) / denom).clamp(-0.5, 0.5) as f64
    } else {
        0.0
    }
}
