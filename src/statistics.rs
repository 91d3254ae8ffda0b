/// Sample statistics over frames and composites
use bumpalo::Bump;
use serde::Serialize;

use crate::frame::Frame;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageStatistics {
    pub width: usize,
    pub height: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub mad: f64, // Median absolute deviation
}

impl ImageStatistics {
    /// Statistics over every sample of every channel
    pub fn from_frame(frame: &Frame) -> Self {
        Self::from_samples(&frame.data, frame.width, frame.height)
    }

    pub fn from_samples(data: &[u16], width: usize, height: usize) -> Self {
        if data.is_empty() {
            return Self {
                width,
                height,
                mean: 0.0,
                median: 0.0,
                std_dev: 0.0,
                min: 0.0,
                max: 0.0,
                mad: 0.0,
            };
        }

        // Use arena for temporary allocation
        let arena = Bump::new();
        let mut sorted = bumpalo::vec![in &arena];
        sorted.extend_from_slice(data);
        sorted.sort_unstable();

        let sum: u64 = data.iter().map(|&x| x as u64).sum();
        let mean = sum as f64 / data.len() as f64;
        let median = sorted_median(&sorted);

        let variance = if data.len() > 1 {
            data.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / (data.len() - 1) as f64
        } else {
            0.0
        };

        let mut deviations = bumpalo::vec![in &arena];
        deviations.extend(sorted.iter().map(|&x| (x as f64 - median).abs()));
        deviations.sort_unstable_by(f64::total_cmp);
        let mad = sorted_median(&deviations);

        Self {
            width,
            height,
            mean,
            median,
            std_dev: variance.sqrt(),
            min: sorted[0] as f64,
            max: sorted[sorted.len() - 1] as f64,
            mad,
        }
    }
}

fn sorted_median<T: Copy + Into<f64>>(sorted: &[T]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1].into() + sorted[n / 2].into()) / 2.0
    } else {
        sorted[n / 2].into()
    }
}

/// Percentiles (0-100) with linear interpolation between closest ranks.
/// Returns one value per requested percentile, all zero for empty input.
pub fn percentiles(data: &[u16], pcts: &[f64]) -> Vec<f64> {
    if data.is_empty() {
        return vec![0.0; pcts.len()];
    }

    let arena = Bump::new();
    let mut sorted = bumpalo::vec![in &arena];
    sorted.extend_from_slice(data);
    sorted.sort_unstable();

    let last = (sorted.len() - 1) as f64;
    pcts.iter()
        .map(|&p| {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * last;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] as f64 * (1.0 - frac) + sorted[hi] as f64 * frac
        })
        .collect()
}
