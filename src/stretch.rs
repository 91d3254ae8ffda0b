/// Display stretch from 16-bit composites to 8-bit previews
use image::RgbImage;

use crate::frame::Frame;
use crate::statistics::percentiles;

/// Percentile mapped to black
pub const DEFAULT_LOW_PERCENTILE: f64 = 1.0;

/// Percentile mapped to white
pub const DEFAULT_HIGH_PERCENTILE: f64 = 99.5;

/// Map the [p_low, p_high] sample range of `frame` linearly onto 0..=255,
/// clipping outside it. One range is shared by all channels so colors keep
/// their balance.
pub fn percentile_stretch(frame: &Frame, low_pct: f64, high_pct: f64) -> RgbImage {
    let bounds = percentiles(&frame.data, &[low_pct, high_pct]);
    let (low, high) = (bounds[0], bounds[1]);
    let map = stretch_map(low, high);

    let data: Vec<u8> = frame.data.iter().map(|&v| map[v as usize]).collect();
    RgbImage::from_raw(frame.width as u32, frame.height as u32, data)
        .unwrap_or_else(|| RgbImage::new(frame.width as u32, frame.height as u32))
}

/// Stretch with the exporter's default percentiles
pub fn auto_stretch(frame: &Frame) -> RgbImage {
    percentile_stretch(frame, DEFAULT_LOW_PERCENTILE, DEFAULT_HIGH_PERCENTILE)
}

/// Lookup table over the full 16-bit range
fn stretch_map(low: f64, high: f64) -> Vec<u8> {
    let mut map = vec![0u8; 65536];
    let span = high - low;

    for (i, out) in map.iter_mut().enumerate() {
        let value = i as f64;
        *out = if span <= 0.0 {
            // Degenerate range: hard threshold at the single level
            if value > low {
                255
            } else {
                0
            }
        } else {
            (((value - low) / span).clamp(0.0, 1.0) * 255.0).round() as u8
        };
    }

    map
}
