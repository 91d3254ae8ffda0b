/// Star trail gap filling.
/// Bridges the short dark breaks left between consecutive exposures so the
/// trails read as continuous arcs.
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StackError;
use crate::frame::{clip_to_u16, Frame};
use crate::morphology::Morphology;

/// Trail directions tried by the directional method, in degrees
pub const DIRECTIONAL_ANGLES: [f64; 6] = [0.0, 30.0, 60.0, 90.0, 120.0, 150.0];

/// Default brightness cut used by `detect_star_trails`
pub const DEFAULT_TRAIL_THRESHOLD: f64 = 0.3;

/// Gap reconstruction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFillMethod {
    /// Row-wise interpolation between bright runs
    Linear,
    /// Grayscale closing with an elliptical element, handles curved trails
    #[default]
    Morphological,
    /// Horizontal box blur
    MotionBlur,
    /// Closing along six line orientations, keeping the brightest
    Directional,
}

impl GapFillMethod {
    pub const ALL: [GapFillMethod; 4] = [
        GapFillMethod::Linear,
        GapFillMethod::Morphological,
        GapFillMethod::MotionBlur,
        GapFillMethod::Directional,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GapFillMethod::Linear => "linear",
            GapFillMethod::Morphological => "morphological",
            GapFillMethod::MotionBlur => "motion_blur",
            GapFillMethod::Directional => "directional",
        }
    }
}

impl fmt::Display for GapFillMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GapFillMethod {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(GapFillMethod::Linear),
            "morphological" | "morph" => Ok(GapFillMethod::Morphological),
            "motion_blur" | "motion-blur" | "motionblur" => Ok(GapFillMethod::MotionBlur),
            "directional" => Ok(GapFillMethod::Directional),
            _ => Err(StackError::UnknownGapFillMethod(s.to_string())),
        }
    }
}

/// Applies one gap filling strategy to whole frames.
/// Output always has the input shape; every channel is processed on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapFiller {
    method: GapFillMethod,
}

impl Default for GapFiller {
    fn default() -> Self {
        Self::new(GapFillMethod::default())
    }
}

impl GapFiller {
    pub fn new(method: GapFillMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> GapFillMethod {
        self.method
    }

    /// Fill gaps up to `gap_size` pixels. `intensity_threshold` is only read
    /// by the linear method. A gap size of zero returns the frame unchanged.
    pub fn fill_gaps(&self, frame: &Frame, gap_size: usize, intensity_threshold: f64) -> Frame {
        if gap_size == 0 {
            return frame.clone();
        }

        match self.method {
            GapFillMethod::Linear => linear_fill(frame, gap_size, intensity_threshold),
            GapFillMethod::Morphological => morphological_fill(frame, gap_size),
            GapFillMethod::MotionBlur => motion_blur_fill(frame, gap_size),
            GapFillMethod::Directional => directional_fill(frame, gap_size),
        }
    }

    /// Pick a gap size from `[min_gap, max_gap]` and fill with it
    pub fn adaptive_fill(
        &self,
        frame: &Frame,
        min_gap: usize,
        max_gap: usize,
        intensity_threshold: f64,
    ) -> Frame {
        let gap_size = adaptive_gap_size(min_gap, max_gap);
        tracing::debug!(
            "Adaptive {} fill picked gap size {} from [{}, {}]",
            self.method,
            gap_size,
            min_gap,
            max_gap
        );
        self.fill_gaps(frame, gap_size, intensity_threshold)
    }
}

/// Three pixels covers the usual inter-frame break, bounded by the caller's range
pub fn adaptive_gap_size(min_gap: usize, max_gap: usize) -> usize {
    max_gap.min(min_gap.max(3))
}

/// Mask of pixels whose channel-mean brightness, relative to the brightest
/// pixel, exceeds `threshold`. Trail pixels are 255.
pub fn detect_star_trails(frame: &Frame, threshold: f64) -> GrayImage {
    let luminance = frame.luminance();
    let max = luminance.iter().copied().fold(0.0f32, f32::max);

    let mut mask = GrayImage::new(frame.width as u32, frame.height as u32);
    if max <= 0.0 {
        return mask;
    }

    for (i, &value) in luminance.iter().enumerate() {
        if (value / max) as f64 > threshold {
            let x = (i % frame.width) as u32;
            let y = (i / frame.width) as u32;
            mask.put_pixel(x, y, Luma([255]));
        }
    }
    mask
}

fn linear_fill(frame: &Frame, gap_size: usize, threshold: f64) -> Frame {
    let (width, height) = (frame.width, frame.height);
    frame.map_channels(|channel| fill_channel_linear(channel, width, height, gap_size, threshold))
}

/// Row scan: a dark run of at most `gap_size` pixels with bright pixels on
/// both sides is replaced by a ramp between its two neighbors.
fn fill_channel_linear(
    channel: &[u16],
    width: usize,
    height: usize,
    gap_size: usize,
    threshold: f64,
) -> Vec<u16> {
    let mut result = channel.to_vec();
    let max = channel.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return result;
    }
    let max = max as f64;

    for y in 0..height {
        let row = &channel[y * width..(y + 1) * width];
        let out = &mut result[y * width..(y + 1) * width];
        let mut last_bright: Option<usize> = None;

        for (x, &value) in row.iter().enumerate() {
            if value as f64 / max <= threshold {
                continue;
            }
            if let Some(left) = last_bright {
                let gap_len = x - left - 1;
                if gap_len > 0 && gap_len <= gap_size {
                    let start = row[left] as f64;
                    let end = value as f64;
                    for (k, gx) in (left + 1..x).enumerate() {
                        let alpha = (k + 1) as f64 / (gap_len + 1) as f64;
                        out[gx] = clip_to_u16((start * (1.0 - alpha) + end * alpha) as f32);
                    }
                }
            }
            last_bright = Some(x);
        }
    }

    result
}

fn morphological_fill(frame: &Frame, gap_size: usize) -> Frame {
    let morph = Morphology::new_ellipse(gap_size);
    let (width, height) = (frame.width, frame.height);
    frame.map_channels(|channel| morph.closing(channel, width, height))
}

fn motion_blur_fill(frame: &Frame, gap_size: usize) -> Frame {
    let (width, height) = (frame.width, frame.height);
    frame.map_channels(|channel| box_blur_horizontal(channel, width, height, gap_size))
}

/// Horizontal mean over 2r + 1 pixels, zero outside the image
fn box_blur_horizontal(channel: &[u16], width: usize, height: usize, radius: usize) -> Vec<u16> {
    let size = (2 * radius + 1) as f64;
    let mut result = vec![0u16; width * height];

    for y in 0..height {
        let row = &channel[y * width..(y + 1) * width];
        // Running sum over the window [x - r, x + r]
        let mut sum: u64 = row.iter().take(radius + 1).map(|&v| v as u64).sum();
        for x in 0..width {
            result[y * width + x] = clip_to_u16((sum as f64 / size) as f32);
            let entering = x + radius + 1;
            if entering < width {
                sum += row[entering] as u64;
            }
            if x >= radius {
                sum -= row[x - radius] as u64;
            }
        }
    }

    result
}

fn directional_fill(frame: &Frame, gap_size: usize) -> Frame {
    let (width, height) = (frame.width, frame.height);
    let kernels: Vec<Morphology> = DIRECTIONAL_ANGLES
        .iter()
        .map(|&angle| Morphology::new_line(gap_size, angle))
        .collect();

    frame.map_channels(|channel| {
        let mut best = channel.to_vec();
        for morph in &kernels {
            let closed = morph.closing(channel, width, height);
            for (b, c) in best.iter_mut().zip(closed) {
                *b = (*b).max(c);
            }
        }
        best
    })
}
