/// Star trail stacking engine.
/// Keeps one floating point composite and folds each new frame into it with
/// the selected blend. Median is the one mode that cannot be folded and goes
/// through the separate batch path.
use bumpalo::Bump;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::alignment::{AlignmentResult, Aligner};
use crate::config::{validate_fade_factor, GapFillConfig, StackingConfig};
use crate::error::{StackError, StackResult};
use crate::frame::Frame;
use crate::gap_filling::GapFiller;

/// Default comet decay (medium tail)
pub const DEFAULT_COMET_FADE: f64 = 0.98;

/// Stacking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackMode {
    /// Per-pixel maximum, the classic star trail
    Lighten,
    /// Per-pixel minimum, suppresses light pollution and passing lights
    Darken,
    /// Running mean, noise reduction
    Average,
    /// Per-pixel median over all frames (batch only)
    Median,
    /// Sum of all frames, clipped when the result is read
    Addition,
    /// Exponential fade, the newest frame is brightest
    Comet,
}

impl StackMode {
    pub const ALL: [StackMode; 6] = [
        StackMode::Lighten,
        StackMode::Darken,
        StackMode::Average,
        StackMode::Median,
        StackMode::Addition,
        StackMode::Comet,
    ];

    /// Modes that need every frame in memory at once
    pub fn is_batch_only(self) -> bool {
        matches!(self, StackMode::Median)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StackMode::Lighten => "lighten",
            StackMode::Darken => "darken",
            StackMode::Average => "average",
            StackMode::Median => "median",
            StackMode::Addition => "addition",
            StackMode::Comet => "comet",
        }
    }
}

impl fmt::Display for StackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackMode {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lighten" | "max" => Ok(StackMode::Lighten),
            "darken" | "min" => Ok(StackMode::Darken),
            "average" | "mean" => Ok(StackMode::Average),
            "median" => Ok(StackMode::Median),
            "addition" | "add" | "sum" => Ok(StackMode::Addition),
            "comet" => Ok(StackMode::Comet),
            _ => Err(StackError::UnknownStackMode(s.to_string())),
        }
    }
}

/// Comet tail length presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CometTail {
    Short,
    Medium,
    Long,
}

impl CometTail {
    pub fn fade_factor(self) -> f64 {
        match self {
            CometTail::Short => 0.95,
            CometTail::Medium => 0.97,
            CometTail::Long => 0.99,
        }
    }
}

impl FromStr for CometTail {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "short" => Ok(CometTail::Short),
            "medium" | "mid" => Ok(CometTail::Medium),
            "long" => Ok(CometTail::Long),
            _ => Err(format!("Unknown comet tail: {}", s)),
        }
    }
}

/// Lifecycle of the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Empty,
    Accumulating,
}

/// Incremental stacking accumulator
pub struct StackingEngine {
    mode: StackMode,
    composite: Option<Vec<f32>>,
    width: usize,
    height: usize,
    frame_count: usize,
    reference: Option<Frame>,
    comet_fade_factor: f64,
    aligner: Option<Aligner>,
    max_shift: f64,
    gap_filling: Option<(GapFiller, GapFillConfig)>,
    alignment_failures: usize,
    last_alignment: Option<AlignmentResult>,
}

impl StackingEngine {
    /// Build an engine from an explicit configuration
    pub fn new(config: StackingConfig) -> StackResult<Self> {
        config.validate()?;

        let aligner = config
            .enable_alignment
            .then(|| Aligner::new(config.alignment.clone()));
        let gap_filling = config
            .gap_filling
            .map(|gap| (GapFiller::new(gap.method), gap));

        Ok(Self {
            mode: config.mode,
            composite: None,
            width: 0,
            height: 0,
            frame_count: 0,
            reference: None,
            comet_fade_factor: config.comet_fade_factor,
            aligner,
            max_shift: config.alignment.max_shift,
            gap_filling,
            alignment_failures: 0,
            last_alignment: None,
        })
    }

    /// Engine with default settings for `mode`
    pub fn with_mode(mode: StackMode) -> Self {
        Self {
            mode,
            composite: None,
            width: 0,
            height: 0,
            frame_count: 0,
            reference: None,
            comet_fade_factor: DEFAULT_COMET_FADE,
            aligner: None,
            max_shift: 50.0,
            gap_filling: None,
            alignment_failures: 0,
            last_alignment: None,
        }
    }

    pub fn mode(&self) -> StackMode {
        self.mode
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn comet_fade_factor(&self) -> f64 {
        self.comet_fade_factor
    }

    pub fn state(&self) -> StackState {
        if self.composite.is_some() {
            StackState::Accumulating
        } else {
            StackState::Empty
        }
    }

    /// The first frame of the run, kept only when alignment is enabled
    pub fn reference_frame(&self) -> Option<&Frame> {
        self.reference.as_ref()
    }

    /// Frames contributed unaligned because registration failed
    pub fn alignment_failures(&self) -> usize {
        self.alignment_failures
    }

    pub fn last_alignment(&self) -> Option<&AlignmentResult> {
        self.last_alignment.as_ref()
    }

    pub fn alignment_enabled(&self) -> bool {
        self.aligner.is_some()
    }

    pub fn gap_filling(&self) -> Option<&GapFillConfig> {
        self.gap_filling.as_ref().map(|(_, config)| config)
    }

    /// Set the comet decay. Near 1.0 keeps long tails, near 0.0 keeps only
    /// the latest frame.
    pub fn set_comet_fade_factor(&mut self, factor: f64) -> StackResult<()> {
        validate_fade_factor(factor)?;
        self.comet_fade_factor = factor;
        Ok(())
    }

    /// Drop the composite and the alignment reference
    pub fn reset(&mut self) {
        self.composite = None;
        self.width = 0;
        self.height = 0;
        self.frame_count = 0;
        self.reference = None;
        self.alignment_failures = 0;
        self.last_alignment = None;
    }

    /// Add a frame and return the current 16-bit snapshot
    pub fn add_frame(&mut self, frame: &Frame) -> StackResult<Frame> {
        self.accumulate(frame)?;
        self.snapshot()
    }

    /// Fold a frame into the composite without producing a snapshot.
    /// Returns the alignment result when registration was attempted.
    pub fn accumulate(&mut self, frame: &Frame) -> StackResult<Option<AlignmentResult>> {
        if self.mode.is_batch_only() {
            return Err(StackError::BatchOnly(self.mode));
        }

        if self.composite.is_some() && (frame.width != self.width || frame.height != self.height) {
            return Err(StackError::ShapeMismatch {
                width: self.width,
                height: self.height,
                got_width: frame.width,
                got_height: frame.height,
            });
        }

        let mut alignment = None;
        let contribution = match (&self.aligner, &self.reference) {
            (Some(aligner), Some(reference)) => {
                let (aligned, result) = aligner.align(frame, reference, self.max_shift);
                if !result.success {
                    self.alignment_failures += 1;
                    tracing::warn!(
                        "Alignment failed for frame {}, stacking it unaligned: {}",
                        self.frame_count + 1,
                        result.describe_failure()
                    );
                }
                alignment = Some(result);
                aligned
            }
            _ => Cow::Borrowed(frame),
        };

        if self.composite.is_none() {
            self.composite = Some(contribution.to_f32());
            self.width = frame.width;
            self.height = frame.height;
            if self.aligner.is_some() {
                self.reference = Some(frame.clone());
            }
            self.frame_count = 1;
            return Ok(None);
        }
        let composite = self.composite.as_mut().ok_or(StackError::NoFrames)?;

        let samples = contribution.data.iter().map(|&v| v as f32);
        match self.mode {
            StackMode::Lighten => {
                for (c, f) in composite.iter_mut().zip(samples) {
                    *c = c.max(f);
                }
            }
            StackMode::Darken => {
                for (c, f) in composite.iter_mut().zip(samples) {
                    *c = c.min(f);
                }
            }
            StackMode::Average => {
                let n = self.frame_count as f32;
                for (c, f) in composite.iter_mut().zip(samples) {
                    *c = (*c * n + f) / (n + 1.0);
                }
            }
            StackMode::Addition => {
                for (c, f) in composite.iter_mut().zip(samples) {
                    *c += f;
                }
            }
            StackMode::Comet => {
                let fade = self.comet_fade_factor as f32;
                for (c, f) in composite.iter_mut().zip(samples) {
                    *c = *c * fade + f * (1.0 - fade);
                }
            }
            StackMode::Median => return Err(StackError::BatchOnly(self.mode)),
        }

        self.frame_count += 1;
        self.last_alignment = alignment.clone();
        Ok(alignment)
    }

    /// Current composite as a clipped 16-bit frame, without gap filling
    pub fn snapshot(&self) -> StackResult<Frame> {
        let composite = self.composite.as_ref().ok_or(StackError::NoFrames)?;
        Ok(Frame::from_f32(self.width, self.height, composite))
    }

    /// Final 16-bit result. Samples are clipped to [0, 65535]; the configured
    /// gap filler runs when `apply_gap_filling` is set.
    pub fn get_result(&self, apply_gap_filling: bool) -> StackResult<Frame> {
        let result = self.snapshot()?;

        match &self.gap_filling {
            Some((filler, config)) if apply_gap_filling => {
                tracing::debug!(
                    "Applying {} gap filling (gap size {})",
                    config.method,
                    config.gap_size
                );
                Ok(filler.fill_gaps(&result, config.gap_size, config.intensity_threshold))
            }
            _ => Ok(result),
        }
    }

    /// Reset, add every frame in order and return the final result
    pub fn process_batch(&mut self, frames: &[Frame]) -> StackResult<Frame> {
        self.reset();
        for frame in frames {
            self.accumulate(frame)?;
        }
        self.get_result(true)
    }

    /// Median stack over all frames at once. With alignment enabled every
    /// frame after the first is registered onto it first; failures are
    /// counted and the frame enters the median unaligned. The median becomes
    /// the composite, so `get_result` (with gap filling) works afterwards.
    pub fn process_median(&mut self, frames: &[Frame]) -> StackResult<Frame> {
        let first = frames.first().ok_or(StackError::EmptyBatch)?;
        for frame in &frames[1..] {
            first.ensure_same_shape(frame)?;
        }
        self.reset();

        let median = match self.aligner.clone() {
            Some(aligner) => {
                let mut registered: Vec<Frame> = Vec::with_capacity(frames.len());
                registered.push(first.clone());
                for (index, frame) in frames.iter().enumerate().skip(1) {
                    let (aligned, result) = aligner.align(frame, first, self.max_shift);
                    if !result.success {
                        self.alignment_failures += 1;
                        tracing::warn!(
                            "Alignment failed for frame {}, stacking it unaligned: {}",
                            index + 1,
                            result.describe_failure()
                        );
                    }
                    self.last_alignment = Some(result);
                    registered.push(aligned.into_owned());
                }
                self.reference = Some(first.clone());
                median_stack(&registered)?
            }
            None => median_stack(frames)?,
        };

        self.composite = Some(median.to_f32());
        self.width = median.width;
        self.height = median.height;
        self.frame_count = frames.len();
        Ok(median)
    }
}

/// Per-sample median across frames. Needs every frame in memory.
/// Even counts average the two middle values.
pub fn median_stack(frames: &[Frame]) -> StackResult<Frame> {
    let first = frames.first().ok_or(StackError::EmptyBatch)?;
    for frame in &frames[1..] {
        first.ensure_same_shape(frame)?;
    }

    let n = frames.len();
    let arena = Bump::new();
    let mut column = bumpalo::vec![in &arena; 0u16; n];
    let mut result = vec![0f32; first.data.len()];

    for (i, out) in result.iter_mut().enumerate() {
        for (slot, frame) in column.iter_mut().zip(frames) {
            *slot = frame.data[i];
        }
        let mid = n / 2;
        let (below, upper, _) = column.select_nth_unstable(mid);
        let upper = *upper as f32;
        *out = if n % 2 == 1 {
            upper
        } else {
            let lower = below.iter().copied().max().unwrap_or(0) as f32;
            (lower + upper) / 2.0
        };
    }

    Ok(Frame::from_f32(first.width, first.height, &result))
}
