use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{StackError, StackResult};
use crate::features::DetectorKind;
use crate::gap_filling::GapFillMethod;
use crate::stacking::{StackMode, DEFAULT_COMET_FADE};

/// Full configuration for one stacking run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingConfig {
    pub mode: StackMode,
    /// Per-frame decay applied to the composite in comet mode
    pub comet_fade_factor: f64,
    /// Register every frame against the first one before blending
    pub enable_alignment: bool,
    pub alignment: AlignmentConfig,
    /// Gap filling applied once by `get_result`; `None` disables it
    pub gap_filling: Option<GapFillConfig>,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            mode: StackMode::Lighten,
            comet_fade_factor: DEFAULT_COMET_FADE,
            enable_alignment: false,
            alignment: AlignmentConfig::default(),
            gap_filling: None,
        }
    }
}

impl StackingConfig {
    pub fn new(mode: StackMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: StackingConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every configuration value
    pub fn validate(&self) -> StackResult<()> {
        validate_fade_factor(self.comet_fade_factor)?;
        if let Some(gap) = &self.gap_filling {
            gap.validate()?;
        }
        Ok(())
    }
}

/// Feature-based registration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub detector: DetectorKind,
    /// Reject transforms whose translation exceeds this many pixels
    pub max_shift: f64,
    /// RANSAC reprojection threshold in pixels
    pub ransac_threshold: f64,
    pub ransac_iterations: usize,
    /// Best matches kept (by descriptor distance) before model fitting
    pub max_matches: usize,
    pub min_keypoints: usize,
    pub min_matches: usize,
    /// RANSAC inliers a model needs before it is trusted. The default of 8
    /// turns away sparse fields whose best model rests on a handful of
    /// stars; 0 accepts whatever model RANSAC finds.
    pub min_inliers: usize,
    /// Seed for RANSAC sampling; `None` draws from entropy
    pub seed: Option<u64>,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::Fast,
            max_shift: 50.0,
            ransac_threshold: 3.0,
            ransac_iterations: 2000,
            max_matches: 200,
            min_keypoints: 10,
            min_matches: 10,
            min_inliers: 8,
            seed: None,
        }
    }
}

/// Gap reconstruction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapFillConfig {
    pub method: GapFillMethod,
    /// Largest gap radius to bridge, in pixels
    pub gap_size: usize,
    /// Normalized brightness separating trail from gap (linear method)
    pub intensity_threshold: f64,
}

impl Default for GapFillConfig {
    fn default() -> Self {
        Self {
            method: GapFillMethod::Morphological,
            gap_size: 3,
            intensity_threshold: 0.1,
        }
    }
}

impl GapFillConfig {
    pub fn new(method: GapFillMethod, gap_size: usize) -> StackResult<Self> {
        let config = Self {
            method,
            gap_size,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StackResult<()> {
        if self.gap_size == 0 {
            return Err(StackError::InvalidGapSize(self.gap_size));
        }
        if !(0.0..=1.0).contains(&self.intensity_threshold) {
            return Err(StackError::InvalidIntensityThreshold(self.intensity_threshold));
        }
        Ok(())
    }
}

pub(crate) fn validate_fade_factor(factor: f64) -> StackResult<()> {
    if (0.0..=1.0).contains(&factor) {
        Ok(())
    } else {
        Err(StackError::InvalidFadeFactor(factor))
    }
}
