use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use star_trail::config::{GapFillConfig, StackingConfig};
use star_trail::dark_frame::DarkFrameSubtractor;
use star_trail::frame_io::{load_frame, save_frame, save_preview, FileFrameSource};
use star_trail::pipeline::{FrameSource, ProgressCallback, StackRunner, StackSummary};
use star_trail::stacking::{CometTail, StackMode, StackingEngine};
use star_trail::statistics::ImageStatistics;

use crate::cli::{AlignmentOptions, GapFillOptions};

/// Everything the `stack` command takes besides its inputs
pub struct StackOptions {
    pub output: PathBuf,
    pub config: Option<PathBuf>,
    pub mode: Option<String>,
    pub fade: Option<f64>,
    pub tail: Option<String>,
    pub darks: Vec<PathBuf>,
    pub preview: Option<PathBuf>,
    pub preview_dir: Option<PathBuf>,
    pub preview_interval: usize,
    pub format: String,
    pub align: AlignmentOptions,
    pub gap: GapFillOptions,
}

#[derive(Debug, Serialize)]
struct StackReport<'a> {
    output: &'a Path,
    mode: StackMode,
    summary: &'a StackSummary,
    statistics: ImageStatistics,
}

/// Merge the JSON config (if any) with command-line overrides
pub fn build_config(
    config_path: Option<&Path>,
    mode: Option<&str>,
    fade: Option<f64>,
    tail: Option<&str>,
    align: &AlignmentOptions,
    gap: &GapFillOptions,
) -> Result<StackingConfig> {
    let mut config = match config_path {
        Some(path) => StackingConfig::from_json_file(path)?,
        None => StackingConfig::default(),
    };

    if let Some(mode) = mode {
        config.mode = mode.parse()?;
    }
    if let Some(tail) = tail {
        let tail: CometTail = tail.parse().map_err(anyhow::Error::msg)?;
        config.comet_fade_factor = tail.fade_factor();
    }
    if let Some(fade) = fade {
        config.comet_fade_factor = fade;
    }

    if align.align {
        config.enable_alignment = true;
    }
    if let Some(ref detector) = align.detector {
        config.alignment.detector = detector.parse()?;
    }
    if let Some(max_shift) = align.max_shift {
        config.alignment.max_shift = max_shift;
    }
    if align.seed.is_some() {
        config.alignment.seed = align.seed;
    }

    if let Some(ref method) = gap.gap_fill {
        let mut gap_config = config.gap_filling.take().unwrap_or_default();
        gap_config.method = method.parse()?;
        config.gap_filling = Some(gap_config);
    }
    if let Some(gap_config) = config.gap_filling.as_mut() {
        apply_gap_overrides(gap_config, gap);
    }

    config.validate().context("Invalid stacking configuration")?;
    Ok(config)
}

fn apply_gap_overrides(config: &mut GapFillConfig, gap: &GapFillOptions) {
    if let Some(size) = gap.gap_size {
        config.gap_size = size;
    }
    if let Some(threshold) = gap.gap_threshold {
        config.intensity_threshold = threshold;
    }
}

pub fn stack_frames(inputs: &[PathBuf], options: StackOptions) -> Result<()> {
    let config = build_config(
        options.config.as_deref(),
        options.mode.as_deref(),
        options.fade,
        options.tail.as_deref(),
        &options.align,
        &options.gap,
    )?;
    let mode = config.mode;

    let source = FileFrameSource::from_paths(inputs)?;
    if source.is_empty() {
        return Err(anyhow::anyhow!("No input frames found"));
    }
    println!("Stacking {} frames ({} mode)", source.len(), mode);

    let engine = StackingEngine::new(config)?;
    let progress: ProgressCallback = Arc::new(Mutex::new(|msg: String, pct: f32| {
        println!("[{:5.1}%] {}", pct, msg);
    }));
    let mut runner = StackRunner::new(engine).with_progress(progress);

    if !options.darks.is_empty() {
        let darks = options
            .darks
            .iter()
            .map(|path| {
                load_frame(path).with_context(|| format!("Failed to load dark frame {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        runner = runner.with_dark_frame(DarkFrameSubtractor::from_darks(&darks)?);
    }

    if let Some(dir) = options.preview_dir.clone() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create preview directory {}", dir.display()))?;
        runner = runner.with_preview(
            options.preview_interval,
            Box::new(move |stacked, frame| {
                let path = dir.join(format!("preview_{:04}.png", stacked));
                if let Err(err) = save_preview(frame, &path) {
                    tracing::warn!("Could not write preview: {:#}", err);
                }
            }),
        );
    }

    let summary = runner.run(&source)?;
    let result = runner
        .result()
        .context("No frame could be stacked")?;

    save_frame(&result, &options.output)?;
    if let Some(ref preview) = options.preview {
        save_preview(&result, preview)?;
    }

    let report = StackReport {
        output: &options.output,
        mode,
        summary: &summary,
        statistics: ImageStatistics::from_frame(&result),
    };
    match options.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_table(&report),
    }

    Ok(())
}

fn print_table(report: &StackReport) {
    let summary = report.summary;
    println!();
    println!("{:<22} {}", "Output", report.output.display());
    println!("{:<22} {}", "Mode", report.mode);
    println!("{:<22} {}/{}", "Frames stacked", summary.processed, summary.total);
    println!("{:<22} {}", "Frames skipped", summary.skipped.len());
    println!("{:<22} {}", "Alignment failures", summary.alignment_failures);
    println!("{:<22} {}", "Cancelled", summary.cancelled);
    println!("{:<22} {:.2?}", "Elapsed", summary.elapsed);
    println!("{}", "-".repeat(40));
    let stats = &report.statistics;
    println!("{:<22} {:.1}", "Mean", stats.mean);
    println!("{:<22} {:.1}", "Median", stats.median);
    println!("{:<22} {:.1}", "Std dev", stats.std_dev);
    println!("{:<22} {:.0} .. {:.0}", "Range", stats.min, stats.max);

    if !summary.skipped.is_empty() {
        println!();
        println!("Skipped frames:");
        for skipped in &summary.skipped {
            println!("  {} - {}", skipped.label, skipped.reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_trail::gap_filling::GapFillMethod;

    fn no_align() -> AlignmentOptions {
        AlignmentOptions {
            align: false,
            detector: None,
            max_shift: None,
            seed: None,
        }
    }

    fn no_gap() -> GapFillOptions {
        GapFillOptions {
            gap_fill: None,
            gap_size: None,
            gap_threshold: None,
        }
    }

    #[test]
    fn test_defaults_without_flags() {
        let config = build_config(None, None, None, None, &no_align(), &no_gap()).unwrap();
        assert_eq!(config.mode, StackMode::Lighten);
        assert!(!config.enable_alignment);
        assert!(config.gap_filling.is_none());
    }

    #[test]
    fn test_flags_override_defaults() {
        let align = AlignmentOptions {
            align: true,
            detector: Some("accurate".to_string()),
            max_shift: Some(20.0),
            seed: Some(9),
        };
        let gap = GapFillOptions {
            gap_fill: Some("linear".to_string()),
            gap_size: Some(6),
            gap_threshold: None,
        };
        let config =
            build_config(None, Some("comet"), None, Some("long"), &align, &gap).unwrap();

        assert_eq!(config.mode, StackMode::Comet);
        assert_eq!(config.comet_fade_factor, 0.99);
        assert!(config.enable_alignment);
        assert_eq!(config.alignment.max_shift, 20.0);
        assert_eq!(config.alignment.seed, Some(9));
        let gap = config.gap_filling.unwrap();
        assert_eq!(gap.method, GapFillMethod::Linear);
        assert_eq!(gap.gap_size, 6);
    }

    #[test]
    fn test_invalid_flags_are_rejected() {
        assert!(build_config(None, Some("screen"), None, None, &no_align(), &no_gap()).is_err());
        assert!(build_config(None, None, Some(1.5), None, &no_align(), &no_gap()).is_err());
        let gap = GapFillOptions {
            gap_fill: Some("morphological".to_string()),
            gap_size: Some(0),
            gap_threshold: None,
        };
        assert!(build_config(None, None, None, None, &no_align(), &gap).is_err());
    }
}
