use anyhow::{Context, Result};
use std::path::Path;

use star_trail::config::GapFillConfig;
use star_trail::frame_io::{load_frame, save_frame};
use star_trail::gap_filling::{adaptive_gap_size, detect_star_trails, GapFillMethod, GapFiller};

/// Trail threshold used only for the coverage report
const COVERAGE_THRESHOLD: f64 = 0.3;

#[allow(clippy::too_many_arguments)]
pub fn fill_gaps_in_image(
    input: &Path,
    output: &Path,
    method: &str,
    gap_size: usize,
    threshold: f64,
    adaptive: bool,
    min_gap: usize,
    max_gap: usize,
) -> Result<()> {
    let method: GapFillMethod = method.parse()?;
    let config = if adaptive {
        adaptive_config(method, min_gap, max_gap, threshold)?
    } else {
        gap_fill_config(method, gap_size, threshold)?
    };

    let frame = load_frame(input)
        .with_context(|| format!("Failed to load image: {}", input.display()))?;
    println!("Loaded {} ({}x{})", input.display(), frame.width, frame.height);

    let filler = GapFiller::new(config.method);
    let filled = if adaptive {
        filler.adaptive_fill(&frame, min_gap, max_gap, config.intensity_threshold)
    } else {
        filler.fill_gaps(&frame, config.gap_size, config.intensity_threshold)
    };

    let before = trail_coverage(&frame);
    let after = trail_coverage(&filled);
    println!("Method:         {} (gap size {})", method, config.gap_size);
    println!("Trail coverage: {:.2}% -> {:.2}%", before * 100.0, after * 100.0);

    save_frame(&filled, output)?;
    Ok(())
}

fn gap_fill_config(method: GapFillMethod, gap_size: usize, threshold: f64) -> Result<GapFillConfig> {
    let config = GapFillConfig {
        method,
        gap_size,
        intensity_threshold: threshold,
    };
    config.validate()?;
    Ok(config)
}

/// Validates the range and the gap size picked from it
fn adaptive_config(
    method: GapFillMethod,
    min_gap: usize,
    max_gap: usize,
    threshold: f64,
) -> Result<GapFillConfig> {
    if min_gap > max_gap {
        return Err(anyhow::anyhow!(
            "Adaptive gap range is empty: min-gap {} exceeds max-gap {}",
            min_gap,
            max_gap
        ));
    }
    gap_fill_config(method, adaptive_gap_size(min_gap, max_gap), threshold)
}

fn trail_coverage(frame: &star_trail::Frame) -> f64 {
    let mask = detect_star_trails(frame, COVERAGE_THRESHOLD);
    let total = mask.len().max(1);
    mask.iter().filter(|&&v| v > 0).count() as f64 / total as f64
}
