use anyhow::{Context, Result};
use std::path::Path;

use star_trail::frame_io::{load_frame, save_frame};
use star_trail::smoothing::StarTrailSmoother;

pub fn smooth_image(
    input: &Path,
    output: &Path,
    window: usize,
    sigma: f64,
    continuity: Option<usize>,
) -> Result<()> {
    let frame = load_frame(input)
        .with_context(|| format!("Failed to load image: {}", input.display()))?;

    let smoother = StarTrailSmoother::new();
    let result = match continuity {
        Some(passes) => {
            println!("Running {} continuity passes", passes);
            smoother.enhance_continuity(&frame, passes)
        }
        None => {
            println!("Smoothing with window {} and sigma {:.2}", window, sigma);
            smoother.smooth_trails(&frame, window, sigma)
        }
    };

    save_frame(&result, output)
}
