use anyhow::{Context, Result};
use std::path::Path;

use star_trail::dark_frame::DarkFrameSubtractor;
use star_trail::frame_io::{load_frame, save_frame};
use star_trail::statistics::ImageStatistics;

pub fn subtract_dark(input: &Path, dark: &Path, output: &Path) -> Result<()> {
    let light = load_frame(input)
        .with_context(|| format!("Failed to load light frame: {}", input.display()))?;
    let dark = load_frame(dark)
        .with_context(|| format!("Failed to load dark frame: {}", dark.display()))?;

    let subtractor = DarkFrameSubtractor::new(dark);
    let calibrated = subtractor.subtract(&light)?;

    let before = ImageStatistics::from_frame(&light);
    let after = ImageStatistics::from_frame(&calibrated);
    println!("Median: {:.1} -> {:.1}", before.median, after.median);
    println!("MAD:    {:.1} -> {:.1}", before.mad, after.mad);

    save_frame(&calibrated, output)
}
