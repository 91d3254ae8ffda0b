use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use star_trail::alignment::{Aligner, AlignmentResult};
use star_trail::config::AlignmentConfig;
use star_trail::frame_io::load_frame;
use star_trail::phase_correlation::PhaseShift;

#[derive(Debug, Serialize)]
struct ShiftReport {
    phase_correlation: Option<PhaseShift>,
    features: AlignmentResult,
}

pub fn detect_shift(
    image: &Path,
    reference: &Path,
    detector: &str,
    max_shift: f64,
    format: &str,
) -> Result<()> {
    let frame = load_frame(image)
        .with_context(|| format!("Failed to load image: {}", image.display()))?;
    let reference_frame = load_frame(reference)
        .with_context(|| format!("Failed to load reference: {}", reference.display()))?;
    reference_frame.ensure_same_shape(&frame)?;

    let aligner = Aligner::new(AlignmentConfig {
        detector: detector.parse()?,
        max_shift,
        ..AlignmentConfig::default()
    });

    let report = ShiftReport {
        phase_correlation: aligner.detect_shift(&frame, &reference_frame),
        features: aligner.estimate(&frame, &reference_frame, max_shift),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            match report.phase_correlation {
                Some(shift) => println!(
                    "Phase correlation: dx={:+.2} dy={:+.2} ({:.2}px, response {:.3})",
                    shift.dx,
                    shift.dy,
                    shift.magnitude(),
                    shift.response
                ),
                None => println!("Phase correlation: no peak"),
            }

            let features = &report.features;
            if features.success {
                let (tx, ty) = features.transform.translation_components();
                println!(
                    "Feature alignment: dx={:+.2} dy={:+.2} rotation {:.3} deg, {} of {} matches inlying",
                    tx,
                    ty,
                    features.transform.rotation().to_degrees(),
                    features.inlier_count,
                    features.match_count
                );
            } else {
                println!("Feature alignment failed: {}", features.describe_failure());
            }
        }
    }

    Ok(())
}
