// Property checks over seeded random frames. Per-module unit tests live next
// to their code; these exercise the engine, aligner and gap filler together.

#[cfg(test)]
mod tests {
    use crate::alignment::tests::{textured_frame, translated};
    use crate::config::{AlignmentConfig, GapFillConfig, StackingConfig};
    use crate::frame::Frame;
    use crate::gap_filling::{GapFillMethod, GapFiller};
    use crate::stacking::{StackMode, StackingEngine};
    use rand::prelude::*;

    fn random_frame(rng: &mut StdRng, width: usize, height: usize) -> Frame {
        let data = (0..width * height * 3).map(|_| rng.gen::<u16>()).collect();
        Frame::new(width, height, data).unwrap()
    }

    fn random_frames(seed: u64, count: usize) -> Vec<Frame> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count).map(|_| random_frame(&mut rng, 16, 12)).collect()
    }

    fn stack(mode: StackMode, frames: &[Frame]) -> Frame {
        let mut engine = StackingEngine::with_mode(mode);
        for frame in frames {
            engine.add_frame(frame).unwrap();
        }
        engine.get_result(false).unwrap()
    }

    #[test]
    fn test_lighten_is_per_sample_max() {
        for seed in 0..5 {
            let frames = random_frames(seed, 6);
            let result = stack(StackMode::Lighten, &frames);
            for (i, &v) in result.data.iter().enumerate() {
                let expected = frames.iter().map(|f| f.data[i]).max().unwrap();
                assert_eq!(v, expected, "seed {} sample {}", seed, i);
            }
        }
    }

    #[test]
    fn test_darken_is_per_sample_min() {
        for seed in 10..15 {
            let frames = random_frames(seed, 6);
            let result = stack(StackMode::Darken, &frames);
            for (i, &v) in result.data.iter().enumerate() {
                let expected = frames.iter().map(|f| f.data[i]).min().unwrap();
                assert_eq!(v, expected);
                assert!(frames.iter().all(|f| v <= f.data[i]));
            }
        }
    }

    #[test]
    fn test_average_is_mean() {
        for seed in 20..25 {
            let frames = random_frames(seed, 7);
            let result = stack(StackMode::Average, &frames);
            for (i, &v) in result.data.iter().enumerate() {
                let mean =
                    frames.iter().map(|f| f.data[i] as f64).sum::<f64>() / frames.len() as f64;
                assert!((v as f64 - mean).abs() <= 1.0, "{} vs {}", v, mean);
            }
        }
    }

    #[test]
    fn test_incremental_matches_batch() {
        let frames = random_frames(31, 5);
        for mode in [
            StackMode::Lighten,
            StackMode::Darken,
            StackMode::Average,
            StackMode::Addition,
            StackMode::Comet,
        ] {
            let incremental = stack(mode, &frames);
            let batch = StackingEngine::with_mode(mode).process_batch(&frames).unwrap();
            assert_eq!(incremental, batch, "{}", mode);
        }
    }

    #[test]
    fn test_lower_fade_favors_latest_frame() {
        let frames = vec![Frame::filled(4, 4, 1000), Frame::filled(4, 4, 9000)];
        let mut previous = 0u16;
        for fade in [1.0, 0.9, 0.7, 0.5, 0.2, 0.0] {
            let mut engine = StackingEngine::with_mode(StackMode::Comet);
            engine.set_comet_fade_factor(fade).unwrap();
            let value = engine.process_batch(&frames).unwrap().pixel(1, 1)[0];
            assert!(value > previous || fade == 1.0, "fade {} gave {}", fade, value);
            previous = value;
        }
        assert_eq!(previous, 9000);
    }

    #[test]
    fn test_concrete_ten_by_ten_scenario() {
        let frames = vec![
            Frame::filled(10, 10, 100),
            Frame::filled(10, 10, 200),
            Frame::filled(10, 10, 150),
        ];
        assert_eq!(stack(StackMode::Lighten, &frames), Frame::filled(10, 10, 200));
        assert_eq!(stack(StackMode::Darken, &frames), Frame::filled(10, 10, 100));
        assert_eq!(stack(StackMode::Average, &frames), Frame::filled(10, 10, 150));
    }

    #[test]
    fn test_median_ignores_single_outlier() {
        let mut rng = StdRng::seed_from_u64(77);
        let base = random_frame(&mut rng, 8, 8);
        let mut frames = vec![base.clone(); 5];
        frames[2].set_pixel(3, 4, [60000, 60000, 60000]);

        let mut engine = StackingEngine::with_mode(StackMode::Median);
        let median = engine.process_median(&frames).unwrap();
        assert_eq!(median.pixel(3, 4), base.pixel(3, 4));

        // The mean is pulled toward the outlier
        let mean = stack(StackMode::Average, &frames);
        let before = base.pixel(3, 4)[0] as i32;
        assert!((mean.pixel(3, 4)[0] as i32 - before).abs() > 1000 || before > 55000);
    }

    #[test]
    fn test_zero_gap_is_identity_for_every_method() {
        let mut rng = StdRng::seed_from_u64(5);
        let frame = random_frame(&mut rng, 20, 14);
        for method in GapFillMethod::ALL {
            assert_eq!(GapFiller::new(method).fill_gaps(&frame, 0, 0.1), frame, "{}", method);
        }
    }

    #[test]
    fn test_gap_filling_never_darkens_trails() {
        let mut frame = Frame::filled(40, 9, 0);
        for x in (0..40).filter(|x| x % 8 < 5) {
            frame.set_pixel(x, 4, [50000, 50000, 50000]);
        }
        for method in [GapFillMethod::Linear, GapFillMethod::Directional] {
            let filled = GapFiller::new(method).fill_gaps(&frame, 3, 0.1);
            for x in 0..40 {
                assert!(filled.pixel(x, 4)[0] >= frame.pixel(x, 4)[0], "{} at {}", method, x);
            }
        }
    }

    #[test]
    fn test_engine_aligns_shifted_frames() {
        let reference = textured_frame(160, 160, 41);
        let shifted = translated(&reference, 6, -3);

        let config = StackingConfig {
            enable_alignment: true,
            alignment: AlignmentConfig {
                seed: Some(3),
                ..AlignmentConfig::default()
            },
            ..StackingConfig::new(StackMode::Average)
        };
        let mut engine = StackingEngine::new(config).unwrap();
        engine.add_frame(&reference).unwrap();
        let alignment = engine.accumulate(&shifted).unwrap().unwrap();

        assert!(alignment.success, "{}", alignment.describe_failure());
        let (tx, ty) = alignment.transform.translation_components();
        assert!((tx - 6.0).abs() < 1.0 && (ty + 3.0).abs() < 1.0);
        assert_eq!(engine.alignment_failures(), 0);

        // Registered content averages back onto the reference
        let result = engine.get_result(false).unwrap();
        for (x, y) in [(50, 50), (80, 100), (120, 70)] {
            let r = reference.pixel(x, y)[0] as i32;
            assert!((result.pixel(x, y)[0] as i32 - r).abs() <= 2048);
        }
    }

    #[test]
    fn test_engine_stacks_unaligned_on_failure() {
        let reference = textured_frame(96, 96, 8);
        let flat = Frame::filled(96, 96, 65535);

        let config = StackingConfig {
            enable_alignment: true,
            ..StackingConfig::new(StackMode::Lighten)
        };
        let mut engine = StackingEngine::new(config).unwrap();
        engine.add_frame(&reference).unwrap();
        let result = engine.add_frame(&flat).unwrap();

        assert_eq!(engine.alignment_failures(), 1);
        assert_eq!(engine.frame_count(), 2);
        assert_eq!(result, flat);
    }

    #[test]
    fn test_gap_filled_result_from_config() {
        let mut config = StackingConfig::new(StackMode::Lighten);
        config.gap_filling = Some(GapFillConfig::new(GapFillMethod::Linear, 4).unwrap());
        let mut engine = StackingEngine::new(config).unwrap();

        let mut a = Frame::filled(30, 5, 0);
        let mut b = Frame::filled(30, 5, 0);
        for x in 0..12 {
            a.set_pixel(x, 2, [40000, 40000, 40000]);
        }
        for x in 15..30 {
            b.set_pixel(x, 2, [40000, 40000, 40000]);
        }
        engine.add_frame(&a).unwrap();
        engine.add_frame(&b).unwrap();

        let raw = engine.get_result(false).unwrap();
        let filled = engine.get_result(true).unwrap();
        assert_eq!(raw.pixel(13, 2), [0, 0, 0]);
        assert!(filled.pixel(13, 2)[0] > 0);
    }

    #[test]
    fn test_median_registers_shifted_frames() {
        let reference = textured_frame(160, 160, 41);
        let shifted = translated(&reference, 6, -3);
        let frames = vec![reference.clone(), shifted.clone(), shifted];

        let config = StackingConfig {
            enable_alignment: true,
            alignment: AlignmentConfig {
                seed: Some(3),
                ..AlignmentConfig::default()
            },
            ..StackingConfig::new(StackMode::Median)
        };
        let mut engine = StackingEngine::new(config).unwrap();
        let median = engine.process_median(&frames).unwrap();

        assert_eq!(engine.alignment_failures(), 0);
        assert_eq!(engine.reference_frame(), Some(&reference));
        assert!(engine.last_alignment().is_some_and(|a| a.success));
        // Registered copies line up with the reference in the interior
        for (x, y) in [(50, 50), (80, 100), (120, 70)] {
            let r = reference.pixel(x, y)[0] as i32;
            assert!((median.pixel(x, y)[0] as i32 - r).abs() <= 2048, "({}, {})", x, y);
        }
    }

    #[test]
    fn test_median_counts_alignment_failures() {
        let reference = textured_frame(96, 96, 8);
        let flat = Frame::filled(96, 96, 30000);
        let frames = vec![reference, flat.clone(), flat.clone()];

        let config = StackingConfig {
            enable_alignment: true,
            ..StackingConfig::new(StackMode::Median)
        };
        let mut engine = StackingEngine::new(config).unwrap();
        let median = engine.process_median(&frames).unwrap();

        assert_eq!(engine.alignment_failures(), 2);
        assert_eq!(median, flat);
    }
}
