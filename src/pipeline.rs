/// Sequential stacking run over a source of frames.
///
/// Frames are decoded one at a time, optionally dark-subtracted, and folded
/// into a `StackingEngine`. Undecodable frames are skipped and recorded.
/// Median mode collects every frame first and takes the batch path.
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::dark_frame::DarkFrameSubtractor;
use crate::error::{FrameDecodeError, StackError, StackResult};
use crate::frame::Frame;
use crate::stacking::{StackMode, StackingEngine};

/// Progress callback: (message, percentage)
pub type ProgressCallback = Arc<Mutex<dyn FnMut(String, f32) + Send>>;

/// Preview callback: (frames stacked so far, composite without gap filling)
pub type PreviewCallback = Box<dyn FnMut(usize, &Frame) + Send>;

pub const DEFAULT_PREVIEW_INTERVAL: usize = 3;

/// Ordered frames, decoded on demand
pub trait FrameSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable name used in logs and the run summary
    fn label(&self, index: usize) -> String;

    fn decode(&self, index: usize) -> Result<Frame, FrameDecodeError>;
}

impl FrameSource for [Frame] {
    fn len(&self) -> usize {
        <[Frame]>::len(self)
    }

    fn label(&self, index: usize) -> String {
        format!("frame {}", index + 1)
    }

    fn decode(&self, index: usize) -> Result<Frame, FrameDecodeError> {
        self.get(index)
            .cloned()
            .ok_or_else(|| FrameDecodeError::new(self.label(index), "index out of range"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFrame {
    pub index: usize,
    pub label: String,
    pub reason: String,
}

/// What happened during a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct StackSummary {
    pub total: usize,
    pub processed: usize,
    pub skipped: Vec<SkippedFrame>,
    pub alignment_failures: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl StackSummary {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Drives a `FrameSource` through an engine, one frame at a time
pub struct StackRunner {
    engine: StackingEngine,
    dark: Option<DarkFrameSubtractor>,
    cancel_flag: Option<Arc<AtomicBool>>,
    progress_cb: Option<ProgressCallback>,
    preview_interval: usize,
    preview_cb: Option<PreviewCallback>,
}

impl StackRunner {
    pub fn new(engine: StackingEngine) -> Self {
        Self {
            engine,
            dark: None,
            cancel_flag: None,
            progress_cb: None,
            preview_interval: DEFAULT_PREVIEW_INTERVAL,
            preview_cb: None,
        }
    }

    pub fn with_dark_frame(mut self, dark: DarkFrameSubtractor) -> Self {
        self.dark = Some(dark);
        self
    }

    /// Checked between frames; setting it stops the run after the current frame
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress_cb = Some(cb);
        self
    }

    /// Emit a preview every `interval` stacked frames and after the last one
    pub fn with_preview(mut self, interval: usize, cb: PreviewCallback) -> Self {
        self.preview_interval = interval.max(1);
        self.preview_cb = Some(cb);
        self
    }

    pub fn engine(&self) -> &StackingEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut StackingEngine {
        &mut self.engine
    }

    pub fn into_engine(self) -> StackingEngine {
        self.engine
    }

    /// Final composite of the last run, gap filled when configured
    pub fn result(&self) -> StackResult<Frame> {
        self.engine.get_result(true)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn report_progress(&self, msg: String, pct: f32) {
        if let Some(ref cb) = self.progress_cb {
            if let Ok(mut cb_lock) = cb.lock() {
                cb_lock(msg, pct);
            }
        }
    }

    fn emit_preview(&mut self, stacked: usize) {
        if self.preview_cb.is_none() {
            return;
        }
        match self.engine.snapshot() {
            Ok(preview) => {
                if let Some(cb) = self.preview_cb.as_mut() {
                    cb(stacked, &preview);
                }
            }
            Err(err) => tracing::debug!("No preview available: {}", err),
        }
    }

    /// Decode and calibrate one frame
    fn load<S: FrameSource + ?Sized>(&self, source: &S, index: usize) -> Result<Frame, FrameDecodeError> {
        let frame = source.decode(index)?;
        match &self.dark {
            Some(dark) => dark
                .subtract(&frame)
                .map_err(|err| FrameDecodeError::new(source.label(index), err)),
            None => Ok(frame),
        }
    }

    /// Stack every frame of `source` from a fresh composite. Only
    /// configuration and state errors abort the run; bad frames are skipped
    /// and alignment problems only counted.
    pub fn run<S: FrameSource + ?Sized>(&mut self, source: &S) -> StackResult<StackSummary> {
        let start = Instant::now();
        let total = source.len();
        let mut summary = StackSummary {
            total,
            ..Default::default()
        };

        tracing::info!(
            "Stacking {} frames in {} mode (alignment {}, gap filling {})",
            total,
            self.engine.mode(),
            if self.engine.alignment_enabled() { "on" } else { "off" },
            self.engine
                .gap_filling()
                .map(|g| format!("{} size {}", g.method, g.gap_size))
                .unwrap_or_else(|| "off".to_string())
        );
        self.report_progress("Starting stacking...".to_string(), 0.0);
        self.engine.reset();

        if self.engine.mode() == StackMode::Median {
            self.run_median(source, &mut summary)?;
        } else {
            self.run_incremental(source, &mut summary)?;
        }

        summary.alignment_failures = self.engine.alignment_failures();
        summary.elapsed = start.elapsed();

        if summary.cancelled {
            tracing::warn!(
                "Stacking cancelled after {} of {} frames",
                summary.processed,
                total
            );
        }
        tracing::info!(
            "Stacked {} of {} frames in {:.2?} ({} skipped, {} alignment failures)",
            summary.processed,
            total,
            summary.elapsed,
            summary.skipped.len(),
            summary.alignment_failures
        );
        Ok(summary)
    }

    fn run_incremental<S: FrameSource + ?Sized>(
        &mut self,
        source: &S,
        summary: &mut StackSummary,
    ) -> StackResult<()> {
        let total = source.len();
        let mut last_preview = 0;

        for index in 0..total {
            if self.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let frame_start = Instant::now();
            let frame = match self.load(source, index) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::warn!("Skipping frame: {}", err);
                    summary.skipped.push(SkippedFrame {
                        index,
                        label: err.label,
                        reason: err.reason,
                    });
                    continue;
                }
            };

            match self.engine.accumulate(&frame) {
                Ok(_) => summary.processed += 1,
                Err(err @ StackError::ShapeMismatch { .. }) => {
                    tracing::warn!("Skipping {}: {}", source.label(index), err);
                    summary.skipped.push(SkippedFrame {
                        index,
                        label: source.label(index),
                        reason: err.to_string(),
                    });
                    continue;
                }
                Err(err) => return Err(err),
            }

            tracing::info!(
                "Frame {}/{} stacked in {:.2?}",
                index + 1,
                total,
                frame_start.elapsed()
            );
            self.report_progress(
                format!("Stacked {}", source.label(index)),
                (index + 1) as f32 / total as f32 * 100.0,
            );

            if summary.processed % self.preview_interval == 0 {
                self.emit_preview(summary.processed);
                last_preview = summary.processed;
            }
        }

        if summary.processed > last_preview {
            self.emit_preview(summary.processed);
        }
        Ok(())
    }

    /// Median needs all frames at once, so decoding and stacking are separate
    fn run_median<S: FrameSource + ?Sized>(
        &mut self,
        source: &S,
        summary: &mut StackSummary,
    ) -> StackResult<()> {
        let total = source.len();
        let mut frames: Vec<Frame> = Vec::with_capacity(total);

        for index in 0..total {
            if self.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            match self.load(source, index) {
                Ok(frame) => {
                    if let Some(first) = frames.first() {
                        if let Err(err) = first.ensure_same_shape(&frame) {
                            tracing::warn!("Skipping {}: {}", source.label(index), err);
                            summary.skipped.push(SkippedFrame {
                                index,
                                label: source.label(index),
                                reason: err.to_string(),
                            });
                            continue;
                        }
                    }
                    frames.push(frame);
                }
                Err(err) => {
                    tracing::warn!("Skipping frame: {}", err);
                    summary.skipped.push(SkippedFrame {
                        index,
                        label: err.label,
                        reason: err.reason,
                    });
                    continue;
                }
            }
            // Loading is the first half of the work
            self.report_progress(
                format!("Loaded {}", source.label(index)),
                (index + 1) as f32 / total as f32 * 50.0,
            );
        }

        if frames.is_empty() {
            return Ok(());
        }

        let median_start = Instant::now();
        self.engine.process_median(&frames)?;
        summary.processed = frames.len();
        tracing::info!(
            "Median of {} frames computed in {:.2?}",
            frames.len(),
            median_start.elapsed()
        );
        self.report_progress("Median stack complete".to_string(), 100.0);
        self.emit_preview(summary.processed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GapFillConfig, StackingConfig};
    use crate::gap_filling::GapFillMethod;

    /// In-memory source where `None` entries fail to decode
    struct MemorySource {
        frames: Vec<Option<Frame>>,
    }

    impl MemorySource {
        fn constant(values: &[u16]) -> Self {
            Self {
                frames: values.iter().map(|&v| Some(Frame::filled(8, 8, v))).collect(),
            }
        }
    }

    impl FrameSource for MemorySource {
        fn len(&self) -> usize {
            self.frames.len()
        }

        fn label(&self, index: usize) -> String {
            format!("mem_{}", index)
        }

        fn decode(&self, index: usize) -> Result<Frame, FrameDecodeError> {
            self.frames[index]
                .clone()
                .ok_or_else(|| FrameDecodeError::new(self.label(index), "corrupt data"))
        }
    }

    fn runner(mode: StackMode) -> StackRunner {
        StackRunner::new(StackingEngine::with_mode(mode))
    }

    #[test]
    fn test_run_lighten() {
        let source = MemorySource::constant(&[100, 200, 150]);
        let mut runner = runner(StackMode::Lighten);
        let summary = runner.run(&source).unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.processed, 3);
        assert!(summary.skipped.is_empty());
        assert!(!summary.cancelled);
        assert_eq!(runner.result().unwrap(), Frame::filled(8, 8, 200));
    }

    #[test]
    fn test_corrupt_frames_are_skipped() {
        let source = MemorySource {
            frames: vec![
                Some(Frame::filled(8, 8, 100)),
                None,
                Some(Frame::filled(8, 8, 300)),
                Some(Frame::filled(9, 8, 900)),
            ],
        };
        let mut runner = runner(StackMode::Average);
        let summary = runner.run(&source).unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped_count(), 2);
        assert_eq!(summary.skipped[0].index, 1);
        assert_eq!(summary.skipped[0].label, "mem_1");
        assert_eq!(summary.skipped[0].reason, "corrupt data");
        assert_eq!(summary.skipped[1].index, 3);
        assert_eq!(runner.result().unwrap(), Frame::filled(8, 8, 200));
    }

    #[test]
    fn test_cancel_before_start() {
        let flag = Arc::new(AtomicBool::new(true));
        let source = MemorySource::constant(&[1, 2, 3]);
        let mut runner = runner(StackMode::Lighten).with_cancel_flag(flag);
        let summary = runner.run(&source).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 0);
        assert!(matches!(runner.result(), Err(StackError::NoFrames)));
    }

    #[test]
    fn test_cancel_keeps_partial_result() {
        let flag = Arc::new(AtomicBool::new(false));
        let trigger = flag.clone();
        let progress: ProgressCallback = Arc::new(Mutex::new(move |_msg: String, pct: f32| {
            // Stop once two of the four frames are in
            if pct >= 50.0 {
                trigger.store(true, Ordering::Relaxed);
            }
        }));

        let source = MemorySource::constant(&[100, 300, 5000, 7000]);
        let mut runner = runner(StackMode::Lighten)
            .with_cancel_flag(flag)
            .with_progress(progress);
        let summary = runner.run(&source).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 2);
        assert_eq!(runner.result().unwrap(), Frame::filled(8, 8, 300));
    }

    #[test]
    fn test_progress_reaches_completion() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressCallback = Arc::new(Mutex::new(move |_msg: String, pct: f32| {
            sink.lock().unwrap().push(pct);
        }));

        let source = MemorySource::constant(&[1, 2, 3, 4]);
        let mut runner = runner(StackMode::Addition).with_progress(progress);
        runner.run(&source).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&100.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_previews_follow_interval_and_last_frame() {
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        let source = MemorySource::constant(&[1, 2, 3, 4, 5, 6, 7]);
        let mut runner = runner(StackMode::Lighten).with_preview(
            3,
            Box::new(move |stacked, preview| {
                assert_eq!(preview.shape(), (8, 8, 3));
                sink.lock().unwrap().push(stacked);
            }),
        );
        runner.run(&source).unwrap();

        assert_eq!(*counts.lock().unwrap(), vec![3, 6, 7]);
    }

    #[test]
    fn test_preview_skips_gap_filling() {
        let mut config = StackingConfig::new(StackMode::Lighten);
        config.gap_filling = Some(GapFillConfig::new(GapFillMethod::MotionBlur, 2).unwrap());
        let engine = StackingEngine::new(config).unwrap();

        let mut frame = Frame::filled(9, 3, 0);
        frame.set_pixel(4, 1, [60000, 60000, 60000]);
        let source = MemorySource {
            frames: vec![Some(frame.clone())],
        };

        let previews = Arc::new(Mutex::new(Vec::new()));
        let sink = previews.clone();
        let mut runner = StackRunner::new(engine).with_preview(
            1,
            Box::new(move |_, preview| sink.lock().unwrap().push(preview.clone())),
        );
        runner.run(&source).unwrap();

        assert_eq!(previews.lock().unwrap()[0], frame);
        assert_ne!(runner.result().unwrap(), frame);
    }

    #[test]
    fn test_median_takes_batch_path() {
        let source = MemorySource {
            frames: vec![
                Some(Frame::filled(8, 8, 10)),
                Some(Frame::filled(8, 8, 60000)),
                None,
                Some(Frame::filled(8, 8, 12)),
            ],
        };
        let mut runner = runner(StackMode::Median);
        let summary = runner.run(&source).unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.skipped_count(), 1);
        assert_eq!(runner.result().unwrap(), Frame::filled(8, 8, 12));
    }

    #[test]
    fn test_dark_frame_is_subtracted() {
        let dark = DarkFrameSubtractor::new(Frame::filled(8, 8, 50));
        let source = MemorySource::constant(&[100, 250]);
        let mut runner = runner(StackMode::Lighten).with_dark_frame(dark);
        runner.run(&source).unwrap();
        assert_eq!(runner.result().unwrap(), Frame::filled(8, 8, 200));
    }

    #[test]
    fn test_slice_source() {
        let frames = vec![Frame::filled(4, 4, 5), Frame::filled(4, 4, 1)];
        let mut runner = runner(StackMode::Darken);
        let summary = runner.run(frames.as_slice()).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(runner.result().unwrap(), Frame::filled(4, 4, 1));
        assert_eq!(frames.as_slice().label(0), "frame 1");
    }

    #[test]
    fn test_median_reports_alignment_failures() {
        let config = StackingConfig {
            enable_alignment: true,
            ..StackingConfig::new(StackMode::Median)
        };
        // Flat frames have no features to register
        let source = MemorySource::constant(&[10, 20, 30]);
        let mut runner = StackRunner::new(StackingEngine::new(config).unwrap());
        let summary = runner.run(&source).unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.alignment_failures, 2);
        assert_eq!(runner.result().unwrap(), Frame::filled(8, 8, 20));
    }
}
