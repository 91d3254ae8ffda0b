pub mod alignment;
pub mod config;
pub mod dark_frame;
pub mod error;
pub mod features;
pub mod frame;
pub mod frame_io;
pub mod gap_filling;
pub mod morphology;
pub mod phase_correlation;
pub mod pipeline;
pub mod ransac;
pub mod smoothing;
pub mod stacking;
pub mod statistics;
pub mod stretch;
pub mod transform;

#[cfg(test)]
mod test_stacking;

// Re-export commonly used items
pub use alignment::{Aligner, AlignmentFailure, AlignmentResult};
pub use config::{AlignmentConfig, GapFillConfig, StackingConfig};
pub use error::{FrameDecodeError, StackError, StackResult};
pub use frame::Frame;
pub use gap_filling::{GapFillMethod, GapFiller};
pub use pipeline::{FrameSource, StackRunner, StackSummary};
pub use stacking::{median_stack, CometTail, StackMode, StackingEngine};
pub use statistics::ImageStatistics;
