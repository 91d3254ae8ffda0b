use thiserror::Error;

use crate::stacking::StackMode;

/// Result type for stacking operations
pub type StackResult<T> = Result<T, StackError>;

/// Errors raised by the stacking core.
///
/// Only configuration and state problems are errors. Alignment trouble is
/// reported through [`crate::alignment::AlignmentResult`] and never aborts a
/// run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StackError {
    /// Comet fade factor outside [0, 1]
    #[error("comet fade factor must be within [0.0, 1.0], got {0}")]
    InvalidFadeFactor(f64),

    /// Gap size of zero pixels
    #[error("gap size must be a positive number of pixels, got {0}")]
    InvalidGapSize(usize),

    /// Gap intensity threshold outside [0, 1]
    #[error("intensity threshold must be within [0.0, 1.0], got {0}")]
    InvalidIntensityThreshold(f64),

    #[error("unknown stack mode: {0}")]
    UnknownStackMode(String),

    #[error("unknown gap fill method: {0}")]
    UnknownGapFillMethod(String),

    #[error("unknown feature detector: {0}")]
    UnknownDetector(String),

    /// `get_result` called before any frame was added
    #[error("no frames have been added to the stack")]
    NoFrames,

    /// Incremental accumulation attempted in a batch-only mode
    #[error("{0} stacking is a batch-only operation; use process_median")]
    BatchOnly(StackMode),

    /// Median requested over an empty frame list
    #[error("cannot stack an empty list of frames")]
    EmptyBatch,

    /// Frame dimensions differ from the established stack dimensions
    #[error("frame is {got_width}x{got_height}, stack is {width}x{height}")]
    ShapeMismatch {
        width: usize,
        height: usize,
        got_width: usize,
        got_height: usize,
    },

    /// Sample buffer length does not match width x height x 3
    #[error("frame buffer holds {len} samples, expected {expected} for {width}x{height} RGB")]
    InvalidFrame {
        width: usize,
        height: usize,
        len: usize,
        expected: usize,
    },
}

impl StackError {
    /// Errors raised while validating configuration values
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StackError::InvalidFadeFactor(_)
                | StackError::InvalidGapSize(_)
                | StackError::InvalidIntensityThreshold(_)
                | StackError::UnknownStackMode(_)
                | StackError::UnknownGapFillMethod(_)
                | StackError::UnknownDetector(_)
        )
    }

    /// Errors caused by calling an operation in the wrong accumulator state
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            StackError::NoFrames | StackError::BatchOnly(_) | StackError::EmptyBatch
        )
    }
}

/// A source frame that could not be decoded.
///
/// Raised at the boundary with the frame decoder. The pipeline skips the
/// frame, logs it and keeps going.
#[derive(Debug, Error)]
#[error("failed to decode {label}: {reason}")]
pub struct FrameDecodeError {
    pub label: String,
    pub reason: String,
}

impl FrameDecodeError {
    pub fn new(label: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            label: label.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StackError::InvalidFadeFactor(1.5).is_configuration());
        assert!(StackError::InvalidGapSize(0).is_configuration());
        assert!(!StackError::InvalidGapSize(0).is_state());
        assert!(StackError::NoFrames.is_state());
        assert!(StackError::BatchOnly(StackMode::Median).is_state());
        let shape = StackError::ShapeMismatch {
            width: 10,
            height: 10,
            got_width: 5,
            got_height: 5,
        };
        assert!(!shape.is_state());
        assert!(!shape.is_configuration());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            StackError::BatchOnly(StackMode::Median).to_string(),
            "median stacking is a batch-only operation; use process_median"
        );
        let err = FrameDecodeError::new("IMG_0001.tif", "truncated file");
        assert_eq!(err.to_string(), "failed to decode IMG_0001.tif: truncated file");
    }
}
