use thiserror::Error;

use crate::TapKind;

/// Errors reported by the delay engine and its parameter tables
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DelayError {
    /// Bad topology at initialization
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Buffer allocation failed
    #[error("memory allocation failed")]
    OutOfMemory,

    #[error("delay engine is not initialized")]
    Uninitialized,

    #[error("{kind} tap index {index} is out of bounds ({count} taps configured)")]
    TapIndexOutOfRange { kind: TapKind, index: usize, count: usize },

    #[error("delay of {delay} frames is too big (capacity is {capacity} frames)")]
    DelayOutOfRange { delay: usize, capacity: usize },

    #[error("segment index {index} is out of bounds ({count} segments)")]
    SegmentOutOfRange { index: usize, count: usize },
}

impl DelayError {
    /// True for allocation failures, which callers surface separately
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, DelayError::OutOfMemory)
    }
}

pub type DelayResult<T> = Result<T, DelayError>;
