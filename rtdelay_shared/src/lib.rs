use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod preset;

pub use error::{DelayError, DelayResult};
pub use preset::DelayPreset;

/// Delay line capacity used by the reference application (frames)
pub const DEFAULT_CAPACITY_FRAMES: usize = 65536;
/// Smallest capacity a playback session accepts
pub const RECOMMENDED_MIN_CAPACITY_FRAMES: usize = 128;
/// Parallel feedforward / feedback taps in the reference application
pub const DEFAULT_FF_TAPS: usize = 4;
pub const DEFAULT_FB_TAPS: usize = 4;

pub const MIN_SEGMENT_COUNT: usize = 2;
pub const MIN_CHANNELS: usize = 1;

/// Default size of the output sink's buffer (frames)
pub const DEFAULT_SINK_BUFFER_FRAMES: usize = 4096;

/// Which history a tap reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TapKind {
    /// Reads the dry input history
    FeedForward,
    /// Reads the processed output history (recursive)
    FeedBack,
}

impl fmt::Display for TapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapKind::FeedForward => f.write_str("FF"),
            TapKind::FeedBack => f.write_str("FB"),
        }
    }
}

/// A single delayed-and-scaled contribution to the output sum.
/// An amplitude of 0 disables the tap without removing it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TapParams {
    /// Delay in frames, always below the engine's frame capacity
    pub delay: u32,
    pub amp: f32,
}

impl TapParams {
    pub fn new(delay: u32, amp: f32) -> Self {
        Self { delay, amp }
    }

    pub fn is_active(&self) -> bool {
        self.amp != 0.0
    }
}

/// Fixed shape of a delay engine. Changing any field requires a new engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTopology {
    /// Total frames across all segments
    pub frame_capacity: usize,
    pub segment_count: usize,
    pub channels: usize,
    pub ff_taps: usize,
    pub fb_taps: usize,
    /// Smallest accepted `frame_capacity`
    #[serde(default)]
    pub min_capacity: usize,
}

impl EngineTopology {
    pub fn segment_frames(&self) -> usize {
        if self.segment_count == 0 {
            0
        } else {
            self.frame_capacity / self.segment_count
        }
    }

    pub fn segment_samples(&self) -> usize {
        self.segment_frames() * self.channels
    }

    pub fn tap_count(&self, kind: TapKind) -> usize {
        match kind {
            TapKind::FeedForward => self.ff_taps,
            TapKind::FeedBack => self.fb_taps,
        }
    }

    /// Check the structural invariants the ring buffer relies on.
    pub fn validate(&self) -> DelayResult<()> {
        if self.segment_count < MIN_SEGMENT_COUNT {
            return Err(DelayError::InvalidTopology(format!(
                "segment count {} is below the minimum of {}",
                self.segment_count, MIN_SEGMENT_COUNT
            )));
        }
        if self.channels < MIN_CHANNELS {
            return Err(DelayError::InvalidTopology(format!(
                "channel count {} is below the minimum of {}",
                self.channels, MIN_CHANNELS
            )));
        }
        if self.frame_capacity < self.min_capacity {
            return Err(DelayError::InvalidTopology(format!(
                "capacity of {} frames is below the minimum of {}",
                self.frame_capacity, self.min_capacity
            )));
        }
        // Every segment must hold at least one frame.
        if self.frame_capacity < self.segment_count {
            return Err(DelayError::InvalidTopology(format!(
                "capacity of {} frames cannot hold {} segments",
                self.frame_capacity, self.segment_count
            )));
        }
        if self.frame_capacity % self.segment_count != 0 {
            return Err(DelayError::InvalidTopology(format!(
                "capacity of {} frames is not divisible by {} segments",
                self.frame_capacity, self.segment_count
            )));
        }
        if self.frame_capacity > u32::MAX as usize {
            return Err(DelayError::InvalidTopology(format!(
                "capacity of {} frames exceeds the addressable delay range",
                self.frame_capacity
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of a delay engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    ErrorMemAlloc,
    ErrorGeneric,
    Uninitialized,
    Initialized,
}

impl EngineStatus {
    pub fn is_initialized(self) -> bool {
        self == EngineStatus::Initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo(frame_capacity: usize, segment_count: usize, channels: usize) -> EngineTopology {
        EngineTopology {
            frame_capacity,
            segment_count,
            channels,
            ff_taps: 4,
            fb_taps: 4,
            min_capacity: 0,
        }
    }

    #[test]
    fn test_segment_frames() {
        assert_eq!(topo(8, 2, 1).segment_frames(), 4);
        assert_eq!(topo(65536, 32, 2).segment_samples(), 4096);
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        assert!(topo(8, 1, 1).validate().is_err());
        assert!(topo(8, 2, 0).validate().is_err());
        assert!(topo(9, 2, 1).validate().is_err());
        assert!(topo(1, 2, 1).validate().is_err());
        assert!(topo(8, 2, 1).validate().is_ok());
    }

    #[test]
    fn test_validate_enforces_min_capacity() {
        let mut topology = topo(64, 2, 1);
        topology.min_capacity = RECOMMENDED_MIN_CAPACITY_FRAMES;
        let err = topology.validate().unwrap_err();
        assert!(err.to_string().contains("below the minimum of 128"));

        topology.frame_capacity = 128;
        assert!(topology.validate().is_ok());
    }

    #[test]
    fn test_tap_kind_display() {
        assert_eq!(TapKind::FeedForward.to_string(), "FF");
        assert_eq!(TapKind::FeedBack.to_string(), "FB");
    }
}
