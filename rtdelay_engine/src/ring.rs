//! Segmented circular storage for the delay engine.
//!
//! Two flat histories (dry input and processed output) of `frame_capacity`
//! interleaved frames each, split into `segment_count` equal segments. A
//! global frame index `f` lives in segment `f / segment_frames` at offset
//! `f % segment_frames`.

use rtdelay_shared::{DelayError, DelayResult};

/// Delayed global frame index with wrap-around.
///
/// `delay` must be below `capacity` and `frame` must be a valid index.
#[inline]
pub fn prev_frame(frame: usize, delay: usize, capacity: usize) -> usize {
    debug_assert!(frame < capacity && delay < capacity);
    if delay > frame {
        capacity - (delay - frame)
    } else {
        frame - delay
    }
}

pub struct RingBuffer {
    frame_capacity: usize,
    segment_count: usize,
    segment_frames: usize,
    channels: usize,
    input: Vec<f32>,
    output: Vec<f32>,
}

impl RingBuffer {
    /// Shape must already be validated.
    pub fn new(frame_capacity: usize, segment_count: usize, channels: usize) -> DelayResult<Self> {
        let samples = frame_capacity
            .checked_mul(channels)
            .ok_or(DelayError::OutOfMemory)?;

        Ok(Self {
            frame_capacity,
            segment_count,
            segment_frames: frame_capacity / segment_count,
            channels,
            input: zeroed(samples)?,
            output: zeroed(samples)?,
        })
    }

    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn segment_frames(&self) -> usize {
        self.segment_frames
    }

    pub fn segment_samples(&self) -> usize {
        self.segment_frames * self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn segment_of(&self, frame: usize) -> usize {
        frame / self.segment_frames
    }

    #[inline]
    pub fn offset_of(&self, frame: usize) -> usize {
        frame % self.segment_frames
    }

    #[inline]
    pub fn global_frame(&self, segment: usize, offset: usize) -> usize {
        segment * self.segment_frames + offset
    }

    pub fn input_segment(&self, index: usize) -> DelayResult<&[f32]> {
        let range = self.segment_range(index)?;
        Ok(&self.input[range])
    }

    pub fn input_segment_mut(&mut self, index: usize) -> DelayResult<&mut [f32]> {
        let range = self.segment_range(index)?;
        Ok(&mut self.input[range])
    }

    pub fn output_segment(&self, index: usize) -> DelayResult<&[f32]> {
        let range = self.segment_range(index)?;
        Ok(&self.output[range])
    }

    pub fn output_segment_mut(&mut self, index: usize) -> DelayResult<&mut [f32]> {
        let range = self.segment_range(index)?;
        Ok(&mut self.output[range])
    }

    pub fn input_history(&self) -> &[f32] {
        &self.input
    }

    pub fn output_history(&self) -> &[f32] {
        &self.output
    }

    /// Read access to the input history alongside write access to the output
    /// history, for the segment processor.
    pub(crate) fn histories_mut(&mut self) -> (&[f32], &mut [f32]) {
        (&self.input, &mut self.output)
    }

    pub fn clear(&mut self) {
        self.input.fill(0.0);
        self.output.fill(0.0);
    }

    fn segment_range(&self, index: usize) -> DelayResult<std::ops::Range<usize>> {
        if index >= self.segment_count {
            return Err(DelayError::SegmentOutOfRange {
                index,
                count: self.segment_count,
            });
        }
        let len = self.segment_samples();
        Ok(index * len..(index + 1) * len)
    }
}

fn zeroed(samples: usize) -> DelayResult<Vec<f32>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(samples)
        .map_err(|_| DelayError::OutOfMemory)?;
    buf.resize(samples, 0.0);
    Ok(buf)
}
