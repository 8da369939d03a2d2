//! Multi-tap delay processor.
//!
//! For every frame `g` of a segment and every channel `c`:
//!
//! ```text
//! out[g,c]  = dry * in[g,c]
//! out[g,c] += ff_amp[i] * in[prev(g, ff_delay[i]), c]    for each FF tap i
//! out[g,c] += fb_amp[j] * out[prev(g, fb_delay[j]), c]   for each FB tap j
//! out[g,c] *= output_amp
//! ```
//!
//! Taps are evaluated in table order and taps with a zero amplitude are
//! skipped. Feedback taps read the output history in place, so a feedback
//! tap with delay 0 sees the partial sum of the frame being computed.

use std::sync::Arc;

use rtdelay_shared::{
    DelayError, DelayPreset, DelayResult, EngineStatus, EngineTopology, TapKind, TapParams,
};

use crate::params::{DelayControl, LastError};
use crate::ring::{prev_frame, RingBuffer};

pub struct DelayEngine {
    topology: EngineTopology,
    status: EngineStatus,
    ring: Option<RingBuffer>,
    control: Option<DelayControl>,
    last_error: Arc<LastError>,
    // Per-segment tap snapshots, sized at initialization
    ff_scratch: Vec<TapParams>,
    fb_scratch: Vec<TapParams>,
}

impl DelayEngine {
    pub fn new(topology: EngineTopology) -> Self {
        Self {
            topology,
            status: EngineStatus::Uninitialized,
            ring: None,
            control: None,
            last_error: Arc::new(LastError::default()),
            ff_scratch: Vec::new(),
            fb_scratch: Vec::new(),
        }
    }

    /// A no-op once initialized. Allocation failures move the status to
    /// `ErrorMemAlloc` and may be retried.
    pub fn initialize(&mut self) -> DelayResult<()> {
        if self.status.is_initialized() {
            return Ok(());
        }

        if let Err(e) = self.topology.validate() {
            return Err(self.last_error.record(e));
        }

        match self.allocate() {
            Ok((ring, control, ff_scratch, fb_scratch)) => {
                self.ring = Some(ring);
                self.control = Some(control);
                self.ff_scratch = ff_scratch;
                self.fb_scratch = fb_scratch;
                self.status = EngineStatus::Initialized;
                Ok(())
            }
            Err(e) => {
                self.status = if e.is_out_of_memory() {
                    EngineStatus::ErrorMemAlloc
                } else {
                    EngineStatus::ErrorGeneric
                };
                Err(self.last_error.record(e))
            }
        }
    }

    fn allocate(&self) -> DelayResult<(RingBuffer, DelayControl, Vec<TapParams>, Vec<TapParams>)> {
        let t = &self.topology;
        let ring = RingBuffer::new(t.frame_capacity, t.segment_count, t.channels)?;
        let control = DelayControl::new(t, Arc::clone(&self.last_error))?;

        let mut ff_scratch = Vec::new();
        ff_scratch
            .try_reserve_exact(t.ff_taps)
            .map_err(|_| DelayError::OutOfMemory)?;
        let mut fb_scratch = Vec::new();
        fb_scratch
            .try_reserve_exact(t.fb_taps)
            .map_err(|_| DelayError::OutOfMemory)?;

        Ok((ring, control, ff_scratch, fb_scratch))
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn is_initialized(&self) -> bool {
        self.status.is_initialized()
    }

    pub fn topology(&self) -> &EngineTopology {
        &self.topology
    }

    pub fn process_segment(&mut self, segment: usize) -> DelayResult<()> {
        let Self {
            ring,
            control,
            last_error,
            ff_scratch,
            fb_scratch,
            ..
        } = self;

        let (Some(ring), Some(control)) = (ring.as_mut(), control.as_ref()) else {
            return Err(last_error.record(DelayError::Uninitialized));
        };
        if segment >= ring.segment_count() {
            return Err(last_error.record(DelayError::SegmentOutOfRange {
                index: segment,
                count: ring.segment_count(),
            }));
        }

        control.table(TapKind::FeedForward).snapshot_into(ff_scratch);
        control.table(TapKind::FeedBack).snapshot_into(fb_scratch);
        ff_scratch.retain(TapParams::is_active);
        fb_scratch.retain(TapParams::is_active);
        let (dry_amp, output_amp) = control.gains();

        let capacity = ring.frame_capacity();
        let channels = ring.channels();
        let first = ring.global_frame(segment, 0);
        let last = first + ring.segment_frames();
        let (input, output) = ring.histories_mut();

        for frame in first..last {
            let cur = frame * channels;

            for c in 0..channels {
                output[cur + c] = dry_amp * input[cur + c];
            }

            for tap in ff_scratch.iter() {
                let prev = prev_frame(frame, tap.delay as usize, capacity) * channels;
                for c in 0..channels {
                    output[cur + c] += tap.amp * input[prev + c];
                }
            }

            for tap in fb_scratch.iter() {
                let prev = prev_frame(frame, tap.delay as usize, capacity) * channels;
                for c in 0..channels {
                    let delayed = output[prev + c];
                    output[cur + c] += tap.amp * delayed;
                }
            }

            for c in 0..channels {
                output[cur + c] *= output_amp;
            }
        }

        Ok(())
    }

    pub fn ring(&self) -> DelayResult<&RingBuffer> {
        self.ring
            .as_ref()
            .ok_or(DelayError::Uninitialized)
    }

    pub fn input_segment_mut(&mut self, segment: usize) -> DelayResult<&mut [f32]> {
        let Some(ring) = self.ring.as_mut() else {
            return Err(self.last_error.record(DelayError::Uninitialized));
        };
        ring.input_segment_mut(segment)
            .map_err(|e| self.last_error.record(e))
    }

    pub fn output_segment(&self, segment: usize) -> DelayResult<&[f32]> {
        self.ring()?
            .output_segment(segment)
            .map_err(|e| self.last_error.record(e))
    }

    pub fn control(&self) -> DelayResult<DelayControl> {
        self.ready().cloned()
    }

    pub fn dry_input_amplitude(&self) -> DelayResult<f32> {
        Ok(self.ready()?.dry_input_amplitude())
    }

    pub fn output_amplitude(&self) -> DelayResult<f32> {
        Ok(self.ready()?.output_amplitude())
    }

    pub fn set_dry_input_amplitude(&self, amp: f32) -> DelayResult<()> {
        self.ready()?.set_dry_input_amplitude(amp);
        Ok(())
    }

    pub fn set_output_amplitude(&self, amp: f32) -> DelayResult<()> {
        self.ready()?.set_output_amplitude(amp);
        Ok(())
    }

    pub fn ff_params(&self, index: usize) -> DelayResult<TapParams> {
        self.ready()?.ff_params(index)
    }

    pub fn fb_params(&self, index: usize) -> DelayResult<TapParams> {
        self.ready()?.fb_params(index)
    }

    pub fn set_ff_delay(&self, index: usize, delay: usize) -> DelayResult<()> {
        self.ready()?.set_ff_delay(index, delay)
    }

    pub fn set_ff_amplitude(&self, index: usize, amp: f32) -> DelayResult<()> {
        self.ready()?.set_ff_amplitude(index, amp)
    }

    pub fn set_fb_delay(&self, index: usize, delay: usize) -> DelayResult<()> {
        self.ready()?.set_fb_delay(index, delay)
    }

    pub fn set_fb_amplitude(&self, index: usize, amp: f32) -> DelayResult<()> {
        self.ready()?.set_fb_amplitude(index, amp)
    }

    pub fn reset_ff_params(&self) -> DelayResult<()> {
        self.ready()?.reset_ff_params();
        Ok(())
    }

    pub fn reset_fb_params(&self) -> DelayResult<()> {
        self.ready()?.reset_fb_params();
        Ok(())
    }

    pub fn apply_preset(&self, preset: &DelayPreset) -> DelayResult<()> {
        self.ready()?.apply_preset(preset)
    }

    pub fn last_error(&self) -> Option<DelayError> {
        self.last_error.get()
    }

    pub fn last_error_message(&self) -> String {
        let message = self
            .last_error()
            .map(|e| e.to_string())
            .unwrap_or_default();
        if self.is_initialized() {
            message
        } else {
            format!("delay engine not initialized\nextended error message: {message}")
        }
    }

    fn ready(&self) -> DelayResult<&DelayControl> {
        self.control
            .as_ref()
            .ok_or_else(|| self.last_error.record(DelayError::Uninitialized))
    }
}
