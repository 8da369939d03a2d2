//! Live delay parameters shared between the control and playback threads.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use rtdelay_shared::{DelayError, DelayPreset, DelayResult, EngineTopology, TapKind, TapParams};

use crate::taps::DelayTapTable;

/// Most recent failure, shared by an engine and all of its control handles
#[derive(Default)]
pub(crate) struct LastError(ArcSwapOption<DelayError>);

impl LastError {
    pub(crate) fn record(&self, err: DelayError) -> DelayError {
        self.0.store(Some(Arc::new(err.clone())));
        err
    }

    pub(crate) fn get(&self) -> Option<DelayError> {
        self.0.load_full().map(|e| (*e).clone())
    }
}

pub(crate) struct DelayParams {
    frame_capacity: usize,
    dry_amp: AtomicU32,
    output_amp: AtomicU32,
    ff: DelayTapTable,
    fb: DelayTapTable,
    last_error: Arc<LastError>,
}

/// Failures are returned and also kept as the engine's last error.
#[derive(Clone)]
pub struct DelayControl {
    params: Arc<DelayParams>,
}

impl DelayControl {
    pub(crate) fn new(topology: &EngineTopology, last_error: Arc<LastError>) -> DelayResult<Self> {
        Ok(Self {
            params: Arc::new(DelayParams {
                frame_capacity: topology.frame_capacity,
                dry_amp: AtomicU32::new(1.0f32.to_bits()),
                output_amp: AtomicU32::new(1.0f32.to_bits()),
                ff: DelayTapTable::new(TapKind::FeedForward, topology.ff_taps)?,
                fb: DelayTapTable::new(TapKind::FeedBack, topology.fb_taps)?,
                last_error,
            }),
        })
    }

    fn record(&self, err: DelayError) -> DelayError {
        self.params.last_error.record(err)
    }

    pub(crate) fn table(&self, kind: TapKind) -> &DelayTapTable {
        match kind {
            TapKind::FeedForward => &self.params.ff,
            TapKind::FeedBack => &self.params.fb,
        }
    }

    /// (dry input, output) gains
    #[inline]
    pub(crate) fn gains(&self) -> (f32, f32) {
        (
            f32::from_bits(self.params.dry_amp.load(Ordering::Relaxed)),
            f32::from_bits(self.params.output_amp.load(Ordering::Relaxed)),
        )
    }

    pub fn frame_capacity(&self) -> usize {
        self.params.frame_capacity
    }

    pub fn tap_count(&self, kind: TapKind) -> usize {
        self.table(kind).len()
    }

    pub fn dry_input_amplitude(&self) -> f32 {
        self.gains().0
    }

    pub fn output_amplitude(&self) -> f32 {
        self.gains().1
    }

    pub fn set_dry_input_amplitude(&self, amp: f32) {
        self.params.dry_amp.store(amp.to_bits(), Ordering::Relaxed);
    }

    pub fn set_output_amplitude(&self, amp: f32) {
        self.params.output_amp.store(amp.to_bits(), Ordering::Relaxed);
    }

    pub fn tap_params(&self, kind: TapKind, index: usize) -> DelayResult<TapParams> {
        self.table(kind).get(index).map_err(|e| self.record(e))
    }

    pub fn set_tap_delay(&self, kind: TapKind, index: usize, delay: usize) -> DelayResult<()> {
        self.table(kind)
            .set_delay(index, delay, self.params.frame_capacity)
            .map_err(|e| self.record(e))
    }

    pub fn set_tap_amplitude(&self, kind: TapKind, index: usize, amp: f32) -> DelayResult<()> {
        self.table(kind)
            .set_amplitude(index, amp)
            .map_err(|e| self.record(e))
    }

    pub fn reset_taps(&self, kind: TapKind) {
        self.table(kind).reset();
    }

    pub fn ff_params(&self, index: usize) -> DelayResult<TapParams> {
        self.tap_params(TapKind::FeedForward, index)
    }

    pub fn fb_params(&self, index: usize) -> DelayResult<TapParams> {
        self.tap_params(TapKind::FeedBack, index)
    }

    pub fn set_ff_delay(&self, index: usize, delay: usize) -> DelayResult<()> {
        self.set_tap_delay(TapKind::FeedForward, index, delay)
    }

    pub fn set_ff_amplitude(&self, index: usize, amp: f32) -> DelayResult<()> {
        self.set_tap_amplitude(TapKind::FeedForward, index, amp)
    }

    pub fn set_fb_delay(&self, index: usize, delay: usize) -> DelayResult<()> {
        self.set_tap_delay(TapKind::FeedBack, index, delay)
    }

    pub fn set_fb_amplitude(&self, index: usize, amp: f32) -> DelayResult<()> {
        self.set_tap_amplitude(TapKind::FeedBack, index, amp)
    }

    pub fn reset_ff_params(&self) {
        self.reset_taps(TapKind::FeedForward)
    }

    pub fn reset_fb_params(&self) {
        self.reset_taps(TapKind::FeedBack)
    }

    /// Nothing is written unless every entry is valid. Taps beyond the
    /// preset's lists are zeroed.
    pub fn apply_preset(&self, preset: &DelayPreset) -> DelayResult<()> {
        for (kind, taps) in [
            (TapKind::FeedForward, &preset.feedforward),
            (TapKind::FeedBack, &preset.feedback),
        ] {
            let count = self.tap_count(kind);
            if taps.len() > count {
                return Err(self.record(DelayError::TapIndexOutOfRange {
                    kind,
                    index: count,
                    count,
                }));
            }
            if let Some(tap) = taps.iter().find(|t| t.delay as usize >= self.params.frame_capacity) {
                return Err(self.record(DelayError::DelayOutOfRange {
                    delay: tap.delay as usize,
                    capacity: self.params.frame_capacity,
                }));
            }
        }

        self.set_dry_input_amplitude(preset.dry_amp);
        self.set_output_amplitude(preset.output_amp);
        for (kind, taps) in [
            (TapKind::FeedForward, &preset.feedforward),
            (TapKind::FeedBack, &preset.feedback),
        ] {
            self.reset_taps(kind);
            for (index, tap) in taps.iter().enumerate() {
                self.set_tap_delay(kind, index, tap.delay as usize)?;
                self.set_tap_amplitude(kind, index, tap.amp)?;
            }
        }
        Ok(())
    }

    pub fn preset(&self) -> DelayPreset {
        let (dry_amp, output_amp) = self.gains();
        DelayPreset {
            dry_amp,
            output_amp,
            feedforward: self.params.ff.snapshot(),
            feedback: self.params.fb.snapshot(),
        }
    }

    pub fn last_error(&self) -> Option<DelayError> {
        self.params.last_error.get()
    }

    pub fn last_error_message(&self) -> String {
        self.last_error().map(|e| e.to_string()).unwrap_or_default()
    }
}
