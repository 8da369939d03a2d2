//! Feedforward / feedback tap tables.
//!
//! Each entry keeps its delay and amplitude in separate atomics so the
//! control thread can retune taps while the playback thread is reading
//! them. A reader may observe a new delay with the previous amplitude for
//! one segment; that is an audible glitch at worst, never a data race.

use std::sync::atomic::{AtomicU32, Ordering};

use rtdelay_shared::{DelayError, DelayResult, TapKind, TapParams};

#[derive(Default)]
struct TapEntry {
    delay: AtomicU32,
    amp: AtomicU32,
}

impl TapEntry {
    fn load(&self) -> TapParams {
        TapParams {
            delay: self.delay.load(Ordering::Relaxed),
            amp: f32::from_bits(self.amp.load(Ordering::Relaxed)),
        }
    }
}

pub struct DelayTapTable {
    kind: TapKind,
    entries: Box<[TapEntry]>,
}

impl DelayTapTable {
    pub fn new(kind: TapKind, count: usize) -> DelayResult<Self> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(count)
            .map_err(|_| DelayError::OutOfMemory)?;
        entries.resize_with(count, TapEntry::default);

        Ok(Self {
            kind,
            entries: entries.into_boxed_slice(),
        })
    }

    pub fn kind(&self) -> TapKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> DelayResult<TapParams> {
        Ok(self.entry(index)?.load())
    }

    /// `capacity` is the engine's frame capacity; delays must stay below it.
    pub fn set_delay(&self, index: usize, delay: usize, capacity: usize) -> DelayResult<()> {
        let entry = self.entry(index)?;
        if delay >= capacity {
            return Err(DelayError::DelayOutOfRange { delay, capacity });
        }
        entry.delay.store(delay as u32, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_amplitude(&self, index: usize, amp: f32) -> DelayResult<()> {
        self.entry(index)?
            .amp
            .store(amp.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn reset(&self) {
        for entry in self.entries.iter() {
            entry.delay.store(0, Ordering::Relaxed);
            entry.amp.store(0.0f32.to_bits(), Ordering::Relaxed);
        }
    }

    /// `out` must have capacity for `len()` entries so this never allocates.
    pub fn snapshot_into(&self, out: &mut Vec<TapParams>) {
        out.clear();
        out.extend(self.entries.iter().map(TapEntry::load));
    }

    pub fn snapshot(&self) -> Vec<TapParams> {
        self.entries.iter().map(TapEntry::load).collect()
    }

    fn entry(&self, index: usize) -> DelayResult<&TapEntry> {
        self.entries.get(index).ok_or(DelayError::TapIndexOutOfRange {
            kind: self.kind,
            index,
            count: self.entries.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_is_zeroed() {
        let table = DelayTapTable::new(TapKind::FeedForward, 4).unwrap();
        assert_eq!(table.len(), 4);
        for i in 0..4 {
            assert_eq!(table.get(i).unwrap(), TapParams::default());
        }
    }

    #[test]
    fn test_set_and_get() {
        let table = DelayTapTable::new(TapKind::FeedBack, 2).unwrap();
        table.set_delay(1, 300, 1024).unwrap();
        table.set_amplitude(1, -0.75).unwrap();
        assert_eq!(table.get(1).unwrap(), TapParams::new(300, -0.75));
        assert_eq!(table.get(0).unwrap(), TapParams::default());
    }

    #[test]
    fn test_rejections_leave_state_untouched() {
        let table = DelayTapTable::new(TapKind::FeedForward, 2).unwrap();
        table.set_delay(0, 10, 64).unwrap();
        table.set_amplitude(0, 0.5).unwrap();

        assert_eq!(
            table.set_delay(0, 64, 64),
            Err(DelayError::DelayOutOfRange { delay: 64, capacity: 64 })
        );
        assert_eq!(
            table.set_amplitude(2, 1.0),
            Err(DelayError::TapIndexOutOfRange { kind: TapKind::FeedForward, index: 2, count: 2 })
        );
        assert_eq!(table.get(0).unwrap(), TapParams::new(10, 0.5));
        assert!(table.get(2).is_err());
    }

    #[test]
    fn test_reset_empty_table() {
        let table = DelayTapTable::new(TapKind::FeedBack, 0).unwrap();
        assert!(table.is_empty());
        table.reset();
        assert!(table.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let table = DelayTapTable::new(TapKind::FeedForward, 3).unwrap();
        for i in 0..3 {
            table.set_delay(i, i * 10, 100).unwrap();
            table.set_amplitude(i, i as f32).unwrap();
        }
        let mut out = Vec::with_capacity(3);
        table.snapshot_into(&mut out);
        assert_eq!(out, vec![TapParams::new(0, 0.0), TapParams::new(10, 1.0), TapParams::new(20, 2.0)]);
    }
}
