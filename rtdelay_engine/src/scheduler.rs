//! Segment-at-a-time playback loop.
//!
//! Each iteration submits the segment prepared during the previous one,
//! then reads, processes and encodes the next segment into the other half
//! of a two-slot staging area, and finally polls the sink until it can take
//! one more segment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::delay::DelayEngine;
use crate::error::PlaybackError;
use crate::pcm::PcmCodec;
use crate::sink::AudioSink;
use crate::source::PcmSource;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// The source ran out and the sink was drained
    EndOfStream,
    /// A stop was requested
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStats {
    pub segments_played: u64,
    pub frames_read: u64,
    /// Segments padded with silence after a short or failed read
    pub short_reads: u64,
    pub end: PlaybackEnd,
}

/// Drives one engine from one source into one sink until the source ends
/// or the stop flag is raised. Owns none of them.
pub struct PlaybackScheduler<'a, S: ?Sized, K: ?Sized> {
    engine: &'a mut DelayEngine,
    source: &'a mut S,
    sink: &'a mut K,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
}

struct Codecs {
    decode: PcmCodec,
    encode: PcmCodec,
}

impl<'a, S, K> PlaybackScheduler<'a, S, K>
where
    S: PcmSource + ?Sized,
    K: AudioSink + ?Sized,
{
    pub fn new(
        engine: &'a mut DelayEngine,
        source: &'a mut S,
        sink: &'a mut K,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine,
            source,
            sink,
            stop,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Play until end of stream or stop.
    ///
    /// Sink failures come back as `PlaybackError::Sink`; the caller treats
    /// them as fatal. The sink is stopped but not closed.
    pub fn run(mut self) -> Result<PlaybackStats, PlaybackError> {
        self.check_shapes()?;

        let info = *self.source.info();
        let topology = *self.engine.topology();
        let segment_frames = topology.segment_frames();
        let segment_samples = topology.segment_samples();
        let codecs = Codecs {
            decode: info.format.codec(),
            encode: self.sink.config().format.codec(),
        };

        let mut raw = vec![0u8; segment_frames * info.frame_bytes()];
        let mut staging = [vec![0i32; segment_samples], vec![0i32; segment_samples]];
        let mut pos = info.data_begin;
        let mut segment = 0usize;
        let mut iteration = 0usize;
        let mut stats = PlaybackStats {
            segments_played: 0,
            frames_read: 0,
            short_reads: 0,
            end: PlaybackEnd::EndOfStream,
        };

        self.sink.prime()?;
        self.sink.start()?;

        let mut ready = self.prepare(segment, &mut pos, &mut raw, &mut staging[0], &codecs, &mut stats)?;
        if ready {
            self.wait_for_room(segment_frames)?;
            segment = (segment + 1) % topology.segment_count;
        }

        while ready {
            if self.stop.load(Ordering::Relaxed) {
                stats.end = PlaybackEnd::Stopped;
                break;
            }

            let [first, second] = &mut staging;
            let (play, load) = if iteration % 2 == 0 {
                (first, second)
            } else {
                (second, first)
            };

            self.sink.submit(&play[..])?;
            stats.segments_played += 1;

            ready = self.prepare(segment, &mut pos, &mut raw, load, &codecs, &mut stats)?;
            if ready {
                self.wait_for_room(segment_frames)?;
                segment = (segment + 1) % topology.segment_count;
                iteration += 1;
            }
        }

        if stats.end == PlaybackEnd::EndOfStream {
            self.drain()?;
        }
        self.sink.stop()?;

        log::debug!(
            "Playback finished: {:?} after {} segments ({} frames read, {} short reads)",
            stats.end,
            stats.segments_played,
            stats.frames_read,
            stats.short_reads
        );
        Ok(stats)
    }

    fn check_shapes(&self) -> Result<(), PlaybackError> {
        let info = self.source.info();
        let sink = self.sink.config();
        let topology = self.engine.topology();
        self.engine.ring()?;

        if topology.channels != info.channels as usize || sink.channels != info.channels {
            return Err(PlaybackError::Mismatch(format!(
                "source has {} channels, engine {}, sink {}",
                info.channels, topology.channels, sink.channels
            )));
        }
        if sink.sample_rate != info.sample_rate {
            return Err(PlaybackError::Mismatch(format!(
                "source runs at {} Hz, sink at {} Hz",
                info.sample_rate, sink.sample_rate
            )));
        }
        if topology.segment_frames() > sink.buffer_frames {
            return Err(PlaybackError::Mismatch(format!(
                "segment of {} frames does not fit a sink buffer of {} frames",
                topology.segment_frames(),
                sink.buffer_frames
            )));
        }
        Ok(())
    }

    /// Read, process and encode `segment`. Returns false at end of stream.
    fn prepare(
        &mut self,
        segment: usize,
        pos: &mut u64,
        raw: &mut [u8],
        staging: &mut [i32],
        codecs: &Codecs,
        stats: &mut PlaybackStats,
    ) -> Result<bool, PlaybackError> {
        let info = *self.source.info();
        if *pos >= info.data_end {
            return Ok(false);
        }

        // Read failures are treated like a short read: the rest is silence
        let read = match self.source.read_at(*pos, raw) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("Source read at byte {} failed: {}", *pos, e);
                0
            }
        };
        if read < raw.len() {
            stats.short_reads += 1;
        }
        stats.frames_read += (read / info.frame_bytes()) as u64;
        *pos += raw.len() as u64;

        codecs
            .decode
            .decode(&raw[..read], self.engine.input_segment_mut(segment)?);
        self.engine.process_segment(segment)?;
        codecs
            .encode
            .encode(self.engine.output_segment(segment)?, staging);
        Ok(true)
    }

    /// Poll until the sink can accept `frames` more, or a stop is requested.
    fn wait_for_room(&mut self, frames: usize) -> Result<(), PlaybackError> {
        while self.sink.free_frames()? < frames {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            thread::sleep(self.poll_interval);
        }
        Ok(())
    }

    /// Wait for everything submitted to be played out.
    fn drain(&mut self) -> Result<(), PlaybackError> {
        let config = *self.sink.config();
        let budget = Duration::from_secs_f64(
            config.buffer_frames as f64 / config.sample_rate.max(1) as f64 * 2.0,
        ) + DRAIN_GRACE;
        let started = Instant::now();

        while self.sink.free_frames()? < config.buffer_frames {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            if started.elapsed() > budget {
                log::warn!("Sink did not drain within {:?}", budget);
                break;
            }
            thread::sleep(self.poll_interval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinkError, SinkResult};
    use crate::pcm::PcmFormat;
    use crate::sink::SinkConfig;
    use crate::source::WavSource;
    use rtdelay_shared::EngineTopology;
    use std::cell::Cell;
    use std::io::Cursor;

    /// Sink that records submissions and plays back `drain_per_poll`
    /// frames every time it is polled.
    struct MockSink {
        config: SinkConfig,
        queued: Cell<usize>,
        drain_per_poll: usize,
        submitted: Vec<Vec<i32>>,
        events: Vec<&'static str>,
        reject_after: Option<usize>,
    }

    impl MockSink {
        fn new(buffer_frames: usize, drain_per_poll: usize) -> Self {
            Self {
                config: SinkConfig {
                    sample_rate: 8000,
                    channels: 1,
                    format: PcmFormat::Bits16,
                    buffer_frames,
                },
                queued: Cell::new(0),
                drain_per_poll,
                submitted: Vec::new(),
                events: Vec::new(),
                reject_after: None,
            }
        }

        fn played(&self) -> Vec<i32> {
            // Drop the silence used for priming
            self.submitted.iter().skip(1).flatten().copied().collect()
        }
    }

    impl AudioSink for MockSink {
        fn config(&self) -> &SinkConfig {
            &self.config
        }

        fn free_frames(&self) -> SinkResult<usize> {
            let queued = self.queued.get().saturating_sub(self.drain_per_poll);
            self.queued.set(queued);
            Ok(self.config.buffer_frames - queued)
        }

        fn submit(&mut self, samples: &[i32]) -> SinkResult<()> {
            let free = self.config.buffer_frames - self.queued.get();
            if samples.len() > free || self.reject_after == Some(self.submitted.len()) {
                return Err(SinkError::Rejected { requested: samples.len(), free });
            }
            self.queued.set(self.queued.get() + samples.len());
            self.submitted.push(samples.to_vec());
            Ok(())
        }

        fn start(&mut self) -> SinkResult<()> {
            self.events.push("start");
            Ok(())
        }

        fn stop(&mut self) -> SinkResult<()> {
            self.events.push("stop");
            Ok(())
        }

        fn close(&mut self) -> SinkResult<()> {
            self.events.push("close");
            Ok(())
        }
    }

    fn source(samples: &[i16]) -> WavSource<Cursor<Vec<u8>>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        WavSource::new(Cursor::new(cursor.into_inner())).unwrap()
    }

    fn engine(frame_capacity: usize, segment_count: usize) -> DelayEngine {
        let mut engine = DelayEngine::new(EngineTopology {
            frame_capacity,
            segment_count,
            channels: 1,
            ff_taps: 2,
            fb_taps: 2,
            min_capacity: 0,
        });
        engine.initialize().unwrap();
        engine
    }

    fn run(
        engine: &mut DelayEngine,
        source: &mut WavSource<Cursor<Vec<u8>>>,
        sink: &mut MockSink,
    ) -> Result<PlaybackStats, PlaybackError> {
        PlaybackScheduler::new(engine, source, sink, Arc::new(AtomicBool::new(false)))
            .with_poll_interval(Duration::ZERO)
            .run()
    }

    #[test]
    fn test_dry_playback_reproduces_source() {
        let input: Vec<i16> = (0..40).map(|i| (i * 100 - 2000) as i16).collect();
        let mut engine = engine(16, 4);
        let mut source = source(&input);
        let mut sink = MockSink::new(8, 2);

        let stats = run(&mut engine, &mut source, &mut sink).unwrap();

        assert_eq!(stats.end, PlaybackEnd::EndOfStream);
        assert_eq!(stats.segments_played, 10);
        assert_eq!(stats.frames_read, 40);
        assert_eq!(stats.short_reads, 0);
        // Priming silence fills the whole sink buffer
        assert_eq!(sink.submitted[0], vec![0; 8]);
        let expected: Vec<i32> = input.iter().map(|&s| s as i32).collect();
        assert_eq!(sink.played(), expected);
        assert_eq!(sink.events, vec!["start", "stop"]);
    }

    #[test]
    fn test_short_final_segment_is_zero_padded() {
        let input = [1000i16; 6];
        let mut engine = engine(8, 2);
        let mut source = source(&input);
        let mut sink = MockSink::new(8, 4);

        let stats = run(&mut engine, &mut source, &mut sink).unwrap();

        assert_eq!(stats.segments_played, 2);
        assert_eq!(stats.short_reads, 1);
        assert_eq!(stats.frames_read, 6);
        let played = sink.played();
        assert_eq!(played.len(), 8);
        assert!(played[..6].iter().all(|&s| (s - 1000).abs() <= 1));
        assert_eq!(&played[6..], &[0, 0]);
    }

    #[test]
    fn test_taps_apply_across_segments() {
        // Impulse followed by silence, one feedforward echo 4 frames later
        let mut input = vec![0i16; 16];
        input[0] = 16384;
        let mut engine = engine(8, 2);
        engine.set_ff_delay(0, 4).unwrap();
        engine.set_ff_amplitude(0, 0.5).unwrap();
        let mut source = source(&input);
        let mut sink = MockSink::new(8, 4);

        run(&mut engine, &mut source, &mut sink).unwrap();

        let played = sink.played();
        assert_eq!(played.len(), 16);
        assert_eq!(played[0], 16384);
        assert_eq!(played[4], 8192);
        assert!(played.iter().enumerate().all(|(i, &s)| i == 0 || i == 4 || s == 0));
    }

    #[test]
    fn test_stop_flag_ends_playback_without_drain() {
        let input = [0i16; 64];
        let mut engine = engine(8, 2);
        let mut source = source(&input);
        let mut sink = MockSink::new(8, 4);
        let stop = Arc::new(AtomicBool::new(true));

        let stats = PlaybackScheduler::new(&mut engine, &mut source, &mut sink, stop)
            .with_poll_interval(Duration::ZERO)
            .run()
            .unwrap();

        assert_eq!(stats.end, PlaybackEnd::Stopped);
        assert_eq!(stats.segments_played, 0);
        assert_eq!(sink.events, vec!["start", "stop"]);
    }

    #[test]
    fn test_rejected_submit_is_a_sink_error() {
        let input = [0i16; 64];
        let mut engine = engine(8, 2);
        let mut source = source(&input);
        let mut sink = MockSink::new(8, 4);
        sink.reject_after = Some(3);

        let err = run(&mut engine, &mut source, &mut sink).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, PlaybackError::Sink(SinkError::Rejected { .. })));
    }

    #[test]
    fn test_shape_mismatch_is_rejected_before_playing() {
        let mut engine = engine(32, 2);
        let mut source = source(&[0; 8]);
        // 16 frame segments cannot fit an 8 frame sink
        let mut sink = MockSink::new(8, 4);

        let err = run(&mut engine, &mut source, &mut sink).unwrap_err();
        assert!(matches!(err, PlaybackError::Mismatch(_)));
        assert!(sink.submitted.is_empty());
    }

    #[test]
    fn test_uninitialized_engine_is_rejected() {
        let mut engine = DelayEngine::new(EngineTopology {
            frame_capacity: 8,
            segment_count: 2,
            channels: 1,
            ff_taps: 1,
            fb_taps: 1,
            min_capacity: 0,
        });
        let mut source = source(&[0; 8]);
        let mut sink = MockSink::new(8, 4);

        let err = run(&mut engine, &mut source, &mut sink).unwrap_err();
        assert!(matches!(err, PlaybackError::Engine(_)));
    }
}
