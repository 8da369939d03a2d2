//! Playback sessions: one dedicated thread owning the sink, the source and
//! the delay engine for the lifetime of a run.
//!
//! The control side gets a [`DelayControl`] handle for live retuning, a stop
//! flag, and a channel that reports how the run ended.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context};
use crossbeam_channel::{bounded, Receiver, Sender};
use rtdelay_shared::{
    DelayError, DelayPreset, DelayResult, EngineTopology, DEFAULT_CAPACITY_FRAMES,
    DEFAULT_FB_TAPS, DEFAULT_FF_TAPS, DEFAULT_SINK_BUFFER_FRAMES, MIN_SEGMENT_COUNT,
    RECOMMENDED_MIN_CAPACITY_FRAMES,
};

use crate::delay::DelayEngine;
use crate::export::WavFileSink;
use crate::params::DelayControl;
use crate::scheduler::{PlaybackScheduler, PlaybackStats};
use crate::sink::{segment_frames_for, AudioSink, CpalSink, SinkConfig};
use crate::source::{PcmSource, StreamInfo, WavSource};

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Default output device
    Device,
    /// Offline render into a WAV file
    WavFile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Requested delay history, truncated to whole segments
    pub frame_capacity: usize,
    pub ff_taps: usize,
    pub fb_taps: usize,
    /// Frames the sink buffers ahead of the device
    pub buffer_frames: usize,
    pub output: Output,
    /// Applied after the session resets all parameters
    pub preset: Option<DelayPreset>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_capacity: DEFAULT_CAPACITY_FRAMES,
            ff_taps: DEFAULT_FF_TAPS,
            fb_taps: DEFAULT_FB_TAPS,
            buffer_frames: DEFAULT_SINK_BUFFER_FRAMES,
            output: Output::Device,
            preset: None,
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Finished(PlaybackStats),
    /// Non-fatal failure after playback had started
    Failed(String),
}

/// Derive the engine topology from the sink buffer.
///
/// Segments are the largest power of two not above half the sink buffer;
/// the capacity is cut down to a whole number of them.
pub fn negotiate_topology(
    frame_capacity: usize,
    buffer_frames: usize,
    channels: usize,
    ff_taps: usize,
    fb_taps: usize,
) -> DelayResult<EngineTopology> {
    let segment_frames = segment_frames_for(buffer_frames).ok_or_else(|| {
        DelayError::InvalidTopology(format!("sink buffer of {buffer_frames} frames is too small"))
    })?;
    let segment_count = frame_capacity / segment_frames;
    if segment_count < MIN_SEGMENT_COUNT {
        return Err(DelayError::InvalidTopology(format!(
            "capacity of {frame_capacity} frames holds fewer than {MIN_SEGMENT_COUNT} segments of {segment_frames} frames"
        )));
    }

    let topology = EngineTopology {
        frame_capacity: segment_count * segment_frames,
        segment_count,
        channels,
        ff_taps,
        fb_taps,
        min_capacity: RECOMMENDED_MIN_CAPACITY_FRAMES,
    };
    if topology.frame_capacity != frame_capacity {
        log::warn!(
            "Delay capacity truncated from {} to {} frames ({} segments of {})",
            frame_capacity,
            topology.frame_capacity,
            segment_count,
            segment_frames
        );
    }
    topology.validate()?;
    Ok(topology)
}

struct Ready {
    control: DelayControl,
    topology: EngineTopology,
}

pub struct PlaybackSession {
    control: DelayControl,
    topology: EngineTopology,
    stream: StreamInfo,
    stop: Arc<AtomicBool>,
    events: Receiver<SessionEvent>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackSession {
    /// Open a WAV file and start playing it through a fresh delay engine.
    pub fn start<P: AsRef<Path>>(path: P, config: SessionConfig) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = WavSource::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Self::start_with_source(source, config)
    }

    /// Start a session on an already opened source.
    ///
    /// Returns once the sink is open and the engine initialized, so setup
    /// failures are reported here rather than on the event channel.
    pub fn start_with_source<S>(source: S, config: SessionConfig) -> anyhow::Result<Self>
    where
        S: PcmSource + Send + 'static,
    {
        let stream = *source.info();
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<Result<Ready, String>>(1);
        let (event_tx, event_rx) = bounded::<SessionEvent>(1);

        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("rtdelay-playback".into())
            .spawn(move || playback_thread(source, config, thread_stop, ready_tx, event_tx))
            .context("Failed to spawn playback thread")?;

        let ready = match ready_rx.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(msg)) => {
                let _ = handle.join();
                return Err(anyhow!(msg));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(anyhow!("Playback thread exited during setup"));
            }
        };

        log::info!(
            "Playback started: {} Hz, {} ch, {} bit, {} segments of {} frames",
            stream.sample_rate,
            stream.channels,
            stream.format.bits(),
            ready.topology.segment_count,
            ready.topology.segment_frames()
        );

        Ok(Self {
            control: ready.control,
            topology: ready.topology,
            stream,
            stop,
            events: event_rx,
            handle: Some(handle),
        })
    }

    pub fn control(&self) -> &DelayControl {
        &self.control
    }

    pub fn topology(&self) -> &EngineTopology {
        &self.topology
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.stream
    }

    /// Ask the playback thread to stop at the next segment boundary.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Receives exactly one event when the run ends.
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Block until the playback thread has torn everything down.
    pub fn wait(mut self) -> anyhow::Result<SessionEvent> {
        let event = self
            .events
            .recv()
            .map_err(|_| anyhow!("Playback thread exited without reporting"))?;
        self.join()?;
        Ok(event)
    }

    fn join(&mut self) -> anyhow::Result<()> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("Playback thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.join() {
            log::error!("{e}");
        }
    }
}

fn playback_thread<S: PcmSource>(
    source: S,
    config: SessionConfig,
    stop: Arc<AtomicBool>,
    ready_tx: Sender<Result<Ready, String>>,
    event_tx: Sender<SessionEvent>,
) {
    let info = *source.info();
    let sink_config = SinkConfig {
        sample_rate: info.sample_rate,
        channels: info.channels,
        format: info.format,
        buffer_frames: config.buffer_frames,
    };

    match &config.output {
        Output::Device => match CpalSink::open(sink_config) {
            Ok(sink) => drive(sink, source, &config, stop, ready_tx, event_tx),
            Err(e) => {
                let _ = ready_tx.send(Err(format!("Failed to open output device: {e}")));
            }
        },
        Output::WavFile(path) => match WavFileSink::create(path, sink_config) {
            Ok(sink) => drive(sink, source, &config, stop, ready_tx, event_tx),
            Err(e) => {
                let _ = ready_tx.send(Err(format!("Failed to create {}: {e}", path.display())));
            }
        },
    }
}

fn prepare_engine(config: &SessionConfig, sink: &SinkConfig) -> anyhow::Result<DelayEngine> {
    let topology = negotiate_topology(
        config.frame_capacity,
        sink.buffer_frames,
        sink.channels as usize,
        config.ff_taps,
        config.fb_taps,
    )
    .context("Failed to negotiate delay topology")?;

    let mut engine = DelayEngine::new(topology);
    if let Err(e) = engine.initialize() {
        if e.is_out_of_memory() {
            return Err(anyhow!("Out of memory allocating {} delay frames", topology.frame_capacity));
        }
        return Err(anyhow!(engine.last_error_message()));
    }

    engine.set_dry_input_amplitude(1.0)?;
    engine.set_output_amplitude(1.0)?;
    engine.reset_ff_params()?;
    engine.reset_fb_params()?;
    if let Some(preset) = &config.preset {
        engine
            .apply_preset(preset)
            .context("Failed to apply delay preset")?;
    }
    Ok(engine)
}

fn drive<K: AudioSink, S: PcmSource>(
    mut sink: K,
    mut source: S,
    config: &SessionConfig,
    stop: Arc<AtomicBool>,
    ready_tx: Sender<Result<Ready, String>>,
    event_tx: Sender<SessionEvent>,
) {
    let setup = prepare_engine(config, sink.config()).and_then(|engine| {
        let control = engine.control()?;
        Ok((engine, control))
    });
    let (mut engine, control) = match setup {
        Ok(ready) => ready,
        Err(e) => {
            let _ = sink.close();
            let _ = ready_tx.send(Err(format!("{e:#}")));
            return;
        }
    };

    let topology = *engine.topology();
    if ready_tx.send(Ok(Ready { control, topology })).is_err() {
        let _ = sink.close();
        return;
    }

    let result = PlaybackScheduler::new(&mut engine, &mut source, &mut sink, stop).run();
    let event = match result {
        Ok(stats) => match sink.close() {
            Ok(()) => SessionEvent::Finished(stats),
            Err(e) => fatal(&mut sink, &e),
        },
        Err(e) if e.is_fatal() => fatal(&mut sink, &e),
        Err(e) => {
            log::error!("Playback aborted: {e}");
            let _ = sink.stop();
            let _ = sink.close();
            SessionEvent::Failed(e.to_string())
        }
    };

    log::info!("Playback thread finished: {event:?}");
    let _ = event_tx.send(event);
}

/// Sink failures have no recovery path mid-stream: stop what we can and
/// take the process down.
fn fatal<K: AudioSink>(sink: &mut K, err: &dyn std::fmt::Display) -> ! {
    log::error!("Fatal audio sink error: {err}");
    let _ = sink.stop();
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_topology_truncates_capacity() {
        let topology = negotiate_topology(65536, 4096, 2, 4, 4).unwrap();
        assert_eq!(topology.segment_frames(), 2048);
        assert_eq!(topology.segment_count, 32);
        assert_eq!(topology.frame_capacity, 65536);

        let topology = negotiate_topology(5000, 3000, 1, 4, 4).unwrap();
        assert_eq!(topology.segment_frames(), 1024);
        assert_eq!(topology.segment_count, 4);
        assert_eq!(topology.frame_capacity, 4096);
    }

    #[test]
    fn test_negotiate_topology_needs_two_segments() {
        assert!(negotiate_topology(2047, 2048, 2, 4, 4).is_err());
        assert!(negotiate_topology(2048, 2048, 2, 4, 4).is_ok());
        assert!(negotiate_topology(4096, 1, 2, 4, 4).is_err());
        assert!(negotiate_topology(4096, 256, 0, 4, 4).is_err());
    }

    #[test]
    fn test_negotiate_topology_enforces_min_capacity() {
        // 15 segments of 8 frames, but only 120 frames of history
        let err = negotiate_topology(120, 16, 2, 4, 4).unwrap_err();
        assert!(err.to_string().contains("below the minimum of 128"));

        let topology = negotiate_topology(128, 16, 2, 4, 4).unwrap();
        assert_eq!(topology.min_capacity, 128);
        assert_eq!(topology.segment_count, 16);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.frame_capacity, 65536);
        assert_eq!(config.ff_taps, 4);
        assert_eq!(config.fb_taps, 4);
        assert_eq!(config.output, Output::Device);
    }
}
