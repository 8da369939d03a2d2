//! Push-style audio sinks.
//!
//! The scheduler pushes whole segments of interleaved integer samples and
//! paces itself with [`AudioSink::free_frames`]. [`CpalSink`] adapts that to
//! cpal's pull callback through a lock-free SPSC ring sized to the sink
//! buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::error::{SinkError, SinkResult};
use crate::pcm::PcmFormat;

/// Negotiated sink parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Integer domain of submitted samples
    pub format: PcmFormat,
    /// Frames the sink can hold ahead of the device
    pub buffer_frames: usize,
}

pub trait AudioSink {
    fn config(&self) -> &SinkConfig;

    /// Frames that can be submitted right now without rejection. Fails once
    /// the underlying device is gone.
    fn free_frames(&self) -> SinkResult<usize>;

    /// Enqueue interleaved samples. Never blocks; fails if they don't fit.
    fn submit(&mut self, samples: &[i32]) -> SinkResult<()>;

    /// Fill the whole free buffer with silence before starting.
    fn prime(&mut self) -> SinkResult<()> {
        let samples = self.free_frames()? * self.config().channels as usize;
        self.submit(&vec![0; samples])
    }

    fn start(&mut self) -> SinkResult<()>;

    fn stop(&mut self) -> SinkResult<()>;

    /// Release the device or flush the file. The sink is unusable afterwards.
    fn close(&mut self) -> SinkResult<()>;
}

/// Segment size for a sink buffer: the largest power of two not above half
/// of it. `None` if the buffer is smaller than two frames.
pub fn segment_frames_for(buffer_frames: usize) -> Option<usize> {
    let half = buffer_frames / 2;
    if half == 0 {
        None
    } else {
        Some(1 << half.ilog2())
    }
}

/// Default output device driven by cpal.
///
/// Holds a `cpal::Stream`, so it must be created and dropped on the thread
/// that drives it.
pub struct CpalSink {
    config: SinkConfig,
    stream: cpal::Stream,
    producer: HeapProd<i32>,
    device_lost: Arc<AtomicBool>,
}

impl CpalSink {
    /// Open the default output device at the requested rate and channel
    /// count, with room for `requested.buffer_frames` frames.
    pub fn open(requested: SinkConfig) -> SinkResult<Self> {
        if requested.buffer_frames == 0 || requested.channels == 0 {
            return Err(SinkError::Config(format!("invalid sink request {requested:?}")));
        }
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(SinkError::NoDevice)?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| SinkError::Config(e.to_string()))?
            .filter(|range| range.channels() == requested.channels)
            .filter_map(|range| range.try_with_sample_rate(requested.sample_rate))
            .max_by_key(|cfg| format_preference(cfg.sample_format()))
            .ok_or_else(|| {
                SinkError::Config(format!(
                    "device does not support {} channels at {} Hz",
                    requested.channels, requested.sample_rate
                ))
            })?;

        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.config();
        log::debug!(
            "Output stream config: {:?}, sample format {:?}",
            stream_config,
            sample_format
        );

        let samples = requested.buffer_frames * requested.channels as usize;
        let (producer, consumer) = HeapRb::<i32>::new(samples).split();
        let device_lost = Arc::new(AtomicBool::new(false));
        let scale = requested.format.scale();

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, consumer, scale, device_lost.clone())
            }
            cpal::SampleFormat::I32 => {
                build_stream::<i32>(&device, &stream_config, consumer, scale, device_lost.clone())
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, consumer, scale, device_lost.clone())
            }
            other => return Err(SinkError::UnsupportedFormat(format!("{other:?}"))),
        }?;

        // Streams may start running on creation on some hosts
        stream.pause().map_err(|e| SinkError::Play(e.to_string()))?;

        Ok(Self {
            config: requested,
            stream,
            producer,
            device_lost,
        })
    }
}

fn format_preference(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 3,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::I16 => 1,
        _ => 0,
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<i32>,
    scale: f32,
    device_lost: Arc<AtomicBool>,
) -> SinkResult<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let err_fn = move |err: cpal::StreamError| match err {
        cpal::StreamError::DeviceNotAvailable => {
            device_lost.store(true, Ordering::Release);
        }
        other => {
            let s = other.to_string();
            if !s.contains("underrun") && !s.contains("overrun") {
                log::warn!("Output stream error: {s}");
            }
        }
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for out in data.iter_mut() {
                    // Silence on underrun
                    let sample = consumer.try_pop().map_or(0.0, |s| s as f32 / scale);
                    *out = T::from_sample(sample);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| SinkError::Build(e.to_string()))
}

impl AudioSink for CpalSink {
    fn config(&self) -> &SinkConfig {
        &self.config
    }

    fn free_frames(&self) -> SinkResult<usize> {
        if self.device_lost.load(Ordering::Acquire) {
            return Err(SinkError::Play("output device is no longer available".into()));
        }
        Ok(self.producer.vacant_len() / self.config.channels as usize)
    }

    fn submit(&mut self, samples: &[i32]) -> SinkResult<()> {
        let channels = self.config.channels as usize;
        let free = self.free_frames()?;
        if samples.len() > free * channels {
            return Err(SinkError::Rejected {
                requested: samples.len() / channels,
                free,
            });
        }
        self.producer.push_slice(samples);
        Ok(())
    }

    fn start(&mut self) -> SinkResult<()> {
        self.stream.play().map_err(|e| SinkError::Play(e.to_string()))
    }

    fn stop(&mut self) -> SinkResult<()> {
        self.stream.pause().map_err(|e| SinkError::Play(e.to_string()))
    }

    fn close(&mut self) -> SinkResult<()> {
        self.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_frames_for() {
        assert_eq!(segment_frames_for(4096), Some(2048));
        assert_eq!(segment_frames_for(4095), Some(1024));
        assert_eq!(segment_frames_for(3000), Some(1024));
        assert_eq!(segment_frames_for(2), Some(1));
        assert_eq!(segment_frames_for(1), None);
        assert_eq!(segment_frames_for(0), None);
    }

    #[test]
    fn test_segment_is_power_of_two_within_half() {
        let mut rng = fastrand::Rng::with_seed(3);
        for _ in 0..1000 {
            let buffer = rng.usize(2..1 << 20);
            let seg = segment_frames_for(buffer).unwrap();
            assert!(seg.is_power_of_two());
            assert!(seg <= buffer / 2);
            assert!(seg * 2 > buffer / 2);
        }
    }

    struct CountingSink {
        config: SinkConfig,
        queued: usize,
    }

    impl AudioSink for CountingSink {
        fn config(&self) -> &SinkConfig {
            &self.config
        }
        fn free_frames(&self) -> SinkResult<usize> {
            Ok(self.config.buffer_frames - self.queued)
        }
        fn submit(&mut self, samples: &[i32]) -> SinkResult<()> {
            assert!(samples.iter().all(|&s| s == 0));
            self.queued += samples.len() / self.config.channels as usize;
            Ok(())
        }
        fn start(&mut self) -> SinkResult<()> {
            Ok(())
        }
        fn stop(&mut self) -> SinkResult<()> {
            Ok(())
        }
        fn close(&mut self) -> SinkResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_prime_fills_buffer_with_silence() {
        let mut sink = CountingSink {
            config: SinkConfig {
                sample_rate: 48000,
                channels: 2,
                format: PcmFormat::Bits16,
                buffer_frames: 256,
            },
            queued: 0,
        };
        sink.prime().unwrap();
        assert_eq!(sink.free_frames().unwrap(), 0);
    }
}
