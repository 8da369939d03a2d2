//! Offline render target.
//! Writes the processed stream to a WAV file without real-time pacing.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::{SinkError, SinkResult};
use crate::pcm::PcmFormat;
use crate::sink::{AudioSink, SinkConfig};

/// Sink that appends every submitted sample to a WAV file.
///
/// It always reports a full buffer free, so the scheduler never waits, and
/// it skips silence priming so the render starts at the first processed
/// segment.
pub struct WavFileSink<W: Write + Seek> {
    config: SinkConfig,
    writer: Option<WavWriter<W>>,
    frames_written: u64,
}

impl WavFileSink<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P, config: SinkConfig) -> SinkResult<Self> {
        let writer = WavWriter::create(path, wav_spec(&config))?;
        Ok(Self::from_writer(writer, config))
    }
}

impl<W: Write + Seek> WavFileSink<W> {
    pub fn new(inner: W, config: SinkConfig) -> SinkResult<Self> {
        let writer = WavWriter::new(inner, wav_spec(&config))?;
        Ok(Self::from_writer(writer, config))
    }

    fn from_writer(writer: WavWriter<W>, config: SinkConfig) -> Self {
        Self {
            config,
            writer: Some(writer),
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

fn wav_spec(config: &SinkConfig) -> WavSpec {
    WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: config.format.bits(),
        sample_format: SampleFormat::Int,
    }
}

impl<W: Write + Seek> AudioSink for WavFileSink<W> {
    fn config(&self) -> &SinkConfig {
        &self.config
    }

    fn free_frames(&self) -> SinkResult<usize> {
        Ok(self.config.buffer_frames)
    }

    fn submit(&mut self, samples: &[i32]) -> SinkResult<()> {
        let channels = self.config.channels as usize;
        if samples.len() > self.config.buffer_frames * channels {
            return Err(SinkError::Rejected {
                requested: samples.len() / channels,
                free: self.config.buffer_frames,
            });
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::Io("sink is closed".into()))?;

        match self.config.format {
            PcmFormat::Bits16 => {
                for &s in samples {
                    writer.write_sample(s as i16)?;
                }
            }
            PcmFormat::Bits24 => {
                for &s in samples {
                    writer.write_sample(s)?;
                }
            }
        }
        self.frames_written += (samples.len() / channels) as u64;
        Ok(())
    }

    fn prime(&mut self) -> SinkResult<()> {
        Ok(())
    }

    fn start(&mut self) -> SinkResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> SinkResult<()> {
        Ok(())
    }

    fn close(&mut self) -> SinkResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn config(format: PcmFormat) -> SinkConfig {
        SinkConfig {
            sample_rate: 22050,
            channels: 2,
            format,
            buffer_frames: 8,
        }
    }

    #[test]
    fn test_written_file_reads_back() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut sink = WavFileSink::new(&mut cursor, config(PcmFormat::Bits24)).unwrap();
            sink.prime().unwrap();
            sink.start().unwrap();
            sink.submit(&[1, -1, 8388607, -8388607]).unwrap();
            assert_eq!(sink.free_frames().unwrap(), 8);
            assert_eq!(sink.frames_written(), 2);
            sink.close().unwrap();
            assert!(sink.submit(&[0, 0]).is_err());
        }

        cursor.set_position(0);
        let reader = hound::WavReader::new(cursor).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 24);
        assert_eq!(reader.spec().sample_rate, 22050);
        let samples: Vec<i32> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -1, 8388607, -8388607]);
    }

    #[test]
    fn test_rejects_oversized_submit() {
        let mut sink = WavFileSink::new(Cursor::new(Vec::new()), config(PcmFormat::Bits16)).unwrap();
        let err = sink.submit(&[0; 18]).unwrap_err();
        assert!(matches!(err, SinkError::Rejected { requested: 9, free: 8 }));
    }
}
