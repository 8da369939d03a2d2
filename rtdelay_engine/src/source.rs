//! Seekable PCM sources.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{PcmError, PcmResult};
use crate::pcm::PcmFormat;

/// Stream parameters and payload location resolved from a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: PcmFormat,
    /// Byte offset of the first sample
    pub data_begin: u64,
    /// Byte offset one past the last sample
    pub data_end: u64,
}

impl StreamInfo {
    pub fn frame_bytes(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    pub fn total_frames(&self) -> u64 {
        (self.data_end - self.data_begin) / self.frame_bytes() as u64
    }
}

/// Random access reader over raw interleaved PCM bytes.
pub trait PcmSource {
    fn info(&self) -> &StreamInfo;

    /// Read up to `buf.len()` bytes starting at absolute byte offset `pos`,
    /// never past `data_end`. A short count means the payload ended.
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> io::Result<usize>;
}

/// RIFF/WAVE file holding 16 or 24 bit integer PCM.
pub struct WavSource<R> {
    reader: R,
    info: StreamInfo,
}

impl WavSource<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> PcmResult<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> WavSource<R> {
    /// Parse the header and leave `reader` positioned at the payload.
    pub fn new(mut reader: R) -> PcmResult<Self> {
        hound::read_wave_header(&mut reader)?;
        let (spec_ex, data_len) = hound::read_until_data(&mut reader)?;
        let spec = spec_ex.spec;
        if spec.sample_format != hound::SampleFormat::Int {
            return Err(PcmError::UnsupportedFormat(
                "floating point samples (expected integer PCM)".into(),
            ));
        }
        let format = PcmFormat::from_bits(spec.bits_per_sample)?;
        let container = spec_ex.bytes_per_sample as usize;
        if container != format.bytes_per_sample() {
            return Err(PcmError::UnsupportedFormat(format!(
                "{}-bit samples in {container}-byte containers",
                spec.bits_per_sample
            )));
        }

        let data_begin = reader.stream_position()?;
        let data_end = data_begin + data_len as u64;

        Ok(Self {
            reader,
            info: StreamInfo {
                sample_rate: spec.sample_rate,
                channels: spec.channels,
                format,
                data_begin,
                data_end,
            },
        })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> PcmSource for WavSource<R> {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        if pos >= self.info.data_end {
            return Ok(0);
        }
        let available = (self.info.data_end - pos).min(buf.len() as u64) as usize;
        let buf = &mut buf[..available];

        self.reader.seek(SeekFrom::Start(pos))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}
