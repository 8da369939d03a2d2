//! Integer PCM <-> normalized float conversion.
//!
//! Decoding divides by the full-scale magnitude (32768 / 8388608) so that
//! negative full scale maps to exactly -1.0. Encoding clamps to [-1, 1] and
//! scales by one less, so +1.0 never overflows.

use crate::error::{PcmError, PcmResult};

/// Supported integer sample layouts, little-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    Bits16,
    Bits24,
}

impl PcmFormat {
    pub fn from_bits(bits: u16) -> PcmResult<Self> {
        match bits {
            16 => Ok(PcmFormat::Bits16),
            24 => Ok(PcmFormat::Bits24),
            other => Err(PcmError::UnsupportedFormat(format!(
                "{other} bits per sample (expected 16 or 24)"
            ))),
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            PcmFormat::Bits16 => 16,
            PcmFormat::Bits24 => 24,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            PcmFormat::Bits16 => 2,
            PcmFormat::Bits24 => 3,
        }
    }

    /// Full-scale magnitude, 2^(bits-1)
    pub fn scale(self) -> f32 {
        match self {
            PcmFormat::Bits16 => 32768.0,
            PcmFormat::Bits24 => 8388608.0,
        }
    }

    /// Conversion functions for this format, chosen once per stream.
    pub fn codec(self) -> PcmCodec {
        match self {
            PcmFormat::Bits16 => PcmCodec {
                format: self,
                decode: decode_i16,
                encode: encode_i16,
            },
            PcmFormat::Bits24 => PcmCodec {
                format: self,
                decode: decode_i24,
                encode: encode_i24,
            },
        }
    }
}

/// Fixed pair of conversion routines for one [`PcmFormat`].
#[derive(Clone, Copy)]
pub struct PcmCodec {
    pub format: PcmFormat,
    /// Raw little-endian bytes into floats. Samples not covered by the
    /// bytes are zero filled. Returns the number of samples decoded.
    pub decode: fn(&[u8], &mut [f32]) -> usize,
    /// Floats into integer samples in the format's range.
    pub encode: fn(&[f32], &mut [i32]),
}

impl PcmCodec {
    #[inline]
    pub fn decode(&self, bytes: &[u8], out: &mut [f32]) -> usize {
        (self.decode)(bytes, out)
    }

    #[inline]
    pub fn encode(&self, samples: &[f32], out: &mut [i32]) {
        (self.encode)(samples, out)
    }
}

fn decode_i16(bytes: &[u8], out: &mut [f32]) -> usize {
    let scale = PcmFormat::Bits16.scale();
    let mut decoded = 0;
    for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *dst = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / scale;
        decoded += 1;
    }
    out[decoded..].fill(0.0);
    decoded
}

fn decode_i24(bytes: &[u8], out: &mut [f32]) -> usize {
    let scale = PcmFormat::Bits24.scale();
    let mut decoded = 0;
    for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(3)) {
        // Place in the top 24 bits, then shift back down to sign extend
        let value = i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8;
        *dst = value as f32 / scale;
        decoded += 1;
    }
    out[decoded..].fill(0.0);
    decoded
}

#[inline]
fn quantize(sample: f32, max: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) * max).round() as i32
}

fn encode_i16(samples: &[f32], out: &mut [i32]) {
    let max = PcmFormat::Bits16.scale() - 1.0;
    for (dst, &s) in out.iter_mut().zip(samples) {
        *dst = quantize(s, max);
    }
}

fn encode_i24(samples: &[f32], out: &mut [i32]) {
    let max = PcmFormat::Bits24.scale() - 1.0;
    for (dst, &s) in out.iter_mut().zip(samples) {
        *dst = quantize(s, max);
    }
}
