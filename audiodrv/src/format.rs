//! Sample format conversion between host samples and fixed-width PCM

use crate::error::{Error, Result};

/// A hardware sample type the streaming engine can produce and consume
pub trait PcmSample: Copy + Send + 'static {
    /// Silence
    const SILENCE: Self;

    /// Convert a floating point host sample
    fn from_float(x: f64) -> Self;

    /// Convert an integer host sample
    fn from_int(v: i32) -> Self;

    /// Convert back to a floating point host sample
    fn to_float(self) -> f64;
}

impl PcmSample for i16 {
    const SILENCE: Self = 0;

    /// Rounds toward zero and saturates out-of-range values.
    fn from_float(x: f64) -> Self {
        (x * 32767.0) as i16
    }

    /// Narrows by truncation, keeping the low 16 bits.
    fn from_int(v: i32) -> Self {
        v as i16
    }

    fn to_float(self) -> f64 {
        self as f64 / 32768.0
    }
}

impl PcmSample for f32 {
    const SILENCE: Self = 0.0;

    fn from_float(x: f64) -> Self {
        x as f32
    }

    fn from_int(v: i32) -> Self {
        (v as f64 / 32768.0) as f32
    }

    fn to_float(self) -> f64 {
        self as f64
    }
}

/// PCM bit depths supported by the WAVE codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    /// Signed 8-bit
    Eight,
    /// Signed 16-bit little endian
    Sixteen,
    /// Signed 32-bit little endian
    ThirtyTwo,
}

impl BitDepth {
    /// Map a bits-per-sample value
    pub fn from_bits(bits: u16) -> Result<Self> {
        match bits {
            8 => Ok(BitDepth::Eight),
            16 => Ok(BitDepth::Sixteen),
            32 => Ok(BitDepth::ThirtyTwo),
            other => Err(Error::FormatUnsupported(format!(
                "unsupported sample width: {} bits",
                other
            ))),
        }
    }

    /// Bits per sample
    pub fn bits(self) -> u16 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
            BitDepth::ThirtyTwo => 32,
        }
    }

    /// Bytes per sample
    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Largest positive PCM value, the encode scale
    pub fn max_magnitude(self) -> f64 {
        match self {
            BitDepth::Eight => i8::MAX as f64,
            BitDepth::Sixteen => i16::MAX as f64,
            BitDepth::ThirtyTwo => i32::MAX as f64,
        }
    }

    /// Decode one little-endian sample. `bytes` must hold exactly `self.bytes()` bytes.
    pub fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            BitDepth::Eight => decode_i8(bytes[0] as i8),
            BitDepth::Sixteen => decode_i16(i16::from_le_bytes([bytes[0], bytes[1]])),
            BitDepth::ThirtyTwo => {
                decode_i32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        }
    }

    /// Append one little-endian encoded sample to `out`
    pub fn encode(self, x: f64, out: &mut Vec<u8>) {
        let scaled = (x * self.max_magnitude()).round();
        match self {
            BitDepth::Eight => out.push(scaled as i8 as u8),
            BitDepth::Sixteen => out.extend_from_slice(&(scaled as i16).to_le_bytes()),
            BitDepth::ThirtyTwo => out.extend_from_slice(&(scaled as i32).to_le_bytes()),
        }
    }
}

// Negative and positive halves use different divisors, so decode is not the
// exact inverse of encode at the extremes.

/// 8-bit PCM to float
pub fn decode_i8(v: i8) -> f64 {
    if v < 0 {
        v as f64 / 127.0
    } else {
        v as f64 / 128.0
    }
}

/// 16-bit PCM to float
pub fn decode_i16(v: i16) -> f64 {
    if v < 0 {
        v as f64 / 32767.0
    } else {
        v as f64 / 32768.0
    }
}

/// 32-bit PCM to float
pub fn decode_i32(v: i32) -> f64 {
    if v < 0 {
        v as f64 / 2147483647.0
    } else {
        v as f64 / 2147483648.0
    }
}
