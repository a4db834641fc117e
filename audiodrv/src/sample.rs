//! Sample buffers shared between callers and audio instances

use crate::error::{Error, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;

/// Sample storage: either raw integers or floating point values in [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    /// 32-bit signed integer samples, narrowed directly to the output width
    Int(Vec<i32>),
    /// 64-bit floating point samples
    Float(Vec<f64>),
}

impl Samples {
    /// Number of samples (all channels)
    pub fn len(&self) -> usize {
        match self {
            Samples::Int(v) => v.len(),
            Samples::Float(v) => v.len(),
        }
    }

    /// Whether there are no samples at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the samples are floating point
    pub fn is_float(&self) -> bool {
        matches!(self, Samples::Float(_))
    }

    /// Sample at `index` widened to `f64` (integers keep their raw value)
    pub fn value(&self, index: usize) -> Option<f64> {
        match self {
            Samples::Int(v) => v.get(index).map(|&s| s as f64),
            Samples::Float(v) => v.get(index).copied(),
        }
    }
}

/// Optional metadata attached to a buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SampleMeta {
    /// Sample rate in Hz
    pub rate: Option<u32>,
    /// Bit depth of the PCM representation the samples came from or should be stored as
    pub bits: Option<u16>,
}

/// A fixed-length sample buffer, mono or stereo.
///
/// Stereo buffers use the "2 rows" layout: samples are interleaved, so row
/// `r` column `c` lives at index `c * 2 + r`. Instances keep an
/// `Arc<SampleBuffer>` for as long as they run, and recorders write into the
/// buffer from the audio thread, hence the interior locking.
#[derive(Debug)]
pub struct SampleBuffer {
    data: RwLock<Samples>,
    rows: usize,
    meta: RwLock<SampleMeta>,
}

impl SampleBuffer {
    fn new(samples: Samples) -> Self {
        Self {
            data: RwLock::new(samples),
            rows: 1,
            meta: RwLock::new(SampleMeta::default()),
        }
    }

    /// Create a mono buffer of floating point samples
    pub fn from_f64(samples: Vec<f64>) -> Self {
        Self::new(Samples::Float(samples))
    }

    /// Create a mono buffer of integer samples
    pub fn from_i32(samples: Vec<i32>) -> Self {
        Self::new(Samples::Int(samples))
    }

    /// Create a silent floating point buffer, typically a recording target
    pub fn zeros(len: usize) -> Self {
        Self::from_f64(vec![0.0; len])
    }

    /// Set the row count (1 = mono, 2 = interleaved stereo)
    pub fn with_rows(mut self, rows: usize) -> Result<Self> {
        if rows != 1 && rows != 2 {
            return Err(Error::FormatUnsupported(format!(
                "{} rows, only mono and stereo buffers are supported",
                rows
            )));
        }
        let len = self.data.get_mut().len();
        if len % rows != 0 {
            return Err(Error::InvalidParameter(format!(
                "buffer of {} samples cannot be split into {} rows",
                len, rows
            )));
        }
        self.rows = rows;
        Ok(self)
    }

    /// Attach a sample rate
    pub fn with_rate(self, rate: u32) -> Self {
        self.meta.write().rate = Some(rate);
        self
    }

    /// Attach a bit depth
    pub fn with_bits(self, bits: u16) -> Self {
        self.meta.write().bits = Some(bits);
        self
    }

    /// Number of samples across all rows
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the buffer holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row count: 1 for mono, 2 for stereo
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Whether the buffer uses the 2-row stereo layout
    pub fn is_stereo(&self) -> bool {
        self.rows == 2
    }

    /// Samples per row, i.e. the frame count
    pub fn columns(&self) -> usize {
        self.len() / self.rows
    }

    /// Whether the buffer holds floating point samples
    pub fn is_float(&self) -> bool {
        self.data.read().is_float()
    }

    /// Attached metadata
    pub fn meta(&self) -> SampleMeta {
        *self.meta.read()
    }

    /// Attached sample rate, if any
    pub fn rate(&self) -> Option<u32> {
        self.meta.read().rate
    }

    /// Attached bit depth, if any
    pub fn bits(&self) -> Option<u16> {
        self.meta.read().bits
    }

    /// Replace the attached sample rate
    pub fn set_rate(&self, rate: u32) {
        self.meta.write().rate = Some(rate);
    }

    /// Replace the attached bit depth
    pub fn set_bits(&self, bits: u16) {
        self.meta.write().bits = Some(bits);
    }

    /// Read access to the samples
    pub fn read(&self) -> RwLockReadGuard<'_, Samples> {
        self.data.read()
    }

    /// Write access for recorders. The length must not change.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Samples> {
        self.data.write()
    }

    /// Sample at `row`, `column` widened to `f64`
    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        if row >= self.rows {
            return None;
        }
        self.data.read().value(column * self.rows + row)
    }

    /// Copy of all samples widened to `f64`
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &*self.data.read() {
            Samples::Int(v) => v.iter().map(|&s| s as f64).collect(),
            Samples::Float(v) => v.clone(),
        }
    }
}

impl Clone for SampleBuffer {
    fn clone(&self) -> Self {
        Self {
            data: RwLock::new(self.data.read().clone()),
            rows: self.rows,
            meta: RwLock::new(*self.meta.read()),
        }
    }
}
