//! Audio driver contract.
//!
//! A driver identifies a backend and creates instances bound to a sample
//! buffer. Every backend, built in or loaded from a module, implements
//! [`AudioDriver`] and hands out boxed [`DriverInstance`]s that the
//! [`AudioInstance`](crate::instance::AudioInstance) lifecycle wraps.

use crate::error::{Error, Result};
use crate::sample::SampleBuffer;
use serde::Serialize;
use std::sync::Arc;

/// Lowest accepted sample rate
pub const MIN_RATE: u32 = 1000;
/// Highest accepted sample rate
pub const MAX_RATE: u32 = 384_000;
/// Sample rate used when neither the caller nor the buffer names one
pub const DEFAULT_RATE: u32 = 44100;

/// An audio backend
pub trait AudioDriver: Send + Sync {
    /// Short unique name used for selection
    fn name(&self) -> &str;

    /// Human readable description
    fn description(&self) -> &str;

    /// Copyright notice
    fn copyright(&self) -> &str;

    /// Create a player for `buffer`
    fn create_player(
        &self,
        buffer: Arc<SampleBuffer>,
        options: &PlayerOptions,
    ) -> Result<Box<dyn DriverInstance>>;

    /// Whether [`create_recorder`](Self::create_recorder) is implemented
    fn supports_recording(&self) -> bool {
        false
    }

    /// Create a recorder writing into `buffer`
    fn create_recorder(
        &self,
        _buffer: Arc<SampleBuffer>,
        _options: &RecorderOptions,
    ) -> Result<Box<dyn DriverInstance>> {
        Err(Error::UnsupportedOperation(format!(
            "driver '{}' doesn't support recording",
            self.name()
        )))
    }
}

/// Backend side of an open player or recorder.
///
/// Lifecycle ordering is enforced by [`AudioInstance`](crate::instance::AudioInstance);
/// implementations only perform the native work. `start` on a stream that
/// has finished must play or record again from the first frame.
pub trait DriverInstance: Send {
    /// Begin delivering frames
    fn start(&mut self) -> Result<()>;

    /// Stop delivery, keeping native resources
    fn pause(&mut self) -> Result<()>;

    /// Continue after a pause
    fn resume(&mut self) -> Result<()>;

    /// Move the cursor back to the first frame
    fn rewind(&mut self) -> Result<()>;

    /// Whether the stream has finished or was closed.
    ///
    /// A native failure is reported here as an error rather than as a
    /// finished stream.
    fn poll_done(&self) -> Result<bool>;

    /// Current frame index
    fn position(&self) -> usize;

    /// Stop and release native handles. Called at most once per instance.
    fn close(&mut self) -> Result<()>;

    /// Release backend memory
    fn dispose(self: Box<Self>) {}
}

/// Player or recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    /// Plays a buffer
    Player,
    /// Records into a buffer
    Recorder,
}

/// Outcome of waiting on an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStatus {
    /// The stream finished
    Done,
    /// The timeout elapsed first
    TimedOut,
}

/// Options for creating a player
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerOptions {
    /// Playback rate in Hz; the buffer's rate, then 44100, when absent or not positive
    pub rate: Option<f64>,
    /// Restart at the first frame instead of finishing
    pub looping: bool,
}

impl PlayerOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the playback rate
    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Enable or disable looping
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

/// Options for creating a recorder
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderOptions {
    /// Recording rate in Hz; 44100 when absent or not positive
    pub rate: Option<f64>,
    /// 1 or 2; other values are coerced into that range
    pub channels: usize,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            rate: None,
            channels: 1,
        }
    }
}

impl RecorderOptions {
    /// Default options: mono, default rate
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recording rate
    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Set the channel count
    pub fn channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }
}

/// Clamp a requested rate, falling back when it is absent, NaN or not positive
pub fn resolve_rate(requested: Option<f64>, fallback: u32) -> u32 {
    match requested {
        Some(r) if r > 0.0 => (r.round() as u32).clamp(MIN_RATE, MAX_RATE),
        _ => fallback.clamp(MIN_RATE, MAX_RATE),
    }
}

/// Stream shape derived from a buffer and creation options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Sample rate in Hz
    pub rate: u32,
    /// Interleaved channels, 1 or 2
    pub channels: usize,
    /// Frames in the buffer
    pub frames: usize,
    /// Whether playback loops
    pub looping: bool,
}

impl StreamParams {
    /// Shape of a player: stereo iff the buffer has 2 rows
    pub fn player(buffer: &SampleBuffer, options: &PlayerOptions) -> Self {
        let channels = if buffer.is_stereo() { 2 } else { 1 };
        Self {
            rate: resolve_rate(options.rate, buffer.rate().unwrap_or(DEFAULT_RATE)),
            channels,
            frames: buffer.len() / channels,
            looping: options.looping,
        }
    }

    /// Shape of a recorder: stereo iff 2 channels were requested
    pub fn recorder(buffer: &SampleBuffer, options: &RecorderOptions) -> Self {
        let channels = options.channels.clamp(1, 2);
        Self {
            rate: resolve_rate(options.rate, DEFAULT_RATE),
            channels,
            frames: buffer.len() / channels,
            looping: false,
        }
    }
}
