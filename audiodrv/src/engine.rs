//! Streaming buffer engine.
//!
//! Turns an in-memory [`Samples`] buffer into a sequence of fixed-size
//! hardware buffers for playback, and folds incoming hardware frames back into
//! a buffer for recording. Cursor state is kept in atomics so the control
//! thread and the backend's delivery thread can share one cursor through an
//! `Arc` without locking.

use crate::format::PcmSample;
use crate::sample::Samples;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Result of priming one hardware buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primed {
    /// This many frames were written to the front of the output
    Frames(usize),
    /// Nothing left to play; the cursor is now marked done
    Finished,
}

/// Playback position over a source buffer
#[derive(Debug)]
pub struct PlaybackCursor {
    position: AtomicUsize,
    length: usize,
    channels: usize,
    looping: AtomicBool,
    done: AtomicBool,
}

impl PlaybackCursor {
    /// Create a cursor over `frames` frames of `channels` interleaved samples
    pub fn new(frames: usize, channels: usize, looping: bool) -> Self {
        Self {
            position: AtomicUsize::new(0),
            length: frames,
            channels: channels.max(1),
            looping: AtomicBool::new(looping),
            done: AtomicBool::new(false),
        }
    }

    /// Current frame index
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    /// Total frame count
    pub fn length(&self) -> usize {
        self.length
    }

    /// Samples per frame
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Whether playback has run out of frames
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Force the done flag, e.g. on close
    pub fn set_done(&self, done: bool) {
        self.done.store(done, Ordering::Release);
    }

    /// Whether the cursor wraps at the end
    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    /// Move back to the first frame. The done flag is left alone.
    pub fn rewind(&self) {
        self.position.store(0, Ordering::Release);
    }

    /// Fill the front of `out` with the next frames of `source`.
    ///
    /// The capacity is `out.len() / channels` frames. A capacity of zero is
    /// not exhaustion and returns `Frames(0)` with the done flag untouched.
    /// At the end of the source a looping cursor restarts at frame 0, any
    /// other cursor reports [`Primed::Finished`].
    pub fn prime<T: PcmSample>(&self, source: &Samples, out: &mut [T]) -> Primed {
        let capacity = out.len() / self.channels;
        if capacity == 0 {
            return Primed::Frames(0);
        }

        let mut pos = self.position.load(Ordering::Acquire);
        if pos >= self.length && self.is_looping() {
            pos = 0;
        }

        let to_fill = self.length.saturating_sub(pos).min(capacity);
        let start = pos * self.channels;
        let count = to_fill * self.channels;
        let written = match source {
            Samples::Int(v) => v.get(start..start + count).map(|src| {
                for (o, &s) in out.iter_mut().zip(src) {
                    *o = T::from_int(s);
                }
            }),
            Samples::Float(v) => v.get(start..start + count).map(|src| {
                for (o, &s) in out.iter_mut().zip(src) {
                    *o = T::from_float(s);
                }
            }),
        };

        if to_fill == 0 || written.is_none() {
            self.position.store(pos.min(self.length), Ordering::Release);
            self.set_done(true);
            return Primed::Finished;
        }

        self.position.store(pos + to_fill, Ordering::Release);
        Primed::Frames(to_fill)
    }

    /// Prime repeatedly until `out` is full or the source is exhausted,
    /// then pad with silence. Returns the number of frames taken from the
    /// source.
    pub fn fill<T: PcmSample>(&self, source: &Samples, out: &mut [T]) -> usize {
        let mut offset = 0;
        let mut frames = 0;
        while offset < out.len() {
            match self.prime(source, &mut out[offset..]) {
                Primed::Frames(0) | Primed::Finished => break,
                Primed::Frames(n) => {
                    offset += n * self.channels;
                    frames += n;
                }
            }
        }
        out[offset..].fill(T::SILENCE);
        frames
    }
}

/// Nearest-frame sample rate adaptation for recording.
///
/// Every input frame adds `requested / native` to an accumulator and one
/// output frame is emitted per whole unit accumulated, so frames are dropped
/// when downsampling and repeated when upsampling. This is not a bandlimited
/// resampler; aliasing is expected.
#[derive(Debug, Clone)]
pub struct Resampler {
    ratio: f64,
    acc: f64,
}

impl Resampler {
    /// Adapt from the device's `native` rate to the `requested` rate
    pub fn new(native: u32, requested: u32) -> Self {
        let ratio = if native == 0 {
            1.0
        } else {
            requested as f64 / native as f64
        };
        Self { ratio, acc: 0.0 }
    }

    /// Output frames per input frame
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Drop any accumulated fraction
    pub fn reset(&mut self) {
        self.acc = 0.0;
    }

    /// Advance by one input frame, returning how many output frames it yields
    fn step(&mut self) -> usize {
        self.acc += self.ratio;
        let whole = self.acc.floor();
        self.acc -= whole;
        whole as usize
    }
}

/// Result of folding one input block into the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Captured {
    /// The destination still has room
    Continue,
    /// The destination is full; the cursor is now marked done
    Full,
}

/// Recording position in a destination buffer
#[derive(Debug)]
pub struct CaptureCursor {
    position: AtomicUsize,
    length: usize,
    channels: usize,
    done: AtomicBool,
}

impl CaptureCursor {
    /// Create a cursor over a destination of `frames` frames of `channels` samples
    pub fn new(frames: usize, channels: usize) -> Self {
        Self {
            position: AtomicUsize::new(0),
            length: frames,
            channels: channels.max(1),
            done: AtomicBool::new(false),
        }
    }

    /// Frames recorded so far
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    /// Destination size in frames
    pub fn length(&self) -> usize {
        self.length
    }

    /// Samples per destination frame
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Whether the destination is full or recording was stopped
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Force the done flag
    pub fn set_done(&self, done: bool) {
        self.done.store(done, Ordering::Release);
    }

    /// Start writing at the first frame again
    pub fn rewind(&self) {
        self.position.store(0, Ordering::Release);
    }

    /// Append interleaved `input` frames with `input_channels` samples each.
    ///
    /// A mono destination fed with multi-channel input gets the mean of the
    /// first two channels. Otherwise destination channel `c` takes input
    /// channel `c`, or the last input channel when there are fewer. Input
    /// beyond the end of the destination is discarded.
    pub fn capture<T: PcmSample>(
        &self,
        resampler: &mut Resampler,
        input: &[T],
        input_channels: usize,
        target: &mut Samples,
    ) -> Captured {
        if self.is_done() {
            return Captured::Full;
        }

        let input_channels = input_channels.max(1);
        let mut pos = self.position.load(Ordering::Acquire);

        for frame in input.chunks_exact(input_channels) {
            for _ in 0..resampler.step() {
                if pos >= self.length {
                    return self.finish(pos);
                }
                for ch in 0..self.channels {
                    let x = if self.channels == 1 && input_channels >= 2 {
                        (frame[0].to_float() + frame[1].to_float()) * 0.5
                    } else {
                        frame[ch.min(input_channels - 1)].to_float()
                    };
                    let index = pos * self.channels + ch;
                    match target {
                        Samples::Float(v) => {
                            if let Some(slot) = v.get_mut(index) {
                                *slot = x;
                            }
                        }
                        Samples::Int(v) => {
                            if let Some(slot) = v.get_mut(index) {
                                *slot = i16::from_float(x) as i32;
                            }
                        }
                    }
                }
                pos += 1;
            }
        }

        if pos >= self.length {
            return self.finish(pos);
        }
        self.position.store(pos, Ordering::Release);
        Captured::Continue
    }

    fn finish(&self, pos: usize) -> Captured {
        self.position.store(pos.min(self.length), Ordering::Release);
        self.set_done(true);
        Captured::Full
    }
}
