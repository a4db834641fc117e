//! Buffer-queue backend.
//!
//! Models output APIs that play a small ring of fixed-size buffers in order
//! and hand each one back when it has been consumed. Returned buffers must
//! not be refilled from the device's completion context, so every refill
//! (and every captured input buffer) goes through a feeder worker owned by
//! the driver and reached over a bounded channel.
//!
//! The device itself is a [`PcmSink`] (or [`PcmSource`] for recording)
//! created per instance from a factory, which makes the backend usable with
//! any blocking PCM endpoint. [`QueueDriver::null`] discards output at the
//! real-time rate and records silence.

use crate::{
    driver::{AudioDriver, DriverInstance, PlayerOptions, RecorderOptions, StreamParams},
    engine::{CaptureCursor, PlaybackCursor, Primed, Resampler},
    error::{Error, Result},
    format::BitDepth,
    sample::SampleBuffer,
    wave::WaveFormat,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Buffers per instance
pub const DEFAULT_BUFFERS: usize = 3;
/// Bytes per buffer
pub const DEFAULT_BUFFER_BYTES: usize = 4096;

const FEEDER_QUEUE: usize = 64;
const POLL: Duration = Duration::from_millis(5);

/// Blocking 16-bit PCM output endpoint
pub trait PcmSink: Send {
    /// Consume interleaved samples
    fn write(&mut self, samples: &[i16]) -> Result<()>;
}

impl<F> PcmSink for F
where
    F: FnMut(&[i16]) -> Result<()> + Send,
{
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        self(samples)
    }
}

/// Blocking 16-bit PCM input endpoint
pub trait PcmSource: Send {
    /// Fill `out` with interleaved samples, returning how many were written
    fn read(&mut self, out: &mut [i16]) -> Result<usize>;
}

impl<F> PcmSource for F
where
    F: FnMut(&mut [i16]) -> Result<usize> + Send,
{
    fn read(&mut self, out: &mut [i16]) -> Result<usize> {
        self(out)
    }
}

/// Sink that drops everything
pub struct NullSink;

impl PcmSink for NullSink {
    fn write(&mut self, _samples: &[i16]) -> Result<()> {
        Ok(())
    }
}

/// Source that yields silence
pub struct SilenceSource;

impl PcmSource for SilenceSource {
    fn read(&mut self, out: &mut [i16]) -> Result<usize> {
        out.fill(0);
        Ok(out.len())
    }
}

type SinkFactory = Arc<dyn Fn(&WaveFormat) -> Result<Box<dyn PcmSink>> + Send + Sync>;
type SourceFactory = Arc<dyn Fn(&WaveFormat) -> Result<Box<dyn PcmSource>> + Send + Sync>;

struct Block {
    samples: Vec<i16>,
    frames: usize,
}

enum FeederJob {
    Refill(Arc<PlayerShared>, Block),
    Capture(Arc<RecorderShared>, Block),
}

fn run_feeder(jobs: Receiver<FeederJob>) {
    for job in jobs.iter() {
        match job {
            FeederJob::Refill(player, block) => player.refill(block),
            FeederJob::Capture(recorder, block) => recorder.absorb(block),
        }
    }
    log::debug!("feeder stopped");
}

/// Driver over a ring of fixed-size PCM buffers
pub struct QueueDriver {
    name: String,
    description: String,
    copyright: String,
    buffers: usize,
    buffer_bytes: usize,
    realtime: bool,
    sink: SinkFactory,
    source: Option<SourceFactory>,
    feeder: Mutex<Option<Sender<FeederJob>>>,
}

impl QueueDriver {
    /// Start configuring a driver whose output goes to sinks made by `sink`
    pub fn builder<F>(name: impl Into<String>, sink: F) -> QueueDriverBuilder
    where
        F: Fn(&WaveFormat) -> Result<Box<dyn PcmSink>> + Send + Sync + 'static,
    {
        let name = name.into();
        QueueDriverBuilder {
            description: format!("{} buffer queue driver", name),
            name,
            copyright: String::new(),
            buffers: DEFAULT_BUFFERS,
            buffer_bytes: DEFAULT_BUFFER_BYTES,
            realtime: false,
            sink: Arc::new(sink),
            source: None,
        }
    }

    /// Output device that discards audio at the real-time rate and records silence
    pub fn null() -> Self {
        Self::builder("null", |_: &WaveFormat| Ok(Box::new(NullSink) as Box<dyn PcmSink>))
            .description("Null audio device")
            .source(|_: &WaveFormat| Ok(Box::new(SilenceSource) as Box<dyn PcmSource>))
            .realtime(true)
            .build()
    }

    /// Buffers per instance
    pub fn buffer_count(&self) -> usize {
        self.buffers
    }

    /// Bytes per buffer
    pub fn buffer_bytes(&self) -> usize {
        self.buffer_bytes
    }

    fn feeder(&self) -> Result<Sender<FeederJob>> {
        let mut feeder = self.feeder.lock();
        if let Some(tx) = feeder.as_ref() {
            return Ok(tx.clone());
        }
        let (tx, rx) = bounded::<FeederJob>(FEEDER_QUEUE);
        thread::Builder::new()
            .name(format!("{}-feeder", self.name))
            .spawn(move || run_feeder(rx))?;
        *feeder = Some(tx.clone());
        Ok(tx)
    }

    fn blocks(&self) -> Vec<Block> {
        let samples = self.buffer_bytes / 2;
        (0..self.buffers)
            .map(|_| Block {
                samples: vec![0; samples],
                frames: 0,
            })
            .collect()
    }

    fn pacing(&self, rate: u32) -> Option<u32> {
        self.realtime.then_some(rate)
    }
}

/// Configuration for a [`QueueDriver`]
pub struct QueueDriverBuilder {
    name: String,
    description: String,
    copyright: String,
    buffers: usize,
    buffer_bytes: usize,
    realtime: bool,
    sink: SinkFactory,
    source: Option<SourceFactory>,
}

impl QueueDriverBuilder {
    /// Set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the copyright notice
    pub fn copyright(mut self, copyright: impl Into<String>) -> Self {
        self.copyright = copyright.into();
        self
    }

    /// Buffer count and size. Sizes are rounded down to whole stereo frames.
    pub fn buffers(mut self, count: usize, bytes: usize) -> Self {
        self.buffers = count.max(1);
        self.buffer_bytes = (bytes - bytes % 4).max(4);
        self
    }

    /// Sleep for the duration of each buffer after writing it, as a device would
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Enable recording from sources made by `source`
    pub fn source<F>(mut self, source: F) -> Self
    where
        F: Fn(&WaveFormat) -> Result<Box<dyn PcmSource>> + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Build the driver
    pub fn build(self) -> QueueDriver {
        QueueDriver {
            name: self.name,
            description: self.description,
            copyright: self.copyright,
            buffers: self.buffers,
            buffer_bytes: self.buffer_bytes,
            realtime: self.realtime,
            sink: self.sink,
            source: self.source,
            feeder: Mutex::new(None),
        }
    }
}

fn pace(rate: Option<u32>, frames: usize) {
    if let Some(rate) = rate {
        thread::sleep(Duration::from_secs_f64(frames as f64 / rate.max(1) as f64));
    }
}

struct PlayerShared {
    buffer: Arc<SampleBuffer>,
    cursor: PlaybackCursor,
    paused: AtomicBool,
    closed: AtomicBool,
    queued: AtomicUsize,
    idle: Mutex<Vec<Block>>,
    device: Sender<Block>,
    error: Mutex<Option<String>>,
}

impl PlayerShared {
    /// Prime a returned buffer and queue it, or park it when there is
    /// nothing to play or delivery is paused. Runs on the feeder.
    fn refill(&self, mut block: Block) {
        if self.closed.load(Ordering::Acquire) || self.paused.load(Ordering::Acquire) {
            self.park(block);
            return;
        }
        let primed = {
            let samples = self.buffer.read();
            self.cursor.prime(&samples, &mut block.samples)
        };
        match primed {
            Primed::Frames(n) if n > 0 => {
                block.frames = n;
                if let Err(e) = self.device.send(block) {
                    self.park(e.into_inner());
                }
            }
            _ => self.park(block),
        }
    }

    fn park(&self, block: Block) {
        self.idle.lock().push(block);
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }

    fn fail(&self, message: String) {
        log::error!("{}", message);
        *self.error.lock() = Some(message);
        self.cursor.set_done(true);
    }

    fn check(&self) -> Result<()> {
        match self.error.lock().as_ref() {
            Some(message) => Err(Error::Backend(message.clone())),
            None => Ok(()),
        }
    }

    fn poll_done(&self) -> Result<bool> {
        // load before checking: a failure is recorded before the cursor is marked done
        let done = self.closed.load(Ordering::Acquire)
            || (self.cursor.is_done() && self.queued.load(Ordering::Acquire) == 0);
        self.check()?;
        Ok(done)
    }
}

fn run_player_device(
    shared: Arc<PlayerShared>,
    blocks: Receiver<Block>,
    mut sink: Box<dyn PcmSink>,
    feeder: Sender<FeederJob>,
    pacing: Option<u32>,
) {
    let channels = shared.cursor.channels();
    loop {
        let block = match blocks.recv_timeout(POLL) {
            Ok(block) => block,
            Err(RecvTimeoutError::Timeout) => {
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        while shared.paused.load(Ordering::Acquire) && !shared.closed.load(Ordering::Acquire) {
            thread::sleep(POLL);
        }
        if shared.closed.load(Ordering::Acquire) {
            shared.park(block);
            break;
        }

        if let Err(e) = sink.write(&block.samples[..block.frames * channels]) {
            shared.fail(format!("output write failed: {}", e));
            shared.park(block);
            break;
        }
        pace(pacing, block.frames);

        if let Err(e) = feeder.send(FeederJob::Refill(shared.clone(), block)) {
            if let FeederJob::Refill(_, block) = e.into_inner() {
                shared.park(block);
            }
            break;
        }
    }
}

struct QueuePlayer {
    shared: Arc<PlayerShared>,
    feeder: Sender<FeederJob>,
    device: Option<JoinHandle<()>>,
}

impl QueuePlayer {
    /// Hand every idle buffer to the feeder for priming
    fn enqueue_idle(&self) -> Result<()> {
        let idle: Vec<Block> = std::mem::take(&mut *self.shared.idle.lock());
        for block in idle {
            self.shared.queued.fetch_add(1, Ordering::AcqRel);
            if let Err(e) = self
                .feeder
                .send(FeederJob::Refill(self.shared.clone(), block))
            {
                if let FeederJob::Refill(_, block) = e.into_inner() {
                    self.shared.park(block);
                }
                return Err(Error::Backend("feeder has stopped".to_string()));
            }
        }
        Ok(())
    }
}

impl DriverInstance for QueuePlayer {
    fn start(&mut self) -> Result<()> {
        self.shared.check()?;
        if self.shared.cursor.is_done() {
            self.shared.cursor.rewind();
            self.shared.cursor.set_done(false);
        }
        self.shared.paused.store(false, Ordering::Release);
        self.enqueue_idle()
    }

    fn pause(&mut self) -> Result<()> {
        self.shared.check()?;
        self.shared.paused.store(true, Ordering::Release);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.shared.check()?;
        self.shared.paused.store(false, Ordering::Release);
        self.enqueue_idle()
    }

    fn rewind(&mut self) -> Result<()> {
        self.shared.cursor.rewind();
        Ok(())
    }

    fn poll_done(&self) -> Result<bool> {
        self.shared.poll_done()
    }

    fn position(&self) -> usize {
        self.shared.cursor.position()
    }

    fn close(&mut self) -> Result<()> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.cursor.set_done(true);
        if let Some(device) = self.device.take() {
            if device.join().is_err() {
                return Err(Error::Backend("output device thread panicked".to_string()));
            }
        }
        Ok(())
    }
}

impl Drop for QueuePlayer {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(device) = self.device.take() {
            let _ = device.join();
        }
    }
}

struct RecorderShared {
    buffer: Arc<SampleBuffer>,
    cursor: CaptureCursor,
    resampler: Mutex<Resampler>,
    running: AtomicBool,
    closed: AtomicBool,
    free: Sender<Block>,
    error: Mutex<Option<String>>,
}

impl RecorderShared {
    /// Fold a filled input buffer into the target and recycle it. Runs on the feeder.
    fn absorb(&self, block: Block) {
        if !self.closed.load(Ordering::Acquire) {
            let channels = self.cursor.channels();
            let mut target = self.buffer.write();
            self.cursor.capture(
                &mut self.resampler.lock(),
                &block.samples[..block.frames * channels],
                channels,
                &mut target,
            );
        }
        let _ = self.free.send(block);
    }

    fn active(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && !self.cursor.is_done()
            && self.error.lock().is_none()
    }

    fn check(&self) -> Result<()> {
        match self.error.lock().as_ref() {
            Some(message) => Err(Error::Backend(message.clone())),
            None => Ok(()),
        }
    }
}

fn run_recorder_device(
    shared: Arc<RecorderShared>,
    free: Receiver<Block>,
    mut source: Box<dyn PcmSource>,
    feeder: Sender<FeederJob>,
    pacing: Option<u32>,
) {
    let channels = shared.cursor.channels();
    while !shared.closed.load(Ordering::Acquire) {
        if !shared.active() {
            thread::sleep(POLL);
            continue;
        }
        let mut block = match free.recv_timeout(POLL) {
            Ok(block) => block,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match source.read(&mut block.samples) {
            Ok(n) => block.frames = n.min(block.samples.len()) / channels,
            Err(e) => {
                let message = format!("input read failed: {}", e);
                log::error!("{}", message);
                *shared.error.lock() = Some(message);
                shared.cursor.set_done(true);
                break;
            }
        }
        pace(pacing, block.frames);

        if feeder
            .send(FeederJob::Capture(shared.clone(), block))
            .is_err()
        {
            break;
        }
    }
}

struct QueueRecorder {
    shared: Arc<RecorderShared>,
    device: Option<JoinHandle<()>>,
}

impl DriverInstance for QueueRecorder {
    fn start(&mut self) -> Result<()> {
        self.shared.check()?;
        if self.shared.cursor.is_done() {
            self.shared.cursor.rewind();
            self.shared.resampler.lock().reset();
            self.shared.cursor.set_done(false);
        }
        self.shared.running.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.shared.check()?;
        self.shared.running.store(true, Ordering::Release);
        Ok(())
    }

    fn rewind(&mut self) -> Result<()> {
        self.shared.cursor.rewind();
        Ok(())
    }

    fn poll_done(&self) -> Result<bool> {
        let done = self.shared.closed.load(Ordering::Acquire) || self.shared.cursor.is_done();
        self.shared.check()?;
        Ok(done)
    }

    fn position(&self) -> usize {
        self.shared.cursor.position()
    }

    fn close(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        self.shared.closed.store(true, Ordering::Release);
        self.shared.cursor.set_done(true);
        if let Some(device) = self.device.take() {
            if device.join().is_err() {
                return Err(Error::Backend("input device thread panicked".to_string()));
            }
        }
        Ok(())
    }
}

impl Drop for QueueRecorder {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(device) = self.device.take() {
            let _ = device.join();
        }
    }
}

impl AudioDriver for QueueDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn copyright(&self) -> &str {
        &self.copyright
    }

    fn create_player(
        &self,
        buffer: Arc<SampleBuffer>,
        options: &PlayerOptions,
    ) -> Result<Box<dyn DriverInstance>> {
        let params = StreamParams::player(&buffer, options);
        let format = WaveFormat::pcm(params.channels as u16, params.rate, BitDepth::Sixteen)?;
        let sink = (self.sink)(&format)?;
        let feeder = self.feeder()?;

        let (device_tx, device_rx) = bounded::<Block>(self.buffers);
        let shared = Arc::new(PlayerShared {
            buffer,
            cursor: PlaybackCursor::new(params.frames, params.channels, params.looping),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
            idle: Mutex::new(self.blocks()),
            device: device_tx,
            error: Mutex::new(None),
        });

        let device = {
            let shared = shared.clone();
            let feeder = feeder.clone();
            let pacing = self.pacing(params.rate);
            thread::Builder::new()
                .name(format!("{}-out", self.name))
                .spawn(move || run_player_device(shared, device_rx, sink, feeder, pacing))?
        };

        Ok(Box::new(QueuePlayer {
            shared,
            feeder,
            device: Some(device),
        }))
    }

    fn supports_recording(&self) -> bool {
        self.source.is_some()
    }

    fn create_recorder(
        &self,
        buffer: Arc<SampleBuffer>,
        options: &RecorderOptions,
    ) -> Result<Box<dyn DriverInstance>> {
        let factory = self.source.as_ref().ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "driver '{}' doesn't support recording",
                self.name
            ))
        })?;
        let params = StreamParams::recorder(&buffer, options);
        let format = WaveFormat::pcm(params.channels as u16, params.rate, BitDepth::Sixteen)?;
        let source = factory(&format)?;
        let feeder = self.feeder()?;

        buffer.set_rate(params.rate);
        buffer.set_bits(16);

        let (free_tx, free_rx) = bounded::<Block>(self.buffers);
        for block in self.blocks() {
            let _ = free_tx.send(block);
        }
        let shared = Arc::new(RecorderShared {
            buffer,
            cursor: CaptureCursor::new(params.frames, params.channels),
            // the device is opened at the requested rate
            resampler: Mutex::new(Resampler::new(params.rate, params.rate)),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            free: free_tx,
            error: Mutex::new(None),
        });

        let device = {
            let shared = shared.clone();
            let pacing = self.pacing(params.rate);
            thread::Builder::new()
                .name(format!("{}-in", self.name))
                .spawn(move || run_recorder_device(shared, free_rx, source, feeder, pacing))?
        };

        Ok(Box::new(QueueRecorder {
            shared,
            device: Some(device),
        }))
    }
}
