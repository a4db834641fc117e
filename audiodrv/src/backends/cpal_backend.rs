//! CPAL audio backend implementation

use crate::{
    driver::{AudioDriver, DriverInstance, PlayerOptions, RecorderOptions, StreamParams},
    engine::{CaptureCursor, PlaybackCursor, Resampler},
    error::{Error, Result},
    format::PcmSample,
    sample::SampleBuffer,
};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, HostId, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// CPAL stream wrapper
struct CpalStream {
    // Option so close can drop the stream before the instance goes away
    stream: Option<Stream>,
}

// Manually implement Send for CpalStream
// This is safe because we only use the stream for play/pause operations
unsafe impl Send for CpalStream {}

impl CpalStream {
    fn play(&self) -> Result<()> {
        match self.stream {
            Some(ref stream) => stream
                .play()
                .map_err(|e| Error::Backend(format!("Failed to start stream: {}", e))),
            None => Err(Error::InvalidState("stream has been closed".to_string())),
        }
    }

    fn pause(&self) -> Result<()> {
        match self.stream {
            Some(ref stream) => stream
                .pause()
                .map_err(|e| Error::Backend(format!("Failed to pause stream: {}", e))),
            None => Err(Error::InvalidState("stream has been closed".to_string())),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("pausing stream on close: {}", e);
            }
        }
    }
}

/// Driver for one CPAL host (CoreAudio, WASAPI, ALSA, JACK, ...)
pub struct CpalDriver {
    host_id: HostId,
    name: String,
    description: String,
}

impl CpalDriver {
    /// Driver for a specific host
    pub fn new(host_id: HostId) -> Self {
        Self {
            host_id,
            name: host_id.name().to_lowercase(),
            description: format!("{} audio driver", host_id.name()),
        }
    }

    /// Drivers for every host that opens, the platform default first
    pub fn probe() -> Vec<CpalDriver> {
        let default_id = cpal::default_host().id();
        let mut ids = vec![default_id];
        ids.extend(
            cpal::available_hosts()
                .into_iter()
                .filter(|id| *id != default_id),
        );

        ids.into_iter()
            .filter_map(|id| match cpal::host_from_id(id) {
                Ok(_) => Some(CpalDriver::new(id)),
                Err(e) => {
                    log::debug!("skipping host {}: {}", id.name(), e);
                    None
                }
            })
            .collect()
    }

    /// The CPAL host this driver opens
    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    fn host(&self) -> Result<cpal::Host> {
        cpal::host_from_id(self.host_id)
            .map_err(|e| Error::DeviceUnavailable(format!("{}: {}", self.host_id.name(), e)))
    }

    /// List all available output devices
    pub fn list_output_devices(&self) -> Result<Vec<String>> {
        let devices: Vec<String> = self
            .host()?
            .output_devices()
            .map_err(|e| Error::Backend(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|d| d.name().ok())
            .collect();
        Ok(devices)
    }
}

/// Error reported by a stream's error callback, kept until the next done check
#[derive(Default)]
struct StreamFault(Mutex<Option<String>>);

impl StreamFault {
    fn record(&self, message: String) {
        log::error!("{}", message);
        self.0.lock().get_or_insert(message);
    }

    fn check(&self) -> Result<()> {
        match self.0.lock().as_ref() {
            Some(message) => Err(Error::Backend(message.clone())),
            None => Ok(()),
        }
    }

    fn clear(&self) {
        *self.0.lock() = None;
    }
}

/// Prefer 16-bit output when the device offers it for this shape
fn output_format(device: &Device, channels: u16, rate: u32) -> SampleFormat {
    let supports_i16 = device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|c| {
                c.sample_format() == SampleFormat::I16
                    && c.channels() == channels
                    && c.min_sample_rate().0 <= rate
                    && c.max_sample_rate().0 >= rate
            })
        })
        .unwrap_or(false);
    if supports_i16 {
        SampleFormat::I16
    } else {
        SampleFormat::F32
    }
}

struct PlayerShared {
    buffer: Arc<SampleBuffer>,
    cursor: PlaybackCursor,
    running: AtomicBool,
    fault: StreamFault,
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    shared: Arc<PlayerShared>,
) -> Result<Stream>
where
    T: PcmSample + SizedSample,
{
    let faults = shared.clone();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if !shared.running.load(Ordering::Acquire) || shared.cursor.is_done() {
                    data.fill(T::SILENCE);
                    return;
                }
                let samples = shared.buffer.read();
                shared.cursor.fill(&samples, data);
            },
            move |err| faults.fault.record(format!("output stream error: {}", err)),
            None,
        )
        .map_err(|e| Error::Backend(format!("Failed to build output stream: {}", e)))
}

struct CpalPlayer {
    shared: Arc<PlayerShared>,
    stream: CpalStream,
}

impl DriverInstance for CpalPlayer {
    fn start(&mut self) -> Result<()> {
        if self.shared.cursor.is_done() {
            self.shared.cursor.rewind();
            self.shared.cursor.set_done(false);
        }
        self.shared.fault.clear();
        self.shared.running.store(true, Ordering::Release);
        self.stream.play()
    }

    fn pause(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        self.stream.pause()
    }

    fn resume(&mut self) -> Result<()> {
        self.shared.running.store(true, Ordering::Release);
        self.stream.play()
    }

    fn rewind(&mut self) -> Result<()> {
        self.shared.cursor.rewind();
        Ok(())
    }

    fn poll_done(&self) -> Result<bool> {
        self.shared.fault.check()?;
        Ok(self.shared.cursor.is_done())
    }

    fn position(&self) -> usize {
        self.shared.cursor.position()
    }

    fn close(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        self.shared.cursor.set_done(true);
        self.stream.close();
        Ok(())
    }
}

struct RecorderShared {
    buffer: Arc<SampleBuffer>,
    cursor: CaptureCursor,
    running: AtomicBool,
    fault: StreamFault,
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    shared: Arc<RecorderShared>,
    mut resampler: Resampler,
) -> Result<Stream>
where
    T: PcmSample + SizedSample,
{
    let native_channels = config.channels as usize;
    let faults = shared.clone();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !shared.running.load(Ordering::Acquire) || shared.cursor.is_done() {
                    return;
                }
                let mut target = shared.buffer.write();
                shared
                    .cursor
                    .capture(&mut resampler, data, native_channels, &mut target);
            },
            move |err| faults.fault.record(format!("input stream error: {}", err)),
            None,
        )
        .map_err(|e| Error::Backend(format!("Failed to build input stream: {}", e)))
}

struct CpalRecorder {
    shared: Arc<RecorderShared>,
    stream: CpalStream,
}

impl DriverInstance for CpalRecorder {
    fn start(&mut self) -> Result<()> {
        if self.shared.cursor.is_done() {
            self.shared.cursor.rewind();
            self.shared.cursor.set_done(false);
        }
        self.shared.fault.clear();
        self.shared.running.store(true, Ordering::Release);
        self.stream.play()
    }

    fn pause(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        self.stream.pause()
    }

    fn resume(&mut self) -> Result<()> {
        self.shared.running.store(true, Ordering::Release);
        self.stream.play()
    }

    fn rewind(&mut self) -> Result<()> {
        self.shared.cursor.rewind();
        Ok(())
    }

    fn poll_done(&self) -> Result<bool> {
        self.shared.fault.check()?;
        Ok(self.shared.cursor.is_done())
    }

    fn position(&self) -> usize {
        self.shared.cursor.position()
    }

    fn close(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        self.shared.cursor.set_done(true);
        self.stream.close();
        Ok(())
    }
}

impl AudioDriver for CpalDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn copyright(&self) -> &str {
        "CPAL contributors, Apache-2.0"
    }

    fn create_player(
        &self,
        buffer: Arc<SampleBuffer>,
        options: &PlayerOptions,
    ) -> Result<Box<dyn DriverInstance>> {
        let params = StreamParams::player(&buffer, options);
        let host = self.host()?;
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no default output device".to_string()))?;

        let stream_config = StreamConfig {
            channels: params.channels as u16,
            sample_rate: SampleRate(params.rate),
            buffer_size: BufferSize::Default,
        };
        let shared = Arc::new(PlayerShared {
            buffer,
            cursor: PlaybackCursor::new(params.frames, params.channels, params.looping),
            running: AtomicBool::new(false),
            fault: StreamFault::default(),
        });

        let format = output_format(&device, stream_config.channels, params.rate);
        log::debug!(
            "opening {:?} output on {} ({} Hz, {} channels)",
            format,
            device.name().unwrap_or_default(),
            params.rate,
            params.channels
        );
        let stream = match format {
            SampleFormat::I16 => build_output::<i16>(&device, &stream_config, shared.clone())?,
            _ => build_output::<f32>(&device, &stream_config, shared.clone())?,
        };
        // some hosts start streams as soon as they are built
        let stream = CpalStream {
            stream: Some(stream),
        };
        if let Err(e) = stream.pause() {
            log::debug!("initial pause: {}", e);
        }

        Ok(Box::new(CpalPlayer { shared, stream }))
    }

    fn supports_recording(&self) -> bool {
        true
    }

    fn create_recorder(
        &self,
        buffer: Arc<SampleBuffer>,
        options: &RecorderOptions,
    ) -> Result<Box<dyn DriverInstance>> {
        let params = StreamParams::recorder(&buffer, options);
        let host = self.host()?;
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no default input device".to_string()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| Error::Backend(format!("Failed to query input config: {}", e)))?;

        let native_rate = supported.sample_rate().0;
        let sample_format = supported.sample_format();
        let stream_config = supported.config();
        let resampler = Resampler::new(native_rate, params.rate);

        buffer.set_rate(params.rate);
        if sample_format == SampleFormat::I16 {
            buffer.set_bits(16);
        }

        let shared = Arc::new(RecorderShared {
            buffer,
            cursor: CaptureCursor::new(params.frames, params.channels),
            running: AtomicBool::new(false),
            fault: StreamFault::default(),
        });

        log::debug!(
            "opening {:?} input on {} ({} Hz native, {} Hz requested)",
            sample_format,
            device.name().unwrap_or_default(),
            native_rate,
            params.rate
        );
        let stream = match sample_format {
            SampleFormat::I16 => {
                build_input::<i16>(&device, &stream_config, shared.clone(), resampler)?
            }
            SampleFormat::F32 => {
                build_input::<f32>(&device, &stream_config, shared.clone(), resampler)?
            }
            other => {
                return Err(Error::FormatUnsupported(format!(
                    "input sample format {:?}",
                    other
                )))
            }
        };
        let stream = CpalStream {
            stream: Some(stream),
        };
        if let Err(e) = stream.pause() {
            log::debug!("initial pause: {}", e);
        }

        Ok(Box::new(CpalRecorder { shared, stream }))
    }
}
