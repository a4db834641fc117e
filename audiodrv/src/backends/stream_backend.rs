//! Blocking stream backend.
//!
//! Sends a RIFF/WAVE header followed by the samples to a blocking byte
//! stream, the way simple sound server protocols take playback. The
//! connection is opened on start and written from a background thread in
//! batches, checking for close between batches. A stream cannot be paused,
//! resumed or rewound.

use crate::{
    driver::{AudioDriver, DriverInstance, PlayerOptions, StreamParams},
    error::{Error, Result},
    sample::{SampleBuffer, Samples},
    wave::{self, WaveFormat, BATCH_SAMPLES},
};
use parking_lot::Mutex;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type ConnectFn = Arc<dyn Fn(&WaveFormat) -> Result<Box<dyn Write + Send>> + Send + Sync>;

/// Driver writing WAVE streams to connections made by a factory
pub struct StreamDriver {
    name: String,
    description: String,
    connect: ConnectFn,
}

impl StreamDriver {
    /// Driver whose connections come from `connect`
    pub fn new<F>(name: impl Into<String>, connect: F) -> Self
    where
        F: Fn(&WaveFormat) -> Result<Box<dyn Write + Send>> + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            description: format!("{} stream driver", name),
            name,
            connect: Arc::new(connect),
        }
    }

    /// Driver streaming to a TCP sound server
    pub fn tcp<A>(name: impl Into<String>, addr: A) -> Result<Self>
    where
        A: ToSocketAddrs,
    {
        let addrs: Vec<_> = addr.to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(Error::InvalidParameter("no server address".to_string()));
        }
        Ok(Self::new(name, move |_: &WaveFormat| {
            let stream = TcpStream::connect(&addrs[..]).map_err(|e| {
                Error::DeviceUnavailable(format!("cannot reach sound server: {}", e))
            })?;
            Ok(Box::new(stream) as Box<dyn Write + Send>)
        }))
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

struct StreamShared {
    buffer: Arc<SampleBuffer>,
    position: AtomicUsize,
    done: AtomicBool,
    closed: AtomicBool,
    error: Mutex<Option<String>>,
}

struct StreamPlayer {
    shared: Arc<StreamShared>,
    params: StreamParams,
    connect: ConnectFn,
    writer: Option<JoinHandle<()>>,
}

fn unsupported(op: &str) -> Error {
    Error::UnsupportedOperation(format!("{} is not supported on a stream", op))
}

fn run_writer(
    shared: Arc<StreamShared>,
    mut out: Box<dyn Write + Send>,
    format: WaveFormat,
    params: StreamParams,
) {
    if let Err(e) = stream_samples(&shared, &mut out, &format, &params) {
        let message = format!("stream write failed: {}", e);
        log::error!("{}", message);
        *shared.error.lock() = Some(message);
    }
    shared.done.store(true, Ordering::Release);
}

fn stream_samples(
    shared: &StreamShared,
    out: &mut dyn Write,
    format: &WaveFormat,
    params: &StreamParams,
) -> Result<()> {
    let samples = shared.buffer.read();
    let data = match &*samples {
        Samples::Float(v) => v,
        Samples::Int(_) => {
            return Err(Error::FormatUnsupported(
                "stream players need floating point samples".to_string(),
            ))
        }
    };
    let depth = wave::output_depth(&shared.buffer);
    let data_len = (data.len() * depth.bytes()).min(u32::MAX as usize - 36) as u32;
    wave::write_header(out, format, data_len)?;

    let mut batch = Vec::with_capacity(BATCH_SAMPLES * depth.bytes());
    loop {
        for (i, chunk) in data.chunks(BATCH_SAMPLES).enumerate() {
            if shared.closed.load(Ordering::Acquire) {
                return Ok(());
            }
            wave::encode_batch(depth, chunk, &mut batch);
            out.write_all(&batch)?;
            let written = (i * BATCH_SAMPLES + chunk.len()) / params.channels;
            shared.position.store(written, Ordering::Release);
        }
        if !params.looping || data.is_empty() {
            break;
        }
    }
    out.flush()?;
    Ok(())
}

impl DriverInstance for StreamPlayer {
    fn start(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            if !writer.is_finished() {
                self.writer = Some(writer);
                return Ok(());
            }
            let _ = writer.join();
        }
        let depth = wave::output_depth(&self.shared.buffer);
        let format = WaveFormat::pcm(self.params.channels as u16, self.params.rate, depth)?;
        let out = (self.connect)(&format)?;

        self.shared.position.store(0, Ordering::Release);
        self.shared.done.store(false, Ordering::Release);
        *self.shared.error.lock() = None;

        let shared = self.shared.clone();
        let params = self.params;
        self.writer = Some(
            thread::Builder::new()
                .name("audiodrv-stream".to_string())
                .spawn(move || run_writer(shared, out, format, params))?,
        );
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        Err(unsupported("pause"))
    }

    fn resume(&mut self) -> Result<()> {
        Err(unsupported("resume"))
    }

    fn rewind(&mut self) -> Result<()> {
        Err(unsupported("rewind"))
    }

    fn poll_done(&self) -> Result<bool> {
        // the writer records its error before raising the done flag
        let done = self.shared.done.load(Ordering::Acquire);
        if let Some(message) = self.shared.error.lock().as_ref() {
            return Err(Error::Backend(message.clone()));
        }
        Ok(done)
    }

    fn position(&self) -> usize {
        self.shared.position.load(Ordering::Acquire)
    }

    fn close(&mut self) -> Result<()> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.done.store(true, Ordering::Release);
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                return Err(Error::Backend("stream writer panicked".to_string()));
            }
        }
        Ok(())
    }
}

impl AudioDriver for StreamDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn copyright(&self) -> &str {
        ""
    }

    fn create_player(
        &self,
        buffer: Arc<SampleBuffer>,
        options: &PlayerOptions,
    ) -> Result<Box<dyn DriverInstance>> {
        if !buffer.is_float() {
            return Err(Error::FormatUnsupported(
                "stream players need floating point samples".to_string(),
            ));
        }
        let params = StreamParams::player(&buffer, options);
        Ok(Box::new(StreamPlayer {
            shared: Arc::new(StreamShared {
                buffer,
                position: AtomicUsize::new(0),
                done: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
            params,
            connect: self.connect.clone(),
            writer: None,
        }))
    }
}
