//! Drivers loaded from shared modules.
//!
//! A driver module exports `create_audio_driver` (or `_create_audio_driver`)
//! returning a pointer to a static [`RawDriver`]. The descriptor's `length`
//! field must equal [`DRIVER_DESCRIPTOR_SIZE`]; anything else was built
//! against a different layout and is refused before any of its functions are
//! called.

use crate::driver::{AudioDriver, DriverInstance, PlayerOptions, RecorderOptions, WaitStatus};
use crate::error::{Error, Result};
use crate::internal::utils::c_str_to_string;
use crate::sample::{SampleBuffer, Samples};
use libloading::Library;
use std::ffi::{c_char, c_float, c_int, c_void};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Entry point symbols, tried in order
pub const ENTRY_POINTS: [&[u8]; 2] = [b"create_audio_driver\0", b"_create_audio_driver\0"];

/// Size a compatible descriptor reports in its `length` field
pub const DRIVER_DESCRIPTOR_SIZE: u32 = std::mem::size_of::<RawDriver>() as u32;

/// Player flag: loop playback
pub const FLAG_LOOP: c_int = 0x0001;

/// `wait` result: the stream finished
pub const WAIT_DONE: c_int = 1;
/// `wait` result: the timeout elapsed
pub const WAIT_TIMEOUT: c_int = 2;
/// `wait` result: failure
pub const WAIT_ERROR: c_int = -1;

/// `RawSampleBuffer::kind` for 32-bit integer samples
pub const SAMPLES_INT32: c_int = 0;
/// `RawSampleBuffer::kind` for 64-bit float samples
pub const SAMPLES_FLOAT64: c_int = 1;

/// Sample buffer as seen by a driver module. Valid until the instance is disposed.
#[repr(C)]
#[derive(Debug)]
pub struct RawSampleBuffer {
    /// `i32` or `f64` samples depending on `kind`
    pub data: *mut c_void,
    /// Number of samples
    pub length: usize,
    /// [`SAMPLES_INT32`] or [`SAMPLES_FLOAT64`]
    pub kind: c_int,
    /// 1 for mono, 2 for interleaved stereo
    pub rows: c_int,
    /// Attached sample rate or 0
    pub rate: c_int,
}

/// Native instance handle
pub type RawInstance = *mut c_void;

/// Creates a player: source, rate (negative for the default), flags
pub type CreatePlayerFn =
    unsafe extern "C" fn(*const RawSampleBuffer, c_float, c_int) -> RawInstance;
/// Creates a recorder: target, rate, channels, flags
pub type CreateRecorderFn =
    unsafe extern "C" fn(*const RawSampleBuffer, c_float, c_int, c_int) -> RawInstance;
/// Lifecycle operation; non-zero means success
pub type InstanceFn = unsafe extern "C" fn(RawInstance) -> c_int;
/// Wait with a timeout in seconds; returns one of the `WAIT_*` codes
pub type WaitFn = unsafe extern "C" fn(RawInstance, f64) -> c_int;
/// Release an instance
pub type DisposeFn = unsafe extern "C" fn(RawInstance);
/// Module entry point
pub type CreateDriverFn = unsafe extern "C" fn() -> *const RawDriver;

/// Driver descriptor exported by a module
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawDriver {
    /// Must equal [`DRIVER_DESCRIPTOR_SIZE`]
    pub length: u32,
    /// Short identifier
    pub name: *const c_char,
    /// Description
    pub descr: *const c_char,
    /// Copyright, may be null
    pub copyright: *const c_char,
    /// Player factory
    pub create_player: Option<CreatePlayerFn>,
    /// Recorder factory, null when recording is unsupported
    pub create_recorder: Option<CreateRecorderFn>,
    /// Start
    pub start: Option<InstanceFn>,
    /// Pause
    pub pause: Option<InstanceFn>,
    /// Resume
    pub resume: Option<InstanceFn>,
    /// Rewind
    pub rewind: Option<InstanceFn>,
    /// Wait
    pub wait: Option<WaitFn>,
    /// Close
    pub close: Option<InstanceFn>,
    /// Dispose
    pub dispose: Option<DisposeFn>,
}

/// A validated driver descriptor, possibly owning the module it came from
pub struct ExternalDriver {
    raw: RawDriver,
    name: String,
    description: String,
    copyright: String,
    origin: PathBuf,
    library: Option<Arc<Library>>,
}

// The descriptor is immutable static data of the module and the module is
// kept loaded for as long as the driver or any of its instances exist.
unsafe impl Send for ExternalDriver {}
unsafe impl Sync for ExternalDriver {}

impl ExternalDriver {
    /// Load a driver module
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        unsafe {
            let library = Library::new(path).map_err(|e| Error::ModuleLoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

            let entry = ENTRY_POINTS
                .iter()
                .find_map(|symbol| library.get::<CreateDriverFn>(symbol).ok().map(|f| *f))
                .ok_or_else(|| Error::NotADriver(path.to_path_buf()))?;

            let raw = entry();
            Self::from_raw(raw, Some(library), path)
        }
    }

    /// Validate a descriptor.
    ///
    /// # Safety
    /// `raw` must be null or point to a `RawDriver`-sized block whose leading
    /// `length` field is readable, and whose function pointers stay valid for
    /// as long as `library` (or the process, when `None`) is loaded.
    pub unsafe fn from_raw(
        raw: *const RawDriver,
        library: Option<Library>,
        origin: &Path,
    ) -> Result<Self> {
        if raw.is_null() {
            return Err(Error::DriverInitFailed(origin.to_path_buf()));
        }
        let found = std::ptr::read(raw as *const u32);
        if found != DRIVER_DESCRIPTOR_SIZE {
            return Err(Error::IncompatibleModule {
                expected: DRIVER_DESCRIPTOR_SIZE,
                found,
            });
        }
        let raw = *raw;
        if raw.create_player.is_none() || raw.close.is_none() || raw.name.is_null() {
            return Err(Error::DriverInitFailed(origin.to_path_buf()));
        }

        let name = c_str_to_string(raw.name);
        log::debug!("validated driver '{}' from {}", name, origin.display());
        Ok(Self {
            name,
            description: c_str_to_string(raw.descr),
            copyright: c_str_to_string(raw.copyright),
            raw,
            origin: origin.to_path_buf(),
            library: library.map(Arc::new),
        })
    }

    /// Where the driver was loaded from
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    fn instance(
        &self,
        handle: RawInstance,
        buffer: Box<RawSampleBuffer>,
    ) -> Box<dyn DriverInstance> {
        Box::new(ExternalInstance {
            raw: self.raw,
            name: self.name.clone(),
            handle,
            _view: buffer,
            _library: self.library.clone(),
        })
    }
}

impl AudioDriver for ExternalDriver {
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
        let create = self.raw.create_player.ok_or_else(|| {
            Error::UnsupportedOperation(format!("driver '{}' cannot play", self.name))
        })?;
        let view = Box::new(raw_view(&buffer));
        let rate = options.rate.unwrap_or(-1.0) as c_float;
        let flags = if options.looping { FLAG_LOOP } else { 0 };
        let handle = unsafe { create(&*view, rate, flags) };
        if handle.is_null() {
            return Err(Error::Backend(format!(
                "driver '{}' could not create a player",
                self.name
            )));
        }
        Ok(self.instance(handle, view))
    }

    fn supports_recording(&self) -> bool {
        self.raw.create_recorder.is_some()
    }

    fn create_recorder(
        &self,
        buffer: Arc<SampleBuffer>,
        options: &RecorderOptions,
    ) -> Result<Box<dyn DriverInstance>> {
        let create = self.raw.create_recorder.ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "driver '{}' doesn't support recording",
                self.name
            ))
        })?;
        let view = Box::new(raw_view(&buffer));
        let rate = options.rate.unwrap_or(-1.0) as c_float;
        let channels = options.channels.clamp(1, 2) as c_int;
        let handle = unsafe { create(&*view, rate, channels, 0) };
        if handle.is_null() {
            return Err(Error::Backend(format!(
                "driver '{}' could not create a recorder",
                self.name
            )));
        }
        Ok(self.instance(handle, view))
    }
}

/// Describe `buffer` for a module. The sample vector never changes length,
/// so the pointer stays valid while the buffer is alive.
fn raw_view(buffer: &SampleBuffer) -> RawSampleBuffer {
    let mut samples = buffer.write();
    let length = samples.len();
    let (data, kind) = match &mut *samples {
        Samples::Int(v) => (v.as_mut_ptr() as *mut c_void, SAMPLES_INT32),
        Samples::Float(v) => (v.as_mut_ptr() as *mut c_void, SAMPLES_FLOAT64),
    };
    RawSampleBuffer {
        data,
        length,
        kind,
        rows: buffer.rows() as c_int,
        rate: buffer.rate().map_or(0, |r| r as c_int),
    }
}

struct ExternalInstance {
    raw: RawDriver,
    name: String,
    handle: RawInstance,
    _view: Box<RawSampleBuffer>,
    _library: Option<Arc<Library>>,
}

// Module instances are driven from whichever thread owns the AudioInstance,
// one call at a time.
unsafe impl Send for ExternalInstance {}

impl ExternalInstance {
    fn call(&self, op: &str, f: Option<InstanceFn>) -> Result<()> {
        let f = f.ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "{} is not implemented by driver '{}'",
                op, self.name
            ))
        })?;
        match unsafe { f(self.handle) } {
            0 => Err(Error::Backend(format!("{} failed in driver '{}'", op, self.name))),
            _ => Ok(()),
        }
    }

    fn wait(&self, timeout: f64) -> Result<WaitStatus> {
        let wait = self.raw.wait.ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "wait is not implemented by driver '{}'",
                self.name
            ))
        })?;
        match unsafe { wait(self.handle, timeout) } {
            WAIT_DONE => Ok(WaitStatus::Done),
            WAIT_TIMEOUT => Ok(WaitStatus::TimedOut),
            code => Err(Error::Backend(format!(
                "wait failed in driver '{}' (code {})",
                self.name, code
            ))),
        }
    }
}

impl DriverInstance for ExternalInstance {
    fn start(&mut self) -> Result<()> {
        self.call("start", self.raw.start)
    }

    fn pause(&mut self) -> Result<()> {
        self.call("pause", self.raw.pause)
    }

    fn resume(&mut self) -> Result<()> {
        self.call("resume", self.raw.resume)
    }

    fn rewind(&mut self) -> Result<()> {
        self.call("rewind", self.raw.rewind)
    }

    fn poll_done(&self) -> Result<bool> {
        Ok(self.wait(0.0)? == WaitStatus::Done)
    }

    /// Modules do not report their cursor
    fn position(&self) -> usize {
        0
    }

    fn close(&mut self) -> Result<()> {
        self.call("close", self.raw.close)
    }
}

impl Drop for ExternalInstance {
    fn drop(&mut self) {
        if let Some(dispose) = self.raw.dispose {
            unsafe { dispose(self.handle) };
        }
    }
}
