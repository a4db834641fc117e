//! Audio host: driver selection plus a table of open instances

use crate::{
    driver::{AudioDriver, InstanceKind, PlayerOptions, RecorderOptions, WaitStatus},
    error::{Error, Result},
    instance::{self, AudioInstance, InstanceState, MAX_WAIT_SLICE},
    registry::{DriverInfo, Registry},
    sample::SampleBuffer,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Called between wait slices; returning true aborts the wait
pub type InterruptHook = Arc<dyn Fn() -> bool + Send + Sync>;

/// Host configuration
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Rate for players whose buffer has none, and for recorders
    pub default_rate: u32,
    /// Polling interval of [`AudioHost::wait`], at most 100 ms
    pub wait_slice: Duration,
    /// Loop every player created by this host
    pub looping: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            default_rate: crate::driver::DEFAULT_RATE,
            wait_slice: MAX_WAIT_SLICE,
            looping: false,
        }
    }
}

/// Opaque reference to an open instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    /// Raw handle value
    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

enum RegistryRef {
    Global,
    Shared(Arc<Registry>),
}

/// Audio host instance
pub struct AudioHost {
    config: HostConfig,
    registry: RegistryRef,
    interrupt: Option<InterruptHook>,
    instances: Mutex<HashMap<InstanceHandle, Arc<Mutex<AudioInstance>>>>,
    next_handle: AtomicU64,
}

impl AudioHost {
    /// Create a host on the process-wide registry with default settings
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a new host builder
    pub fn builder() -> AudioHostBuilder {
        AudioHostBuilder::default()
    }

    /// Host configuration
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// The registry drivers come from
    pub fn registry(&self) -> &Registry {
        match &self.registry {
            RegistryRef::Global => Registry::global(),
            RegistryRef::Shared(registry) => registry,
        }
    }

    /// Describe every known driver
    pub fn drivers(&self) -> Vec<DriverInfo> {
        self.registry().list()
    }

    /// Make the driver called `name` current; unknown names leave the selection alone
    pub fn select_driver(&self, name: &str) -> Option<Arc<dyn AudioDriver>> {
        self.registry().select(name)
    }

    /// The driver new instances are created on
    pub fn current_driver(&self) -> Result<Arc<dyn AudioDriver>> {
        self.registry().require_current()
    }

    /// Load a driver module and make it current, returning its name
    pub fn load_driver<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        let driver = self.registry().load_external(path)?;
        Ok(driver.name().to_string())
    }

    fn insert(&self, instance: AudioInstance) -> InstanceHandle {
        let handle = InstanceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let instance = instance.with_wait_slice(self.config.wait_slice);
        self.instances
            .lock()
            .insert(handle, Arc::new(Mutex::new(instance)));
        handle
    }

    fn get(&self, handle: InstanceHandle) -> Result<Arc<Mutex<AudioInstance>>> {
        self.instances
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(Error::InvalidHandle)
    }

    fn with<T>(&self, handle: InstanceHandle, f: impl FnOnce(&mut AudioInstance) -> T) -> Result<T> {
        let instance = self.get(handle)?;
        let mut instance = instance.lock();
        Ok(f(&mut instance))
    }

    /// Create a player for `buffer` on the current driver
    pub fn player(
        &self,
        buffer: Arc<SampleBuffer>,
        mut options: PlayerOptions,
    ) -> Result<InstanceHandle> {
        let driver = self.current_driver()?;
        if options.rate.is_none() {
            let rate = buffer.rate().unwrap_or(self.config.default_rate);
            options.rate = Some(rate as f64);
        }
        options.looping |= self.config.looping;
        let instance = AudioInstance::player(driver, buffer, &options)?;
        Ok(self.insert(instance))
    }

    /// Create a recorder writing into `buffer` on the current driver
    pub fn recorder(
        &self,
        buffer: Arc<SampleBuffer>,
        mut options: RecorderOptions,
    ) -> Result<InstanceHandle> {
        let driver = self.current_driver()?;
        if options.rate.is_none() {
            options.rate = Some(self.config.default_rate as f64);
        }
        let instance = AudioInstance::recorder(driver, buffer, &options)?;
        Ok(self.insert(instance))
    }

    /// Start or restart an instance
    pub fn start(&self, handle: InstanceHandle) -> Result<()> {
        self.with(handle, |i| i.start())?
    }

    /// Pause an instance
    pub fn pause(&self, handle: InstanceHandle) -> Result<()> {
        self.with(handle, |i| i.pause())?
    }

    /// Resume a paused instance
    pub fn resume(&self, handle: InstanceHandle) -> Result<()> {
        self.with(handle, |i| i.resume())?
    }

    /// Rewind an instance to its first frame
    pub fn rewind(&self, handle: InstanceHandle) -> Result<()> {
        self.with(handle, |i| i.rewind())?
    }

    /// Close an instance; the handle stays valid until disposed
    pub fn close(&self, handle: InstanceHandle) -> Result<()> {
        self.with(handle, |i| i.close())?
    }

    /// Wait for an instance to finish. Negative `timeout` waits indefinitely.
    ///
    /// The instance is only locked while its state is checked, so other
    /// threads can pause or close it during the wait.
    pub fn wait(&self, handle: InstanceHandle, timeout: f64) -> Result<WaitStatus> {
        let timeout = instance::timeout_from_secs(timeout)?;
        let target = self.get(handle)?;
        instance::wait_until(timeout, self.config.wait_slice, || {
            if target.lock().is_done()? {
                return Ok(true);
            }
            match &self.interrupt {
                Some(hook) if hook() => Err(Error::Interrupted),
                _ => Ok(false),
            }
        })
    }

    /// Close if needed and drop an instance, releasing its buffer
    pub fn dispose(&self, handle: InstanceHandle) -> Result<()> {
        let instance = self
            .instances
            .lock()
            .remove(&handle)
            .ok_or(Error::InvalidHandle)?;
        match Arc::try_unwrap(instance) {
            Ok(instance) => instance.into_inner().dispose(),
            // another call still holds it; it is released when that call returns
            Err(shared) => shared.lock().close(),
        }
    }

    /// Whether an instance has finished; a native failure is returned as an error
    pub fn is_done(&self, handle: InstanceHandle) -> Result<bool> {
        self.with(handle, |i| i.is_done())?
    }

    /// Current frame index of an instance
    pub fn position(&self, handle: InstanceHandle) -> Result<usize> {
        self.with(handle, |i| i.position())
    }

    /// Lifecycle state of an instance
    pub fn state(&self, handle: InstanceHandle) -> Result<InstanceState> {
        self.with(handle, |i| i.state())
    }

    /// Player or recorder
    pub fn kind(&self, handle: InstanceHandle) -> Result<InstanceKind> {
        self.with(handle, |i| i.kind())
    }

    /// Name of the driver an instance runs on
    pub fn driver_name(&self, handle: InstanceHandle) -> Result<String> {
        self.with(handle, |i| i.driver_name().to_string())
    }

    /// Source or target buffer of an instance
    pub fn source(&self, handle: InstanceHandle) -> Result<Arc<SampleBuffer>> {
        self.with(handle, |i| i.source().clone())
    }

    /// Handles of all live instances
    pub fn handles(&self) -> Vec<InstanceHandle> {
        let mut handles: Vec<_> = self.instances.lock().keys().copied().collect();
        handles.sort();
        handles
    }
}

/// Builder for audio host configuration
#[derive(Default)]
pub struct AudioHostBuilder {
    config: HostConfig,
    registry: Option<Arc<Registry>>,
    interrupt: Option<InterruptHook>,
}

impl AudioHostBuilder {
    /// Set the default sample rate
    pub fn default_rate(mut self, rate: u32) -> Self {
        self.config.default_rate = rate;
        self
    }

    /// Set the wait polling interval (clamped to 1..=100 ms)
    pub fn wait_slice(mut self, slice: Duration) -> Self {
        self.config.wait_slice = instance::clamp_slice(slice);
        self
    }

    /// Loop all players by default
    pub fn looping(mut self, looping: bool) -> Self {
        self.config.looping = looping;
        self
    }

    /// Use a private registry instead of the process-wide one
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Check for interruption between wait slices
    pub fn interrupt_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.interrupt = Some(Arc::new(hook));
        self
    }

    /// Build the audio host
    pub fn build(self) -> Result<AudioHost> {
        if self.config.default_rate == 0 {
            return Err(Error::InvalidParameter(
                "default sample rate must be positive".to_string(),
            ));
        }
        Ok(AudioHost {
            config: self.config,
            registry: match self.registry {
                Some(registry) => RegistryRef::Shared(registry),
                None => RegistryRef::Global,
            },
            interrupt: self.interrupt,
            instances: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }
}
