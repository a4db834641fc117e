//! Driver registry.
//!
//! Keeps every known driver in precedence order plus the one currently
//! selected. Built-in drivers are probed lazily, the first time the registry
//! is consulted while still empty.

use crate::driver::AudioDriver;
use crate::error::{Error, Result};
use crate::external::{ExternalDriver, RawDriver};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Produces the built-in drivers, best first
pub type Prober = Box<dyn Fn() -> Vec<Arc<dyn AudioDriver>> + Send + Sync>;

/// Summary of a registered driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverInfo {
    /// Short identifier
    pub name: String,
    /// Description
    pub description: String,
    /// Copyright notice
    pub copyright: String,
    /// Whether this is the current driver
    pub current: bool,
    /// Whether the driver can record
    pub recording: bool,
}

#[derive(Default)]
struct RegistryState {
    drivers: Vec<Arc<dyn AudioDriver>>,
    current: Option<usize>,
    probed: bool,
}

impl RegistryState {
    fn position(&self, driver: &Arc<dyn AudioDriver>) -> Option<usize> {
        self.drivers.iter().position(|d| same_driver(d, driver))
    }

    fn current(&self) -> Option<Arc<dyn AudioDriver>> {
        self.current.and_then(|i| self.drivers.get(i)).cloned()
    }
}

fn same_driver(a: &Arc<dyn AudioDriver>, b: &Arc<dyn AudioDriver>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Ordered set of drivers with a current selection
pub struct Registry {
    state: RwLock<RegistryState>,
    prober: Prober,
}

impl Registry {
    /// Registry that probes the built-in drivers on first use
    pub fn new() -> Self {
        Self::with_prober(builtin_drivers)
    }

    /// Registry without built-in drivers
    pub fn empty() -> Self {
        Self::with_prober(Vec::new)
    }

    /// Registry with a custom set of built-in drivers
    pub fn with_prober<F>(prober: F) -> Self
    where
        F: Fn() -> Vec<Arc<dyn AudioDriver>> + Send + Sync + 'static,
    {
        Self {
            state: RwLock::new(RegistryState::default()),
            prober: Box::new(prober),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    fn ensure_probed(&self) {
        {
            let state = self.state.read();
            if state.probed || !state.drivers.is_empty() {
                return;
            }
        }
        let mut state = self.state.write();
        if state.probed || !state.drivers.is_empty() {
            return;
        }
        state.probed = true;
        for driver in (self.prober)() {
            if state.position(&driver).is_none() {
                log::debug!("probed driver '{}'", driver.name());
                state.drivers.push(driver);
            }
        }
        if state.current.is_none() && !state.drivers.is_empty() {
            state.current = Some(0);
        }
    }

    /// Add `driver` and make it current. A driver that is already registered
    /// is only selected.
    pub fn register(&self, driver: Arc<dyn AudioDriver>) -> Arc<dyn AudioDriver> {
        let mut state = self.state.write();
        let index = match state.position(&driver) {
            Some(index) => index,
            None => {
                state.drivers.push(driver.clone());
                state.drivers.len() - 1
            }
        };
        state.current = Some(index);
        driver
    }

    /// All registered drivers in precedence order
    pub fn drivers(&self) -> Vec<Arc<dyn AudioDriver>> {
        self.ensure_probed();
        self.state.read().drivers.clone()
    }

    /// Describe all registered drivers
    pub fn list(&self) -> Vec<DriverInfo> {
        self.ensure_probed();
        let state = self.state.read();
        state
            .drivers
            .iter()
            .enumerate()
            .map(|(i, d)| DriverInfo {
                name: d.name().to_string(),
                description: d.description().to_string(),
                copyright: d.copyright().to_string(),
                current: state.current == Some(i),
                recording: d.supports_recording(),
            })
            .collect()
    }

    /// Number of registered drivers, without probing
    pub fn len(&self) -> usize {
        self.state.read().drivers.len()
    }

    /// Whether no driver is registered, without probing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the driver called `name` current.
    ///
    /// An unknown name is logged and leaves the selection unchanged.
    pub fn select(&self, name: &str) -> Option<Arc<dyn AudioDriver>> {
        self.ensure_probed();
        let mut state = self.state.write();
        match state.drivers.iter().position(|d| d.name() == name) {
            Some(index) => {
                state.current = Some(index);
                state.drivers.get(index).cloned()
            }
            None => {
                log::warn!("audio driver '{}' not found", name);
                None
            }
        }
    }

    /// The current driver
    pub fn current(&self) -> Option<Arc<dyn AudioDriver>> {
        self.ensure_probed();
        self.state.read().current()
    }

    /// The current driver, or an error when none is available
    pub fn require_current(&self) -> Result<Arc<dyn AudioDriver>> {
        self.current()
            .ok_or_else(|| Error::DeviceUnavailable("no audio drivers are available".to_string()))
    }

    /// Load a driver module, register it and make it current
    pub fn load_external<P: AsRef<Path>>(&self, path: P) -> Result<Arc<dyn AudioDriver>> {
        let driver = ExternalDriver::load(path)?;
        log::debug!("loaded driver '{}' from {}", driver.name(), driver.origin().display());
        Ok(self.register(Arc::new(driver)))
    }

    /// Validate an in-process descriptor, register it and make it current.
    ///
    /// # Safety
    /// Same contract as [`ExternalDriver::from_raw`]; the descriptor and its
    /// functions must live for the rest of the process.
    pub unsafe fn register_raw(&self, raw: *const RawDriver) -> Result<Arc<dyn AudioDriver>> {
        let driver = ExternalDriver::from_raw(raw, None, Path::new("<in-process>"))?;
        Ok(self.register(Arc::new(driver)))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in drivers available on this machine, platform default first
pub fn builtin_drivers() -> Vec<Arc<dyn AudioDriver>> {
    #[cfg(feature = "cpal-backend")]
    {
        crate::backends::CpalDriver::probe()
            .into_iter()
            .map(|d| Arc::new(d) as Arc<dyn AudioDriver>)
            .collect()
    }
    #[cfg(not(feature = "cpal-backend"))]
    {
        Vec::new()
    }
}
