//! Error types for the audiodrv library

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for audiodrv operations
#[derive(Error, Debug)]
pub enum Error {
    /// No usable device or driver, or the native device refused to open
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Sample layout, bit depth or file encoding that cannot be handled
    #[error("Unsupported format: {0}")]
    FormatUnsupported(String),

    /// Malformed or truncated RIFF/WAVE data
    #[error("Corrupt file: {0}")]
    CorruptFile(String),

    /// Handle does not name a live instance
    #[error("Invalid audio instance handle")]
    InvalidHandle,

    /// The driver does not implement this operation
    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    /// Operation is not valid in the instance's current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A wait was aborted by the interrupt hook
    #[error("Interrupted")]
    Interrupted,

    /// The driver module could not be opened
    #[error("Cannot load driver module {path}: {reason}")]
    ModuleLoadFailed {
        /// Module path as given by the caller
        path: PathBuf,
        /// Loader error text
        reason: String,
    },

    /// The module has no driver entry point
    #[error("{0} is not an audio driver")]
    NotADriver(PathBuf),

    /// The driver entry point returned no descriptor
    #[error("Audio driver {0} could not be initialized")]
    DriverInitFailed(PathBuf),

    /// The driver descriptor was built against another descriptor layout
    #[error("Incompatible driver module: expected descriptor size {expected}, found {found}")]
    IncompatibleModule {
        /// Descriptor size this library was built with
        expected: u32,
        /// Descriptor size reported by the module
        found: u32,
    },

    /// Native backend failure, with the backend's own error text or code
    #[error("Audio backend error: {0}")]
    Backend(String),

    /// Buffer allocation refused
    #[error("Out of memory")]
    OutOfMemory,

    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, Error>;
