//! # audiodrv
//!
//! Play and record sample buffers through pluggable audio drivers.
//!
//! Drivers are registered in a [`Registry`]: the built-in CPAL hosts, the
//! in-process queue and stream drivers, and modules loaded at runtime that
//! export a C descriptor. A [`SampleBuffer`] is played or filled through an
//! instance created on the current driver; WAVE files convert to and from
//! floating point buffers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use audiodrv::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let host = AudioHost::new()?;
//!
//! let buffer = Arc::new(wave::load("tone.wav")?);
//! let player = host.player(buffer, PlayerOptions::new())?;
//! host.start(player)?;
//! host.wait(player, -1.0)?;
//! host.dispose(player)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backends;
pub mod driver;
pub mod engine;
pub mod error;
pub mod external;
pub mod format;
pub mod host;
pub mod instance;
pub mod registry;
pub mod sample;
pub mod wave;

mod internal;

pub use driver::{
    AudioDriver, DriverInstance, InstanceKind, PlayerOptions, RecorderOptions, WaitStatus,
};
pub use error::{Error, Result};
pub use host::{AudioHost, AudioHostBuilder, HostConfig, InstanceHandle};
pub use instance::{AudioInstance, InstanceState};
pub use registry::{DriverInfo, Registry};
pub use sample::{SampleBuffer, SampleMeta, Samples};
pub use wave::WaveFormat;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        backends::{QueueDriver, StreamDriver},
        driver::{AudioDriver, InstanceKind, PlayerOptions, RecorderOptions, WaitStatus},
        error::{Error, Result},
        host::{AudioHost, AudioHostBuilder, InstanceHandle},
        instance::{AudioInstance, InstanceState},
        registry::{DriverInfo, Registry},
        sample::SampleBuffer,
        wave,
    };

    #[cfg(feature = "cpal-backend")]
    pub use crate::backends::CpalDriver;
}
