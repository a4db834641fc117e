//! Audio backend implementations

#[cfg(feature = "cpal-backend")]
pub mod cpal_backend;
pub mod queue_backend;
pub mod stream_backend;

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalDriver;
pub use queue_backend::{
    NullSink, PcmSink, PcmSource, QueueDriver, QueueDriverBuilder, SilenceSource,
};
pub use stream_backend::StreamDriver;
