//! Player and recorder sessions

use crate::driver::{
    AudioDriver, DriverInstance, InstanceKind, PlayerOptions, RecorderOptions, WaitStatus,
};
use crate::error::{Error, Result};
use crate::sample::SampleBuffer;
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest sleep between two checks of the done flag
pub const MAX_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Created, never started
    Created,
    /// Delivering frames (or finished delivering them)
    Started,
    /// Paused by the caller
    Paused,
    /// Native resources released
    Closed,
}

/// One open player or recorder.
///
/// Holds the source or target buffer for its whole lifetime. Dropping an
/// instance closes and disposes it.
pub struct AudioInstance {
    driver: Arc<dyn AudioDriver>,
    kind: InstanceKind,
    state: InstanceState,
    buffer: Arc<SampleBuffer>,
    inner: Option<Box<dyn DriverInstance>>,
    wait_slice: Duration,
}

impl AudioInstance {
    /// Create a player on `driver`
    pub fn player(
        driver: Arc<dyn AudioDriver>,
        buffer: Arc<SampleBuffer>,
        options: &PlayerOptions,
    ) -> Result<Self> {
        let inner = driver.create_player(buffer.clone(), options)?;
        log::debug!(
            "created player on '{}' ({} samples, {} rows)",
            driver.name(),
            buffer.len(),
            buffer.rows()
        );
        Ok(Self::with_inner(driver, InstanceKind::Player, buffer, inner))
    }

    /// Create a recorder on `driver`
    pub fn recorder(
        driver: Arc<dyn AudioDriver>,
        buffer: Arc<SampleBuffer>,
        options: &RecorderOptions,
    ) -> Result<Self> {
        if !driver.supports_recording() {
            return Err(Error::UnsupportedOperation(format!(
                "driver '{}' doesn't support recording",
                driver.name()
            )));
        }
        let inner = driver.create_recorder(buffer.clone(), options)?;
        log::debug!(
            "created recorder on '{}' ({} samples)",
            driver.name(),
            buffer.len()
        );
        Ok(Self::with_inner(driver, InstanceKind::Recorder, buffer, inner))
    }

    fn with_inner(
        driver: Arc<dyn AudioDriver>,
        kind: InstanceKind,
        buffer: Arc<SampleBuffer>,
        inner: Box<dyn DriverInstance>,
    ) -> Self {
        Self {
            driver,
            kind,
            state: InstanceState::Created,
            buffer,
            inner: Some(inner),
            wait_slice: MAX_WAIT_SLICE,
        }
    }

    /// Use a shorter polling interval in [`wait`](Self::wait)
    pub fn with_wait_slice(mut self, slice: Duration) -> Self {
        self.wait_slice = clamp_slice(slice);
        self
    }

    /// Player or recorder
    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    /// Lifecycle state
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// The driver that created this instance
    pub fn driver(&self) -> &Arc<dyn AudioDriver> {
        &self.driver
    }

    /// Name of the driver that created this instance
    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Source (player) or target (recorder) buffer
    pub fn source(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    fn inner_mut(&mut self) -> Result<&mut Box<dyn DriverInstance>> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::InvalidState("instance has been disposed".to_string()))
    }

    /// Current frame index
    pub fn position(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.position())
    }

    /// Whether the stream finished or the instance was closed.
    ///
    /// Fails with the backend's error when the stream stopped on a native failure.
    pub fn is_done(&self) -> Result<bool> {
        if self.state == InstanceState::Closed {
            return Ok(true);
        }
        match &self.inner {
            Some(inner) => inner.poll_done(),
            None => Ok(true),
        }
    }

    /// Start delivering frames.
    ///
    /// Valid after creation, after a pause, and after the stream finished,
    /// in which case it plays again from the start.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            InstanceState::Closed => Err(Error::InvalidState("instance is closed".to_string())),
            InstanceState::Paused => {
                self.inner_mut()?.resume()?;
                self.state = InstanceState::Started;
                Ok(())
            }
            InstanceState::Started if !self.is_done()? => Ok(()),
            InstanceState::Created | InstanceState::Started => {
                self.inner_mut()?.start()?;
                self.state = InstanceState::Started;
                Ok(())
            }
        }
    }

    /// Stop delivery without releasing native resources
    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            InstanceState::Started => {
                self.inner_mut()?.pause()?;
                self.state = InstanceState::Paused;
                Ok(())
            }
            InstanceState::Paused => Ok(()),
            InstanceState::Created => {
                Err(Error::InvalidState("instance has not been started".to_string()))
            }
            InstanceState::Closed => Err(Error::InvalidState("instance is closed".to_string())),
        }
    }

    /// Continue after a pause
    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            InstanceState::Paused => {
                self.inner_mut()?.resume()?;
                self.state = InstanceState::Started;
                Ok(())
            }
            InstanceState::Started => Ok(()),
            InstanceState::Created => {
                Err(Error::InvalidState("instance has not been started".to_string()))
            }
            InstanceState::Closed => Err(Error::InvalidState("instance is closed".to_string())),
        }
    }

    /// Move back to the first frame; the run state is unchanged
    pub fn rewind(&mut self) -> Result<()> {
        self.inner_mut()?.rewind()
    }

    /// Block until the stream is done.
    ///
    /// `timeout` in seconds; negative waits indefinitely.
    pub fn wait(&self, timeout: f64) -> Result<WaitStatus> {
        let timeout = timeout_from_secs(timeout)?;
        wait_until(timeout, self.wait_slice, || self.is_done())
    }

    /// Stop and release native resources. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state == InstanceState::Closed {
            return Ok(());
        }
        self.state = InstanceState::Closed;
        self.inner_mut()?.close()
    }

    /// Close if needed and release everything, including the buffer hold
    pub fn dispose(mut self) -> Result<()> {
        let closed = self.close();
        if let Some(inner) = self.inner.take() {
            inner.dispose();
        }
        closed
    }
}

impl Drop for AudioInstance {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("closing {:?} on '{}' failed: {}", self.kind, self.driver.name(), e);
        }
        if let Some(inner) = self.inner.take() {
            inner.dispose();
        }
    }
}

impl std::fmt::Debug for AudioInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioInstance")
            .field("driver", &self.driver.name())
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("position", &self.position())
            .finish()
    }
}

pub(crate) fn clamp_slice(slice: Duration) -> Duration {
    slice.clamp(Duration::from_millis(1), MAX_WAIT_SLICE)
}

/// Convert a timeout in seconds. Negative or infinite means no timeout.
pub fn timeout_from_secs(secs: f64) -> Result<Option<Duration>> {
    if secs.is_nan() {
        return Err(Error::InvalidParameter("timeout is NaN".to_string()));
    }
    if secs < 0.0 {
        return Ok(None);
    }
    Ok(Duration::try_from_secs_f64(secs).ok())
}

/// Poll `is_done` every `slice` until it reports true or `timeout` elapses.
///
/// `is_done` runs once before the first sleep, so a zero timeout is a plain
/// check. An error from it ends the wait.
pub fn wait_until<F>(
    timeout: Option<Duration>,
    slice: Duration,
    mut is_done: F,
) -> Result<WaitStatus>
where
    F: FnMut() -> Result<bool>,
{
    let slice = clamp_slice(slice);
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if is_done()? {
            return Ok(WaitStatus::Done);
        }
        let nap = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(WaitStatus::TimedOut);
                }
                (deadline - now).min(slice)
            }
            None => slice,
        };
        thread::sleep(nap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_from_secs(-1.0).unwrap(), None);
        assert_eq!(timeout_from_secs(f64::INFINITY).unwrap(), None);
        assert_eq!(timeout_from_secs(0.25).unwrap(), Some(Duration::from_millis(250)));
        assert!(matches!(timeout_from_secs(f64::NAN), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_wait_until_times_out() {
        let start = Instant::now();
        let status =
            wait_until(Some(Duration::from_millis(30)), MAX_WAIT_SLICE, || Ok(false)).unwrap();
        assert_eq!(status, WaitStatus::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_until_stops_on_error() {
        let mut calls = 0;
        let result = wait_until(None, Duration::from_millis(1), || {
            calls += 1;
            if calls == 3 {
                Err(Error::Interrupted)
            } else {
                Ok(false)
            }
        });
        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(calls, 3);
    }
}
