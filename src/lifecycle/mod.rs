#![forbid(unsafe_code)]

//! Ordered start/stop management for the resources a check holds.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::logging::Log;
use crate::types::{Result, SombraError};

/// A resource whose lifetime is managed by [`LifeSupport`].
///
/// Both hooks default to no-ops so components that only need teardown (or
/// only need startup) implement just that half.
pub trait Lifecycle: Send + Sync {
    /// Name used in logs when the component fails.
    fn name(&self) -> &str;

    /// Brings the component to a usable state.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Releases everything the component holds.
    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Status {
    Stopped,
    Started,
    Shutdown,
}

struct Entry {
    component: Arc<dyn Lifecycle>,
    started: bool,
}

/// A component that failed to stop during [`LifeSupport::shutdown`].
#[derive(Debug)]
pub struct StopFailure {
    /// Name of the failing component.
    pub component: String,
    /// Error returned by its `stop`.
    pub error: SombraError,
}

/// Ordered container of [`Lifecycle`] components.
///
/// Starts in registration order and stops in reverse. A failed start is not
/// rolled back: components already started stay started until
/// [`shutdown`](Self::shutdown), which stops exactly those. Once shut down the
/// container cannot be restarted.
pub struct LifeSupport {
    components: Vec<Entry>,
    status: Status,
    log: Arc<dyn Log>,
}

impl LifeSupport {
    /// Creates an empty container reporting stop failures to `log`.
    pub fn new(log: Arc<dyn Log>) -> Self {
        Self {
            components: Vec::new(),
            status: Status::Stopped,
            log,
        }
    }

    /// Registers a component and hands the same handle back.
    ///
    /// Adding to a running container starts the component immediately.
    pub fn add<T>(&mut self, component: Arc<T>) -> Result<Arc<T>>
    where
        T: Lifecycle + 'static,
    {
        if self.status == Status::Shutdown {
            return Err(SombraError::Unavailable(format!(
                "cannot add {} to a shut down life support",
                component.name()
            )));
        }
        let handle: Arc<dyn Lifecycle> = component.clone();
        let mut entry = Entry {
            component: handle,
            started: false,
        };
        if self.status == Status::Started {
            entry.component.start()?;
            entry.started = true;
        }
        self.components.push(entry);
        Ok(component)
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.status == Status::Shutdown
    }

    /// Starts every component not yet started, in registration order.
    ///
    /// Stops at the first failure and returns it.
    pub fn start(&mut self) -> Result<()> {
        match self.status {
            Status::Shutdown => {
                return Err(SombraError::Unavailable(
                    "life support has been shut down".into(),
                ))
            }
            Status::Started => return Ok(()),
            Status::Stopped => {}
        }
        for entry in self.components.iter_mut().filter(|entry| !entry.started) {
            debug!(component = entry.component.name(), "lifecycle.start");
            if let Err(err) = entry.component.start() {
                self.log.error(&format!(
                    "Failed to start component {}: {err}",
                    entry.component.name()
                ));
                return Err(err);
            }
            entry.started = true;
        }
        self.status = Status::Started;
        Ok(())
    }

    /// Stops every started component in reverse registration order.
    ///
    /// A failing `stop` is logged and does not prevent the remaining
    /// components from stopping. Calling this again does nothing.
    pub fn shutdown(&mut self) -> Vec<StopFailure> {
        if self.status == Status::Shutdown {
            return Vec::new();
        }
        self.status = Status::Shutdown;
        let mut failures = Vec::new();
        for entry in self.components.iter_mut().rev().filter(|entry| entry.started) {
            entry.started = false;
            let name = entry.component.name().to_string();
            debug!(component = %name, "lifecycle.stop");
            if let Err(error) = entry.component.stop() {
                warn!(component = %name, error = %error, "lifecycle.stop_failed");
                self.log
                    .error(&format!("Failure during shutdown of {name}: {error}"));
                failures.push(StopFailure {
                    component: name,
                    error,
                });
            }
        }
        failures
    }
}

impl Drop for LifeSupport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
