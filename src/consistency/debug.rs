#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

/// Where verbose scan output goes.
#[derive(Clone)]
pub struct DebugContext {
    enabled: bool,
    sink: Arc<dyn Fn(&str) + Send + Sync>,
}

impl DebugContext {
    /// Emits nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            sink: Arc::new(|_| {}),
        }
    }

    /// Prints to stdout when `verbose` is set.
    pub fn verbose(verbose: bool) -> Self {
        Self {
            enabled: verbose,
            sink: Arc::new(|line| println!("{line}")),
        }
    }

    /// Enabled context writing to `sink`.
    pub fn with_sink(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            enabled: true,
            sink: Arc::new(sink),
        }
    }

    /// Returns true when output is emitted.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Emits the message built by `message` if enabled.
    pub fn debug(&self, message: impl FnOnce() -> String) {
        if self.enabled {
            (self.sink)(&message());
        }
    }
}

impl Default for DebugContext {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for DebugContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugContext")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
