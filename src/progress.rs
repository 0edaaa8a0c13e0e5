#![forbid(unsafe_code)]

//! Progress reporting for long-running scan tasks.

use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Receives progress for one task.
pub trait ProgressListener: Send + Sync {
    /// Records that `units` more units of work completed.
    fn add(&self, units: u64);

    /// Marks the task finished.
    fn done(&self);
}

/// Hands out a listener per named task.
pub trait ProgressMonitorFactory: Send + Sync {
    /// Starts tracking a task of `total` units.
    fn task(&self, name: &str, total: u64) -> Box<dyn ProgressListener>;
}

/// Factory whose listeners ignore everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

struct SilentListener;

impl ProgressListener for SilentListener {
    fn add(&self, _units: u64) {}

    fn done(&self) {}
}

impl ProgressMonitorFactory for NoProgress {
    fn task(&self, _name: &str, _total: u64) -> Box<dyn ProgressListener> {
        Box::new(SilentListener)
    }
}

/// Terminal progress bars on stderr, one per task.
pub struct ConsoleProgress {
    bars: MultiProgress,
    style: ProgressStyle,
}

impl ConsoleProgress {
    /// Draws to stderr.
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Draws to an explicit target; hidden targets are useful in tests.
    pub fn with_target(target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::with_template(
            "{prefix:>14.cyan.bold} [{bar:32.cyan/blue}] {pos}/{len} {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        Self {
            bars: MultiProgress::with_draw_target(target),
            style,
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

struct BarListener {
    bar: ProgressBar,
}

impl ProgressListener for BarListener {
    fn add(&self, units: u64) {
        self.bar.inc(units);
    }

    fn done(&self) {
        self.bar.finish();
    }
}

impl ProgressMonitorFactory for ConsoleProgress {
    fn task(&self, name: &str, total: u64) -> Box<dyn ProgressListener> {
        let bar = self.bars.add(ProgressBar::new(total));
        bar.set_style(self.style.clone());
        bar.set_prefix(name.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Box::new(BarListener { bar })
    }
}
