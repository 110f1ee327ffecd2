//! Progress reporting
//!
//! The orchestrator reports through [`ProgressReporter`]; rendering is up to
//! the implementation. The default does nothing.

use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, info};

/// Progress sink for long-running steps
pub trait ProgressReporter: Send + Sync {
    /// Begin a bar of `total` units
    fn start_bar(&self, label: &str, total: u64);

    /// Advance the current bar by `n` units
    fn advance(&self, n: u64, status: &str);

    /// Finish the current bar
    fn stop(&self);
}

/// Default no-op reporter
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn start_bar(&self, _label: &str, _total: u64) {}
    fn advance(&self, _n: u64, _status: &str) {}
    fn stop(&self) {}
}

struct Bar {
    label: String,
    total: u64,
    done: u64,
    started: Instant,
}

/// Reporter that logs through tracing
#[derive(Default)]
pub struct LoggingProgress {
    bar: Mutex<Option<Bar>>,
}

impl LoggingProgress {
    /// Create a logging reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Units completed on the current bar
    pub fn done(&self) -> Option<u64> {
        self.bar.lock().as_ref().map(|bar| bar.done)
    }
}

impl ProgressReporter for LoggingProgress {
    fn start_bar(&self, label: &str, total: u64) {
        info!(label = label, total = total, "Started");
        *self.bar.lock() = Some(Bar {
            label: label.to_string(),
            total,
            done: 0,
            started: Instant::now(),
        });
    }

    fn advance(&self, n: u64, status: &str) {
        let mut bar = self.bar.lock();
        if let Some(bar) = bar.as_mut() {
            bar.done = (bar.done + n).min(bar.total);
            let percent = if bar.total > 0 {
                (bar.done as f32 / bar.total as f32) * 100.0
            } else {
                100.0
            };
            debug!(
                label = %bar.label,
                done = bar.done,
                total = bar.total,
                "{:.1}% {}",
                percent,
                status
            );
        }
    }

    fn stop(&self) {
        if let Some(bar) = self.bar.lock().take() {
            info!(
                label = %bar.label,
                done = bar.done,
                total = bar.total,
                elapsed_ms = bar.started.elapsed().as_millis() as u64,
                "Finished"
            );
        }
    }
}
