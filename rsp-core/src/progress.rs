//! Progress reporting for long rasterization passes

use std::sync::Mutex;

use tracing::info;

/// Receives the completed fraction of a pass, in `[0, 1]`.
///
/// Called from worker threads, possibly out of order.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64);

    fn finished(&self) {
        self.report(1.0);
    }
}

/// Discards progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _fraction: f64) {}
}

/// Emits a `tracing` event each time another 10% completes
#[derive(Debug)]
pub struct LogProgress {
    label: String,
    last_decile: Mutex<u32>,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last_decile: Mutex::new(0),
        }
    }

    /// Deciles logged so far
    pub fn logged_deciles(&self) -> u32 {
        match self.last_decile.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl ProgressSink for LogProgress {
    fn report(&self, fraction: f64) {
        let decile = (fraction.clamp(0.0, 1.0) * 10.0).floor() as u32;
        let mut last = match self.last_decile.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if decile > *last {
            *last = decile;
            info!("{}: {}%", self.label, decile * 10);
        }
    }
}
