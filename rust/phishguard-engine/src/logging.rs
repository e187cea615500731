//! Structured logging helpers for sweep runs.

use std::time::Instant;

use crate::processors::SweepReport;

/// Timer for one processor sweep.
///
/// Logs the start at debug level and the outcome, with row counts and
/// duration, when finished.
#[derive(Debug)]
pub struct SweepTimer {
    processor: &'static str,
    start: Instant,
}

impl SweepTimer {
    /// Start timing a sweep and log it.
    #[must_use]
    pub fn start(processor: &'static str) -> Self {
        tracing::debug!(processor, "Sweep started");
        Self {
            processor,
            start: Instant::now(),
        }
    }

    /// Log a completed sweep with its row counts.
    pub fn finish(self, report: &SweepReport) {
        tracing::info!(
            processor = self.processor,
            examined = report.examined,
            advanced = report.advanced,
            duration_ms = self.start.elapsed().as_millis() as u64,
            "Sweep completed"
        );
    }

    /// Log a failed sweep. The next scheduled run retries the work.
    pub fn fail(self, error: &dyn std::fmt::Display) {
        tracing::error!(
            processor = self.processor,
            duration_ms = self.start.elapsed().as_millis() as u64,
            error = %error,
            "Sweep failed"
        );
    }
}
