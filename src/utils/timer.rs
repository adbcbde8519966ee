//! Timer utilities

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::models::TestResult;

/// Times one work item, pairing a monotonic clock with wall-clock stamps
#[derive(Debug)]
pub struct Timer {
    label: String,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stamp start, end and duration onto a finished result
    pub fn finish(self, result: &mut TestResult) {
        let elapsed = self.elapsed();
        result.start_time = Some(self.started_at);
        result.end_time = Some(Utc::now());
        result.duration_ms = elapsed.as_millis() as u64;
        tracing::trace!("{}: {}ms", self.label, result.duration_ms);
    }
}
