use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Wall-clock stopwatch around a single transaction.
#[derive(Debug, Clone, Copy)]
pub struct UploadTimer {
    started: Instant,
}

impl UploadTimer {
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Running count and cumulative duration of uploads. Purely observational.
///
/// Individual durations live on each [`Histogram`](crate::Histogram).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTiming {
    pub uploads: usize,
    pub total: Duration,
}

impl SessionTiming {
    pub fn record(&mut self, elapsed: Duration) {
        self.uploads += 1;
        self.total += elapsed;
    }

    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    pub fn mean(&self) -> Option<Duration> {
        let n = u32::try_from(self.uploads).ok().filter(|&n| n > 0)?;
        Some(self.total / n)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
