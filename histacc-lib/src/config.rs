use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_BIN_COUNT: u16 = 512;

// Default timeout for serial reads and peripheral responses
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Wall time of one peripheral "clock cycle" used for settle delays.
pub const DEFAULT_SETTLE_UNIT: Duration = Duration::from_millis(10);

/// Serial link parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Timing and sizing knobs of the protocol driver.
///
/// Settle delays are expressed in peripheral cycles and scaled by
/// `settle_unit`; none of them are protocol invariants, only calibration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub settle_unit: Duration,
    /// Pause before each data byte and before the terminator of a command.
    pub command_settle_cycles: u32,
    /// Pause between START_UPLOAD and its terminator.
    pub upload_settle_cycles: u32,
    /// Pause between consecutive uploads of a session.
    pub session_settle_cycles: u32,
    /// Upper bound for an acknowledgement, and for inactivity during an upload.
    pub response_timeout: Duration,
    /// How long the line must stay silent before `resync` gives up draining.
    pub drain_quiet: Duration,
    /// Bin count assumed until the first successful `set_bin_count`.
    pub default_bin_count: u16,
    /// Attach the undecoded bytes to every uploaded histogram.
    pub keep_raw_uploads: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            settle_unit: DEFAULT_SETTLE_UNIT,
            command_settle_cycles: 50,
            upload_settle_cycles: 10,
            session_settle_cycles: 500,
            response_timeout: DEFAULT_TIMEOUT,
            drain_quiet: Duration::from_millis(100),
            default_bin_count: DEFAULT_BIN_COUNT,
            keep_raw_uploads: false,
        }
    }
}

impl DriverConfig {
    pub fn with_settle_unit(mut self, unit: Duration) -> Self {
        self.settle_unit = unit;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_default_bin_count(mut self, bins: u16) -> Self {
        self.default_bin_count = bins;
        self
    }

    pub fn with_raw_uploads(mut self, keep: bool) -> Self {
        self.keep_raw_uploads = keep;
        self
    }

    pub fn with_drain_quiet(mut self, quiet: Duration) -> Self {
        self.drain_quiet = quiet;
        self
    }

    /// Settle time for the given number of peripheral cycles.
    pub fn cycles(&self, cycles: u32) -> Duration {
        self.settle_unit.saturating_mul(cycles)
    }
}
