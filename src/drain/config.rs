//! Drain loop configuration.

use std::time::Duration;

/// Default number of entries read per drain cycle.
const DEFAULT_BATCH_SIZE: usize = 100;

/// Default interval between drain cycles (1 second).
const DEFAULT_INTERVAL_MS: u64 = 1_000;

/// Configuration for a [`Drainer`](super::Drainer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainConfig {
    /// Maximum entries read from the spool per cycle.
    ///
    /// Default: 100. Configure via `ACTION_SPOOL_DRAIN_BATCH`.
    pub batch_size: usize,

    /// Interval between cycles of the background loop.
    ///
    /// Default: 1 second. Configure via `ACTION_SPOOL_DRAIN_INTERVAL_MS`.
    pub interval: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainConfig {
    pub fn new() -> Self {
        DrainConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
        }
    }

    /// Creates a `DrainConfig` from environment variables, falling back to
    /// defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let batch_size = std::env::var("ACTION_SPOOL_DRAIN_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let interval_ms = std::env::var("ACTION_SPOOL_DRAIN_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_INTERVAL_MS);

        DrainConfig {
            batch_size,
            interval: Duration::from_millis(interval_ms),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}
