//! Split read configuration

use crate::common::error::{CdcError, Result};
use crate::common::progress::DEFAULT_PROGRESS_INTERVAL;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default rows fetched per cursor round trip.
pub const DEFAULT_FETCH_SIZE: usize = 1024;

/// Configuration of a snapshot split read.
///
/// ```yaml
/// fetch_size: 4096
/// progress_interval: 30s
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSplitReadConfig {
    /// Rows fetched per cursor round trip
    pub fetch_size: usize,
    /// Minimum time between progress reports
    #[serde(with = "humantime_serde")]
    pub progress_interval: Duration,
}

impl Default for SnapshotSplitReadConfig {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl SnapshotSplitReadConfig {
    pub fn builder() -> SnapshotSplitReadConfigBuilder {
        SnapshotSplitReadConfigBuilder::default()
    }

    /// High-throughput preset.
    pub fn high_throughput() -> Self {
        Self {
            fetch_size: 8192,
            progress_interval: Duration::from_secs(30),
        }
    }

    /// Memory-efficient preset.
    pub fn low_memory() -> Self {
        Self {
            fetch_size: 256,
            progress_interval: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_size == 0 {
            return Err(CdcError::config("fetch_size must be greater than 0"));
        }
        if self.progress_interval.is_zero() {
            return Err(CdcError::config("progress_interval must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for SnapshotSplitReadConfig.
#[derive(Default)]
pub struct SnapshotSplitReadConfigBuilder {
    config: SnapshotSplitReadConfig,
}

impl SnapshotSplitReadConfigBuilder {
    pub fn fetch_size(mut self, size: usize) -> Self {
        self.config.fetch_size = size.max(1);
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval = interval;
        self
    }

    pub fn build(self) -> SnapshotSplitReadConfig {
        self.config
    }
}
