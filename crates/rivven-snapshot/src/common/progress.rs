//! Time-bounded scan progress reporting

use crate::common::split::TableId;
use std::time::Duration;
use tokio::time::Instant;

/// Default interval between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Receives periodic row counts during a scan.
///
/// Purely observational: implementations must not block.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, table_id: &TableId, rows_scanned: u64);
}

impl<F> ProgressReporter for F
where
    F: Fn(&TableId, u64) + Send + Sync,
{
    fn on_progress(&self, table_id: &TableId, rows_scanned: u64) {
        self(table_id, rows_scanned)
    }
}

/// Reporter that discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressReporter;

impl ProgressReporter for NoopProgressReporter {
    fn on_progress(&self, _table_id: &TableId, _rows_scanned: u64) {}
}

/// Publishes rows scanned as a gauge labelled by table.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsProgressReporter;

impl ProgressReporter for MetricsProgressReporter {
    fn on_progress(&self, table_id: &TableId, rows_scanned: u64) {
        metrics::gauge!("rivven_snapshot_split_rows_scanned", "table" => table_id.to_string())
            .set(rows_scanned as f64);
    }
}

/// Monotonic interval timer.
#[derive(Debug, Clone)]
pub struct ProgressTimer {
    interval: Duration,
    deadline: Instant,
}

impl ProgressTimer {
    pub fn start(interval: Duration) -> Self {
        Self {
            interval,
            deadline: Instant::now() + interval,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn reset(&mut self) {
        self.deadline = Instant::now() + self.interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
