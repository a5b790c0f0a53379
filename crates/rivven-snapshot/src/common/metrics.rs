//! # Snapshot split read metrics
//!
//! Lock-free counters shared by every split read of one source. Each update
//! is also emitted to the `metrics` facade:
//!
//! | Metric | Type | Labels |
//! |---|---|---|
//! | `rivven_snapshot_splits_started_total` | counter | source |
//! | `rivven_snapshot_splits_completed_total` | counter | source |
//! | `rivven_snapshot_splits_failed_total` | counter | source, code |
//! | `rivven_snapshot_splits_interrupted_total` | counter | source |
//! | `rivven_snapshot_rows_total` | counter | source |
//! | `rivven_snapshot_split_duration_seconds` | histogram | source |

use crate::common::error::CdcError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Split read counters.
#[derive(Debug)]
pub struct SnapshotMetrics {
    /// Source label (server name)
    source: String,
    splits_started: AtomicU64,
    splits_completed: AtomicU64,
    splits_failed: AtomicU64,
    splits_interrupted: AtomicU64,
    rows: AtomicU64,
}

impl Default for SnapshotMetrics {
    fn default() -> Self {
        Self::new("default")
    }
}

impl SnapshotMetrics {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            splits_started: AtomicU64::new(0),
            splits_completed: AtomicU64::new(0),
            splits_failed: AtomicU64::new(0),
            splits_interrupted: AtomicU64::new(0),
            rows: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_split_started(&self) {
        self.splits_started.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_snapshot_splits_started_total",
            "source" => self.source.clone()
        )
        .increment(1);
    }

    pub fn record_split_completed(&self, duration: Duration) {
        self.splits_completed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_snapshot_splits_completed_total",
            "source" => self.source.clone()
        )
        .increment(1);
        metrics::histogram!(
            "rivven_snapshot_split_duration_seconds",
            "source" => self.source.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_split_failed(&self, error: &CdcError) {
        self.splits_failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_snapshot_splits_failed_total",
            "source" => self.source.clone(),
            "code" => error.error_code()
        )
        .increment(1);
    }

    #[inline]
    pub fn record_split_interrupted(&self) {
        self.splits_interrupted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_snapshot_splits_interrupted_total",
            "source" => self.source.clone()
        )
        .increment(1);
    }

    #[inline]
    pub fn record_rows(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.rows.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("rivven_snapshot_rows_total", "source" => self.source.clone())
            .increment(count);
    }

    pub fn snapshot(&self) -> SnapshotMetricsSnapshot {
        SnapshotMetricsSnapshot {
            splits_started: self.splits_started.load(Ordering::Relaxed),
            splits_completed: self.splits_completed.load(Ordering::Relaxed),
            splits_failed: self.splits_failed.load(Ordering::Relaxed),
            splits_interrupted: self.splits_interrupted.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SnapshotMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SnapshotMetricsSnapshot {
    pub splits_started: u64,
    pub splits_completed: u64,
    pub splits_failed: u64,
    pub splits_interrupted: u64,
    pub rows: u64,
}

impl SnapshotMetricsSnapshot {
    /// Splits that have started but not yet reached an outcome.
    pub fn in_flight(&self) -> u64 {
        self.splits_started.saturating_sub(
            self.splits_completed + self.splits_failed + self.splits_interrupted,
        )
    }
}
