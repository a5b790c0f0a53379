//! Snapshot split read task
//!
//! Drives the watermark protocol for exactly one split:
//!
//! ```text
//!  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!  │ 1. LOW       │──▶│ 2. scan rows │──▶│ 3. HIGH      │──▶│ 4. complete  │
//!  │ position +   │   │ DataChange   │   │ position +   │   │ split        │
//!  │ watermark    │   │ per row      │   │ watermark    │   │              │
//!  └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! HIGH and completion are only emitted after the whole range has been
//! enumerated. A failed or interrupted split leaves no HIGH watermark behind
//! and has to be re-read from scratch by the scheduler.

use crate::common::config::SnapshotSplitReadConfig;
use crate::common::cursor::{RowCursor, RowStream};
use crate::common::error::{CdcError, Result};
use crate::common::event::{DataChangeEvent, SourcePartition, WatermarkKind};
use crate::common::metrics::SnapshotMetrics;
use crate::common::offset::OffsetContext;
use crate::common::position::PositionSource;
use crate::common::progress::{ProgressReporter, ProgressTimer};
use crate::common::schema::{SchemaProvider, TableSchema};
use crate::common::sink::EventSink;
use crate::common::split::SplitDescriptor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Caller-side state of one split read.
///
/// Carries the cancellation signal in and the watermarks out.
#[derive(Debug)]
pub struct SplitReadContext<P> {
    cancellation: CancellationToken,
    low_watermark: Option<P>,
    high_watermark: Option<P>,
}

impl<P> SplitReadContext<P> {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            low_watermark: None,
            high_watermark: None,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn low_watermark(&self) -> Option<&P> {
        self.low_watermark.as_ref()
    }

    pub fn high_watermark(&self) -> Option<&P> {
        self.high_watermark.as_ref()
    }
}

impl<P> Default for SplitReadContext<P> {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// Outcome of a split read.
#[derive(Debug)]
pub enum SnapshotResult<P> {
    /// All rows exported and both watermarks emitted
    Completed { offset: OffsetContext<P> },
    /// Cancellation observed between rows
    Interrupted,
    Failed(CdcError),
}

impl<P> SnapshotResult<P> {
    pub fn is_completed(&self) -> bool {
        matches!(self, SnapshotResult::Completed { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, SnapshotResult::Interrupted)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SnapshotResult::Failed(_))
    }

    pub fn offset(&self) -> Option<&OffsetContext<P>> {
        match self {
            SnapshotResult::Completed { offset } => Some(offset),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CdcError> {
        match self {
            SnapshotResult::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Interruption maps to `CdcError::Interrupted`.
    pub fn into_result(self) -> Result<OffsetContext<P>> {
        match self {
            SnapshotResult::Completed { offset } => Ok(offset),
            SnapshotResult::Interrupted => Err(CdcError::Interrupted),
            SnapshotResult::Failed(e) => Err(e),
        }
    }
}

/// Per-invocation scan state. Owned by one `execute` call.
#[derive(Debug)]
pub struct SnapshotContext<P> {
    offset: OffsetContext<P>,
    rows_scanned: u64,
    started: Instant,
}

impl<P: Clone> SnapshotContext<P> {
    pub fn new(offset: OffsetContext<P>) -> Self {
        Self {
            offset,
            rows_scanned: 0,
            started: Instant::now(),
        }
    }

    pub fn offset(&self) -> &OffsetContext<P> {
        &self.offset
    }

    pub fn rows_scanned(&self) -> u64 {
        self.rows_scanned
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Reads one split between a LOW and a HIGH watermark.
///
/// Generic over its capabilities:
/// - `S`: change log position source
/// - `C`: row cursor
/// - `K`: event sink
/// - `R`: progress reporter
///
/// `execute` consumes the task, so a task runs at most once.
pub struct SnapshotSplitReadTask<S, C, K, R> {
    split: SplitDescriptor,
    position_source: S,
    row_cursor: C,
    sink: K,
    progress: R,
    schema_provider: Arc<dyn SchemaProvider>,
    partition: SourcePartition,
    config: SnapshotSplitReadConfig,
    metrics: Arc<SnapshotMetrics>,
}

impl<S, C, K, R> SnapshotSplitReadTask<S, C, K, R>
where
    S: PositionSource,
    C: RowCursor,
    K: EventSink<S::Position>,
    R: ProgressReporter,
{
    pub fn new(
        split: SplitDescriptor,
        position_source: S,
        row_cursor: C,
        sink: K,
        progress: R,
        schema_provider: Arc<dyn SchemaProvider>,
    ) -> Self {
        Self {
            split,
            position_source,
            row_cursor,
            sink,
            progress,
            schema_provider,
            partition: SourcePartition::default(),
            config: SnapshotSplitReadConfig::default(),
            metrics: Arc::new(SnapshotMetrics::default()),
        }
    }

    pub fn with_config(mut self, config: SnapshotSplitReadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_partition(mut self, partition: SourcePartition) -> Self {
        self.partition = partition;
        self
    }

    /// Share metrics across tasks of one source.
    pub fn with_metrics(mut self, metrics: Arc<SnapshotMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn split(&self) -> &SplitDescriptor {
        &self.split
    }

    /// Run the split read to an outcome.
    ///
    /// Every error is classified before it is returned; nothing is retried.
    pub async fn execute(
        self,
        context: &mut SplitReadContext<S::Position>,
    ) -> SnapshotResult<S::Position> {
        let started = Instant::now();
        self.metrics.record_split_started();

        match self.run(context).await {
            Ok(offset) => {
                self.metrics.record_split_completed(started.elapsed());
                info!(
                    split_id = %self.split.split_id(),
                    table = %self.split.table_id(),
                    position = %offset.position(),
                    "Snapshot split completed"
                );
                SnapshotResult::Completed { offset }
            }
            Err(CdcError::Interrupted) => {
                self.metrics.record_split_interrupted();
                warn!(
                    split_id = %self.split.split_id(),
                    table = %self.split.table_id(),
                    "Snapshot was interrupted before completion"
                );
                SnapshotResult::Interrupted
            }
            Err(e) => {
                self.metrics.record_split_failed(&e);
                error!(
                    split_id = %self.split.split_id(),
                    table = %self.split.table_id(),
                    code = e.error_code(),
                    retriable = e.is_retriable(),
                    "Snapshot split failed: {}",
                    e
                );
                SnapshotResult::Failed(e)
            }
        }
    }

    async fn run(
        &self,
        context: &mut SplitReadContext<S::Position>,
    ) -> Result<OffsetContext<S::Position>> {
        let split_id = self.split.split_id();
        let table_id = self.split.table_id();

        self.config.validate()?;
        self.split.validate()?;
        let schema = self
            .schema_provider
            .table_schema(&table_id.without_catalog())
            .await
            .map_err(|e| CdcError::snapshotting_failed(table_id.clone(), e))?;

        let low = self
            .position_source
            .current_position()
            .await
            .map_err(|e| CdcError::watermark_acquisition_failed(WatermarkKind::Low, e))?;
        info!(
            split_id = %split_id,
            "Snapshot step 1 - Determining low watermark {} for split {}",
            low,
            split_id
        );
        context.low_watermark = Some(low.clone());
        self.sink
            .emit_watermark(&self.partition, split_id, low.clone(), WatermarkKind::Low)
            .await
            .map_err(|e| CdcError::snapshotting_failed(table_id.clone(), e))?;

        let mut snapshot =
            SnapshotContext::new(OffsetContext::snapshot(self.partition.clone(), low.clone()));
        info!(split_id = %split_id, table = %table_id, "Snapshot step 2 - Snapshotting data");
        self.scan(context, &schema, &mut snapshot).await?;

        let high = self
            .position_source
            .current_position()
            .await
            .map_err(|e| CdcError::watermark_acquisition_failed(WatermarkKind::High, e))?;
        if high < low {
            return Err(CdcError::watermark_acquisition_failed(
                WatermarkKind::High,
                CdcError::source_unavailable(format!(
                    "high watermark {high} precedes low watermark {low}"
                )),
            ));
        }
        info!(
            split_id = %split_id,
            "Snapshot step 3 - Determining high watermark {} for split {}",
            high,
            split_id
        );
        context.high_watermark = Some(high.clone());
        self.sink
            .emit_watermark(&self.partition, split_id, high.clone(), WatermarkKind::High)
            .await
            .map_err(|e| CdcError::snapshotting_failed(table_id.clone(), e))?;
        self.sink
            .complete_split(split_id)
            .await
            .map_err(|e| CdcError::snapshotting_failed(table_id.clone(), e))?;

        let mut offset = snapshot.offset;
        offset.advance_to(high);
        Ok(offset)
    }

    async fn scan(
        &self,
        context: &SplitReadContext<S::Position>,
        schema: &TableSchema,
        snapshot: &mut SnapshotContext<S::Position>,
    ) -> Result<()> {
        let table_id = self.split.table_id();
        let mut stream = self
            .row_cursor
            .open(&self.split, schema, self.config.fetch_size)
            .await
            .map_err(|e| match e {
                e @ CdcError::QueryConstruction(_) => e,
                other => CdcError::snapshotting_failed(table_id.clone(), other),
            })?;

        let exported = self
            .export_rows(context, schema, snapshot, stream.as_mut())
            .await;

        if let Err(e) = stream.close().await {
            warn!(
                split_id = %self.split.split_id(),
                table = %table_id,
                "Failed to close split scan: {}",
                e
            );
        }
        self.metrics.record_rows(snapshot.rows_scanned);
        exported?;

        info!(
            split_id = %self.split.split_id(),
            table = %table_id,
            rows = snapshot.rows_scanned,
            "Finished exporting {} records for split '{}', total duration '{:?}'",
            snapshot.rows_scanned,
            self.split.split_id(),
            snapshot.elapsed()
        );
        Ok(())
    }

    async fn export_rows(
        &self,
        context: &SplitReadContext<S::Position>,
        schema: &TableSchema,
        snapshot: &mut SnapshotContext<S::Position>,
        stream: &mut dyn RowStream,
    ) -> Result<()> {
        let table_id = self.split.table_id();
        let width = schema.column_count();
        let mut timer = ProgressTimer::start(self.config.progress_interval);

        loop {
            if context.is_cancelled() {
                debug!(
                    split_id = %self.split.split_id(),
                    rows = snapshot.rows_scanned,
                    "Cancellation observed"
                );
                return Err(CdcError::Interrupted);
            }

            let row = match stream
                .next_row()
                .await
                .map_err(|e| CdcError::snapshotting_failed(table_id.clone(), e))?
            {
                Some(row) => row,
                None => return Ok(()),
            };
            snapshot.rows_scanned += 1;

            if timer.expired() {
                info!(
                    split_id = %self.split.split_id(),
                    table = %table_id,
                    "Exported {} records for split '{}' after {:?}",
                    snapshot.rows_scanned,
                    self.split.split_id(),
                    snapshot.elapsed()
                );
                self.progress.on_progress(table_id, snapshot.rows_scanned);
                timer.reset();
            }

            let stamp = snapshot
                .offset
                .event(table_id, chrono::Utc::now().timestamp_millis());
            let event = DataChangeEvent::new(table_id.clone(), stamp, row.fit_to(width));
            self.sink
                .emit_data_change(table_id, event)
                .await
                .map_err(|e| CdcError::snapshotting_failed(table_id.clone(), e))?;
        }
    }
}
