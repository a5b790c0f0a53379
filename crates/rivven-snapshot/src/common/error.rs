//! Error types for snapshot split reads
//!
//! Every failure of a split is reported to the scheduler as one of the
//! variants below. Includes error classification for retry decisions and
//! alerting.

use crate::common::event::WatermarkKind;
use crate::common::split::TableId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Database-specific errors (query, protocol)
    Database,
    /// Change log position could not be determined
    Replication,
    /// Schema-related errors (catalog lookup, column mapping)
    Schema,
    /// Configuration or split descriptor errors
    Configuration,
    /// Output channel errors
    Sink,
    /// Cooperative cancellation
    Cancellation,
}

/// Errors raised while reading a snapshot split.
#[derive(Error, Debug)]
pub enum CdcError {
    /// PostgreSQL client error
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// The current change log position could not be determined
    #[error("Source unavailable: {message}")]
    SourceUnavailable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Split bounds or key type cannot form a valid scan query
    #[error("Query construction error: {0}")]
    QueryConstruction(String),

    /// I/O or protocol failure while enumerating rows
    #[error("Scan failed: {message}")]
    ScanFailed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The scan of a table split did not finish
    #[error("Snapshotting of table {table} failed: {source}")]
    SnapshottingFailed {
        table: TableId,
        #[source]
        source: Box<CdcError>,
    },

    /// Cancellation was observed between rows
    #[error("Snapshot split read interrupted")]
    Interrupted,

    /// A bracketing watermark could not be acquired
    #[error("Failed to acquire {kind} watermark: {source}")]
    WatermarkAcquisitionFailed {
        kind: WatermarkKind,
        #[source]
        source: Box<CdcError>,
    },

    /// Catalog lookup error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The event sink's receiving side is gone
    #[error("Event sink closed: {0}")]
    SinkClosed(String),
}

impl CdcError {
    /// Create a source unavailable error
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a source unavailable error with an underlying cause
    pub fn source_unavailable_with(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SourceUnavailable {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query construction error
    pub fn query_construction(msg: impl Into<String>) -> Self {
        Self::QueryConstruction(msg.into())
    }

    /// Create a scan failure
    pub fn scan_failed(msg: impl Into<String>) -> Self {
        Self::ScanFailed {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a scan failure with an underlying cause
    pub fn scan_failed_with(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ScanFailed {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a cause as the failure of a table split.
    ///
    /// Already wrapped errors are returned unchanged.
    pub fn snapshotting_failed(table: TableId, cause: CdcError) -> Self {
        match cause {
            e @ Self::SnapshottingFailed { .. } => e,
            e @ Self::Interrupted => e,
            other => Self::SnapshottingFailed {
                table,
                source: Box::new(other),
            },
        }
    }

    /// Wrap a cause as a failure to acquire a watermark
    pub fn watermark_acquisition_failed(kind: WatermarkKind, cause: CdcError) -> Self {
        Self::WatermarkAcquisitionFailed {
            kind,
            source: Box::new(cause),
        }
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a sink closed error
    pub fn sink_closed(msg: impl Into<String>) -> Self {
        Self::SinkClosed(msg.into())
    }

    /// Table named by a snapshotting failure.
    pub fn table(&self) -> Option<&TableId> {
        match self {
            Self::SnapshottingFailed { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Check if this error reports a cooperative cancellation.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Check if the split can be retried from scratch.
    ///
    /// Split descriptor and configuration errors need a fix before a retry
    /// can succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::SourceUnavailable { .. } => true,
            Self::ScanFailed { .. } => true,
            Self::Interrupted => true,
            Self::SnapshottingFailed { source, .. } => source.is_retriable(),
            Self::WatermarkAcquisitionFailed { source, .. } => source.is_retriable(),

            #[cfg(feature = "postgres")]
            Self::Postgres(e) => is_transient_pg_error(e),

            Self::QueryConstruction(_)
            | Self::Schema(_)
            | Self::Config(_)
            | Self::SinkClosed(_) => false,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => ErrorCategory::Database,
            Self::SourceUnavailable { .. } => ErrorCategory::Replication,
            Self::WatermarkAcquisitionFailed { .. } => ErrorCategory::Replication,
            Self::QueryConstruction(_) => ErrorCategory::Configuration,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::ScanFailed { .. } => ErrorCategory::Database,
            Self::SnapshottingFailed { .. } => ErrorCategory::Database,
            Self::Schema(_) => ErrorCategory::Schema,
            Self::SinkClosed(_) => ErrorCategory::Sink,
            Self::Interrupted => ErrorCategory::Cancellation,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => "postgres_error",
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::QueryConstruction(_) => "query_construction",
            Self::ScanFailed { .. } => "scan_failed",
            Self::SnapshottingFailed { .. } => "snapshotting_failed",
            Self::Interrupted => "interrupted",
            Self::WatermarkAcquisitionFailed { .. } => "watermark_acquisition_failed",
            Self::Schema(_) => "schema_error",
            Self::Config(_) => "config_error",
            Self::SinkClosed(_) => "sink_closed",
        }
    }
}

/// Check if a PostgreSQL error is transient.
#[cfg(feature = "postgres")]
fn is_transient_pg_error(e: &tokio_postgres::Error) -> bool {
    if let Some(db_error) = e.as_db_error() {
        let code = db_error.code().code();
        // Connection exception class (08xxx)
        if code.starts_with("08") {
            return true;
        }
        // Transaction rollback class (40xxx)
        if code.starts_with("40") {
            return true;
        }
        // Insufficient resources class (53xxx)
        if code.starts_with("53") {
            return true;
        }
        // Operator intervention class (57xxx) - except query_canceled
        if code.starts_with("57") && code != "57014" {
            return true;
        }
        return false;
    }

    e.is_closed()
}

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, CdcError>;
