//! # Common Snapshot Types and Traits
//!
//! Database-agnostic building blocks of a snapshot split read:
//!
//! - [`SplitDescriptor`] - Bounded key-range slice of a table
//! - [`PositionSource`] - Current change log position ([`Lsn`] for PostgreSQL)
//! - [`RowCursor`] / [`RowStream`] - Ordered range scans yielding [`RowTuple`]s
//! - [`ProgressReporter`] - Time-bounded progress callbacks
//! - [`EventSink`] - Ordered output channel ([`ChannelEventSink`])
//! - [`SnapshotSplitReadTask`] - LOW → scan → HIGH orchestrator
//! - [`SnapshotMetrics`] - Split read counters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SnapshotSplitReadTask                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PositionSource   ←─── LOW / HIGH watermark positions       │
//! │  SchemaProvider   ←─── Column ordinals, row width           │
//! │  RowCursor        ←─── Bounded, ordered split scan          │
//! │  ProgressReporter ←─── Rows scanned, once per interval      │
//! │  EventSink        ←─── Watermarks, rows, split completion   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod cursor;
mod error;
mod event;
mod metrics;
mod offset;
mod position;
mod progress;
mod query;
mod schema;
mod sink;
mod split;
mod task;

pub use self::metrics::{SnapshotMetrics, SnapshotMetricsSnapshot};
pub use config::*;
pub use cursor::*;
pub use error::*;
pub use event::*;
pub use offset::*;
pub use position::*;
pub use progress::*;
pub use query::*;
pub use schema::*;
pub use sink::*;
pub use split::*;
pub use task::*;
