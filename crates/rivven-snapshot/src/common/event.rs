//! Events emitted by a snapshot split read
//!
//! Per split, the ordered stream delivered to the merge stage is:
//!
//! ```text
//! Watermark(LOW) → DataChange × N → Watermark(HIGH) → SplitCompleted
//! ```

use crate::common::cursor::RowTuple;
use crate::common::schema::TableSchema;
use crate::common::split::TableId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which end of the scan window a watermark marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatermarkKind {
    Low,
    High,
}

impl fmt::Display for WatermarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkKind::Low => f.write_str("LOW"),
            WatermarkKind::High => f.write_str("HIGH"),
        }
    }
}

/// Partition key of the output channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePartition {
    pub server_name: String,
}

impl SourcePartition {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }
}

impl Default for SourcePartition {
    fn default() -> Self {
        Self::new("rivven")
    }
}

impl fmt::Display for SourcePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.server_name)
    }
}

/// LOW or HIGH marker bracketing a split's scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkEvent<P> {
    pub partition: SourcePartition,
    pub split_id: String,
    pub kind: WatermarkKind,
    pub position: P,
}

/// Offset state stamped onto a data change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetStamp<P> {
    pub position: P,
    pub snapshot: bool,
    /// 1-based count of events stamped for this table in the current split
    pub table_sequence: u64,
    /// Unix epoch millis at which the read was attributed
    pub timestamp_ms: i64,
}

/// A snapshot row, emitted as a snapshot insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeEvent<P> {
    pub table_id: TableId,
    pub offset: OffsetStamp<P>,
    pub row: RowTuple,
}

impl<P> DataChangeEvent<P> {
    pub fn new(table_id: TableId, offset: OffsetStamp<P>, row: RowTuple) -> Self {
        Self {
            table_id,
            offset,
            row,
        }
    }

    /// Operation code of a snapshot read.
    pub fn op(&self) -> &'static str {
        "r"
    }

    /// Render as a change record with the row under `after`.
    pub fn to_record(&self, schema: &TableSchema) -> serde_json::Value
    where
        P: fmt::Display,
    {
        serde_json::json!({
            "schema": self.table_id.schema,
            "table": self.table_id.table,
            "op": self.op(),
            "before": null,
            "after": self.row.clone().into_record(schema),
            "source": {
                "position": self.offset.position.to_string(),
                "snapshot": self.offset.snapshot,
                "sequence": self.offset.table_sequence,
            },
            "ts_ms": self.offset.timestamp_ms,
        })
    }
}

/// Value delivered through an ordered split event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplitEvent<P> {
    Watermark(WatermarkEvent<P>),
    DataChange(DataChangeEvent<P>),
    SplitCompleted { split_id: String },
}

impl<P> SplitEvent<P> {
    /// Split this event belongs to, when it carries one.
    pub fn split_id(&self) -> Option<&str> {
        match self {
            SplitEvent::Watermark(w) => Some(&w.split_id),
            SplitEvent::SplitCompleted { split_id } => Some(split_id),
            SplitEvent::DataChange(_) => None,
        }
    }

    pub fn is_watermark(&self, kind: WatermarkKind) -> bool {
        matches!(self, SplitEvent::Watermark(w) if w.kind == kind)
    }
}
