//! Offset context of a snapshot split read

use crate::common::event::{OffsetStamp, SourcePartition};
use crate::common::split::TableId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Evolving offset state used to stamp outgoing data change events.
///
/// Events of a split are attributed to the split's LOW watermark; the
/// context only moves to the HIGH watermark once the scan has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetContext<P> {
    partition: SourcePartition,
    position: P,
    snapshot: bool,
    last_table: Option<TableId>,
    timestamp_ms: i64,
    /// Event counters keyed by table display name
    table_events: BTreeMap<String, u64>,
}

impl<P: Clone> OffsetContext<P> {
    /// Offset context for a snapshot read starting at `position`.
    pub fn snapshot(partition: SourcePartition, position: P) -> Self {
        Self {
            partition,
            position,
            snapshot: true,
            last_table: None,
            timestamp_ms: 0,
            table_events: BTreeMap::new(),
        }
    }

    /// Record an event for `table_id` read at `timestamp_ms`.
    pub fn event(&mut self, table_id: &TableId, timestamp_ms: i64) -> OffsetStamp<P> {
        let counter = self.table_events.entry(table_id.to_string()).or_insert(0);
        *counter += 1;
        let table_sequence = *counter;

        if self.last_table.as_ref() != Some(table_id) {
            self.last_table = Some(table_id.clone());
        }
        self.timestamp_ms = timestamp_ms;

        OffsetStamp {
            position: self.position.clone(),
            snapshot: self.snapshot,
            table_sequence,
            timestamp_ms,
        }
    }

    pub fn advance_to(&mut self, position: P) {
        self.position = position;
    }

    pub fn partition(&self) -> &SourcePartition {
        &self.partition
    }

    pub fn position(&self) -> &P {
        &self.position
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot
    }

    pub fn last_table(&self) -> Option<&TableId> {
        self.last_table.as_ref()
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn events_for(&self, table_id: &TableId) -> u64 {
        self.table_events
            .get(&table_id.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_events(&self) -> u64 {
        self.table_events.values().sum()
    }
}
