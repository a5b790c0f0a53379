//! Row cursors over table splits
//!
//! A [`RowCursor`] opens a bounded, ordered range scan for one split and
//! hands back a [`RowStream`]: a lazy, finite, single-pass sequence of
//! [`RowTuple`]s.
//!
//! Result columns are never trusted positionally. Each value is placed by
//! name at the ordinal position of its column in the table schema:
//!
//! ```text
//!   table schema:   a(1)  b(2)  c(3)
//!   query result:   [c, a]
//!                     │  └──────────┐
//!                     └────────┐    │
//!   row tuple:      [ a , null , c ]
//! ```

use crate::common::error::{CdcError, Result};
use crate::common::schema::TableSchema;
use crate::common::split::{KeyValue, SplitDescriptor, TableId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Full-width row, indexed by 0-based schema ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowTuple(Vec<Value>);

impl RowTuple {
    /// Row of `width` null values.
    pub fn with_width(width: usize) -> Self {
        Self(vec![Value::Null; width])
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Set the value at `index`, growing the row with nulls if needed.
    pub fn set(&mut self, index: usize, value: Value) {
        if index >= self.0.len() {
            self.0.resize(index + 1, Value::Null);
        }
        self.0[index] = value;
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Resize to exactly `width`: missing trailing columns become null and
    /// columns past the table's width are dropped.
    pub fn fit_to(mut self, width: usize) -> Self {
        self.0.resize(width, Value::Null);
        self
    }

    /// Convert into a JSON object keyed by column name.
    pub fn into_record(self, schema: &TableSchema) -> Map<String, Value> {
        let mut values = self.0;
        let mut record = Map::with_capacity(schema.columns.len());
        for column in &schema.columns {
            let value = column
                .position
                .checked_sub(1)
                .and_then(|idx| values.get_mut(idx))
                .map(Value::take)
                .unwrap_or(Value::Null);
            record.insert(column.name.clone(), value);
        }
        record
    }
}

/// Maps result-set columns to schema ordinals by name.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    targets: Vec<Option<usize>>,
    width: usize,
}

impl ColumnMapping {
    pub fn new<S: AsRef<str>>(result_columns: &[S], schema: &TableSchema) -> Self {
        let targets = result_columns
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let target = schema
                    .column(name)
                    .and_then(|c| c.position.checked_sub(1));
                if target.is_none() {
                    debug!(
                        table = %schema.table_id,
                        column = name,
                        "Result column not in table schema, ignoring"
                    );
                }
                target
            })
            .collect();

        Self {
            targets,
            width: schema.column_count(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Place result values at their schema positions.
    pub fn map_row(&self, values: impl IntoIterator<Item = Value>) -> RowTuple {
        let mut row = RowTuple::with_width(self.width);
        for (value, target) in values.into_iter().zip(&self.targets) {
            if let Some(idx) = target {
                row.set(*idx, value);
            }
        }
        row
    }
}

/// Opens range scans over table splits.
#[async_trait]
pub trait RowCursor: Send + Sync {
    /// Open a scan of `split` fetching `fetch_size` rows per round trip.
    ///
    /// Fails with `QueryConstruction` when the split cannot be turned into a
    /// valid range query.
    async fn open(
        &self,
        split: &SplitDescriptor,
        schema: &TableSchema,
        fetch_size: usize,
    ) -> Result<Box<dyn RowStream>>;
}

#[async_trait]
impl<C: RowCursor + ?Sized> RowCursor for Arc<C> {
    async fn open(
        &self,
        split: &SplitDescriptor,
        schema: &TableSchema,
        fetch_size: usize,
    ) -> Result<Box<dyn RowStream>> {
        (**self).open(split, schema, fetch_size).await
    }
}

/// Single-pass sequence of rows.
///
/// After `next_row` fails the stream is poisoned: later calls return an
/// error instead of resuming.
#[async_trait]
pub trait RowStream: Send {
    async fn next_row(&mut self) -> Result<Option<RowTuple>>;

    /// Release server-side resources.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Value>,
}

/// Row cursor over in-memory tables.
///
/// Rows are JSON objects. Bound semantics match the SQL scan: null keys are
/// only returned when the split is unbounded on both sides, and rows come
/// back in key order with nulls last.
#[derive(Default)]
pub struct MemoryRowCursor {
    tables: HashMap<TableId, MemoryTable>,
}

impl MemoryRowCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. `columns` is the result column list the scan returns.
    pub fn with_table<S: Into<String>>(
        mut self,
        table_id: TableId,
        columns: impl IntoIterator<Item = S>,
        rows: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.tables.insert(
            table_id.without_catalog(),
            MemoryTable {
                columns: columns.into_iter().map(Into::into).collect(),
                rows: rows.into_iter().collect(),
            },
        );
        self
    }
}

#[async_trait]
impl RowCursor for MemoryRowCursor {
    async fn open(
        &self,
        split: &SplitDescriptor,
        schema: &TableSchema,
        fetch_size: usize,
    ) -> Result<Box<dyn RowStream>> {
        split.validate()?;
        if schema.column(split.split_key()).is_none() {
            return Err(CdcError::query_construction(format!(
                "Split key {} is not a column of {}",
                split.split_key(),
                split.table_id()
            )));
        }

        let table = self
            .tables
            .get(&split.table_id().without_catalog())
            .ok_or_else(|| CdcError::scan_failed(format!("Table {} not found", split.table_id())))?;

        let unbounded = split.is_first_split() && split.is_last_split();
        let mut selected: Vec<(Option<KeyValue>, Vec<Value>)> = Vec::new();
        for row in &table.rows {
            let key = match row.get(split.split_key()) {
                None | Some(Value::Null) => None,
                Some(v) => Some(
                    split
                        .split_key_type()
                        .parse_key(v)
                        .map_err(|e| CdcError::scan_failed(e.to_string()))?,
                ),
            };
            let included = match &key {
                None => unbounded,
                Some(k) => split.contains(k)?,
            };
            if included {
                let values = table
                    .columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                selected.push((key, values));
            }
        }

        selected.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        Ok(Box::new(MemoryRowStream {
            mapping: ColumnMapping::new(table.columns.as_slice(), schema),
            pending: selected.into_iter().map(|(_, values)| values).collect(),
            buffer: VecDeque::new(),
            fetch_size: fetch_size.max(1),
        }))
    }
}

struct MemoryRowStream {
    mapping: ColumnMapping,
    pending: VecDeque<Vec<Value>>,
    buffer: VecDeque<RowTuple>,
    fetch_size: usize,
}

#[async_trait]
impl RowStream for MemoryRowStream {
    async fn next_row(&mut self) -> Result<Option<RowTuple>> {
        if self.buffer.is_empty() && !self.pending.is_empty() {
            let n = self.fetch_size.min(self.pending.len());
            for values in self.pending.drain(..n) {
                self.buffer.push_back(self.mapping.map_row(values));
            }
            debug!(rows = n, "Fetched batch");
        }
        Ok(self.buffer.pop_front())
    }
}
