//! Table schemas used to size and position row tuples

use crate::common::error::{CdcError, Result};
use crate::common::split::TableId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// 1-based ordinal position in the table
    pub position: usize,
    pub type_name: String,
    pub nullable: bool,
}

/// Ordered column list of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_id: TableId,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            columns: Vec::new(),
        }
    }

    /// Append a nullable column at the next ordinal position.
    pub fn with_column(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let position = self.column_count() + 1;
        self.columns.push(ColumnDef {
            name: name.into(),
            position,
            type_name: type_name.into(),
            nullable: true,
        });
        self
    }

    /// Full width of a row tuple for this table.
    pub fn column_count(&self) -> usize {
        self.columns.iter().map(|c| c.position).max().unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        let mut columns: Vec<&ColumnDef> = self.columns.iter().collect();
        columns.sort_by_key(|c| c.position);
        columns.into_iter().map(|c| c.name.as_str()).collect()
    }
}

/// Catalog access for table schemas.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Column list of a table, in ordinal order.
    async fn table_schema(&self, table_id: &TableId) -> Result<TableSchema>;
}

/// In-memory schema catalog.
#[derive(Default)]
pub struct MemorySchemaProvider {
    tables: RwLock<HashMap<TableId, TableSchema>>,
}

impl MemorySchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, schema: TableSchema) {
        let key = schema.table_id.without_catalog();
        self.tables.write().await.insert(key, schema);
    }
}

#[async_trait]
impl SchemaProvider for MemorySchemaProvider {
    async fn table_schema(&self, table_id: &TableId) -> Result<TableSchema> {
        self.tables
            .read()
            .await
            .get(&table_id.without_catalog())
            .cloned()
            .ok_or_else(|| CdcError::schema(format!("Unknown table {table_id}")))
    }
}
