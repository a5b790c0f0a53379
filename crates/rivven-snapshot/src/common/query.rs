//! Split scan query construction
//!
//! Builds the ordered range query for one split:
//!
//! ```sql
//! SELECT * FROM "public"."orders"
//!  WHERE "id" >= '1000'::int8 AND "id" < '2000'::int8
//!  ORDER BY "id"
//! ```
//!
//! Bound values are checked against the split key type before being inlined
//! as escaped literals with a server-side cast. A projected query lists the
//! schema columns instead of `*` and may render some of them as text:
//!
//! ```sql
//! SELECT "id", "total"::text AS "total" FROM "public"."orders" ORDER BY "id"
//! ```

use crate::common::error::{CdcError, Result};
use crate::common::schema::{ColumnDef, TableSchema};
use crate::common::split::{KeyValue, SplitDescriptor, TableId};
use std::fmt;

/// Quote an SQL identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quoted `"schema"."table"` reference. The catalog is not part of it.
pub fn table_reference(table_id: &TableId) -> String {
    format!(
        "{}.{}",
        quote_identifier(&table_id.schema),
        quote_identifier(&table_id.table)
    )
}

/// Range scan query for one split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitScanQuery {
    sql: String,
}

impl SplitScanQuery {
    pub fn build(split: &SplitDescriptor) -> Result<Self> {
        Self::build_select(split, "*".to_string(), false)
    }

    /// Select the schema's columns in ordinal order, casting those for which
    /// `as_text` holds to `text` under their own name. The ordering refers to
    /// the table column, not to a cast output column of the same name.
    pub fn build_projected(
        split: &SplitDescriptor,
        schema: &TableSchema,
        as_text: impl Fn(&ColumnDef) -> bool,
    ) -> Result<Self> {
        let mut columns: Vec<&ColumnDef> = schema.columns.iter().collect();
        if columns.is_empty() {
            return Self::build(split);
        }
        columns.sort_by_key(|c| c.position);

        let select = columns
            .into_iter()
            .map(|c| {
                let name = quote_identifier(&c.name);
                if as_text(c) {
                    format!("{name}::text AS {name}")
                } else {
                    name
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        Self::build_select(split, select, true)
    }

    fn build_select(split: &SplitDescriptor, select: String, qualify_order: bool) -> Result<Self> {
        split.validate()?;

        let key = quote_identifier(split.split_key());
        let sql_type = split.split_key_type().sql_type();
        let literal = |v: &KeyValue| format!("{}::{}", quote_literal(&v.to_string()), sql_type);

        let mut predicates = Vec::with_capacity(2);
        if let Some(lower) = split.lower_key()? {
            predicates.push(format!("{key} >= {}", literal(&lower)));
        }
        if let Some(upper) = split.upper_key()? {
            let op = if split.is_end_inclusive() { "<=" } else { "<" };
            predicates.push(format!("{key} {op} {}", literal(&upper)));
        }

        let table = table_reference(split.table_id());
        let mut sql = format!("SELECT {select} FROM {table}");
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        if qualify_order {
            sql.push_str(&table);
            sql.push('.');
        }
        sql.push_str(&key);

        if sql.contains('\0') {
            return Err(CdcError::query_construction(
                "Split scan query contains a NUL byte",
            ));
        }

        Ok(Self { sql })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl fmt::Display for SplitScanQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}
