//! Split descriptors
//!
//! A split is a bounded key-range slice of one table, scanned as a single
//! unit of snapshot work. Splits are produced by an external planner and are
//! read-only here.
//!
//! ```text
//!   key space of "public"."orders" (split key: id)
//!   ──────────────────────────────────────────────────────────▶
//!   │ split-0: (-∞, 1000) │ split-1: [1000, 2000) │ split-2: [2000, +∞) │
//! ```

use crate::common::error::{CdcError, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Fully qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    pub schema: String,
    pub table: String,
}

impl TableId {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Same table without the catalog, as used for catalog lookups.
    pub fn without_catalog(&self) -> Self {
        Self {
            catalog: None,
            schema: self.schema.clone(),
            table: self.table.clone(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.catalog {
            Some(catalog) => write!(f, "{}.{}.{}", catalog, self.schema, self.table),
            None => write!(f, "{}.{}", self.schema, self.table),
        }
    }
}

impl FromStr for TableId {
    type Err = CdcError;

    /// Parse `schema.table` or `catalog.schema.table`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(CdcError::config(format!("Invalid table identifier: {s}")));
        }
        match parts.as_slice() {
            [schema, table] => Ok(Self::new(*schema, *table)),
            [catalog, schema, table] => Ok(Self::new(*schema, *table).with_catalog(*catalog)),
            _ => Err(CdcError::config(format!("Invalid table identifier: {s}"))),
        }
    }
}

/// Semantic type of a split key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKeyType {
    Int16,
    Int32,
    Int64,
    Numeric,
    Float64,
    Text,
    Uuid,
    Date,
    Timestamp,
    TimestampTz,
    Bool,
    Json,
    Bytes,
}

impl SplitKeyType {
    /// PostgreSQL type name used to cast bound literals.
    pub fn sql_type(&self) -> &'static str {
        match self {
            SplitKeyType::Int16 => "int2",
            SplitKeyType::Int32 => "int4",
            SplitKeyType::Int64 => "int8",
            SplitKeyType::Numeric => "numeric",
            SplitKeyType::Float64 => "float8",
            SplitKeyType::Text => "text",
            SplitKeyType::Uuid => "uuid",
            SplitKeyType::Date => "date",
            SplitKeyType::Timestamp => "timestamp",
            SplitKeyType::TimestampTz => "timestamptz",
            SplitKeyType::Bool => "bool",
            SplitKeyType::Json => "jsonb",
            SplitKeyType::Bytes => "bytea",
        }
    }

    /// Whether range predicates over this type are meaningful.
    pub fn is_comparable(&self) -> bool {
        !matches!(
            self,
            SplitKeyType::Bool | SplitKeyType::Json | SplitKeyType::Bytes
        )
    }

    /// Map a catalog `data_type` name to a key type.
    pub fn from_sql_type(name: &str) -> Option<Self> {
        let t = match name.to_ascii_lowercase().as_str() {
            "smallint" | "int2" | "smallserial" => SplitKeyType::Int16,
            "integer" | "int" | "int4" | "serial" => SplitKeyType::Int32,
            "bigint" | "int8" | "bigserial" => SplitKeyType::Int64,
            "numeric" | "decimal" => SplitKeyType::Numeric,
            "double precision" | "float8" | "real" | "float4" => SplitKeyType::Float64,
            "text" | "character varying" | "varchar" | "character" | "char" | "bpchar"
            | "name" => SplitKeyType::Text,
            "uuid" => SplitKeyType::Uuid,
            "date" => SplitKeyType::Date,
            "timestamp without time zone" | "timestamp" => SplitKeyType::Timestamp,
            "timestamp with time zone" | "timestamptz" => SplitKeyType::TimestampTz,
            "boolean" | "bool" => SplitKeyType::Bool,
            "json" | "jsonb" => SplitKeyType::Json,
            "bytea" => SplitKeyType::Bytes,
            _ => return None,
        };
        Some(t)
    }

    /// Convert a JSON value into a comparable key of this type.
    pub fn parse_key(&self, value: &Value) -> Result<KeyValue> {
        let invalid = || {
            CdcError::query_construction(format!(
                "Value {value} is not a valid {} key",
                self.sql_type()
            ))
        };

        match self {
            SplitKeyType::Int16 | SplitKeyType::Int32 | SplitKeyType::Int64 => {
                let n = match value {
                    Value::Number(n) => n.as_i64().ok_or_else(invalid)?,
                    Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid())?,
                    _ => return Err(invalid()),
                };
                let in_range = match self {
                    SplitKeyType::Int16 => i16::try_from(n).is_ok(),
                    SplitKeyType::Int32 => i32::try_from(n).is_ok(),
                    _ => true,
                };
                if !in_range {
                    return Err(invalid());
                }
                Ok(KeyValue::Int(n))
            }
            SplitKeyType::Numeric => {
                let s = match value {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.trim().to_string(),
                    _ => return Err(invalid()),
                };
                if !is_decimal_literal(&s) {
                    return Err(invalid());
                }
                Ok(KeyValue::Numeric(s))
            }
            SplitKeyType::Float64 => {
                let f = match value {
                    Value::Number(n) => n.as_f64().ok_or_else(invalid)?,
                    Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid())?,
                    _ => return Err(invalid()),
                };
                if f.is_nan() {
                    return Err(invalid());
                }
                Ok(KeyValue::Float(f))
            }
            SplitKeyType::Text => match value {
                Value::String(s) => Ok(KeyValue::Text(s.clone())),
                _ => Err(invalid()),
            },
            SplitKeyType::Uuid => {
                let s = value.as_str().ok_or_else(invalid)?;
                uuid::Uuid::parse_str(s)
                    .map(KeyValue::Uuid)
                    .map_err(|_| invalid())
            }
            SplitKeyType::Date => {
                let s = value.as_str().ok_or_else(invalid)?;
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(KeyValue::Date)
                    .map_err(|_| invalid())
            }
            SplitKeyType::Timestamp => {
                let s = value.as_str().ok_or_else(invalid)?;
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                    .map(KeyValue::Timestamp)
                    .map_err(|_| invalid())
            }
            SplitKeyType::TimestampTz => {
                let s = value.as_str().ok_or_else(invalid)?;
                DateTime::parse_from_rfc3339(s)
                    .map(KeyValue::TimestampTz)
                    .map_err(|_| invalid())
            }
            SplitKeyType::Bool | SplitKeyType::Json | SplitKeyType::Bytes => {
                Err(CdcError::query_construction(format!(
                    "Type {} cannot be used as a split key",
                    self.sql_type()
                )))
            }
        }
    }
}

fn is_decimal_literal(s: &str) -> bool {
    let digits = s.strip_prefix(&['-', '+'][..]).unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next();
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    match frac_part {
        Some(frac) => {
            (!int_part.is_empty() || !frac.is_empty()) && all_digits(int_part) && all_digits(frac)
        }
        None => !int_part.is_empty() && all_digits(int_part),
    }
}

/// Sign, integer digits without leading zeros and fraction digits without
/// trailing zeros of a literal accepted by [`is_decimal_literal`].
fn decimal_parts(s: &str) -> (bool, &str, &str) {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let is_zero = int_part.is_empty() && frac_part.is_empty();
    (negative && !is_zero, int_part, frac_part)
}

/// Exact ordering of two decimal literals of arbitrary precision.
fn cmp_decimal(a: &str, b: &str) -> Ordering {
    let (neg_a, int_a, frac_a) = decimal_parts(a);
    let (neg_b, int_b, frac_b) = decimal_parts(b);
    let magnitude = int_a
        .len()
        .cmp(&int_b.len())
        .then_with(|| int_a.cmp(int_b))
        .then_with(|| frac_a.cmp(frac_b));
    match (neg_a, neg_b) {
        (false, false) => magnitude,
        (true, true) => magnitude.reverse(),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
    }
}

/// A typed split key value.
///
/// Only values of the same variant are ordered against each other.
#[derive(Debug, Clone)]
pub enum KeyValue {
    Int(i64),
    Float(f64),
    Numeric(String),
    Text(String),
    Uuid(uuid::Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (KeyValue::Int(a), KeyValue::Int(b)) => Some(a.cmp(b)),
            (KeyValue::Float(a), KeyValue::Float(b)) => a.partial_cmp(b),
            (KeyValue::Numeric(a), KeyValue::Numeric(b)) => Some(cmp_decimal(a, b)),
            (KeyValue::Text(a), KeyValue::Text(b)) => Some(a.cmp(b)),
            (KeyValue::Uuid(a), KeyValue::Uuid(b)) => Some(a.cmp(b)),
            (KeyValue::Date(a), KeyValue::Date(b)) => Some(a.cmp(b)),
            (KeyValue::Timestamp(a), KeyValue::Timestamp(b)) => Some(a.cmp(b)),
            (KeyValue::TimestampTz(a), KeyValue::TimestampTz(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Float(v) => write!(f, "{v}"),
            KeyValue::Numeric(v) => f.write_str(v),
            KeyValue::Text(v) => f.write_str(v),
            KeyValue::Uuid(v) => write!(f, "{}", v.hyphenated()),
            KeyValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            KeyValue::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            KeyValue::TimestampTz(v) => f.write_str(&v.to_rfc3339()),
        }
    }
}

fn default_end_inclusive() -> bool {
    true
}

/// A bounded key-range slice of one table.
///
/// Lower bound is inclusive. Upper bound is inclusive unless marked
/// exclusive. A missing bound means unbounded on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitDescriptor {
    split_id: String,
    table_id: TableId,
    split_key: String,
    split_key_type: SplitKeyType,
    #[serde(default)]
    split_start: Option<Value>,
    #[serde(default)]
    split_end: Option<Value>,
    #[serde(default = "default_end_inclusive")]
    end_inclusive: bool,
}

impl SplitDescriptor {
    /// Create an unbounded split over the whole table.
    pub fn new(
        split_id: impl Into<String>,
        table_id: TableId,
        split_key: impl Into<String>,
        split_key_type: SplitKeyType,
    ) -> Self {
        Self {
            split_id: split_id.into(),
            table_id,
            split_key: split_key.into(),
            split_key_type,
            split_start: None,
            split_end: None,
            end_inclusive: true,
        }
    }

    pub fn with_start(mut self, start: impl Into<Value>) -> Self {
        self.split_start = Some(start.into()).filter(|v: &Value| !v.is_null());
        self
    }

    pub fn with_end(mut self, end: impl Into<Value>) -> Self {
        self.split_end = Some(end.into()).filter(|v: &Value| !v.is_null());
        self
    }

    pub fn with_range(mut self, start: Option<Value>, end: Option<Value>) -> Self {
        self.split_start = start.filter(|v| !v.is_null());
        self.split_end = end.filter(|v| !v.is_null());
        self
    }

    /// Exclude the upper bound, for planners emitting adjacent splits that
    /// share a boundary value.
    pub fn with_exclusive_end(mut self) -> Self {
        self.end_inclusive = false;
        self
    }

    pub fn split_id(&self) -> &str {
        &self.split_id
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn split_key(&self) -> &str {
        &self.split_key
    }

    pub fn split_key_type(&self) -> SplitKeyType {
        self.split_key_type
    }

    pub fn split_start(&self) -> Option<&Value> {
        self.split_start.as_ref()
    }

    pub fn split_end(&self) -> Option<&Value> {
        self.split_end.as_ref()
    }

    pub fn is_end_inclusive(&self) -> bool {
        self.end_inclusive
    }

    pub fn is_first_split(&self) -> bool {
        self.split_start.is_none()
    }

    pub fn is_last_split(&self) -> bool {
        self.split_end.is_none()
    }

    /// Typed lower bound.
    pub fn lower_key(&self) -> Result<Option<KeyValue>> {
        self.split_start
            .as_ref()
            .map(|v| self.split_key_type.parse_key(v))
            .transpose()
    }

    /// Typed upper bound.
    pub fn upper_key(&self) -> Result<Option<KeyValue>> {
        self.split_end
            .as_ref()
            .map(|v| self.split_key_type.parse_key(v))
            .transpose()
    }

    /// Check that the bounds form a valid range over a comparable key.
    pub fn validate(&self) -> Result<()> {
        if self.split_id.is_empty() {
            return Err(CdcError::query_construction("Split id must not be empty"));
        }
        if self.split_key.is_empty() {
            return Err(CdcError::query_construction(format!(
                "Split {} has no split key column",
                self.split_id
            )));
        }
        if !self.split_key_type.is_comparable() {
            return Err(CdcError::query_construction(format!(
                "Split key {} of type {} is not comparable",
                self.split_key,
                self.split_key_type.sql_type()
            )));
        }

        let lower = self.lower_key()?;
        let upper = self.upper_key()?;
        if let (Some(lower), Some(upper)) = (&lower, &upper) {
            let ordered = match lower.partial_cmp(upper) {
                Some(Ordering::Less) => true,
                Some(Ordering::Equal) => self.end_inclusive,
                _ => false,
            };
            if !ordered {
                return Err(CdcError::query_construction(format!(
                    "Split {} has lower bound {} above upper bound {}",
                    self.split_id, lower, upper
                )));
            }
        }
        Ok(())
    }

    /// Check whether a key falls inside this split's bounds.
    pub fn contains(&self, key: &KeyValue) -> Result<bool> {
        if let Some(lower) = self.lower_key()? {
            match key.partial_cmp(&lower) {
                Some(Ordering::Less) | None => return Ok(false),
                _ => {}
            }
        }
        if let Some(upper) = self.upper_key()? {
            match key.partial_cmp(&upper) {
                Some(Ordering::Less) => {}
                Some(Ordering::Equal) if self.end_inclusive => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}
