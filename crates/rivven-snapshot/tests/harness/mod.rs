//! Test harness for snapshot split read tests
//!
//! Provides:
//! - Idempotent tracing setup
//! - A scripted row cursor with fault, cancellation and latency injection
//! - Event stream assertions for the watermark protocol
//! - A PostgreSQL testcontainer (`postgres` feature)

#![allow(dead_code)]

pub mod assertions;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use assertions::SplitEventVecExt;
#[cfg(feature = "postgres")]
pub use postgres::PostgresTestContainer;

use async_trait::async_trait;
use rivven_snapshot::common::{
    CdcError, Result, RowCursor, RowStream, RowTuple, SplitDescriptor, TableSchema,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Once;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("rivven_snapshot=debug".parse().unwrap())
                    .add_directive("testcontainers=info".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Row cursor yielding a fixed list of rows regardless of split bounds.
#[derive(Clone, Default)]
pub struct ScriptedCursor {
    rows: Vec<RowTuple>,
    fail_after: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
    delay: Option<Duration>,
}

impl ScriptedCursor {
    /// `count` rows with an increasing integer in the first column.
    pub fn with_rows(count: usize, width: usize) -> Self {
        let rows = (0..count)
            .map(|i| {
                let mut row = RowTuple::with_width(width);
                row.set(0, Value::from(i as i64));
                row
            })
            .collect();
        Self {
            rows,
            ..Default::default()
        }
    }

    /// Fail with `ScanFailed` once `rows` rows have been returned.
    pub fn fail_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }

    /// Cancel `token` when the `rows`-th row is returned.
    pub fn cancel_after(mut self, rows: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((rows, token));
        self
    }

    /// Sleep before returning each row.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl RowCursor for ScriptedCursor {
    async fn open(
        &self,
        _split: &SplitDescriptor,
        _schema: &TableSchema,
        _fetch_size: usize,
    ) -> Result<Box<dyn RowStream>> {
        Ok(Box::new(ScriptedStream {
            rows: self.rows.iter().cloned().collect(),
            returned: 0,
            fail_after: self.fail_after,
            cancel_after: self.cancel_after.clone(),
            delay: self.delay,
            failed: false,
        }))
    }
}

struct ScriptedStream {
    rows: VecDeque<RowTuple>,
    returned: usize,
    fail_after: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
    delay: Option<Duration>,
    failed: bool,
}

#[async_trait]
impl RowStream for ScriptedStream {
    async fn next_row(&mut self) -> Result<Option<RowTuple>> {
        if self.failed || self.fail_after == Some(self.returned) {
            self.failed = true;
            return Err(CdcError::scan_failed("connection reset by peer"));
        }

        let Some(row) = self.rows.pop_front() else {
            return Ok(None);
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.returned += 1;
        if let Some((n, token)) = &self.cancel_after {
            if *n == self.returned {
                token.cancel();
            }
        }
        Ok(Some(row))
    }
}
