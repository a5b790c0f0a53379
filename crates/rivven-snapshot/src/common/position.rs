//! Change log positions
//!
//! A position is an opaque, totally ordered token identifying a point in the
//! change log. Watermarks are positions read from a [`PositionSource`].

use crate::common::error::{CdcError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Marker for values usable as watermark positions.
pub trait Position: Clone + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> Position for T where T: Clone + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// Source of the current change log position.
#[async_trait]
pub trait PositionSource: Send + Sync {
    type Position: Position;

    /// Read the current position. Must not have side effects.
    async fn current_position(&self) -> Result<Self::Position>;
}

#[async_trait]
impl<S: PositionSource + ?Sized> PositionSource for Arc<S> {
    type Position = S::Position;

    async fn current_position(&self) -> Result<Self::Position> {
        (**self).current_position().await
    }
}

/// PostgreSQL log sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Lsn(value)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

/// Error parsing the `X/Y` text form of an LSN.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid LSN: {0}")]
pub struct LsnParseError(String);

impl FromStr for Lsn {
    type Err = LsnParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (hi, lo) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| LsnParseError(s.to_string()))?;
        let hi = u32::from_str_radix(hi, 16).map_err(|_| LsnParseError(s.to_string()))?;
        let lo = u32::from_str_radix(lo, 16).map_err(|_| LsnParseError(s.to_string()))?;
        Ok(Lsn(((hi as u64) << 32) | lo as u64))
    }
}

impl Serialize for Lsn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Lsn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// In-memory position source that replays scripted positions.
///
/// Once the script is exhausted the last position is repeated.
pub struct MemoryPositionSource<P> {
    positions: Mutex<VecDeque<P>>,
    last: Mutex<Option<P>>,
    fail_at: Option<u64>,
    calls: AtomicU64,
}

impl<P: Position> MemoryPositionSource<P> {
    pub fn new(positions: impl IntoIterator<Item = P>) -> Self {
        Self {
            positions: Mutex::new(positions.into_iter().collect()),
            last: Mutex::new(None),
            fail_at: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Fail the n-th call (1-based) with `SourceUnavailable`.
    pub fn with_failure_at(mut self, call: u64) -> Self {
        self.fail_at = Some(call);
        self
    }

    /// Number of `current_position` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<P: Position> PositionSource for MemoryPositionSource<P> {
    type Position = P;

    async fn current_position(&self) -> Result<P> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_at == Some(call) {
            return Err(CdcError::source_unavailable(format!(
                "position unavailable on call {call}"
            )));
        }

        let mut last = self.last.lock().await;
        if let Some(next) = self.positions.lock().await.pop_front() {
            *last = Some(next);
        }
        last.clone()
            .ok_or_else(|| CdcError::source_unavailable("no position recorded"))
    }
}
