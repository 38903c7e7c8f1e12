//! Durable log and metrics storage.
//!
//! ```text
//! ┌──────────┐  append_logs   ┌─────────────────────────────────┐
//! │  Ingest  │ ─────────────► │ LogStore                        │
//! └──────────┘                │   MemoryStore (tests, no path)  │
//! ┌──────────┐  scan_logs     │   RocksStore                    │
//! │ Handlers │ ◄───────────── │     CF "logs"   : log rows     │
//! └──────────┘  (query.rs)    │     CF "metrics": samples      │
//!                             └─────────────────────────────────┘
//! ```
//!
//! Stores assign ids and timestamps. Ids are strictly increasing in commit
//! order; the query helpers in [`query`] rely on `scan_logs` visiting rows
//! newest first.

pub mod query;
pub mod rocks;

use std::ops::ControlFlow;

use chrono::Utc;
use parking_lot::Mutex;

use logcast_core::{DateRange, LogRecord, MetricCounters, MetricSample, PendingLog};

pub use query::{clean, list_servers, logs_matching, search_messages};
pub use rocks::{RocksStore, StoreConfig};

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("column family '{0}' not found")]
    MissingColumnFamily(&'static str),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Row and sample persistence.
pub trait LogStore: Send + Sync {
    /// Persist a batch atomically, returning the stored rows in batch order.
    fn append_logs(&self, batch: Vec<PendingLog>) -> Result<Vec<LogRecord>, StoreError>;

    /// Visit rows newest first until `visit` breaks.
    fn scan_logs(
        &self,
        visit: &mut dyn FnMut(&LogRecord) -> ControlFlow<()>,
    ) -> Result<(), StoreError>;

    /// Delete every row matching `predicate`. Returns how many were removed.
    fn delete_logs(&self, predicate: &dyn Fn(&LogRecord) -> bool) -> Result<usize, StoreError>;

    fn append_metrics(&self, counters: MetricCounters) -> Result<MetricSample, StoreError>;

    /// Samples recorded inside `range`, oldest first.
    fn metrics_between(&self, range: DateRange) -> Result<Vec<MetricSample>, StoreError>;

    fn log_count(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        self.scan_logs(&mut |_| {
            count += 1;
            ControlFlow::Continue(())
        })?;
        Ok(count)
    }
}

/// In-process store used when no storage path is configured.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    logs: Vec<LogRecord>,
    metrics: Vec<MetricSample>,
    last_log_id: u64,
    last_metric_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryStore {
    fn append_logs(&self, batch: Vec<PendingLog>) -> Result<Vec<LogRecord>, StoreError> {
        let mut inner = self.inner.lock();
        let logged_at = Utc::now();
        let mut stored = Vec::with_capacity(batch.len());
        for pending in batch {
            inner.last_log_id += 1;
            let record = pending.into_record(inner.last_log_id, logged_at);
            inner.logs.push(record.clone());
            stored.push(record);
        }
        Ok(stored)
    }

    fn scan_logs(
        &self,
        visit: &mut dyn FnMut(&LogRecord) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let inner = self.inner.lock();
        for row in inner.logs.iter().rev() {
            if visit(row).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn delete_logs(&self, predicate: &dyn Fn(&LogRecord) -> bool) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let before = inner.logs.len();
        inner.logs.retain(|row| !predicate(row));
        Ok(before - inner.logs.len())
    }

    fn append_metrics(&self, counters: MetricCounters) -> Result<MetricSample, StoreError> {
        let mut inner = self.inner.lock();
        inner.last_metric_id += 1;
        let sample = MetricSample {
            metric_id: inner.last_metric_id,
            counters,
            recorded_at: Utc::now(),
        };
        inner.metrics.push(sample.clone());
        Ok(sample)
    }

    fn metrics_between(&self, range: DateRange) -> Result<Vec<MetricSample>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .metrics
            .iter()
            .filter(|s| range.contains(s.recorded_at))
            .cloned()
            .collect())
    }

    fn log_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().logs.len())
    }
}
