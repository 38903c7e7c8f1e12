//! Write path: persist first, then publish.

use logcast_core::{BroadcastEvent, Channel, LogRecord, MetricCounters, MetricSample, NewLog};

use crate::hub::Hubs;
use crate::stats::AtomicServerStats;
use crate::storage::{LogStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to persist logs: {0}")]
    Store(#[from] StoreError),
}

/// Normalize and store a batch, then publish one `log-added` event carrying
/// every stored row. An empty batch stores and publishes nothing.
///
/// Concurrent batches are published in the order their ids were assigned.
pub fn ingest_logs(
    store: &dyn LogStore,
    hubs: &Hubs,
    stats: &AtomicServerStats,
    batch: Vec<NewLog>,
) -> Result<Vec<LogRecord>, IngestError> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let pending = batch.into_iter().map(NewLog::normalize).collect();
    let _ordered = hubs.write_order();
    let rows = store.append_logs(pending).inspect_err(|e| {
        log::error!("Dropping ingest batch, store write failed: {e}");
    })?;

    stats.logs_ingested(rows.len());
    let delivered = hubs.publish(
        Channel::LogEvents,
        BroadcastEvent::LogAdded { rows: rows.clone() },
    );
    log::debug!("Ingested {} rows, delivered to {delivered} streams", rows.len());
    Ok(rows)
}

/// Persist a metrics sample and publish it on the public channel.
pub fn record_metrics(
    store: &dyn LogStore,
    hubs: &Hubs,
    stats: &AtomicServerStats,
    counters: MetricCounters,
) -> Result<MetricSample, IngestError> {
    let _ordered = hubs.write_order();
    let sample = store.append_metrics(counters)?;
    stats.metric_recorded();
    hubs.publish(
        Channel::PublicMetrics,
        BroadcastEvent::RealtimeMetrics(sample.clone()),
    );
    log::debug!("Recorded metrics sample {}", sample.metric_id);
    Ok(sample)
}
