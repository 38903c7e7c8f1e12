//! Server-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::hub::HubStats;

/// Snapshot of server counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub streams_opened: u64,
    pub streams_active: u64,
    pub logs_ingested: u64,
    pub metric_samples: u64,
}

/// Lock-free counters updated on the hot path.
#[derive(Debug, Default)]
pub struct AtomicServerStats {
    streams_opened: AtomicU64,
    streams_active: AtomicU64,
    logs_ingested: AtomicU64,
    metric_samples: AtomicU64,
}

impl AtomicServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        self.streams_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_closed(&self) {
        // Saturating so a stray close never wraps the gauge.
        let _ = self
            .streams_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn logs_ingested(&self, count: usize) {
        self.logs_ingested.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn metric_recorded(&self) {
        self.metric_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_active: self.streams_active.load(Ordering::Relaxed),
            logs_ingested: self.logs_ingested.load(Ordering::Relaxed),
            metric_samples: self.metric_samples.load(Ordering::Relaxed),
        }
    }
}

/// Per-channel hub counters, serializable for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub channel: &'static str,
    pub events_published: u64,
    pub deliveries: u64,
    pub handler_failures: u64,
    pub subscribers: usize,
}

impl ChannelStats {
    pub fn new(channel: &'static str, stats: HubStats) -> Self {
        Self {
            channel,
            events_published: stats.events_published,
            deliveries: stats.deliveries,
            handler_failures: stats.handler_failures,
            subscribers: stats.subscribers,
        }
    }
}
