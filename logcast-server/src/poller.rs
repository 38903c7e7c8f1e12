//! Periodic metrics sampling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use logcast_core::MetricCounters;

use crate::hub::Hubs;
use crate::ingest::record_metrics;
use crate::stats::AtomicServerStats;
use crate::storage::LogStore;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metrics endpoint returned {0}")]
    Status(reqwest::StatusCode),
}

/// Where game counters come from.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn sample(&self) -> Result<MetricCounters, SourceError>;
}

/// Fetches `MetricCounters` JSON from a URL.
pub struct HttpMetricsSource {
    client: reqwest::Client,
    url: String,
}

impl HttpMetricsSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn sample(&self) -> Result<MetricCounters, SourceError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }
        Ok(response.json().await?)
    }
}

/// Sample every `period` until `shutdown`, persisting and publishing each
/// sample. Failed samples are logged and skipped.
pub fn spawn_poller(
    source: Arc<dyn MetricsSource>,
    store: Arc<dyn LogStore>,
    hubs: Arc<Hubs>,
    stats: Arc<AtomicServerStats>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!("Metrics poller started, every {}s", period.as_secs());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let counters = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = source.sample() => match result {
                    Ok(counters) => counters,
                    Err(e) => {
                        log::warn!("Skipping metrics sample: {e}");
                        continue;
                    }
                },
            };

            if let Err(e) = record_metrics(store.as_ref(), &hubs, &stats, counters) {
                log::warn!("Skipping metrics sample: {e}");
            }
        }
        log::info!("Metrics poller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use logcast_core::{BroadcastEvent, Channel};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Returns increasing visit counts, failing on every third call.
    struct Scripted {
        calls: AtomicU64,
    }

    #[async_trait]
    impl MetricsSource for Scripted {
        async fn sample(&self) -> Result<MetricCounters, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call % 3 == 0 {
                return Err(SourceError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
            }
            Ok(MetricCounters {
                visits: call,
                ..Default::default()
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_records_and_skips_failures() {
        let store = Arc::new(MemoryStore::new());
        let hubs = Arc::new(Hubs::new());
        let stats = Arc::new(AtomicServerStats::new());
        let shutdown = CancellationToken::new();

        let task = spawn_poller(
            Arc::new(Scripted {
                calls: AtomicU64::new(0),
            }),
            store.clone(),
            hubs.clone(),
            stats.clone(),
            Duration::from_secs(10),
            shutdown.clone(),
        );

        // Ticks at 0, 10, 20, 30 -> calls 1..=4, call 3 fails.
        tokio::time::sleep(Duration::from_secs(35)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(stats.snapshot().metric_samples, 3);
        match hubs.channel(Channel::PublicMetrics).latest() {
            Some(BroadcastEvent::RealtimeMetrics(sample)) => assert_eq!(sample.counters.visits, 4),
            other => panic!("unexpected retained event {other:?}"),
        }
    }
}
