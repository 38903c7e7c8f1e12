//! In-process fan-out of broadcast events to live subscribers.
//!
//! One [`EventHub`] exists per [`Channel`]. Handlers are plain callbacks invoked
//! synchronously from `publish`; they are expected to serialize and enqueue,
//! never to block. Stream endpoints hold a [`Subscription`] guard so that every
//! connection unsubscribes exactly once however it ends.
//!
//! ```text
//! publish(event)
//!     │  delivery lock (re-entrant, keeps publish order per channel)
//!     ▼
//! snapshot of subscribers ── handler 1 ── handler 2 ── … ── handler N
//!                               │ error / panic is counted, next handler still runs
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, ReentrantMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use logcast_core::{BroadcastEvent, Channel};

/// Interval between keepalive events.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Why a subscriber did not take an event.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The subscriber's transport is gone.
    #[error("subscriber closed")]
    Closed,
    #[error("subscriber failed: {0}")]
    Failed(String),
}

/// Subscriber callback.
pub type Handler = Arc<dyn Fn(&BroadcastEvent) -> Result<(), HandlerError> + Send + Sync>;

/// Opaque subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Snapshot of hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub events_published: u64,
    pub deliveries: u64,
    pub handler_failures: u64,
    pub subscribers: usize,
}

/// Hot-path counters, read through [`EventHub::stats`].
struct AtomicHubStats {
    events_published: AtomicU64,
    deliveries: AtomicU64,
    handler_failures: AtomicU64,
}

impl AtomicHubStats {
    fn new() -> Self {
        Self {
            events_published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }
}

struct Entry {
    id: SubscriptionId,
    handler: Handler,
    /// Cleared on unsubscribe so an in-flight publish skips it.
    active: AtomicBool,
}

/// Publish/subscribe registry for one channel.
pub struct EventHub {
    channel: Channel,
    /// Keep the last metrics sample for late subscribers.
    retain_latest: bool,
    subscribers: Mutex<Vec<Arc<Entry>>>,
    latest: Mutex<Option<BroadcastEvent>>,
    /// Serializes deliveries. Re-entrant so handlers may publish or subscribe.
    delivery: ReentrantMutex<()>,
    next_id: AtomicU64,
    stats: AtomicHubStats,
}

impl EventHub {
    /// Hub without retained state.
    pub fn new(channel: Channel) -> Self {
        Self::build(channel, false)
    }

    /// Hub that replays the most recent metrics sample to new subscribers.
    pub fn retaining(channel: Channel) -> Self {
        Self::build(channel, true)
    }

    fn build(channel: Channel, retain_latest: bool) -> Self {
        Self {
            channel,
            retain_latest,
            subscribers: Mutex::new(Vec::new()),
            latest: Mutex::new(None),
            delivery: ReentrantMutex::new(()),
            next_id: AtomicU64::new(1),
            stats: AtomicHubStats::new(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Register a handler. It sees every later publish, in subscription order
    /// relative to other handlers, plus the retained sample if there is one.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&BroadcastEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let _order = self.delivery.lock();

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry {
            id,
            handler: Arc::new(handler),
            active: AtomicBool::new(true),
        });
        self.subscribers.lock().push(entry.clone());
        log::debug!("{id} subscribed to {}", self.channel);

        let latest = self.latest.lock().clone();
        if let Some(event) = latest {
            self.deliver(&entry, &event);
        }
        id
    }

    /// Like [`subscribe`](Self::subscribe), returning a guard that
    /// unsubscribes when dropped.
    pub fn subscribe_scoped<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&BroadcastEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.subscribe(handler);
        Subscription {
            hub: self.clone(),
            id,
            active: true,
        }
    }

    /// Remove a handler. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        match subscribers.iter().position(|e| e.id == id) {
            Some(pos) => {
                let entry = subscribers.remove(pos);
                entry.active.store(false, Ordering::Release);
                log::debug!("{id} unsubscribed from {}", self.channel);
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every registered handler, in order.
    ///
    /// Returns how many handlers accepted it.
    pub fn publish(&self, event: BroadcastEvent) -> usize {
        let _order = self.delivery.lock();

        if self.retain_latest && matches!(event, BroadcastEvent::RealtimeMetrics(_)) {
            *self.latest.lock() = Some(event.clone());
        }

        let snapshot: Vec<Arc<Entry>> = self.subscribers.lock().clone();
        let delivered = snapshot
            .iter()
            .filter(|entry| self.deliver(entry, &event))
            .count();

        self.stats.events_published.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "{} {} delivered to {delivered}/{} subscribers",
            self.channel,
            event.event_type(),
            snapshot.len()
        );
        delivered
    }

    fn deliver(&self, entry: &Entry, event: &BroadcastEvent) -> bool {
        if !entry.active.load(Ordering::Acquire) {
            return false;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| (entry.handler)(event)));
        match outcome {
            Ok(Ok(())) => {
                self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(Err(HandlerError::Closed)) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                log::debug!("{} on {} is closed", entry.id, self.channel);
                false
            }
            Ok(Err(e)) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("{} on {} rejected {}: {e}", entry.id, self.channel, event.event_type());
                false
            }
            Err(_) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("{} on {} panicked handling {}", entry.id, self.channel, event.event_type());
                false
            }
        }
    }

    /// The retained metrics event, if any.
    pub fn latest(&self) -> Option<BroadcastEvent> {
        self.latest.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscribers.lock().iter().any(|e| e.id == id)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            events_published: self.stats.events_published.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            handler_failures: self.stats.handler_failures.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Unsubscribes on drop. Cancelling twice is a no-op.
pub struct Subscription {
    hub: Arc<EventHub>,
    id: SubscriptionId,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Unsubscribe now. Returns `true` only on the call that removed it.
    pub fn cancel(&mut self) -> bool {
        if !std::mem::replace(&mut self.active, false) {
            return false;
        }
        self.hub.unsubscribe(self.id)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.hub.channel())
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

/// The process-wide set of channel hubs.
pub struct Hubs {
    logs: Arc<EventHub>,
    metrics: Arc<EventHub>,
    /// Held by writers across id assignment and publish.
    write_order: Mutex<()>,
}

impl Hubs {
    pub fn new() -> Self {
        Self {
            logs: Arc::new(EventHub::new(Channel::LogEvents)),
            metrics: Arc::new(EventHub::retaining(Channel::PublicMetrics)),
            write_order: Mutex::new(()),
        }
    }

    /// Serialize a store write with its publish, so events leave in id order.
    pub fn write_order(&self) -> MutexGuard<'_, ()> {
        self.write_order.lock()
    }

    pub fn channel(&self, channel: Channel) -> &Arc<EventHub> {
        match channel {
            Channel::LogEvents => &self.logs,
            Channel::PublicMetrics => &self.metrics,
        }
    }

    pub fn publish(&self, channel: Channel, event: BroadcastEvent) -> usize {
        self.channel(channel).publish(event)
    }

    /// Publish a keepalive on every channel.
    pub fn publish_keepalive(&self) {
        for channel in Channel::ALL {
            self.publish(channel, BroadcastEvent::Keepalive);
        }
    }

    /// Publish keepalives every `period` until `shutdown` fires.
    pub fn spawn_keepalive(self: &Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let hubs = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => hubs.publish_keepalive(),
                }
            }
            log::debug!("Keepalive timer stopped");
        })
    }
}

impl Default for Hubs {
    fn default() -> Self {
        Self::new()
    }
}
