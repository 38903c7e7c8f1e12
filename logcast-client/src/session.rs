//! Long-lived stream session with automatic reconnect.
//!
//! ```text
//!            open ok                      transport error
//! Connecting ───────► Connected ─────────────────────────► Error
//!     ▲                                                      │
//!     └──────────── wait min(base·2^attempt, max) ◄──────────┘
//!
//! close() / drop from any state ──► Closed
//! unauthorized ──► Error (terminal, no retry)
//! ```
//!
//! Received events accumulate in a queue that consumers drain; the session
//! never interprets them beyond parsing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logcast_core::ReceivedEvent;

use crate::backoff::ReconnectPolicy;
use crate::transport::{EventTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Connected,
    Error,
    Closed,
}

struct Shared {
    queue: Mutex<Vec<ReceivedEvent>>,
    last_error: Mutex<Option<TransportError>>,
    /// Consecutive failed connection attempts.
    attempt: AtomicU32,
    status: watch::Sender<SessionStatus>,
    arrived: Notify,
}

impl Shared {
    fn set_status(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }

    /// Closed, or stopped by an error that will not be retried.
    fn is_finished(&self, status: SessionStatus) -> bool {
        match status {
            SessionStatus::Closed => true,
            SessionStatus::Error => self
                .last_error
                .lock()
                .as_ref()
                .is_some_and(TransportError::is_fatal),
            _ => false,
        }
    }

    fn push(&self, event: ReceivedEvent) {
        self.queue.lock().push(event);
        self.arrived.notify_waiters();
    }
}

/// A reconnecting subscription to one event stream.
pub struct StreamSession {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Start connecting with the default reconnect policy.
    pub fn connect(transport: Arc<dyn EventTransport>) -> Self {
        Self::with_policy(transport, ReconnectPolicy::default())
    }

    pub fn with_policy(transport: Arc<dyn EventTransport>, policy: ReconnectPolicy) -> Self {
        let (status, _) = watch::channel(SessionStatus::Connecting);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
            attempt: AtomicU32::new(0),
            status,
            arrived: Notify::new(),
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(transport, shared.clone(), policy, cancel.clone()));

        Self {
            shared,
            cancel,
            task: Some(task),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    /// Watch status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// Whether the session has stopped for good: closed, or rejected.
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished(self.status())
    }

    /// Wait until the session reaches `wanted`. Returns `false` if the session
    /// finished first.
    pub async fn wait_for_status(&self, wanted: SessionStatus) -> bool {
        let mut rx = self.subscribe_status();
        let shared = &self.shared;
        let reached = rx
            .wait_for(|s| *s == wanted || shared.is_finished(*s))
            .await
            .map(|s| *s == wanted);
        reached.unwrap_or(false)
    }

    pub fn last_error(&self) -> Option<TransportError> {
        self.shared.last_error.lock().clone()
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Copy of the queued events.
    pub fn events(&self) -> Vec<ReceivedEvent> {
        self.shared.queue.lock().clone()
    }

    /// Take every queued event, leaving the queue empty.
    pub fn drain_events(&self) -> Vec<ReceivedEvent> {
        std::mem::take(&mut *self.shared.queue.lock())
    }

    pub fn clear_events(&self) {
        self.shared.queue.lock().clear();
    }

    /// Wait until the queue is non-empty. Returns `false` once the session has
    /// finished and nothing is left to read.
    pub async fn wait_for_events(&self) -> bool {
        loop {
            let arrived = self.shared.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if self.pending() > 0 {
                return true;
            }
            if self.is_finished() {
                return false;
            }
            arrived.await;
        }
    }

    /// Stop the session: cancel any pending reconnect and close the transport.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Stream session task ended abnormally: {e}");
            }
        }
        self.shared.set_status(SessionStatus::Closed);
        self.shared.arrived.notify_waiters();
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared.set_status(SessionStatus::Closed);
        self.shared.arrived.notify_waiters();
    }
}

enum Ended {
    Cancelled,
    Failed(TransportError),
}

async fn run(
    transport: Arc<dyn EventTransport>,
    shared: Arc<Shared>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
) {
    loop {
        shared.set_status(SessionStatus::Connecting);
        match connection(transport.as_ref(), &shared, &cancel).await {
            Ended::Cancelled => break,
            Ended::Failed(error) => {
                let fatal = error.is_fatal();
                *shared.last_error.lock() = Some(error.clone());
                shared.set_status(SessionStatus::Error);
                if fatal {
                    log::error!("Event stream rejected: {error}; not reconnecting");
                    shared.arrived.notify_waiters();
                    return;
                }

                let attempt = shared.attempt.fetch_add(1, Ordering::AcqRel);
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "Event stream failed: {error}; reconnecting in {}ms",
                    delay.as_millis()
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    shared.set_status(SessionStatus::Closed);
    shared.arrived.notify_waiters();
}

/// Open once and pump frames into the queue until the connection ends.
async fn connection(
    transport: &dyn EventTransport,
    shared: &Shared,
    cancel: &CancellationToken,
) -> Ended {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return Ended::Cancelled,
        opened = transport.open() => opened,
    };
    let mut frames = match opened {
        Ok(frames) => frames,
        Err(e) => return Ended::Failed(e),
    };

    shared.attempt.store(0, Ordering::Release);
    *shared.last_error.lock() = None;
    shared.set_status(SessionStatus::Connected);
    log::info!("Event stream connected");

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ended::Cancelled,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(frame)) => {
                if let Some(event) = ReceivedEvent::from_frame(frame.event.as_deref(), &frame.data) {
                    shared.push(event);
                }
            }
            Some(Err(e)) => return Ended::Failed(e),
            None => return Ended::Failed(TransportError::Closed),
        }
    }
}
