//! Per-connection event stream.
//!
//! ```text
//! EventHub ──handler──► unbounded queue ──► EventStream ──► Sse body
//!                                              │
//!                       drop / shutdown ───────┴──► unsubscribe (once)
//! ```
//!
//! The hub callback only encodes and enqueues. The stream owns the
//! [`Subscription`], so however the connection ends (client gone, write
//! failure, server shutdown) the handler is removed exactly once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::sse::Event;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use uuid::Uuid;

use logcast_core::{BroadcastEvent, Channel, EventError, KEEPALIVE_COMMENT};

use crate::hub::{EventHub, HandlerError, Subscription};
use crate::stats::AtomicServerStats;

/// One outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `:<text>` comment line.
    Comment(&'static str),
    /// `event: <event>` plus `data: <json>`.
    Message { event: &'static str, data: String },
}

impl Frame {
    pub fn keepalive() -> Self {
        Frame::Comment(KEEPALIVE_COMMENT)
    }

    pub fn encode(event: &BroadcastEvent) -> Result<Self, EventError> {
        if event.is_keepalive() {
            return Ok(Frame::keepalive());
        }
        Ok(Frame::Message {
            event: event.event_type(),
            data: event.to_json()?,
        })
    }

    pub fn into_sse(self) -> Event {
        match self {
            Frame::Comment(text) => Event::default().comment(text),
            Frame::Message { event, data } => Event::default().event(event).data(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Open,
    Closing,
    Closed,
}

/// Frames for one connected client.
pub struct EventStream {
    id: Uuid,
    channel: Channel,
    frames: mpsc::UnboundedReceiver<Frame>,
    subscription: Option<Subscription>,
    shutdown: Pin<Box<WaitForCancellationFutureOwned>>,
    phase: ConnectionPhase,
    stats: Arc<AtomicServerStats>,
}

impl EventStream {
    /// Queue the initial keepalive, then subscribe to `hub`.
    pub fn open(hub: &Arc<EventHub>, shutdown: CancellationToken, stats: Arc<AtomicServerStats>) -> Self {
        let id = Uuid::new_v4();
        let channel = hub.channel();
        let (tx, frames) = mpsc::unbounded_channel();

        // The receiver is alive, so this cannot fail.
        let _ = tx.send(Frame::keepalive());

        let subscription = hub.subscribe_scoped(move |event| {
            let frame = Frame::encode(event).map_err(|e| HandlerError::Failed(e.to_string()))?;
            tx.send(frame).map_err(|_| HandlerError::Closed)
        });

        stats.stream_opened();
        log::info!("Stream {id} opened on {channel}");

        Self {
            id,
            channel,
            frames,
            subscription: Some(subscription),
            shutdown: Box::pin(shutdown.cancelled_owned()),
            phase: ConnectionPhase::Open,
            stats,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Stop streaming and unsubscribe. Later calls do nothing.
    pub fn close(&mut self, reason: &str) {
        if self.phase != ConnectionPhase::Open {
            return;
        }
        self.phase = ConnectionPhase::Closing;
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.frames.close();
        self.phase = ConnectionPhase::Closed;
        self.stats.stream_closed();
        log::info!("Stream {} on {} closed: {reason}", self.id, self.channel);
    }
}

impl Stream for EventStream {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        let this = self.get_mut();
        if this.phase != ConnectionPhase::Open {
            return Poll::Ready(None);
        }
        if this.shutdown.as_mut().poll(cx).is_ready() {
            this.close("server shutdown");
            return Poll::Ready(None);
        }
        match this.frames.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(frame)),
            Poll::Ready(None) => {
                this.close("hub dropped the connection");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.close("client disconnected");
    }
}
