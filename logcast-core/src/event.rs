//! Events fanned out by the hub and their streaming text representation.
//!
//! Each event travels as one server-sent-events frame:
//! ```text
//! event: log-added
//! data: {"event":"log-added","rows":[...]}
//!
//! ```
//! Keepalives are comment frames (`:keepalive`) and carry no payload.

use serde::{Deserialize, Serialize};

use crate::model::{LogRecord, MetricSample};

/// Comment text of the keepalive frame.
pub const KEEPALIVE_COMMENT: &str = "keepalive";

/// Logical broadcast channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Newly ingested log rows. Requires authentication.
    LogEvents,
    /// Realtime game metrics. Public.
    PublicMetrics,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::LogEvents, Channel::PublicMetrics];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::LogEvents => "log-events",
            Channel::PublicMetrics => "public-metrics",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something published through the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BroadcastEvent {
    /// One ingest batch, all rows together.
    LogAdded { rows: Vec<LogRecord> },
    RealtimeMetrics(MetricSample),
    Keepalive,
}

impl BroadcastEvent {
    /// Label used on the `event:` line.
    pub fn event_type(&self) -> &'static str {
        match self {
            BroadcastEvent::LogAdded { .. } => "log-added",
            BroadcastEvent::RealtimeMetrics(_) => "realtime-metrics",
            BroadcastEvent::Keepalive => KEEPALIVE_COMMENT,
        }
    }

    pub fn is_keepalive(&self) -> bool {
        matches!(self, BroadcastEvent::Keepalive)
    }

    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(EventError::Encode)
    }
}

/// Event encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

/// An event as seen by a client: parsed when possible, raw otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedEvent {
    Parsed(BroadcastEvent),
    /// Payload that did not parse. Kept so nothing disappears silently.
    Raw {
        event_type: Option<String>,
        data: String,
    },
}

impl ReceivedEvent {
    /// Interpret one decoded frame.
    ///
    /// Returns `None` for frames without payload: comments, keepalives and
    /// empty data.
    pub fn from_frame(event_type: Option<&str>, data: &str) -> Option<Self> {
        if data.trim().is_empty() || data.starts_with(':') {
            return None;
        }
        if event_type == Some(KEEPALIVE_COMMENT) {
            return None;
        }
        match serde_json::from_str::<BroadcastEvent>(data) {
            Ok(BroadcastEvent::Keepalive) => None,
            Ok(event) => Some(ReceivedEvent::Parsed(event)),
            Err(e) => {
                log::debug!("Keeping unparsed {event_type:?} frame: {e}");
                Some(ReceivedEvent::Raw {
                    event_type: event_type.map(str::to_string),
                    data: data.to_string(),
                })
            }
        }
    }

    pub fn as_event(&self) -> Option<&BroadcastEvent> {
        match self {
            ReceivedEvent::Parsed(event) => Some(event),
            ReceivedEvent::Raw { .. } => None,
        }
    }

    /// Rows carried by a `log-added` event, empty for anything else.
    pub fn log_rows(&self) -> &[LogRecord] {
        match self {
            ReceivedEvent::Parsed(BroadcastEvent::LogAdded { rows }) => rows,
            _ => &[],
        }
    }
}
