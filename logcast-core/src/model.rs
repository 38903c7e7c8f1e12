//! Log rows and metric samples as they travel between producer, store and clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session id given to rows whose producer did not report one
/// (e.g. a game running inside the editor).
pub const DEFAULT_SERVER_ID: &str = "studio";

/// Log severity. Serialized as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Level {
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl TryFrom<u8> for Level {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            1 => Ok(Level::Info),
            2 => Ok(Level::Warning),
            3 => Ok(Level::Error),
            other => Err(format!("unknown log level {other}")),
        }
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> u8 {
        level as u8
    }
}

/// Where a log line was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Environment {
    Server,
    Client,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Server => "Server",
            Environment::Client => "Client",
        }
    }

    /// Parse the wire name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("server") {
            Some(Environment::Server)
        } else if name.eq_ignore_ascii_case("client") {
            Some(Environment::Client)
        } else {
            None
        }
    }
}

/// A stored log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Store-assigned, strictly increasing in insertion order.
    pub log_id: u64,
    pub server_id: String,
    pub message: String,
    pub message_lower: String,
    pub level: Level,
    pub environment: Environment,
    #[serde(default)]
    pub userid: Option<u64>,
    pub logged_at: DateTime<Utc>,
    /// Group size, only present on distinct-message search results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// One entry of an ingest batch as sent by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLog {
    #[serde(default)]
    pub server_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub message_lower: Option<String>,
    pub level: Level,
    pub environment: Environment,
    #[serde(default)]
    pub userid: Option<u64>,
}

/// An ingest entry with defaults applied, ready to be assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLog {
    pub server_id: String,
    pub message: String,
    pub message_lower: String,
    pub level: Level,
    pub environment: Environment,
    pub userid: Option<u64>,
}

impl NewLog {
    pub fn new(message: impl Into<String>, level: Level, environment: Environment) -> Self {
        Self {
            server_id: None,
            message: message.into(),
            message_lower: None,
            level,
            environment,
            userid: None,
        }
    }

    pub fn with_server(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    pub fn with_user(mut self, userid: u64) -> Self {
        self.userid = Some(userid);
        self
    }

    /// Apply ingest defaults: blank server ids fall back to [`DEFAULT_SERVER_ID`]
    /// and a missing lowercase copy is derived from the message.
    pub fn normalize(self) -> PendingLog {
        let server_id = match self.server_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => DEFAULT_SERVER_ID.to_string(),
        };
        let message_lower = self
            .message_lower
            .unwrap_or_else(|| self.message.to_lowercase());
        PendingLog {
            server_id,
            message: self.message,
            message_lower,
            level: self.level,
            environment: self.environment,
            userid: self.userid,
        }
    }
}

impl PendingLog {
    /// Attach the store-assigned identity.
    pub fn into_record(self, log_id: u64, logged_at: DateTime<Utc>) -> LogRecord {
        LogRecord {
            log_id,
            server_id: self.server_id,
            message: self.message,
            message_lower: self.message_lower,
            level: self.level,
            environment: self.environment,
            userid: self.userid,
            logged_at,
            count: None,
        }
    }
}

/// Game counters sampled by the metrics poller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricCounters {
    pub active_players: u64,
    pub visits: u64,
    pub likes: u64,
    pub dislikes: u64,
    pub favorites: u64,
}

/// A persisted metrics sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_id: u64,
    #[serde(flatten)]
    pub counters: MetricCounters,
    pub recorded_at: DateTime<Utc>,
}
