//! # logcast-core: shared types for the logcast live log pipeline
//!
//! ```text
//! Producer ──► Ingest ──► LogStore (durable)
//!                 │
//!                 ▼
//!              EventHub ──► Stream endpoint ──SSE──► StreamSession ──► Reconciler
//! ```
//!
//! This crate holds what both ends agree on:
//!
//! - [`model`]: log rows, ingest entries, metric samples
//! - [`event`]: broadcast events, channels, client-side frame parsing
//! - [`query`]: search parameters and the paged search result

pub mod event;
pub mod model;
pub mod query;

pub use event::{BroadcastEvent, Channel, EventError, ReceivedEvent, KEEPALIVE_COMMENT};
pub use model::{
    Environment, Level, LogRecord, MetricCounters, MetricSample, NewLog, PendingLog,
    DEFAULT_SERVER_ID,
};
pub use query::{DateRange, LogQuery, MessageSearch, SearchPage};
