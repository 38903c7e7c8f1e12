//! # logcast-server: log ingestion and live streaming
//!
//! Accepts log batches from game servers, stores them, and pushes every new
//! batch to connected dashboards over server-sent events.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  POST /api/log   ┌──────────────┐
//! │ Game server  │ ───────────────► │ ingest       │ ──► LogStore (RocksDB / memory)
//! └──────────────┘                  └──────┬───────┘
//!                                          │ publish after the write
//!                                          ▼
//!                                   ┌──────────────┐
//!                                   │ EventHub     │  one per channel
//!                                   └──────┬───────┘
//!                          ┌───────────────┼───────────────┐
//!                          ▼               ▼               ▼
//!                    EventStream     EventStream     EventStream   (one per connection)
//! ```
//!
//! ## Modules
//!
//! - [`hub`]: per-channel fan-out, keepalive timer
//! - [`stream`]: per-connection SSE stream with exactly-once unsubscribe
//! - [`storage`]: `LogStore` trait, RocksDB and in-memory stores, query helpers
//! - [`ingest`]: persist-then-publish write path
//! - [`poller`]: periodic metrics sampling
//! - [`handlers`] / [`server`]: axum routes and the server lifecycle

pub mod auth;
pub mod config;
pub mod handlers;
pub mod hub;
pub mod ingest;
pub mod poller;
pub mod server;
pub mod stats;
pub mod storage;
pub mod stream;

pub use auth::{AuthError, Authenticator, Principal, SharedSecretAuth, API_KEY_HEADER};
pub use config::{AuthConfig, ConfigError, MetricsPollConfig, ServerConfig};
pub use handlers::{ApiError, AppState};
pub use hub::{EventHub, HandlerError, HubStats, Hubs, Subscription, SubscriptionId};
pub use ingest::{ingest_logs, record_metrics, IngestError};
pub use poller::{spawn_poller, HttpMetricsSource, MetricsSource, SourceError};
pub use server::{LogcastServer, ServerError};
pub use stats::{AtomicServerStats, ServerStats};
pub use storage::{LogStore, MemoryStore, RocksStore, StoreConfig, StoreError};
pub use stream::{ConnectionPhase, EventStream, Frame};
