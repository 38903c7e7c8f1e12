//! # logcast-client: live views over a logcast server
//!
//! ```text
//! ┌──────────────┐  SSE   ┌───────────────┐  queue  ┌──────────────┐
//! │ /api/events  │ ─────► │ StreamSession │ ──────► │ Reconciler   │ ──► rows
//! └──────────────┘        │ (reconnects)  │         │ (raw / agg.) │
//!                         └───────────────┘         └──────┬───────┘
//!                                                          │ one batch per pass
//!                                                          ▼
//!                                                   ActorDirectory
//! ```
//!
//! ## Modules
//!
//! - [`transport`]: opens one SSE connection and decodes frames
//! - [`session`]: reconnecting session with status and an event queue
//! - [`backoff`]: reconnect delays
//! - [`reconcile`]: filtered, bounded views and the metrics board
//! - [`enrich`]: actor placeholder rewriting
//! - [`query`]: historical queries for seeding views

pub mod backoff;
pub mod enrich;
pub mod query;
pub mod reconcile;
pub mod session;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use enrich::{
    enrich_rows, format_message, ActorDirectory, ActorProfile, HttpActorDirectory, UNKNOWN_ACTOR,
};
pub use query::{LogQueryClient, QueryError};
pub use reconcile::{
    DistinctTail, MetricsBoard, RawTail, Reconciler, ViewFilter, ViewMode, MAX_LIVE_ROWS,
};
pub use session::{SessionStatus, StreamSession};
pub use transport::{Credentials, EventTransport, Frame, FrameStream, HttpTransport, TransportError};
