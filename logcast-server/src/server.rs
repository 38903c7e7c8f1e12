//! HTTP server: routing, background tasks, graceful shutdown.
//!
//! ```text
//! Producer ─POST /api/log──► ingest ──► LogStore
//!                               │
//!                               ▼
//!                        Hubs ─┬─ log-events ─────► /api/events (SSE)
//!   keepalive timer ──────────►│
//!   metrics poller ──► ingest ─┴─ public-metrics ─► /api/public/realtime-metrics (SSE)
//! ```

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::auth::SharedSecretAuth;
use crate::config::{ConfigError, ServerConfig};
use crate::handlers::{
    handle_chart_data, handle_clean, handle_ingest, handle_is_authed, handle_list_logs,
    handle_log_events, handle_realtime_metrics, handle_record_metrics, handle_search_messages,
    handle_search_servers, handle_stats, AppState,
};
use crate::hub::Hubs;
use crate::poller::{spawn_poller, HttpMetricsSource};
use crate::stats::AtomicServerStats;
use crate::storage::{LogStore, MemoryStore, RocksStore, StoreConfig, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The logcast HTTP server.
pub struct LogcastServer {
    state: AppState,
}

impl LogcastServer {
    /// Build a server over an existing store.
    pub fn new(config: ServerConfig, store: Arc<dyn LogStore>) -> Self {
        let auth = Arc::new(SharedSecretAuth::new(&config.auth));
        Self {
            state: AppState {
                store,
                hubs: Arc::new(Hubs::new()),
                auth,
                stats: Arc::new(AtomicServerStats::new()),
                config: Arc::new(config),
                shutdown: CancellationToken::new(),
            },
        }
    }

    /// Build a server with the store the config asks for: RocksDB when
    /// `storage_path` is set, in-memory otherwise.
    pub fn open(config: ServerConfig) -> Result<Self, ServerError> {
        let store: Arc<dyn LogStore> = match &config.storage_path {
            Some(path) => Arc::new(RocksStore::open(StoreConfig::at(path))?),
            None => {
                log::warn!("No storage_path configured, logs are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::new(config, store))
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn hubs(&self) -> &Arc<Hubs> {
        &self.state.hubs
    }

    /// Cancelling this token shuts the server down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/log", post(handle_ingest).get(handle_list_logs))
            .route("/api/search/messages", get(handle_search_messages))
            .route("/api/search/servers", get(handle_search_servers))
            .route("/api/events", get(handle_log_events))
            .route("/api/record-new-info", post(handle_record_metrics))
            .route("/api/clean", post(handle_clean))
            .route("/api/is-authed", get(handle_is_authed))
            .route("/api/stats", get(handle_stats))
            .route("/api/public/realtime-metrics", get(handle_realtime_metrics))
            .route("/api/public/get-chart-data", get(handle_chart_data))
            .with_state(self.state.clone())
    }

    /// Start the keepalive timer and, if configured, the metrics poller.
    fn spawn_background(&self) {
        let state = &self.state;
        state
            .hubs
            .spawn_keepalive(state.config.keepalive_interval(), state.shutdown.clone());

        if let Some(poll) = &state.config.metrics_poll {
            spawn_poller(
                Arc::new(HttpMetricsSource::new(poll.url.clone())),
                state.store.clone(),
                state.hubs.clone(),
                state.stats.clone(),
                poll.interval(),
                state.shutdown.clone(),
            );
        }
    }

    /// Serve on `listener` until the shutdown token is cancelled.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        self.spawn_background();
        let shutdown = self.shutdown_token();
        let app = self.router();

        log::info!("Logcast server listening on {}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        log::info!("Server shut down gracefully");
        Ok(())
    }

    /// Bind the configured address and serve until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.state.config.bind_addr).await?;
        let shutdown = self.shutdown_token();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
        self.serve(listener).await
    }
}

/// Listen for SIGTERM and SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => log::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
