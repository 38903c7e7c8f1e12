//! Client against a real server on a free port.

use std::net::SocketAddr;
use std::sync::Arc;

use logcast_client::{
    Credentials, HttpTransport, LogQueryClient, MetricsBoard, ReconnectPolicy, Reconciler,
    SessionStatus, StreamSession, TransportError, ViewFilter, ViewMode,
};
use logcast_core::{Channel, Environment, Level, MessageSearch, MetricCounters, NewLog};
use logcast_server::{Hubs, LogStore, LogcastServer, MemoryStore, ServerConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

const API_KEY: &str = "e2e-key";

struct Running {
    base: String,
    addr: SocketAddr,
    hubs: Arc<Hubs>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        self.shutdown.cancel();
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}

fn config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.auth.api_key = Some(API_KEY.to_string());
    config
}

async fn start_on(addr: SocketAddr, store: Arc<dyn LogStore>) -> Running {
    let listener = TcpListener::bind(addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = LogcastServer::new(config(), store);
    let hubs = server.hubs().clone();
    let shutdown = server.shutdown_token();
    let task = tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    Running {
        base: format!("http://{addr}"),
        addr,
        hubs,
        shutdown,
        task,
    }
}

async fn start(store: Arc<dyn LogStore>) -> Running {
    start_on("127.0.0.1:0".parse().unwrap(), store).await
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base: Duration::from_millis(50),
        max: Duration::from_millis(200),
    }
}

fn key() -> Credentials {
    Credentials::ApiKey(API_KEY.to_string())
}

async fn ingest(base: &str, batch: &[NewLog]) {
    let response = reqwest::Client::new()
        .post(format!("{base}/api/log"))
        .header("x-api-key", API_KEY)
        .json(batch)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success(), "{}", response.status());
}

fn log(server: &str, message: &str) -> NewLog {
    NewLog::new(message, Level::Info, Environment::Server).with_server(server)
}

/// Reconcile until the view holds `expected` entries.
async fn reconcile_until(view: &mut Reconciler, session: &StreamSession, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while view.len() < expected {
            assert!(session.wait_for_events().await, "session closed");
            view.reconcile(session).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("view has {} of {expected} rows", view.len()));
}

#[tokio::test]
async fn test_seeded_live_tail_for_one_session() {
    let server = start(Arc::new(MemoryStore::new())).await;
    ingest(&server.base, &[log("A", "booted"), log("B", "other")]).await;

    let queries = LogQueryClient::new(&server.base, key());
    let transport = HttpTransport::new(queries.events_url(), key());
    let session = StreamSession::with_policy(Arc::new(transport), fast_policy());
    assert!(session.wait_for_status(SessionStatus::Connected).await);

    let mut view = Reconciler::new(ViewMode::Raw, ViewFilter::for_server("A"));
    view.seed(queries.logs_for_server("A", None).await.unwrap()).await;
    assert_eq!(view.len(), 1);

    ingest(&server.base, &[log("A", "round started"), log("B", "noise"), log("A", "round ended")]).await;
    reconcile_until(&mut view, &session, 3).await;

    let messages: Vec<String> = view.rows().into_iter().map(|r| r.message).collect();
    assert_eq!(messages, vec!["booted", "round started", "round ended"]);
    assert!(view.rows().iter().all(|r| r.server_id == "A"));
}

#[tokio::test]
async fn test_aggregated_view_seeded_from_search() {
    let server = start(Arc::new(MemoryStore::new())).await;
    ingest(&server.base, &[log("A", "Tick"), log("A", "tick"), log("A", "Tock")]).await;

    let queries = LogQueryClient::new(&server.base, key());
    let page = queries
        .search_messages(&MessageSearch::new("t"))
        .await
        .unwrap();
    assert_eq!(page.total, 2);

    let session = StreamSession::with_policy(
        Arc::new(HttpTransport::new(queries.events_url(), key())),
        fast_policy(),
    );
    assert!(session.wait_for_status(SessionStatus::Connected).await);

    let mut view = Reconciler::new(ViewMode::Aggregated, ViewFilter::default());
    view.seed(page.rows).await;
    ingest(&server.base, &[log("A", "tick"), log("A", "new")]).await;
    reconcile_until(&mut view, &session, 3).await;

    let rows = view.rows();
    let tick = rows.iter().find(|r| r.message_lower == "tick").unwrap();
    assert_eq!(tick.count, Some(3));
    let new = rows.iter().find(|r| r.message == "new").unwrap();
    assert_eq!(new.count, Some(1));
}

#[tokio::test]
async fn test_session_reconnects_after_server_restart() {
    let store: Arc<dyn LogStore> = Arc::new(MemoryStore::new());
    let server = start(store.clone()).await;
    let addr = server.addr;
    let url = format!("{}/api/events", server.base);

    let mut session =
        StreamSession::with_policy(Arc::new(HttpTransport::new(url, key())), fast_policy());
    assert!(session.wait_for_status(SessionStatus::Connected).await);

    server.stop().await;
    assert!(session.wait_for_status(SessionStatus::Error).await);

    let server = start_on(addr, store).await;
    assert!(session.wait_for_status(SessionStatus::Connected).await);
    assert_eq!(session.attempt(), 0);
    assert_eq!(server.hubs.channel(Channel::LogEvents).subscriber_count(), 1);

    ingest(&server.base, &[log("A", "after restart")]).await;
    let mut view = Reconciler::new(ViewMode::Raw, ViewFilter::default());
    reconcile_until(&mut view, &session, 1).await;
    assert_eq!(view.rows()[0].message, "after restart");

    session.close().await;
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[tokio::test]
async fn test_bad_credentials_are_not_retried() {
    let server = start(Arc::new(MemoryStore::new())).await;
    let transport = HttpTransport::new(
        format!("{}/api/events", server.base),
        Credentials::ApiKey("wrong".into()),
    );
    let session = StreamSession::with_policy(Arc::new(transport), fast_policy());

    assert!(session.wait_for_status(SessionStatus::Error).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.status(), SessionStatus::Error);
    assert_eq!(session.last_error(), Some(TransportError::Unauthorized(401)));
    assert_eq!(session.attempt(), 0);
}

#[tokio::test]
async fn test_metrics_board_gets_latest_sample_on_connect() {
    let server = start(Arc::new(MemoryStore::new())).await;
    let response = reqwest::Client::new()
        .post(format!("{}/api/record-new-info", server.base))
        .header("x-api-key", API_KEY)
        .json(&MetricCounters {
            active_players: 7,
            ..MetricCounters::default()
        })
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let queries = LogQueryClient::new(&server.base, Credentials::None);
    let session = StreamSession::with_policy(
        Arc::new(HttpTransport::new(queries.metrics_url(), Credentials::None)),
        fast_policy(),
    );

    let mut board = MetricsBoard::default();
    timeout(Duration::from_secs(5), async {
        while board.latest().is_none() {
            assert!(session.wait_for_events().await);
            board.reconcile(&session);
        }
    })
    .await
    .unwrap();
    assert_eq!(board.latest().map(|s| s.counters.active_players), Some(7));
}
