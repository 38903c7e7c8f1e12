//! Integration tests against a real server on a free port.

use std::net::SocketAddr;
use std::sync::Arc;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use logcast_core::{BroadcastEvent, Channel, Environment, Level, MetricCounters, NewLog, SearchPage};
use logcast_server::{Hubs, LogcastServer, MemoryStore, RocksStore, ServerConfig, StoreConfig};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

const API_KEY: &str = "test-key";

struct TestServer {
    base: String,
    hubs: Arc<Hubs>,
    shutdown: CancellationToken,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn ingest(&self, batch: &[NewLog]) -> reqwest::Response {
        self.client
            .post(self.url("/api/log"))
            .header("x-api-key", API_KEY)
            .json(batch)
            .send()
            .await
            .unwrap()
    }

    async fn get_json(&self, path: &str) -> Value {
        let response = self
            .client
            .get(self.url(path))
            .header("x-api-key", API_KEY)
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success(), "{path}: {}", response.status());
        response.json().await.unwrap()
    }

    async fn wait_for_subscribers(&self, channel: Channel, expected: usize) {
        let hub = self.hubs.channel(channel).clone();
        timeout(Duration::from_secs(5), async {
            while hub.subscriber_count() != expected {
                // Writes surface closed connections.
                hub.publish(BroadcastEvent::Keepalive);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {expected} subscribers on {channel}"));
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.auth.api_key = Some(API_KEY.to_string());
    config.auth.session_tokens = vec!["browser-token".to_string()];
    config.clean_phrases = vec!["failed to load sound".to_string()];
    config
}

async fn start(server: LogcastServer) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let hubs = server.hubs().clone();
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    TestServer {
        base: format!("http://{addr}"),
        hubs,
        shutdown,
        client: reqwest::Client::new(),
    }
}

async fn start_test_server() -> TestServer {
    start(LogcastServer::new(test_config(), Arc::new(MemoryStore::new()))).await
}

fn log(server: &str, message: &str, level: Level) -> NewLog {
    NewLog::new(message, level, Environment::Server).with_server(server)
}

#[tokio::test]
async fn test_events_requires_credentials() {
    let server = start_test_server().await;

    let response = server.client.get(server.url("/api/events")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
    assert_eq!(server.hubs.channel(Channel::LogEvents).subscriber_count(), 0);
}

#[tokio::test]
async fn test_ingest_reaches_live_stream() {
    let server = start_test_server().await;

    let response = server
        .client
        .get(server.url("/api/events"))
        .header("x-api-key", API_KEY)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    let mut events = response.bytes_stream().eventsource();
    server.wait_for_subscribers(Channel::LogEvents, 1).await;

    let inserted = server
        .ingest(&[log("", "Player joined", Level::Info), log("job-1", "Boom", Level::Error)])
        .await;
    assert!(inserted.status().is_success());
    let body: Value = inserted.json().await.unwrap();
    assert_eq!(body["inserted"], 2);

    let event = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.event, "log-added");
    let parsed: BroadcastEvent = serde_json::from_str(&event.data).unwrap();
    match parsed {
        BroadcastEvent::LogAdded { rows } => {
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].server_id, "studio");
            assert_eq!(rows[0].log_id, 1);
            assert_eq!(rows[1].log_id, 2);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_session_cookie_authorizes() {
    let server = start_test_server().await;

    let response = server
        .client
        .get(server.url("/api/is-authed"))
        .header("cookie", "logcast_session=browser-token")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["authed"], true);

    let rejected = server
        .client
        .get(server.url("/api/is-authed"))
        .header("cookie", "logcast_session=stolen")
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_public_metrics_replays_latest_sample() {
    let server = start_test_server().await;

    let recorded = server
        .client
        .post(server.url("/api/record-new-info"))
        .header("x-api-key", API_KEY)
        .json(&MetricCounters {
            active_players: 12,
            visits: 3400,
            likes: 10,
            dislikes: 2,
            favorites: 5,
        })
        .send()
        .await
        .unwrap();
    assert!(recorded.status().is_success());

    // Public channel: no credentials.
    let response = server
        .client
        .get(server.url("/api/public/realtime-metrics"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let mut events = response.bytes_stream().eventsource();

    let event = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.event, "realtime-metrics");
    let data: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(data["visits"], 3400);
    assert_eq!(data["active_players"], 12);
}

#[tokio::test]
async fn test_disconnect_unsubscribes_exactly_once() {
    let server = start_test_server().await;
    let open = || {
        server
            .client
            .get(server.url("/api/events"))
            .header("x-api-key", API_KEY)
            .send()
    };

    let first = open().await.unwrap();
    let second = open().await.unwrap();
    server.wait_for_subscribers(Channel::LogEvents, 2).await;

    drop(first);
    server.wait_for_subscribers(Channel::LogEvents, 1).await;

    let stats = server.get_json("/api/stats").await;
    assert_eq!(stats["server"]["streams_opened"], 2);
    assert_eq!(stats["server"]["streams_active"], 1);

    drop(second);
    server.wait_for_subscribers(Channel::LogEvents, 0).await;
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let server = start_test_server().await;

    let response = server
        .client
        .get(server.url("/api/events"))
        .header("x-api-key", API_KEY)
        .send()
        .await
        .unwrap();
    let mut events = response.bytes_stream().eventsource();
    server.wait_for_subscribers(Channel::LogEvents, 1).await;

    server.shutdown.cancel();
    let end = timeout(Duration::from_secs(5), events.next()).await.unwrap();
    assert!(end.is_none() || end.unwrap().is_err());
    assert_eq!(server.hubs.channel(Channel::LogEvents).subscriber_count(), 0);
}

#[tokio::test]
async fn test_query_routes() {
    let server = start_test_server().await;
    server
        .ingest(&[
            log("A", "Player joined", Level::Info),
            log("B", "Script error at line 4", Level::Error),
            log("A", "Player joined", Level::Info),
            log("A", "Script error at line 4", Level::Error),
        ])
        .await;

    let rows = server.get_json("/api/log?server_id=A&limit=2").await;
    let ids: Vec<u64> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["log_id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![4, 3]);

    let page: SearchPage =
        serde_json::from_value(server.get_json("/api/search/messages?search=script&levels=3").await)
            .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.rows[0].count, Some(2));
    assert_eq!(page.rows[0].log_id, 4);
    assert_eq!(page.page, 1);

    let clamped = server.get_json("/api/search/messages?limit=100000").await;
    assert_eq!(clamped["limit"], 200);

    let servers = server.get_json("/api/search/servers").await;
    assert_eq!(servers, serde_json::json!(["A", "B"]));
}

#[tokio::test]
async fn test_clean_removes_noise() {
    let server = start_test_server().await;
    server
        .ingest(&[
            log("A", "Failed to load sound rbxassetid://123", Level::Warning),
            log("A", "Real problem", Level::Error),
        ])
        .await;

    let response = server
        .client
        .post(server.url("/api/clean"))
        .header("x-api-key", API_KEY)
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["deleted"], 1);

    let rows = server.get_json("/api/log").await;
    assert_eq!(rows.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_bodies_get_json_errors() {
    let server = start_test_server().await;

    for path in ["/api/log", "/api/record-new-info"] {
        let response = server
            .client
            .post(server.url(path))
            .header("x-api-key", API_KEY)
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST, "{path}");
        let body: Value = response.json().await.unwrap();
        assert!(
            body["error"].as_str().unwrap().starts_with("invalid json"),
            "{path}: {body}"
        );
    }

    // Credentials are checked before the body.
    let response = server
        .client
        .post(server.url("/api/log"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let rows = server.get_json("/api/log").await;
    assert!(rows.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_search_does_not_stall_live_stream() {
    let server = start_test_server().await;
    let batch: Vec<NewLog> = (0..2000)
        .map(|i| log("A", &format!("message {}", i % 300), Level::Info))
        .collect();
    server.ingest(&batch).await;

    let response = server
        .client
        .get(server.url("/api/events"))
        .header("x-api-key", API_KEY)
        .send()
        .await
        .unwrap();
    let mut events = response.bytes_stream().eventsource();
    server.wait_for_subscribers(Channel::LogEvents, 1).await;

    let searches: Vec<_> = (0..4)
        .map(|_| {
            let client = server.client.clone();
            let url = server.url("/api/search/messages?search=message&limit=200");
            tokio::spawn(async move {
                client.get(url).header("x-api-key", API_KEY).send().await.unwrap()
            })
        })
        .collect();
    server.ingest(&[log("A", "live", Level::Info)]).await;

    let event = timeout(Duration::from_secs(5), async {
        loop {
            let event = events.next().await.unwrap().unwrap();
            if event.event == "log-added" {
                return event;
            }
        }
    })
    .await
    .unwrap();
    assert!(event.data.contains("\"live\""));

    for search in searches {
        let response = search.await.unwrap();
        assert!(response.status().is_success());
        let page: SearchPage = response.json().await.unwrap();
        assert_eq!(page.total, 300);
    }
}

#[tokio::test]
async fn test_chart_data_validates_range() {
    let server = start_test_server().await;

    let missing = server
        .client
        .get(server.url("/api/public/get-chart-data"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::BAD_REQUEST);

    let ok = server
        .client
        .get(server.url(
            "/api/public/get-chart-data?dateRange=2020-01-01T00:00:00Z_2020-01-02T00:00:00Z",
        ))
        .send()
        .await
        .unwrap();
    assert!(ok.status().is_success());
    let samples: Value = ok.json().await.unwrap();
    assert_eq!(samples, serde_json::json!([]));
}

#[tokio::test]
async fn test_rows_survive_restart_with_rocksdb() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let store = Arc::new(RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap());
        let server = start(LogcastServer::new(test_config(), store)).await;
        server.ingest(&[log("A", "persisted", Level::Info)]).await;
        server.shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Reopening needs the previous handle released.
    let store = timeout(Duration::from_secs(5), async {
        loop {
            match RocksStore::open(StoreConfig::for_testing(dir.path())) {
                Ok(store) => break store,
                Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await
    .unwrap();

    let server = start(LogcastServer::new(test_config(), Arc::new(store))).await;
    server.ingest(&[log("A", "after restart", Level::Info)]).await;
    let rows = server.get_json("/api/log").await;
    let ids: Vec<u64> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["log_id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 1]);
}
