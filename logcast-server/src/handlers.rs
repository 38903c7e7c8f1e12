//! HTTP route handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use logcast_core::query::{parse_environments, parse_levels};
use logcast_core::{
    Channel, DateRange, LogQuery, LogRecord, MessageSearch, MetricCounters, MetricSample, NewLog,
    SearchPage,
};

use crate::auth::{AuthError, Authenticator, Principal};
use crate::config::ServerConfig;
use crate::hub::Hubs;
use crate::ingest::{self, IngestError};
use crate::stats::{AtomicServerStats, ChannelStats, ServerStats};
use crate::storage::{self, LogStore, StoreError};
use crate::stream::EventStream;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LogStore>,
    pub hubs: Arc<Hubs>,
    pub auth: Arc<dyn Authenticator>,
    pub stats: Arc<AtomicServerStats>,
    pub config: Arc<ServerConfig>,
    /// Cancelled on server shutdown; ends every open stream.
    pub shutdown: CancellationToken,
}

impl AppState {
    fn authorize(&self, headers: &HeaderMap) -> Result<Principal, ApiError> {
        Ok(self.auth.authorize(headers)?)
    }

    fn open_stream(&self, channel: Channel) -> EventStream {
        EventStream::open(
            self.hubs.channel(channel),
            self.shutdown.clone(),
            self.stats.clone(),
        )
    }
}

/// Errors rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized(#[from] AuthError),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("invalid json: {}", rejection.body_text()))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) | ApiError::Ingest(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Run a store call on the blocking pool; full scans must not stall streams.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

type SseResponse = Sse<std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>>;

fn sse(stream: EventStream) -> SseResponse {
    Sse::new(Box::pin(stream.map(|frame| Ok::<_, Infallible>(frame.into_sse()))))
}

/// `GET /api/events`
pub async fn handle_log_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<SseResponse, ApiError> {
    state.authorize(&headers)?;
    Ok(sse(state.open_stream(Channel::LogEvents)))
}

/// `GET /api/public/realtime-metrics`
pub async fn handle_realtime_metrics(State(state): State<AppState>) -> SseResponse {
    sse(state.open_stream(Channel::PublicMetrics))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InsertResponse {
    pub inserted: usize,
}

/// `POST /api/log`
pub async fn handle_ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Vec<NewLog>>, JsonRejection>,
) -> Result<Json<InsertResponse>, ApiError> {
    state.authorize(&headers)?;
    let Json(batch) = body?;
    let inserted = blocking(move || {
        let rows = ingest::ingest_logs(state.store.as_ref(), &state.hubs, &state.stats, batch)?;
        Ok(rows.len())
    })
    .await?;
    Ok(Json(InsertResponse { inserted }))
}

/// `GET /api/log`
pub async fn handle_list_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(mut query): Query<LogQuery>,
) -> Result<Json<Vec<LogRecord>>, ApiError> {
    state.authorize(&headers)?;
    query.server_id = query.server_id.filter(|id| !id.is_empty());
    let rows = blocking(move || Ok(storage::logs_matching(state.store.as_ref(), &query)?)).await?;
    Ok(Json(rows))
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageSearchParams {
    #[serde(default)]
    pub search: Option<String>,
    /// Comma-separated level numbers
    #[serde(default)]
    pub levels: Option<String>,
    /// Comma-separated environment names
    #[serde(default)]
    pub environments: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl From<MessageSearchParams> for MessageSearch {
    fn from(params: MessageSearchParams) -> Self {
        MessageSearch {
            search: params.search.unwrap_or_default(),
            levels: params.levels.as_deref().map(parse_levels).unwrap_or_default(),
            environments: params
                .environments
                .as_deref()
                .map(parse_environments)
                .unwrap_or_default(),
            limit: params.limit,
            offset: params.offset.unwrap_or(0),
        }
    }
}

/// `GET /api/search/messages`
pub async fn handle_search_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<MessageSearchParams>,
) -> Result<Json<SearchPage>, ApiError> {
    state.authorize(&headers)?;
    let search = MessageSearch::from(params);
    let page = blocking(move || {
        Ok(storage::search_messages(
            state.store.as_ref(),
            &search,
            state.config.search_limit_max,
        )?)
    })
    .await?;
    Ok(Json(page))
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerSearchParams {
    #[serde(default)]
    pub search: Option<String>,
}

/// `GET /api/search/servers`
pub async fn handle_search_servers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ServerSearchParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    state.authorize(&headers)?;
    let servers = blocking(move || {
        Ok(storage::list_servers(state.store.as_ref(), params.search.as_deref())?)
    })
    .await?;
    Ok(Json(servers))
}

/// `POST /api/record-new-info`
pub async fn handle_record_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MetricCounters>, JsonRejection>,
) -> Result<Json<MetricSample>, ApiError> {
    state.authorize(&headers)?;
    let Json(counters) = body?;
    let sample = blocking(move || {
        Ok(ingest::record_metrics(
            state.store.as_ref(),
            &state.hubs,
            &state.stats,
            counters,
        )?)
    })
    .await?;
    Ok(Json(sample))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanResponse {
    pub status: String,
    pub deleted: usize,
}

/// `POST /api/clean`
pub async fn handle_clean(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CleanResponse>, ApiError> {
    state.authorize(&headers)?;
    let deleted = blocking(move || {
        Ok(storage::clean(state.store.as_ref(), &state.config.clean_phrases)?)
    })
    .await?;
    Ok(Json(CleanResponse {
        status: "ok".to_string(),
        deleted,
    }))
}

/// `GET /api/is-authed`
pub async fn handle_is_authed(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.authorize(&headers)?;
    Ok(Json(json!({ "authed": true })))
}

#[derive(Debug, Deserialize)]
pub struct ChartParams {
    #[serde(rename = "dateRange")]
    pub date_range: Option<String>,
}

/// `GET /api/public/get-chart-data`
pub async fn handle_chart_data(
    State(state): State<AppState>,
    Query(params): Query<ChartParams>,
) -> Result<Json<Vec<MetricSample>>, ApiError> {
    let raw = params
        .date_range
        .ok_or_else(|| ApiError::BadRequest("dateRange is required".into()))?;
    let range = DateRange::parse(&raw)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid dateRange '{raw}'")))?;
    let samples = blocking(move || Ok(state.store.metrics_between(range)?)).await?;
    Ok(Json(samples))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub server: ServerStats,
    pub channels: Vec<ChannelStats>,
}

/// `GET /api/stats`
pub async fn handle_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, ApiError> {
    state.authorize(&headers)?;
    let channels = Channel::ALL
        .iter()
        .map(|channel| ChannelStats::new(channel.as_str(), state.hubs.channel(*channel).stats()))
        .collect();
    Ok(Json(StatsResponse {
        server: state.stats.snapshot(),
        channels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_params_conversion() {
        let search = MessageSearch::from(MessageSearchParams {
            search: Some("boom".into()),
            levels: Some("3,2".into()),
            environments: Some("Server".into()),
            limit: Some(25),
            offset: None,
        });
        assert_eq!(search.search, "boom");
        assert_eq!(search.levels.len(), 2);
        assert_eq!(search.environments.len(), 1);
        assert_eq!(search.limit, Some(25));
        assert_eq!(search.offset, 0);
    }

    #[tokio::test]
    async fn test_blocking_work_propagates_errors_and_panics() {
        let value = blocking(|| Ok(7)).await.unwrap();
        assert_eq!(value, 7);

        let err = blocking::<(), _>(|| Err(StoreError::Database("x".into()).into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Store(_)));

        let err = blocking::<(), _>(|| panic!("scan blew up")).await.unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(ApiError::from(AuthError::Missing).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(StoreError::Database("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
