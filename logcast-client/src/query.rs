//! Historical queries used to seed live views.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use logcast_core::{LogQuery, LogRecord, MessageSearch, SearchPage};

use crate::transport::Credentials;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unauthorized")]
    Unauthorized,
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
}

/// Client for the log query endpoints.
pub struct LogQueryClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl LogQueryClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// URL of the authenticated log-events stream.
    pub fn events_url(&self) -> String {
        format!("{}/api/events", self.base_url)
    }

    /// URL of the public realtime-metrics stream.
    pub fn metrics_url(&self) -> String {
        format!("{}/api/public/realtime-metrics", self.base_url)
    }

    /// Newest-first rows of one session.
    pub async fn logs_for_server(
        &self,
        server_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<LogRecord>, QueryError> {
        let query = LogQuery {
            server_id: Some(server_id.to_string()),
            limit,
            ..LogQuery::default()
        };
        self.logs(&query).await
    }

    pub async fn logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>, QueryError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(server_id) = &query.server_id {
            params.push(("server_id", server_id.clone()));
        }
        if let Some(search) = &query.search {
            params.push(("search", search.clone()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = query.offset {
            params.push(("offset", offset.to_string()));
        }
        self.get("/api/log", &params).await
    }

    pub async fn search_messages(&self, search: &MessageSearch) -> Result<SearchPage, QueryError> {
        let mut params = vec![
            ("search", search.search.clone()),
            ("offset", search.offset.to_string()),
        ];
        if let Some(limit) = search.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(levels) = search.levels_param() {
            params.push(("levels", levels));
        }
        if let Some(environments) = search.environments_param() {
            params.push(("environments", environments));
        }
        self.get("/api/search/messages", &params).await
    }

    /// Distinct session ids, optionally filtered by substring.
    pub async fn list_servers(&self, search: Option<&str>) -> Result<Vec<String>, QueryError> {
        let params: Vec<(&str, String)> = search
            .map(|s| vec![("search", s.to_string())])
            .unwrap_or_default();
        self.get("/api/search/servers", &params).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, QueryError> {
        let request = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(params);
        let response = self.credentials.apply(request).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(QueryError::Unauthorized),
            status => Err(QueryError::Status(status)),
        }
    }
}
