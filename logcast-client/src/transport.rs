//! Event-stream transports.
//!
//! A transport opens one connection and yields decoded frames until the
//! connection ends. Reconnecting is the session's job.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::{RequestBuilder, StatusCode};

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// One decoded server-sent-events frame. Comment frames never surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }
}

pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server refused the credentials. Retrying will not help.
    #[error("unauthorized (HTTP {0})")]
    Unauthorized(u16),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("stream error: {0}")]
    Stream(String),
    /// The server ended the stream.
    #[error("stream closed by server")]
    Closed,
}

impl TransportError {
    /// Whether reconnecting is pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Unauthorized(_))
    }

    pub(crate) fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                TransportError::Unauthorized(status.as_u16())
            }
            other => TransportError::Status(other.as_u16()),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Network(e.to_string())
    }
}

/// How a client proves who it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    /// Public channels.
    #[default]
    None,
    ApiKey(String),
    SessionCookie { name: String, token: String },
}

impl Credentials {
    pub(crate) fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credentials::None => request,
            Credentials::ApiKey(key) => request.header(API_KEY_HEADER, key),
            Credentials::SessionCookie { name, token } => {
                request.header(COOKIE, format!("{name}={token}"))
            }
        }
    }
}

/// Opens one event stream connection.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn open(&self) -> Result<FrameStream, TransportError>;
}

/// Server-sent events over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    credentials: Credentials,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self::with_client(reqwest::Client::new(), url, credentials)
    }

    pub fn with_client(
        client: reqwest::Client,
        url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            credentials,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn open(&self) -> Result<FrameStream, TransportError> {
        let request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream");
        let response = self.credentials.apply(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::from_status(status));
        }
        log::debug!("Opened event stream {}", self.url);

        let frames = response.bytes_stream().eventsource().map(|item| {
            item.map(|event| Frame {
                event: (!event.event.is_empty()).then_some(event.event),
                data: event.data,
            })
            .map_err(|e| TransportError::Stream(e.to_string()))
        });
        Ok(frames.boxed())
    }
}
