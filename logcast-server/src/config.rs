//! Server configuration: TOML file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use logcast_core::query::MAX_SEARCH_LIMIT;

/// Overrides `bind_addr`.
pub const ENV_BIND_ADDR: &str = "LOGCAST_BIND_ADDR";
/// Overrides `auth.api_key`.
pub const ENV_API_KEY: &str = "LOGCAST_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Server configuration. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    pub keepalive_interval_secs: u64,
    /// Upper bound for distinct-message search page sizes
    pub search_limit_max: usize,
    /// RocksDB directory (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    pub auth: AuthConfig,
    pub metrics_poll: Option<MetricsPollConfig>,
    /// Case-insensitive substrings removed by the clean route
    pub clean_phrases: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            keepalive_interval_secs: 5,
            search_limit_max: MAX_SEARCH_LIMIT,
            storage_path: None,
            auth: AuthConfig::default(),
            metrics_poll: None,
            clean_phrases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret expected in the `x-api-key` header
    pub api_key: Option<String>,
    pub session_cookie: String,
    /// Accepted session cookie values
    pub session_tokens: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            session_cookie: "logcast_session".to_string(),
            session_tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsPollConfig {
    /// Endpoint returning `MetricCounters` JSON
    pub url: String,
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}

impl MetricsPollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ServerConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(addr) = lookup(ENV_BIND_ADDR).filter(|v| !v.is_empty()) {
            self.bind_addr = addr;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.auth.api_key = Some(key);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "keepalive_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.search_limit_max == 0 {
            return Err(ConfigError::Invalid {
                field: "search_limit_max",
                reason: "must be at least 1".into(),
            });
        }
        if let Some(poll) = &self.metrics_poll {
            if poll.interval_secs == 0 {
                return Err(ConfigError::Invalid {
                    field: "metrics_poll.interval_secs",
                    reason: "must be at least 1".into(),
                });
            }
        }
        Ok(())
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}
