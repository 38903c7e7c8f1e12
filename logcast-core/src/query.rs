//! Shapes shared by the query endpoints and the clients that seed views from them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Environment, Level, LogRecord};

/// Default page size of the row listing endpoint.
pub const DEFAULT_LOG_LIMIT: usize = 50;
/// Default page size of the distinct-message search.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
/// Upper bound applied to distinct-message search page sizes.
pub const MAX_SEARCH_LIMIT: usize = 200;

/// Newest-first row listing, optionally scoped to one session or substring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Distinct-message search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSearch {
    pub search: String,
    /// Empty means every level.
    pub levels: BTreeSet<Level>,
    /// Empty means every environment.
    pub environments: BTreeSet<Environment>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl MessageSearch {
    pub fn new(search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            ..Self::default()
        }
    }

    /// Page size after applying the default and clamping to `1..=max`.
    pub fn effective_limit(&self, max: usize) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, max.max(1))
    }

    pub fn matches(&self, row: &LogRecord) -> bool {
        let needle = self.search.to_lowercase();
        (needle.is_empty() || row.message_lower.contains(&needle))
            && (self.levels.is_empty() || self.levels.contains(&row.level))
            && (self.environments.is_empty() || self.environments.contains(&row.environment))
    }

    /// Comma-separated level list as used in query strings (`"2,3"`).
    pub fn levels_param(&self) -> Option<String> {
        join_param(self.levels.iter().map(|l| u8::from(*l).to_string()))
    }

    /// Comma-separated environment list (`"Server,Client"`).
    pub fn environments_param(&self) -> Option<String> {
        join_param(self.environments.iter().map(|e| e.as_str().to_string()))
    }
}

fn join_param(items: impl Iterator<Item = String>) -> Option<String> {
    let joined = items.collect::<Vec<_>>().join(",");
    (!joined.is_empty()).then_some(joined)
}

/// Parse `"1, 3,x"` into a level set; unknown entries are skipped.
pub fn parse_levels(raw: &str) -> BTreeSet<Level> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<u8>().ok())
        .filter_map(|n| Level::try_from(n).ok())
        .collect()
}

/// Parse `"Server,Client"` into an environment set; unknown entries are skipped.
pub fn parse_environments(raw: &str) -> BTreeSet<Environment> {
    raw.split(',')
        .filter_map(|part| Environment::parse(part.trim()))
        .collect()
}

/// One page of distinct-message results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub rows: Vec<LogRecord>,
    /// Number of distinct (message, environment) groups matching.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub pages: usize,
    pub page: usize,
}

impl SearchPage {
    pub fn new(rows: Vec<LogRecord>, total: usize, limit: usize, offset: usize) -> Self {
        let limit = limit.max(1);
        Self {
            rows,
            total,
            limit,
            offset,
            pages: total.div_ceil(limit),
            page: offset / limit + 1,
        }
    }
}

/// Inclusive time window for chart data, written `<start>_<end>` in RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn parse(raw: &str) -> Option<Self> {
        let (start, end) = raw.split_once('_')?;
        let start = DateTime::parse_from_rfc3339(start.trim()).ok()?;
        let end = DateTime::parse_from_rfc3339(end.trim()).ok()?;
        Some(Self {
            start: start.with_timezone(&Utc),
            end: end.with_timezone(&Utc),
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}
