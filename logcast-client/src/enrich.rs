//! Actor placeholders in log messages.
//!
//! Producers write `USERNAME`, `DISPLAYNAME` and `USERID` into messages and
//! attach the actor's id in `userid`. Before rows reach a view those tokens are
//! replaced with the resolved profile.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use logcast_core::LogRecord;

use crate::transport::Credentials;

/// Rendered for actors the directory cannot resolve.
pub const UNKNOWN_ACTOR: &str = "Unknown";

/// Default lookup path on the profile proxy.
pub const DEFAULT_PROFILE_PATH: &str = "/api/roblox/get_user_info";

const TOKENS: [&str; 3] = ["USERNAME", "DISPLAYNAME", "USERID"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorProfile {
    pub id: u64,
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

impl ActorProfile {
    pub fn unknown(id: u64) -> Self {
        Self {
            id,
            name: UNKNOWN_ACTOR.to_string(),
            display_name: UNKNOWN_ACTOR.to_string(),
        }
    }
}

pub fn needs_enrichment(message: &str) -> bool {
    TOKENS.iter().any(|token| message.contains(token))
}

pub fn format_message(message: &str, actor: &ActorProfile) -> String {
    message
        .replace("USERNAME", &actor.name)
        .replace("DISPLAYNAME", &actor.display_name)
        .replace("USERID", &actor.id.to_string())
}

/// Resolves actor ids to profiles.
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    /// Look up every id at once. Ids missing from the result are unknown.
    async fn resolve(&self, ids: &[u64]) -> HashMap<u64, ActorProfile>;
}

/// Rewrite placeholder tokens in `rows`, resolving each distinct actor once.
///
/// Rows without a `userid` are attributed to actor 0.
pub async fn enrich_rows(directory: &dyn ActorDirectory, rows: &mut [LogRecord]) {
    let ids: BTreeSet<u64> = rows
        .iter()
        .filter(|row| needs_enrichment(&row.message))
        .map(|row| row.userid.unwrap_or(0))
        .collect();
    if ids.is_empty() {
        return;
    }

    let ids: Vec<u64> = ids.into_iter().collect();
    let profiles = directory.resolve(&ids).await;
    log::trace!("Resolved {}/{} actors", profiles.len(), ids.len());

    for row in rows.iter_mut().filter(|row| needs_enrichment(&row.message)) {
        let id = row.userid.unwrap_or(0);
        row.message = match profiles.get(&id) {
            Some(profile) => format_message(&row.message, profile),
            None => format_message(&row.message, &ActorProfile::unknown(id)),
        };
    }
}

/// Looks actors up through the HTTP profile proxy and caches hits.
pub struct HttpActorDirectory {
    client: reqwest::Client,
    endpoint: String,
    credentials: Credentials,
    cache: Mutex<HashMap<u64, ActorProfile>>,
}

impl HttpActorDirectory {
    pub fn new(base_url: &str, credentials: Credentials) -> Self {
        Self::with_endpoint(
            format!("{}{}", base_url.trim_end_matches('/'), DEFAULT_PROFILE_PATH),
            credentials,
        )
    }

    /// Use a full lookup URL; `?userId=<id>` is appended per request.
    pub fn with_endpoint(endpoint: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            credentials,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    async fn fetch(&self, id: u64) -> Option<ActorProfile> {
        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("userId", id)]);
        let response = match self.credentials.apply(request).send().await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Actor lookup {id} failed: {e}");
                return None;
            }
        };
        if !response.status().is_success() {
            log::debug!("Actor lookup {id} returned {}", response.status());
            return None;
        }
        response.json::<ActorProfile>().await.ok()
    }
}

#[async_trait]
impl ActorDirectory for HttpActorDirectory {
    async fn resolve(&self, ids: &[u64]) -> HashMap<u64, ActorProfile> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        {
            let cache = self.cache.lock();
            for id in ids {
                match cache.get(id) {
                    Some(profile) => {
                        found.insert(*id, profile.clone());
                    }
                    None => missing.push(*id),
                }
            }
        }

        let fetched =
            futures_util::future::join_all(missing.iter().map(|id| self.fetch(*id))).await;

        // Failures stay uncached so a later pass can retry.
        let mut cache = self.cache.lock();
        for (id, profile) in missing.into_iter().zip(fetched) {
            if let Some(profile) = profile {
                cache.insert(id, profile.clone());
                found.insert(id, profile);
            }
        }
        found
    }
}
