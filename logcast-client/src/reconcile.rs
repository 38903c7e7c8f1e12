//! Folding live events into a bounded view.
//!
//! A view is seeded from a historical query, then every pass drains the
//! session queue and merges the accepted rows. The seed and the live stream
//! may overlap or race; merging is keyed so neither produces duplicates.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use logcast_core::{BroadcastEvent, Environment, Level, LogRecord, MetricSample, ReceivedEvent};

use crate::enrich::{enrich_rows, ActorDirectory};
use crate::session::StreamSession;

/// Most rows (raw) or groups (aggregated) a view holds.
pub const MAX_LIVE_ROWS: usize = 500;

/// Which rows a view wants. Empty sets and `None` accept everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewFilter {
    pub server_id: Option<String>,
    pub levels: BTreeSet<Level>,
    pub environments: BTreeSet<Environment>,
    /// Case-insensitive message substring.
    pub search: Option<String>,
}

impl ViewFilter {
    pub fn for_server(server_id: impl Into<String>) -> Self {
        Self {
            server_id: Some(server_id.into()),
            ..Self::default()
        }
    }

    pub fn accepts(&self, row: &LogRecord) -> bool {
        if let Some(server_id) = &self.server_id {
            if row.server_id != *server_id {
                return false;
            }
        }
        if !self.levels.is_empty() && !self.levels.contains(&row.level) {
            return false;
        }
        if !self.environments.is_empty() && !self.environments.contains(&row.environment) {
            return false;
        }
        match &self.search {
            Some(needle) if !needle.is_empty() => {
                row.message_lower.contains(&needle.to_lowercase())
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// Every row, de-duplicated by id.
    Raw,
    /// One entry per (message, environment) with a running count.
    Aggregated,
}

/// Raw tail ordered by `(logged_at, log_id)`.
#[derive(Debug, Default)]
pub struct RawTail {
    rows: Vec<LogRecord>,
}

impl RawTail {
    pub fn merge(&mut self, incoming: Vec<LogRecord>) {
        for row in incoming {
            match self.rows.iter_mut().find(|r| r.log_id == row.log_id) {
                Some(existing) => *existing = row,
                None => self.rows.push(row),
            }
        }
        self.rows.sort_by(|a, b| (a.logged_at, a.log_id).cmp(&(b.logged_at, b.log_id)));
        if self.rows.len() > MAX_LIVE_ROWS {
            let excess = self.rows.len() - MAX_LIVE_ROWS;
            self.rows.drain(..excess);
        }
    }

    pub fn rows(&self) -> &[LogRecord] {
        &self.rows
    }
}

#[derive(Debug, Clone)]
struct Group {
    /// Newest member, shown for the whole group.
    row: LogRecord,
    count: u64,
    last_seen: DateTime<Utc>,
    last_log_id: u64,
    /// Ids up to here are included in the seeded count.
    seeded_through: u64,
}

type GroupKey = (String, Environment);

/// Distinct-message tail.
#[derive(Debug, Default)]
pub struct DistinctTail {
    groups: HashMap<GroupKey, Group>,
}

impl DistinctTail {
    /// Seed with search results, each carrying its group size in `count`.
    pub fn seed(&mut self, rows: Vec<LogRecord>) {
        for row in rows {
            let key = (row.message_lower.clone(), row.environment);
            let replace = self
                .groups
                .get(&key)
                .map_or(true, |group| row.log_id > group.last_log_id);
            if replace {
                let count = row.count.unwrap_or(1);
                self.groups.insert(
                    key,
                    Group {
                        last_seen: row.logged_at,
                        last_log_id: row.log_id,
                        seeded_through: row.log_id,
                        count,
                        row,
                    },
                );
            }
        }
        self.evict();
    }

    pub fn merge(&mut self, incoming: Vec<LogRecord>) {
        for row in incoming {
            let key = (row.message_lower.clone(), row.environment);
            match self.groups.get_mut(&key) {
                Some(group) if row.log_id <= group.seeded_through => {
                    log::trace!("Row {} already counted by the seed", row.log_id);
                }
                Some(group) => {
                    group.count += 1;
                    group.last_seen = group.last_seen.max(row.logged_at);
                    // Batches may arrive out of id order; the newest row stays on top.
                    if row.log_id > group.last_log_id {
                        group.last_log_id = row.log_id;
                        group.row = row;
                    }
                }
                None => {
                    self.groups.insert(
                        key,
                        Group {
                            count: 1,
                            last_seen: row.logged_at,
                            last_log_id: row.log_id,
                            seeded_through: 0,
                            row,
                        },
                    );
                }
            }
        }
        self.evict();
    }

    fn evict(&mut self) {
        while self.groups.len() > MAX_LIVE_ROWS {
            let oldest = self
                .groups
                .iter()
                .min_by_key(|(_, g)| (g.last_seen, g.last_log_id))
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.groups.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Groups ordered by last seen, each row carrying its `count`.
    pub fn rows(&self) -> Vec<LogRecord> {
        let mut groups: Vec<&Group> = self.groups.values().collect();
        groups.sort_by_key(|g| (g.last_seen, g.last_log_id));
        groups
            .into_iter()
            .map(|g| LogRecord {
                count: Some(g.count),
                ..g.row.clone()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Debug)]
enum View {
    Raw(RawTail),
    Aggregated(DistinctTail),
}

/// A filtered, bounded view of the log-events stream.
pub struct Reconciler {
    filter: ViewFilter,
    view: View,
    directory: Option<Arc<dyn ActorDirectory>>,
}

impl Reconciler {
    pub fn new(mode: ViewMode, filter: ViewFilter) -> Self {
        let view = match mode {
            ViewMode::Raw => View::Raw(RawTail::default()),
            ViewMode::Aggregated => View::Aggregated(DistinctTail::default()),
        };
        Self {
            filter,
            view,
            directory: None,
        }
    }

    /// Rewrite actor placeholders before rows enter the view.
    pub fn with_directory(mut self, directory: Arc<dyn ActorDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn mode(&self) -> ViewMode {
        match self.view {
            View::Raw(_) => ViewMode::Raw,
            View::Aggregated(_) => ViewMode::Aggregated,
        }
    }

    pub fn filter(&self) -> &ViewFilter {
        &self.filter
    }

    /// Load historical rows. Seeds bypass the filter; the query already
    /// applied it.
    pub async fn seed(&mut self, mut rows: Vec<LogRecord>) {
        if let Some(directory) = &self.directory {
            enrich_rows(directory.as_ref(), &mut rows).await;
        }
        match &mut self.view {
            View::Raw(tail) => tail.merge(rows),
            View::Aggregated(tail) => tail.seed(rows),
        }
    }

    /// Merge one batch of queued events. Returns the number of rows accepted.
    pub async fn apply(&mut self, events: &[ReceivedEvent]) -> usize {
        let mut accepted: Vec<LogRecord> = events
            .iter()
            .flat_map(ReceivedEvent::log_rows)
            .filter(|row| self.filter.accepts(row))
            .cloned()
            .collect();
        if accepted.is_empty() {
            return 0;
        }

        if let Some(directory) = &self.directory {
            enrich_rows(directory.as_ref(), &mut accepted).await;
        }

        let n = accepted.len();
        match &mut self.view {
            View::Raw(tail) => tail.merge(accepted),
            View::Aggregated(tail) => tail.merge(accepted),
        }
        log::debug!("Merged {n} live rows");
        n
    }

    /// One pass: drain the session queue and merge it.
    pub async fn reconcile(&mut self, session: &StreamSession) -> usize {
        let events = session.drain_events();
        if events.is_empty() {
            return 0;
        }
        self.apply(&events).await
    }

    /// Reconcile on every queue notification until cancelled or the session
    /// finishes (closed, or rejected by the server). `on_change` runs after
    /// each pass that accepted rows.
    pub async fn follow<F>(
        &mut self,
        session: &StreamSession,
        cancel: &CancellationToken,
        mut on_change: F,
    ) where
        F: FnMut(&Reconciler),
    {
        loop {
            let ready = tokio::select! {
                _ = cancel.cancelled() => return,
                ready = session.wait_for_events() => ready,
            };
            if !ready {
                return;
            }
            if self.reconcile(session).await > 0 {
                on_change(self);
            }
        }
    }

    /// Current rows, oldest first. Aggregated rows carry their `count`.
    pub fn rows(&self) -> Vec<LogRecord> {
        match &self.view {
            View::Raw(tail) => tail.rows().to_vec(),
            View::Aggregated(tail) => tail.rows(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.view {
            View::Raw(tail) => tail.rows().len(),
            View::Aggregated(tail) => tail.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Latest realtime metrics seen on a session.
#[derive(Debug, Default)]
pub struct MetricsBoard {
    latest: Option<MetricSample>,
}

impl MetricsBoard {
    /// Returns whether a newer sample was taken.
    pub fn apply(&mut self, events: &[ReceivedEvent]) -> bool {
        let newest = events.iter().rev().find_map(|event| match event.as_event() {
            Some(BroadcastEvent::RealtimeMetrics(sample)) => Some(sample),
            _ => None,
        });
        match newest {
            Some(sample) if self.latest.as_ref() != Some(sample) => {
                self.latest = Some(sample.clone());
                true
            }
            _ => false,
        }
    }

    pub fn reconcile(&mut self, session: &StreamSession) -> bool {
        self.apply(&session.drain_events())
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.latest.as_ref()
    }
}
