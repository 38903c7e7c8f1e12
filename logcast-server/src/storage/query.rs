//! Read-side operations written once over any [`LogStore`].

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

use logcast_core::query::DEFAULT_LOG_LIMIT;
use logcast_core::{Environment, LogQuery, LogRecord, MessageSearch, SearchPage};

use super::{LogStore, StoreError};

/// Newest-first rows filtered by session and message substring.
pub fn logs_matching(store: &dyn LogStore, query: &LogQuery) -> Result<Vec<LogRecord>, StoreError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let needle = query
        .search
        .as_deref()
        .map(str::to_lowercase)
        .filter(|s| !s.is_empty());

    let mut rows = Vec::new();
    if limit == 0 {
        return Ok(rows);
    }
    let mut skipped = 0;
    store.scan_logs(&mut |row| {
        if query.server_id.as_deref().is_some_and(|id| id != row.server_id) {
            return ControlFlow::Continue(());
        }
        if needle.as_deref().is_some_and(|n| !row.message_lower.contains(n)) {
            return ControlFlow::Continue(());
        }
        if skipped < offset {
            skipped += 1;
            return ControlFlow::Continue(());
        }
        rows.push(row.clone());
        if rows.len() >= limit {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    Ok(rows)
}

/// Distinct-message search.
///
/// Rows are grouped by (`message_lower`, `environment`); each group is
/// represented by its newest row with `count` set to the group size. Groups are
/// ordered by message then environment, and `total` counts groups.
pub fn search_messages(
    store: &dyn LogStore,
    search: &MessageSearch,
    max_limit: usize,
) -> Result<SearchPage, StoreError> {
    let limit = search.effective_limit(max_limit);
    let mut groups: BTreeMap<(String, Environment), LogRecord> = BTreeMap::new();

    store.scan_logs(&mut |row| {
        if search.matches(row) {
            match groups.entry((row.message_lower.clone(), row.environment)) {
                Entry::Vacant(slot) => {
                    let mut newest = row.clone();
                    newest.count = Some(1);
                    slot.insert(newest);
                }
                Entry::Occupied(mut slot) => {
                    *slot.get_mut().count.get_or_insert(0) += 1;
                }
            }
        }
        ControlFlow::Continue(())
    })?;

    let total = groups.len();
    let rows = groups
        .into_values()
        .skip(search.offset)
        .take(limit)
        .collect();
    Ok(SearchPage::new(rows, total, limit, search.offset))
}

/// Distinct session ids, sorted, optionally filtered by a case-insensitive substring.
pub fn list_servers(store: &dyn LogStore, search: Option<&str>) -> Result<Vec<String>, StoreError> {
    let needle = search.map(str::to_lowercase).filter(|s| !s.is_empty());
    let mut servers = BTreeSet::new();
    store.scan_logs(&mut |row| {
        let wanted = needle
            .as_deref()
            .is_none_or(|n| row.server_id.to_lowercase().contains(n));
        if wanted && !servers.contains(&row.server_id) {
            servers.insert(row.server_id.clone());
        }
        ControlFlow::Continue(())
    })?;
    Ok(servers.into_iter().collect())
}

/// Delete rows whose message contains any of `phrases`, ignoring case.
pub fn clean(store: &dyn LogStore, phrases: &[String]) -> Result<usize, StoreError> {
    let phrases: Vec<String> = phrases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    if phrases.is_empty() {
        return Ok(0);
    }
    let deleted = store.delete_logs(&|row| phrases.iter().any(|p| row.message_lower.contains(p)))?;
    if deleted > 0 {
        log::info!("Cleaned {deleted} noisy log rows");
    }
    Ok(deleted)
}
