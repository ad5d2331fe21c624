//! Query Table Cache.
//!
//! Indexed by `query_ref`, read-mostly, protected by an atomic swap of the
//! whole map rather than a lock: readers never block on a refresh and always
//! observe one consistent snapshot. The Lead is the only writer — it loads a
//! fresh snapshot with [`Qtc::refresh`] after running the bootstrap SELECT at
//! startup, and again on receipt of a cache-invalidation notification.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// The queue a query template prefers, set by whoever authored the row in
/// the `queries` table. `None` means the dispatch heuristic decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueHint {
    Fast,
    Medium,
    Slow,
    Cache,
}

impl QueueHint {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "fast" => Some(Self::Fast),
            "medium" => Some(Self::Medium),
            "slow" => Some(Self::Slow),
            "cache" => Some(Self::Cache),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Cache => "cache",
        }
    }
}

/// One row of the `queries` table.
#[derive(Debug, Clone)]
pub struct QtcEntry {
    pub query_ref: i64,
    pub sql_template: String,
    pub queue_hint: Option<QueueHint>,
    pub description: String,
    pub version: i64,
}

/// The `query_ref` the Lead loads at startup to populate the cache.
pub const BOOTSTRAP_QUERY_REF: i64 = 0;

type Snapshot = HashMap<i64, Arc<QtcEntry>>;

/// A per-database query template cache.
pub struct Qtc {
    snapshot: ArcSwap<Snapshot>,
}

impl Default for Qtc {
    fn default() -> Self {
        Self::new()
    }
}

impl Qtc {
    pub fn new() -> Self {
        Self { snapshot: ArcSwap::from_pointee(HashMap::new()) }
    }

    /// Looks up a template. Never blocks on a concurrent `refresh`.
    pub fn get(&self, query_ref: i64) -> Option<Arc<QtcEntry>> {
        self.snapshot.load().get(&query_ref).cloned()
    }

    /// Replaces the whole map atomically. Stale readers mid-lookup keep
    /// using the snapshot they already loaded; new lookups see the new one.
    pub fn refresh(&self, entries: Vec<QtcEntry>) {
        let map: Snapshot = entries.into_iter().map(|e| (e.query_ref, Arc::new(e))).collect();
        let count = map.len();
        self.snapshot.store(Arc::new(map));
        tracing::debug!(entries = count, "query table cache refreshed");
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(query_ref: i64, hint: Option<QueueHint>) -> QtcEntry {
        QtcEntry {
            query_ref,
            sql_template: format!("SELECT {query_ref}"),
            queue_hint: hint,
            description: String::new(),
            version: 1,
        }
    }

    #[test]
    fn get_returns_none_before_first_refresh() {
        let qtc = Qtc::new();
        assert!(qtc.get(BOOTSTRAP_QUERY_REF).is_none());
    }

    #[test]
    fn refresh_replaces_snapshot_atomically() {
        let qtc = Qtc::new();
        qtc.refresh(vec![entry(1, Some(QueueHint::Fast)), entry(2, None)]);
        assert_eq!(qtc.len(), 2);
        assert_eq!(qtc.get(1).unwrap().queue_hint, Some(QueueHint::Fast));

        qtc.refresh(vec![entry(1, Some(QueueHint::Slow))]);
        assert_eq!(qtc.len(), 1);
        assert_eq!(qtc.get(1).unwrap().queue_hint, Some(QueueHint::Slow));
        assert!(qtc.get(2).is_none());
    }

    #[test]
    fn queue_hint_round_trips_through_parse() {
        for hint in [QueueHint::Fast, QueueHint::Medium, QueueHint::Slow, QueueHint::Cache] {
            assert_eq!(QueueHint::parse(hint.as_str()), Some(hint));
        }
        assert_eq!(QueueHint::parse("bogus"), None);
    }
}
