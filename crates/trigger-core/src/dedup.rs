//! TTL-bounded "seen keys" memory for webhook delivery deduplication
//! (spec §4.3).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// `(triggerId, dedupKey) -> firstSeenAt`, swept periodically.
#[derive(Debug, Default)]
pub struct DeduplicationCache {
    entries: DashMap<(Uuid, String), DateTime<Utc>>,
}

impl DeduplicationCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns `true` iff an entry already exists for this key within
    /// `window_ms`. If not a duplicate, records the entry and returns
    /// `false`. The read+insert is atomic per key (single `DashMap` entry
    /// API call).
    pub fn is_duplicate(&self, trigger_id: Uuid, dedup_key: &str, window_ms: u64) -> bool {
        let now = Utc::now();
        let key = (trigger_id, dedup_key.to_string());

        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let first_seen = *occupied.get();
                (now - first_seen).num_milliseconds() < window_ms as i64
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                false
            }
        }
    }

    pub fn remove_trigger(&self, trigger_id: Uuid) {
        self.entries.retain(|(id, _), _| *id != trigger_id);
    }

    /// Remove entries older than `max(configured window, 24h)`.
    pub fn sweep(&self, configured_window_ms: u64) {
        let retention_ms = configured_window_ms.max(24 * 60 * 60 * 1000);
        let now = Utc::now();
        self.entries
            .retain(|_, first_seen| (now - *first_seen).num_milliseconds() < retention_ms as i64);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
