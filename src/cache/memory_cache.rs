use super::{key_prefix, CacheEntry, CacheService, CacheStatistics, CachedValue};
use crate::metrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;

struct StoredEntry {
    value: CachedValue,
    created_at: DateTime<Utc>,
}

/// In-memory [`CacheService`] backed by a single `RwLock<HashMap>`.
///
/// Every mutation takes the write lock for its whole duration, so a prefix
/// removal or a clear is observed by readers either entirely or not at all.
pub struct MemoryCacheService {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryCacheService {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, StoredEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, StoredEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Upsert with an explicit creation time.
    pub fn set_at(&self, key: &str, value: CachedValue, created_at: DateTime<Utc>) {
        let mut entries = self.write();
        entries.insert(key.to_string(), StoredEntry { value, created_at });
        metrics::set_cache_entries(entries.len());
    }

    /// Age-based removal evaluated against a caller-supplied `now`.
    ///
    /// An entry is removed when `now - created_at > max_age`; entries exactly
    /// `max_age` old are kept.
    pub fn remove_older_than_at(
        &self,
        prefix: Option<&str>,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> usize {
        let cutoff = match chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        {
            Some(cutoff) => cutoff,
            // Older than representable time: nothing can be that old
            None => return 0,
        };

        let removed = self.remove_where(|key, entry| {
            prefix.map_or(true, |p| key.starts_with(p)) && entry.created_at < cutoff
        });
        debug!(
            "Removed {} cache entries created before {} (prefix: {:?})",
            removed, cutoff, prefix
        );
        removed
    }

    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str, &StoredEntry) -> bool,
    {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|key, entry| !predicate(key, entry));
        let removed = before - entries.len();
        metrics::set_cache_entries(entries.len());
        removed
    }
}

impl Default for MemoryCacheService {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheService for MemoryCacheService {
    fn get(&self, key: &str) -> Option<CachedValue> {
        let value = self.read().get(key).map(|entry| entry.value.clone());
        metrics::record_cache_lookup(value.is_some());
        value
    }

    fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        self.read().get(key).map(|entry| CacheEntry {
            key: key.to_string(),
            value: entry.value.clone(),
            created_at: entry.created_at,
        })
    }

    fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    fn set(&self, key: &str, value: CachedValue) {
        self.set_at(key, value, Utc::now());
    }

    fn remove(&self, key: &str) -> bool {
        let mut entries = self.write();
        let removed = entries.remove(key).is_some();
        metrics::set_cache_entries(entries.len());
        removed
    }

    fn remove_by_prefix(&self, prefix: &str) -> usize {
        let removed = self.remove_where(|key, _| key.starts_with(prefix));
        debug!("Removed {} cache entries with prefix {:?}", removed, prefix);
        removed
    }

    fn clear(&self) -> usize {
        let mut entries = self.write();
        let removed = entries.len();
        entries.clear();
        metrics::set_cache_entries(0);
        debug!("Cleared {} cache entries", removed);
        removed
    }

    fn get_all_keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn get_cached_items_count(&self) -> usize {
        self.read().len()
    }

    fn remove_older_than(&self, max_age: Duration) -> usize {
        self.remove_older_than_at(None, max_age, Utc::now())
    }

    fn remove_by_prefix_older_than(&self, prefix: &str, max_age: Duration) -> usize {
        self.remove_older_than_at(Some(prefix), max_age, Utc::now())
    }

    fn statistics(&self) -> CacheStatistics {
        let entries = self.read();
        let mut stats = CacheStatistics {
            total_entries: entries.len(),
            ..Default::default()
        };
        for key in entries.keys() {
            *stats
                .entries_by_prefix
                .entry(key_prefix(key).to_string())
                .or_insert(0) += 1;
        }
        stats
    }
}
