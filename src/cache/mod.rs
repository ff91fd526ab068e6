//! Process-wide key/value cache shared by the request layer and background jobs.
//!
//! Keys follow the `"<prefix>:<identifier>[:<variant>]"` convention, e.g.
//! `cover:<book_id>:100x150`. The prefix (text before the first `:`) drives
//! prefix invalidation and the per-prefix statistics.

mod memory_cache;

pub use memory_cache::MemoryCacheService;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Immutable handle to a cached payload. Callers never get a mutable view of
/// the stored bytes.
pub type CachedValue = Arc<[u8]>;

/// Statistics bucket for keys that carry no `:` separator.
pub const OTHER_BUCKET: &str = "other";

/// A copy of a single cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: CachedValue,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time summary of the cache contents.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub entries_by_prefix: BTreeMap<String, usize>,
}

/// Cache contract consumed by request handlers and workers alike.
///
/// None of the operations fail: an absent key is a miss, and removals of
/// absent keys are no-ops.
pub trait CacheService: Send + Sync {
    /// Look up a value. Never blocks on generation.
    fn get(&self, key: &str) -> Option<CachedValue>;

    /// Look up a value together with its key and creation time.
    fn get_entry(&self, key: &str) -> Option<CacheEntry>;

    /// Check for presence without counting a hit or a miss.
    fn contains_key(&self, key: &str) -> bool;

    /// Upsert, replacing any existing value and its timestamp.
    fn set(&self, key: &str, value: CachedValue);

    /// Remove a single key. Returns whether something was removed.
    fn remove(&self, key: &str) -> bool;

    /// Remove every key starting with the literal `prefix`. The empty prefix
    /// matches every key.
    fn remove_by_prefix(&self, prefix: &str) -> usize;

    /// Remove everything.
    fn clear(&self) -> usize;

    /// Snapshot of all current keys, in no particular order.
    fn get_all_keys(&self) -> Vec<String>;

    fn get_cached_items_count(&self) -> usize;

    /// Remove entries for which `now - created_at > max_age`.
    fn remove_older_than(&self, max_age: Duration) -> usize;

    /// Same as [`CacheService::remove_older_than`], restricted to keys
    /// starting with `prefix`.
    fn remove_by_prefix_older_than(&self, prefix: &str, max_age: Duration) -> usize;

    fn statistics(&self) -> CacheStatistics;
}

/// Returns the statistics bucket a key belongs to.
pub fn key_prefix(key: &str) -> &str {
    match key.split_once(':') {
        Some((prefix, _)) => prefix,
        None => OTHER_BUCKET,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefix() {
        assert_eq!(key_prefix("cover:b1:100x150"), "cover");
        assert_eq!(key_prefix("book:b2:meta"), "book");
        assert_eq!(key_prefix(":leading"), "");
        assert_eq!(key_prefix("plain"), OTHER_BUCKET);
        assert_eq!(key_prefix(""), OTHER_BUCKET);
    }
}
