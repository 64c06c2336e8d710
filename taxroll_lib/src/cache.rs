//! In-memory TTL cache backed by `DashMap` for concurrent access.
//!
//! Holds hot per-process values (resolved bundle rates, parsed provider
//! payloads) so repeated calculations in one request burst skip both the
//! network and the durable query cache. Entries carry their own TTL.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Thread-safe in-memory cache with time-to-live expiration.
///
/// Values are serialized JSON strings. Expired entries are lazily evicted
/// on the next `get` for that key; `purge_expired` sweeps the rest.
pub struct MemoryCache {
    store: DashMap<String, CacheEntry>,
    default_ttl: Duration,
}

impl MemoryCache {
    /// Creates a new cache with the given default time-to-live.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            store: DashMap::new(),
            default_ttl,
        }
    }

    /// Returns the cached value for `key`, or `None` if missing or expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let entry = self.store.get(key)?;
        if Instant::now() >= entry.expires_at {
            drop(entry);
            self.store.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Inserts or overwrites an entry with the default TTL.
    pub fn set(&self, key: String, value: String) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Inserts or overwrites an entry with an explicit TTL.
    pub fn set_with_ttl(&self, key: String, value: String, ttl: Duration) {
        self.store.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.store.len();
        self.store.retain(|_, entry| entry.expires_at > now);
        before - self.store.len()
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.store.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.set("rate:TX:78701".to_string(), "8.25".to_string());
        assert_eq!(cache.get("rate:TX:78701"), Some("8.25".to_string()));
    }

    #[test]
    fn miss_on_absent_key() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        assert_eq!(cache.get("nope"), None);
    }

    #[test]
    fn expiration() {
        let cache = MemoryCache::new(Duration::from_millis(1));
        cache.set("k".to_string(), "v".to_string());
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let cache = MemoryCache::new(Duration::from_millis(1));
        cache.set_with_ttl("k".to_string(), "v".to_string(), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn purge_drops_only_expired() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.set_with_ttl("old".to_string(), "1".to_string(), Duration::from_millis(1));
        cache.set("fresh".to_string(), "2".to_string());
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("fresh"), Some("2".to_string()));
    }
}
