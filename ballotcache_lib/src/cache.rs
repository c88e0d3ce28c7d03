//! In-memory TTL cache backed by `DashMap` for concurrent access.
//!
//! The geocoder adapter keeps successful lookups here so repeated
//! resolutions of the same address text skip the provider.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// A single cached value with its expiration time.
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe in-memory cache with time-to-live expiration.
///
/// Expired entries are lazily evicted on the next `get` for that key, or in
/// bulk by [`MemoryCache::purge_expired`].
pub struct MemoryCache<V> {
    store: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> MemoryCache<V> {
    /// Creates a new cache with the given time-to-live for entries.
    pub fn new(ttl: Duration) -> Self {
        Self {
            store: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached value for `key`, or `None` if missing or expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.store.get(key)?;
        if Instant::now() > entry.expires_at {
            drop(entry);
            self.store.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Inserts or overwrites a cache entry. The entry expires after the configured TTL.
    pub fn set(&self, key: String, value: V) {
        self.store.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.store.remove(key);
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.store.len();
        self.store.retain(|_, entry| entry.expires_at >= now);
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Removes all entries from the cache.
    pub fn clear(&self) {
        self.store.clear();
    }
}

/// Cache key for free-text addresses: lowercase, single spaces, no
/// spaces before commas. "Jackson ,  MS" and "jackson, ms" share a key.
pub fn address_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" ,", ",")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_set_and_get() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.set("key1".to_string(), 42u32);
        assert_eq!(cache.get("key1"), Some(42));
    }

    #[test]
    fn cache_miss() {
        let cache: MemoryCache<String> = MemoryCache::new(Duration::from_secs(60));
        assert_eq!(cache.get("nonexistent"), None);
    }

    #[test]
    fn cache_expiration() {
        let cache = MemoryCache::new(Duration::from_millis(1));
        cache.set("key1".to_string(), "value1".to_string());
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("key1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_purge_expired() {
        let cache = MemoryCache::new(Duration::from_millis(1));
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn cache_overwrite_and_remove() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.set("key1".to_string(), "old".to_string());
        cache.set("key1".to_string(), "new".to_string());
        assert_eq!(cache.get("key1"), Some("new".to_string()));
        cache.remove("key1");
        assert_eq!(cache.get("key1"), None);
    }

    #[test]
    fn cache_clear() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.clear();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn address_key_folds_case_and_spacing() {
        assert_eq!(address_key("  Jackson ,   MS "), "jackson, ms");
        assert_eq!(address_key("jackson, ms"), "jackson, ms");
        assert_ne!(address_key("Jackson, MS"), address_key("Jackson, AL"));
    }
}
