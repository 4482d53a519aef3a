//! Time-bounded key/value memoization with size-capped eviction.
//!
//! Entries expire by TTL and are additionally dropped in bulk once the
//! cache reaches its size cap: expired entries first, then the oldest
//! tenth by insertion order. Reads delete entries found expired, so the
//! cache must sit behind a lock even for lookups.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

#[derive(Debug)]
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    default_ttl: Duration,
    max_entries: usize,
    next_seq: u64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
            max_entries: max_entries.max(1),
            next_seq: 0,
        }
    }

    /// Return the value iff present and unexpired. An expired entry is
    /// removed on read.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if now <= entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert a value with the given TTL (or the cache default), evicting
    /// first when the cache is full.
    pub fn set(&mut self, key: &str, value: V, ttl: Option<Duration>) {
        if self.entries.len() >= self.max_entries {
            let removed = self.cleanup();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            } else {
                debug!("cache cleanup dropped {removed} expired entries");
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl.unwrap_or(self.default_ttl),
                seq,
            },
        );
    }

    /// Key visibility: present and unexpired. Removes on expiry like `get`.
    pub fn has(&mut self, key: &str) -> bool {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if now <= entry.expires_at => true,
            Some(_) => {
                self.entries.remove(key);
                false
            }
            None => false,
        }
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now <= entry.expires_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the oldest tenth (at least one entry) by insertion order.
    fn evict_oldest(&mut self) {
        let drop_count = (self.max_entries / 10).max(1);
        let mut by_age: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.seq, key.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(seq, _)| *seq);
        for (_, key) in by_age.into_iter().take(drop_count) {
            self.entries.remove(&key);
        }
        debug!("cache evicted {drop_count} oldest entries");
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

/// Canonical cache key for an email address.
pub fn email_cache_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Canonical cache key for a domain.
pub fn domain_cache_key(domain: &str) -> String {
    domain.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn round_trips_within_ttl() {
        let mut cache: TtlCache<u32> = TtlCache::default();
        cache.set("k", 7, Some(Duration::from_secs(10)));
        assert_eq!(cache.get("k"), Some(7));
        assert!(cache.has("k"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k"), None);
        // the expired entry was removed on read
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn has_removes_expired_entries() {
        let mut cache: TtlCache<u32> = TtlCache::default();
        cache.set("k", 1, Some(Duration::from_secs(1)));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.has("k"));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_reports_removed_count() {
        let mut cache: TtlCache<u32> = TtlCache::default();
        cache.set("a", 1, Some(Duration::from_secs(1)));
        cache.set("b", 2, Some(Duration::from_secs(100)));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_expired_before_oldest() {
        let mut cache: TtlCache<u32> = TtlCache::new(DEFAULT_TTL, 3);
        cache.set("stale", 0, Some(Duration::from_secs(1)));
        cache.set("b", 2, None);
        cache.set("c", 3, None);
        tokio::time::advance(Duration::from_secs(2)).await;

        // full: cleanup frees the expired slot, no live entry is lost
        cache.set("d", 4, None);
        assert_eq!(cache.get("stale"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.get("d"), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_oldest_tenth_when_nothing_expired() {
        let mut cache: TtlCache<u32> = TtlCache::new(DEFAULT_TTL, 10);
        for i in 0..10u32 {
            cache.set(&format!("k{i}"), i, None);
        }
        cache.set("fresh", 99, None);

        // max/10 == 1: only the oldest insertion goes
        assert_eq!(cache.get("k0"), None);
        assert_eq!(cache.get("k1"), Some(1));
        assert_eq!(cache.get("fresh"), Some(99));
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn normalizes_cache_keys() {
        assert_eq!(email_cache_key("  User@Example.COM "), "user@example.com");
        assert_eq!(domain_cache_key(" Example.COM"), "example.com");
    }
}
