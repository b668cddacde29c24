//! In-memory TTL cache for coverage results.
//!
//! Backed by `DashMap` so foreground reads never wait on a background
//! refresh writing the same key. Values are replaced whole on `set` and
//! never mutated in place. Timing uses `tokio::time::Instant` so tests can
//! drive expiry with a paused clock.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn expires_at(&self) -> Instant {
        self.stored_at + self.ttl
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

/// Result of a non-evicting cache inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    Fresh(V),
    /// Past its TTL but not yet evicted.
    Stale(V),
    Missing,
}

impl<V> Lookup<V> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Lookup::Fresh(_))
    }

    /// The value regardless of freshness.
    pub fn into_value(self) -> Option<V> {
        match self {
            Lookup::Fresh(v) | Lookup::Stale(v) => Some(v),
            Lookup::Missing => None,
        }
    }
}

/// Key/value store with a per-entry time-to-live.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, CacheEntry<V>>,
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`, expiring `ttl` from now.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Unexpired value for `key`. An expired entry found here is evicted.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        // remove_if holds the shard lock, so a concurrent `set` cannot be lost.
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Inspect `key` without evicting anything.
    pub fn lookup(&self, key: &K) -> Lookup<V> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => Lookup::Stale(entry.value.clone()),
            Some(entry) => Lookup::Fresh(entry.value.clone()),
            None => Lookup::Missing,
        }
    }

    /// Remaining lifetime, or `None` when absent or expired.
    pub fn time_until_expiry(&self, key: &K) -> Option<Duration> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(entry.expires_at().saturating_duration_since(now))
    }

    /// True once at least `threshold` of the entry's TTL has elapsed.
    /// Absent and expired entries are never "expiring soon".
    pub fn is_expiring_soon(&self, key: &K, threshold: f64) -> bool {
        let now = Instant::now();
        let Some(entry) = self.entries.get(key) else {
            return false;
        };
        if entry.is_expired(now) {
            return false;
        }
        let elapsed = now.saturating_duration_since(entry.stored_at);
        elapsed.as_secs_f64() >= entry.ttl.as_secs_f64() * threshold
    }

    /// Drop entries that expired more than `grace` ago. Returns how many
    /// were removed.
    pub fn evict_stale(&self, grace: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now < entry.expires_at() + grace);
        before.saturating_sub(self.entries.len())
    }

    pub fn delete(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included until evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
