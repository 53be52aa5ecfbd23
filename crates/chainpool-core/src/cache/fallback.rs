use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// A cached value with its insertion time and time-to-live.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    #[must_use]
    pub fn new(value: V, ttl: Duration) -> Self {
        Self { value, stored_at: Instant::now(), ttl }
    }

    /// An entry read exactly at its TTL is still live; it expires strictly after.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }

    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }
}

/// Point-in-time view of the cache contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Stored entries, including expired ones the sweeper has not removed yet.
    pub size: usize,
    pub oldest_entry_age_ms: Option<u64>,
    pub newest_entry_age_ms: Option<u64>,
}

/// TTL-keyed map holding the last successful result per logical operation key.
///
/// Expired entries are never returned: [`FallbackCache::get`] and [`FallbackCache::has`]
/// treat them as absent and remove them on the spot, and
/// [`FallbackCache::purge_expired`] (run periodically by the sweeper) removes the ones nobody
/// reads again. Concurrent `set` calls on one key are last-writer-wins.
#[derive(Debug)]
pub struct FallbackCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V> Default for FallbackCache<V> {
    fn default() -> Self {
        Self { entries: DashMap::new() }
    }
}

impl<V: Clone> FallbackCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(key.into(), CacheEntry::new(value, ttl));
    }

    /// Returns the live value for `key`, removing it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            // The shard read guard must be released before `remove_if` locks the same shard.
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }
        self.remove_if_expired(key, now);
        None
    }

    /// Returns `true` if `key` holds a live entry, removing it if it has expired.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return false,
        };
        if expired {
            self.remove_if_expired(key, now);
        }
        !expired
    }

    /// Removes `key`. Returns `true` if an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut stats = CacheStats { size: self.entries.len(), ..CacheStats::default() };

        for entry in &self.entries {
            #[allow(clippy::cast_possible_truncation)]
            let age_ms = entry.age(now).as_millis() as u64;
            stats.oldest_entry_age_ms = Some(stats.oldest_entry_age_ms.map_or(age_ms, |a| a.max(age_ms)));
            stats.newest_entry_age_ms = Some(stats.newest_entry_age_ms.map_or(age_ms, |a| a.min(age_ms)));
        }

        stats
    }

    /// Removes every expired entry and returns how many were dropped.
    ///
    /// Works shard by shard, so concurrent `get`/`set` calls only wait on the shard being
    /// swept.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn remove_if_expired(&self, key: &str, now: Instant) {
        // Re-checked under the write lock: a concurrent `set` may have refreshed the entry.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}
