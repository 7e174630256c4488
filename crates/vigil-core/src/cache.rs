// ── TTL response cache ──
//
// Keyed storage for fetched collections. Expiry is checked lazily on
// read; there is no sweeper task. Timestamps come from
// `tokio::time::Instant` so a paused test runtime drives expiry.
//
// Every invalidation bumps a counter. A fetch takes a ticket before it
// starts and writes with `set_if_current`, so a response that was in
// flight across an invalidation never lands in the cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use crate::model::EntityKind;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
    ticket: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.stored_at + self.ttl
    }
}

/// Concurrent TTL cache keyed by strings built with [`collection_key`]
/// and [`entity_key`].
pub struct CacheStore<V: Clone + Send + Sync + 'static> {
    entries: DashMap<String, CacheEntry<V>>,
    invalidations: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> CacheStore<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Take before fetching; pass to [`Self::set_if_current`].
    pub fn ticket(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// The stored value, unless missing or past its TTL. Expired entries
    /// are evicted here.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        trace!(key, "cache entry expired");
        None
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let ticket = self.ticket();
        self.insert(key.into(), value, ttl, ticket);
    }

    /// Store `value` only if nothing was invalidated since `ticket` was
    /// taken. Returns `false` when the write was discarded.
    pub fn set_if_current(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
        ticket: u64,
    ) -> bool {
        if self.ticket() != ticket {
            return false;
        }
        let key = key.into();
        self.insert(key.clone(), value, ttl, ticket);

        // An invalidation that raced the insert may have run its removal
        // first; take the entry back out ourselves.
        if self.ticket() != ticket {
            self.entries.remove_if(&key, |_, entry| entry.ticket == ticket);
            return false;
        }
        true
    }

    fn insert(&self, key: String, value: V, ttl: Duration, ticket: u64) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
                ticket,
            },
        );
    }

    /// Remove exactly `key`. Returns `true` if it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`. Returns the count.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before.saturating_sub(self.entries.len())
    }

    pub fn clear_all(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    /// Stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone + Send + Sync + 'static> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Key construction ─────────────────────────────────────────────────

/// `"{kind}:{location}"`, the key for a whole collection.
pub fn collection_key(kind: EntityKind, location_id: &str) -> String {
    format!("{kind}:{location_id}")
}

/// `"{kind}:{location}:{id}"`, the key for a single entity.
pub fn entity_key(kind: EntityKind, location_id: &str, id: &str) -> String {
    format!("{kind}:{location_id}:{id}")
}

/// Prefix matching every [`entity_key`] of `kind` in one location, and
/// nothing from a location whose id merely starts the same way.
pub fn entity_prefix(kind: EntityKind, location_id: &str) -> String {
    format!("{kind}:{location_id}:")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn value_served_until_ttl_then_absent() {
        let cache = CacheStore::new();
        cache.set("zone:loc-1", 7u32, TTL);

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(cache.get("zone:loc-1"), Some(7));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.get("zone:loc-1"), None);
        assert!(cache.is_empty(), "expired entry evicted on read");
    }

    #[tokio::test(start_paused = true)]
    async fn set_refreshes_stored_at() {
        let cache = CacheStore::new();
        cache.set("k", 1u32, TTL);
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.set("k", 2u32, TTL);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn exact_invalidation_leaves_siblings() {
        let cache = CacheStore::new();
        cache.set(collection_key(EntityKind::Zone, "L1"), 1u32, TTL);
        cache.set(collection_key(EntityKind::Zone, "L10"), 2u32, TTL);

        assert!(cache.invalidate("zone:L1"));
        assert!(!cache.invalidate("zone:L1"));
        assert_eq!(cache.get("zone:L10"), Some(2));
    }

    #[test]
    fn prefix_invalidation_is_location_scoped() {
        let cache = CacheStore::new();
        cache.set(entity_key(EntityKind::Zone, "L1", "z1"), 1u32, TTL);
        cache.set(entity_key(EntityKind::Zone, "L1", "z2"), 2u32, TTL);
        cache.set(entity_key(EntityKind::Zone, "L10", "z1"), 3u32, TTL);
        cache.set(entity_key(EntityKind::Device, "L1", "d1"), 4u32, TTL);

        let removed = cache.invalidate_prefix(&entity_prefix(EntityKind::Zone, "L1"));
        assert_eq!(removed, 2);
        assert_eq!(cache.get("zone:L10:z1"), Some(3));
        assert_eq!(cache.get("device:L1:d1"), Some(4));
    }

    #[test]
    fn write_from_before_invalidation_is_discarded() {
        let cache = CacheStore::new();
        let ticket = cache.ticket();
        cache.invalidate("zone:L1");

        assert!(!cache.set_if_current("zone:L1", 1u32, TTL, ticket));
        assert_eq!(cache.get("zone:L1"), None);

        let fresh = cache.ticket();
        assert!(cache.set_if_current("zone:L1", 2u32, TTL, fresh));
        assert_eq!(cache.get("zone:L1"), Some(2));
    }

    #[test]
    fn clear_all_empties() {
        let cache = CacheStore::new();
        cache.set("a", 1u32, TTL);
        cache.set("b", 2u32, TTL);
        assert_eq!(cache.len(), 2);
        cache.clear_all();
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }
}
