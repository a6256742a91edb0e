// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Fingerprint-keyed caches fronting every fetch: events, profiles,
//! relay-lists, notifications and handler registries.
//!
//! Every cache shares the same shape: key -> (value, inserted_at, TTL,
//! negative?). Eviction is lazy (checked on read) plus a periodic sweeper;
//! an optional LRU cap bounds memory. Negative entries are a first-class
//! citizen, gated by the caller's invariant that a negative entry only gets
//! written when at least one relay actually responded.

pub mod entry;
pub mod event_cache;
pub mod notification_cache;
pub mod profile_cache;
pub mod registry_cache;
pub mod relay_list_cache;

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::RwLock;

pub use self::entry::CacheEntry;
pub use self::event_cache::EventCache;
pub use self::notification_cache::NotificationCache;
pub use self::profile_cache::ProfileCache;
pub use self::registry_cache::RegistryCache;
pub use self::relay_list_cache::RelayListCache;

/// Default cap applied to every cache unless overridden.
const DEFAULT_CAPACITY: usize = 10_000;

/// Generic TTL + optional-LRU-capped cache underlying every specialization.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    inner: RwLock<LruCache<K, CacheEntry<V>>>,
    ttl: Duration,
    negative_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// New cache with the given positive/negative TTLs and an LRU cap.
    pub fn new(ttl: Duration, negative_ttl: Duration, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or_else(|| NonZeroUsize::new(1).unwrap());
        Self {
            inner: RwLock::new(LruCache::new(cap)),
            ttl,
            negative_ttl,
        }
    }

    /// New cache with [`DEFAULT_CAPACITY`] and the given TTLs.
    pub fn with_ttl(ttl: Duration, negative_ttl: Duration) -> Self {
        Self::new(ttl, negative_ttl, DEFAULT_CAPACITY)
    }

    /// Look up `key`. Returns `None` on miss or expiry (and evicts the stale
    /// entry); `Some(None)` on a fresh negative hit; `Some(Some(v))` on a
    /// fresh positive hit.
    pub async fn get(&self, key: &K) -> Option<Option<V>>
    where
        V: Clone,
    {
        let mut inner = self.inner.write().await;
        let expired = match inner.get(key) {
            Some(entry) => entry.is_expired(),
            None => return None,
        };
        if expired {
            inner.pop(key);
            return None;
        }
        inner.get(key).map(|entry| entry.value().cloned())
    }

    /// Insert a positive value.
    pub async fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.write().await;
        inner.put(key, CacheEntry::positive(value, self.ttl));
    }

    /// Insert a negative ("known absent") marker.
    ///
    /// Callers must only do this once they have established that at least
    /// one relay actually responded (`had_response == true`); see the
    /// negative-cache invariant this type does not itself enforce.
    pub async fn insert_negative(&self, key: K) {
        let mut inner = self.inner.write().await;
        inner.put(key, CacheEntry::negative(self.negative_ttl));
    }

    /// Remove every expired entry. Intended to be driven by a periodic
    /// sweeper task alongside the pool's own janitor.
    pub async fn sweep(&self) {
        let mut inner = self.inner.write().await;
        let stale: Vec<K> = inner
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            inner.pop(&key);
        }
    }

    /// Current number of (possibly stale) entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_positive_hit_then_expiry() {
        let cache: TtlCache<&'static str, u32> =
            TtlCache::with_ttl(Duration::from_millis(20), Duration::from_millis(20));
        cache.insert("a", 1).await;
        assert_eq!(cache.get(&"a").await, Some(Some(1)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get(&"a").await, None);
    }

    #[tokio::test]
    async fn test_negative_entry_is_distinguishable_from_miss() {
        let cache: TtlCache<&'static str, u32> =
            TtlCache::with_ttl(Duration::from_secs(5), Duration::from_secs(5));
        cache.insert_negative("missing").await;
        assert_eq!(cache.get(&"missing").await, Some(None));
        assert_eq!(cache.get(&"never-queried").await, None);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(5), Duration::from_secs(5), 2);
        cache.insert(1, 1).await;
        cache.insert(2, 2).await;
        cache.insert(3, 3).await;
        assert_eq!(cache.get(&1).await, None);
        assert_eq!(cache.get(&3).await, Some(Some(3)));
    }
}
