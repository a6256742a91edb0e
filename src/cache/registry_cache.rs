// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Handler/registry cache: keyed by [`nostr::Kind`] or by addressable-event
//! [`nostr::nips::nip01::Coordinate`], size-capped with oldest-first (FIFO)
//! eviction rather than LRU — registry entries are looked up far more often
//! than they churn, so recency of *access* is not a useful eviction signal.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use super::CacheEntry;

const DEFAULT_CAPACITY: usize = 2_000;
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Size-capped, FIFO-evicting cache for handler/registry lookups.
#[derive(Debug)]
pub struct RegistryCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    order: VecDeque<K>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> Default for RegistryCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl<K, V> RegistryCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// New cache with the given capacity and TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Look up `key`. Expired entries are evicted on read.
    pub fn get(&mut self, key: &K) -> Option<&V>
    where
        V: Clone,
    {
        if matches!(self.entries.get(key), Some(e) if e.is_expired()) {
            self.entries.remove(key);
        }
        self.entries.get(key).and_then(CacheEntry::value)
    }

    /// Insert a value, evicting the oldest entry first if at capacity.
    pub fn insert(&mut self, key: K, value: V) {
        if !self.entries.contains_key(&key) {
            if self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, CacheEntry::positive(value, self.ttl));
    }

    /// Current number of (possibly stale) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use nostr::Kind;

    use super::*;

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let mut cache: RegistryCache<Kind, &'static str> =
            RegistryCache::new(2, Duration::from_secs(60));
        cache.insert(Kind::TextNote, "a");
        cache.insert(Kind::Metadata, "b");
        cache.insert(Kind::RelayList, "c");

        assert!(cache.get(&Kind::TextNote).is_none());
        assert_eq!(cache.get(&Kind::Metadata), Some(&"b"));
        assert_eq!(cache.get(&Kind::RelayList), Some(&"c"));
    }

    #[test]
    fn test_reinsert_does_not_duplicate_order_slot() {
        let mut cache: RegistryCache<Kind, u32> = RegistryCache::new(1, Duration::from_secs(60));
        cache.insert(Kind::TextNote, 1);
        cache.insert(Kind::TextNote, 2);
        assert_eq!(cache.get(&Kind::TextNote), Some(&2));
        assert_eq!(cache.len(), 1);
    }
}
