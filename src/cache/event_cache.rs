// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Filter-fingerprint keyed cache of fetch results.

use std::time::Duration;

use nostr::Event;

use crate::fingerprint::Fingerprint;

use super::TtlCache;

/// Short TTL: event cache entries go stale quickly relative to profile/relay-list data.
const DEFAULT_TTL: Duration = Duration::from_secs(60);
const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(30);

/// A cached fetch result: the merged/deduped events plus whether every
/// queried relay reached EOSE before the fetch gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEvents {
    /// Events collected for the fingerprinted (relays, filter) pair.
    pub events: Vec<Event>,
    /// Whether every relay queried reached EOSE (vs. the fetch timing out
    /// with some relays still open).
    pub all_eose: bool,
}

/// Fingerprint -> (events, all_eose) cache fronting the fetch engine.
#[derive(Debug)]
pub struct EventCache {
    inner: TtlCache<Fingerprint, CachedEvents>,
}

impl Default for EventCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCache {
    /// New cache with default TTLs.
    pub fn new() -> Self {
        Self {
            inner: TtlCache::with_ttl(DEFAULT_TTL, DEFAULT_NEGATIVE_TTL),
        }
    }

    /// Look up a fresh result for `fingerprint`.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Option<CachedEvents>> {
        self.inner.get(fingerprint).await
    }

    /// Cache a positive fetch result.
    pub async fn insert(&self, fingerprint: Fingerprint, events: Vec<Event>, all_eose: bool) {
        self.inner
            .insert(fingerprint, CachedEvents { events, all_eose })
            .await;
    }

    /// Record that this fingerprint is known to return nothing. Callers must
    /// only do this when at least one relay actually responded.
    pub async fn insert_negative(&self, fingerprint: Fingerprint) {
        self.inner.insert_negative(fingerprint).await;
    }

    /// Drop every expired entry.
    pub async fn sweep(&self) {
        self.inner.sweep().await;
    }
}

#[cfg(test)]
mod tests {
    use nostr::{Filter, Kind, RelayUrl};

    use super::*;

    fn fp(n: u8) -> Fingerprint {
        let relays = [RelayUrl::parse("wss://relay.example.com").unwrap()];
        Fingerprint::compute(&relays, &Filter::new().kind(Kind::TextNote).limit(n as usize))
    }

    #[tokio::test]
    async fn test_positive_roundtrip() {
        let cache = EventCache::new();
        let key = fp(1);
        cache.insert(key, Vec::new(), true).await;
        let hit = cache.get(&key).await.unwrap().unwrap();
        assert!(hit.all_eose);
        assert!(hit.events.is_empty());
    }

    #[tokio::test]
    async fn test_negative_distinguished_from_miss() {
        let cache = EventCache::new();
        let key = fp(2);
        cache.insert_negative(key).await;
        assert_eq!(cache.get(&key).await, Some(None));
        assert_eq!(cache.get(&fp(3)).await, None);
    }
}
