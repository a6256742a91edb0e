// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Pubkey -> NIP-65 relay-list cache, consulted by the outbox router.

use std::time::Duration;

use nostr::PublicKey;

use crate::relay_list::RelayList;

use super::TtlCache;

/// Relay lists change rarely; cache them for a long time.
const DEFAULT_TTL: Duration = Duration::from_secs(6 * 3600);
const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(900);

/// Pubkey -> [`RelayList`] cache, with a negative bucket for pubkeys known to
/// have no (or an empty) relay-list event.
#[derive(Debug)]
pub struct RelayListCache {
    inner: TtlCache<PublicKey, RelayList>,
}

impl Default for RelayListCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayListCache {
    /// New cache with default TTLs.
    pub fn new() -> Self {
        Self {
            inner: TtlCache::with_ttl(DEFAULT_TTL, DEFAULT_NEGATIVE_TTL),
        }
    }

    /// Look up `pubkey`'s cached relay list.
    pub async fn get(&self, pubkey: &PublicKey) -> Option<Option<RelayList>> {
        self.inner.get(pubkey).await
    }

    /// Cache a resolved relay list.
    pub async fn insert(&self, pubkey: PublicKey, list: RelayList) {
        self.inner.insert(pubkey, list).await;
    }

    /// Record that `pubkey` has no relay-list event.
    pub async fn insert_negative(&self, pubkey: PublicKey) {
        self.inner.insert_negative(pubkey).await;
    }

    /// Drop every expired entry.
    pub async fn sweep(&self) {
        self.inner.sweep().await;
    }
}

#[cfg(test)]
mod tests {
    use nostr::{Keys, RelayUrl};

    use super::*;

    #[tokio::test]
    async fn test_relay_list_roundtrip() {
        let cache = RelayListCache::new();
        let pubkey = Keys::generate().public_key();

        let tag = nostr::Tag::relay_metadata(
            nostr::Url::parse("wss://relay.example.com").unwrap(),
            None,
        );
        let event = nostr::EventBuilder::new(nostr::Kind::RelayList, "", &[tag])
            .to_event(&Keys::generate())
            .unwrap();
        let list = RelayList::from_event(&event);

        cache.insert(pubkey, list.clone()).await;
        let hit = cache.get(&pubkey).await.unwrap().unwrap();
        assert_eq!(hit, list);
        assert_eq!(
            hit.read(),
            &[RelayUrl::parse("wss://relay.example.com").unwrap()]
        );
    }

    #[tokio::test]
    async fn test_negative_entry() {
        let cache = RelayListCache::new();
        let pubkey = Keys::generate().public_key();
        cache.insert_negative(pubkey).await;
        assert_eq!(cache.get(&pubkey).await, Some(None));
    }
}
