// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Pubkey -> profile metadata cache, with batch helpers for the enrichment
//! coordinator's fan-out reads.

use std::collections::HashMap;
use std::time::Duration;

use nostr::{Metadata, PublicKey};

use super::TtlCache;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(600);

/// Pubkey -> [`Metadata`] cache with its own negative bucket.
#[derive(Debug)]
pub struct ProfileCache {
    inner: TtlCache<PublicKey, Metadata>,
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileCache {
    /// New cache with default TTLs.
    pub fn new() -> Self {
        Self {
            inner: TtlCache::with_ttl(DEFAULT_TTL, DEFAULT_NEGATIVE_TTL),
        }
    }

    /// Look up a single pubkey's cached profile.
    pub async fn get(&self, pubkey: &PublicKey) -> Option<Option<Metadata>> {
        self.inner.get(pubkey).await
    }

    /// Look up many pubkeys at once, returning only those with a fresh cache
    /// entry (positive or negative); misses are simply absent from the map.
    pub async fn get_many(
        &self,
        pubkeys: &[PublicKey],
    ) -> HashMap<PublicKey, Option<Metadata>> {
        let mut out = HashMap::with_capacity(pubkeys.len());
        for pubkey in pubkeys {
            if let Some(entry) = self.get(pubkey).await {
                out.insert(*pubkey, entry);
            }
        }
        out
    }

    /// Cache a resolved profile.
    pub async fn insert(&self, pubkey: PublicKey, metadata: Metadata) {
        self.inner.insert(pubkey, metadata).await;
    }

    /// Record that `pubkey` has no known profile (at least one relay
    /// responded and none had kind-0 for it).
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
    use nostr::Keys;

    use super::*;

    #[tokio::test]
    async fn test_batch_read_mixes_hits_and_misses() {
        let cache = ProfileCache::new();
        let known = Keys::generate().public_key();
        let negative = Keys::generate().public_key();
        let unknown = Keys::generate().public_key();

        cache.insert(known, Metadata::new().name("alice")).await;
        cache.insert_negative(negative).await;

        let result = cache.get_many(&[known, negative, unknown]).await;
        assert_eq!(result.len(), 2);
        assert!(result.get(&known).unwrap().is_some());
        assert!(result.get(&negative).unwrap().is_none());
        assert!(!result.contains_key(&unknown));
    }
}
