// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Pubkey -> notification-feed cache, mutated by merge rather than plain
//! overwrite so incremental polls accumulate instead of clobbering.

use std::time::{Duration, Instant};

use nostr::{Event, PublicKey, Timestamp};
use tokio::sync::RwLock;

const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// A pubkey's merged notification feed.
#[derive(Debug, Clone)]
pub struct NotificationEntry {
    /// Events the pubkey has been notified about (mentions, reactions,
    /// replies, zaps), newest first.
    pub events: Vec<Event>,
    /// Newest `created_at` seen across every merge into this entry.
    pub newest_seen_ts: Timestamp,
    /// When this entry was last touched, for TTL purposes.
    cached_at: Instant,
}

impl NotificationEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

/// Pubkey -> [`NotificationEntry`] cache.
///
/// Unlike the other specializations this does not sit on [`super::TtlCache`]:
/// population is merge-based rather than insert-or-overwrite, so it keeps its
/// own map.
#[derive(Debug)]
pub struct NotificationCache {
    inner: RwLock<std::collections::HashMap<PublicKey, NotificationEntry>>,
    ttl: Duration,
}

impl Default for NotificationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCache {
    /// New cache with the default TTL.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(std::collections::HashMap::new()),
            ttl: DEFAULT_TTL,
        }
    }

    /// Fetch `pubkey`'s current feed, if present and fresh.
    pub async fn get(&self, pubkey: &PublicKey) -> Option<NotificationEntry> {
        let mut inner = self.inner.write().await;
        let expired = inner.get(pubkey).map(|e| e.is_expired(self.ttl))?;
        if expired {
            inner.remove(pubkey);
            return None;
        }
        inner.get(pubkey).cloned()
    }

    /// Merge freshly fetched `events` into `pubkey`'s feed: dedupe by id,
    /// sort by `(created_at DESC, id DESC)`, and advance `newest_seen_ts` to
    /// the max across old and new.
    pub async fn merge(&self, pubkey: PublicKey, events: Vec<Event>) {
        let mut inner = self.inner.write().await;
        let entry = inner.entry(pubkey).or_insert_with(|| NotificationEntry {
            events: Vec::new(),
            newest_seen_ts: Timestamp::from(0),
            cached_at: Instant::now(),
        });

        for event in events {
            if entry.newest_seen_ts < event.created_at {
                entry.newest_seen_ts = event.created_at;
            }
            if !entry.events.iter().any(|e| e.id == event.id) {
                entry.events.push(event);
            }
        }
        entry
            .events
            .sort_unstable_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        entry.cached_at = Instant::now();
    }

    /// Drop every expired entry.
    pub async fn sweep(&self) {
        let mut inner = self.inner.write().await;
        inner.retain(|_, entry| !entry.is_expired(self.ttl));
    }
}

#[cfg(test)]
mod tests {
    use nostr::{EventBuilder, Keys};

    use super::*;

    fn note(keys: &Keys, content: &str) -> Event {
        EventBuilder::new_text_note(content, &[])
            .to_event(keys)
            .unwrap()
    }

    #[tokio::test]
    async fn test_merge_dedupes_and_advances_newest_seen() {
        let cache = NotificationCache::new();
        let author = Keys::generate();
        let pubkey = author.public_key();

        let first = note(&author, "hello");
        cache.merge(pubkey, vec![first.clone()]).await;

        // Re-merging the same event plus a new one should not duplicate.
        let second = note(&author, "world");
        cache.merge(pubkey, vec![first.clone(), second.clone()]).await;

        let entry = cache.get(&pubkey).await.unwrap();
        assert_eq!(entry.events.len(), 2);
        assert_eq!(
            entry.newest_seen_ts,
            first.created_at.max(second.created_at)
        );
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let cache = NotificationCache::new();
        let pubkey = Keys::generate().public_key();
        assert!(cache.get(&pubkey).await.is_none());
    }
}
