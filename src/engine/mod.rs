// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! The federated fetch engine (C6): the single algorithmic kernel every
//! exposed fetch specialization is built on, fronted by the cache-aware
//! facade described in the module-level docs of [`core`].
//!
//! [`Engine`] is the inherent-method handle over the kernel, mirroring how
//! [`crate::RelayPool`] is an inherent-method facade over
//! `InternalRelayPool`: every public operation here borrows `self` and
//! delegates into free functions in [`core`] plus the cache/health/pool
//! collaborators it was constructed with.

pub(crate) mod core;
pub mod error;
pub mod options;

use std::collections::HashMap;
use std::time::Duration;

use nostr::nips::nip01::Coordinate;
use nostr::{Event, EventId, Filter, JsonUtil, Kind, Metadata, PublicKey, RelayUrl};
use tokio::sync::Mutex as AsyncMutex;

pub(crate) use self::core::ExitMode;
pub use self::error::Error;
pub use self::options::EngineOptions;
use crate::cache::{EventCache, NotificationCache, ProfileCache, RegistryCache, RelayListCache};
use crate::fingerprint::Fingerprint;
use crate::health::HealthStore;
use crate::pool::RelayPool;
use crate::relay::options::RelaySendOptions;
use crate::relay_list::RelayList;
use crate::singleflight::Singleflight;

/// Result of a top-level fetch: the merged/deduped/sorted/truncated event set
/// plus whether every queried relay reached EOSE before the call returned.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Events collected for the query, sorted `(created_at DESC, id DESC)`.
    pub events: Vec<Event>,
    /// True iff every queried relay signalled end-of-stored-events.
    pub all_eose: bool,
}

/// Aggregated reaction counts for a single event, keyed by the reaction
/// content (`+`, `-`, an emoji, ...). Built by folding kind-7 events over
/// their `content` field; the engine treats reaction bodies as opaque text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionsSummary {
    /// Total number of reaction events observed for the target.
    pub total: usize,
    /// Count per distinct reaction content.
    pub by_content: HashMap<String, usize>,
}

/// Per-relay outcome of a [`Engine::publish`] call.
pub type PublishResult = HashMap<RelayUrl, Result<(), String>>;

/// The federated fetch engine.
///
/// Owns (or borrows, via `Clone`-cheap handles) every collaborator the
/// algorithm in [`core`] needs: the connection pool (C3), the health store
/// (C4), and the cache layer (C5). Constructed once per process and cloned
/// (cheaply — every field is an `Arc`-backed handle) into whatever adjacent
/// HTTP/handler layer consumes it.
#[derive(Debug, Clone)]
pub struct Engine {
    pool: RelayPool,
    health: HealthStore,
    options: EngineOptions,

    event_cache: std::sync::Arc<EventCache>,
    profile_cache: std::sync::Arc<ProfileCache>,
    relay_list_cache: std::sync::Arc<RelayListCache>,
    notification_cache: std::sync::Arc<NotificationCache>,
    registry_cache: std::sync::Arc<AsyncMutex<RegistryCache<Coordinate, Event>>>,

    event_singleflight: std::sync::Arc<Singleflight<Fingerprint, (Vec<Event>, bool, bool)>>,
    profile_singleflight: std::sync::Arc<Singleflight<PublicKey, Option<Metadata>>>,
    relay_list_singleflight: std::sync::Arc<Singleflight<PublicKey, Option<RelayList>>>,
}

impl Engine {
    /// New engine over an existing [`RelayPool`], with default caches and
    /// health store.
    pub fn new(pool: RelayPool, options: EngineOptions) -> Self {
        Self {
            pool,
            health: HealthStore::new(),
            options,
            event_cache: std::sync::Arc::new(EventCache::new()),
            profile_cache: std::sync::Arc::new(ProfileCache::new()),
            relay_list_cache: std::sync::Arc::new(RelayListCache::new()),
            notification_cache: std::sync::Arc::new(NotificationCache::new()),
            registry_cache: std::sync::Arc::new(AsyncMutex::new(RegistryCache::default())),
            event_singleflight: std::sync::Arc::new(Singleflight::default()),
            profile_singleflight: std::sync::Arc::new(Singleflight::default()),
            relay_list_singleflight: std::sync::Arc::new(Singleflight::default()),
        }
    }

    /// The underlying connection pool (C3), for adjacent collaborators that
    /// need direct access (e.g. to call `connect`/`add_relay` up front).
    pub fn pool(&self) -> &RelayPool {
        &self.pool
    }

    /// The health store (C4) ranking candidate relays.
    pub fn health(&self) -> &HealthStore {
        &self.health
    }

    /// The relay-list cache (C5), consulted by the outbox router.
    pub(crate) fn relay_list_cache(&self) -> &RelayListCache {
        &self.relay_list_cache
    }

    /// The profile cache (C5), read by the enrichment coordinator.
    pub(crate) fn profile_cache(&self) -> &ProfileCache {
        &self.profile_cache
    }

    pub(crate) fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Network-only fetch: no cache consulted, no cache populated. The
    /// building block every cache-aware specialization below wraps.
    pub async fn fetch(
        &self,
        relays: Vec<RelayUrl>,
        filter: Filter,
        timeout: Option<Duration>,
    ) -> Result<FetchOutcome, Error> {
        let timeout = timeout.unwrap_or(self.options.default_timeout);
        let limit = filter.limit.unwrap_or(usize::MAX);
        let outcome = core::fanout(
            &self.pool,
            &self.health,
            relays,
            filter,
            timeout,
            ExitMode::Standard { limit },
            &self.options,
        )
        .await?;
        Ok(FetchOutcome {
            events: outcome.events,
            all_eose: outcome.all_eose,
        })
    }

    /// Cache-aware facade over [`Engine::fetch`] (§4.6 "Caching decision
    /// points"): check the event cache, return on hit; otherwise fan out,
    /// insert the result (or a negative marker when legitimate), and return.
    ///
    /// `cache_only` short-circuits to whatever is already cached — used by
    /// callers that would rather get a partial/empty answer immediately than
    /// wait on the network (e.g. incremental UI refreshes).
    pub async fn fetch_cached(
        &self,
        relays: Vec<RelayUrl>,
        filter: Filter,
        cache_only: bool,
    ) -> Result<FetchOutcome, Error> {
        let mut sorted_relays = relays.clone();
        sorted_relays.sort_unstable();
        sorted_relays.dedup();
        let fingerprint = Fingerprint::compute(&sorted_relays, &filter);

        if let Some(hit) = self.event_cache.get(&fingerprint).await {
            return Ok(match hit {
                Some(cached) => FetchOutcome {
                    events: cached.events,
                    all_eose: cached.all_eose,
                },
                None => FetchOutcome::default(),
            });
        }

        if cache_only {
            return Ok(FetchOutcome::default());
        }

        let cache = self.event_cache.clone();
        let (events, all_eose, had_response) = self
            .event_singleflight
            .work(fingerprint, move || async move {
                match self.fetch(relays, filter, None).await {
                    Ok(outcome) => {
                        let had_response = !outcome.events.is_empty() || outcome.all_eose;
                        (outcome.events, outcome.all_eose, had_response)
                    }
                    Err(_) => (Vec::new(), false, false),
                }
            })
            .await;

        if events.is_empty() {
            // Only poison the negative cache when at least one relay
            // actually answered; an empty result because nothing responded
            // (all backoff/timeout) is not "found nothing", it's "don't know".
            if had_response {
                cache.insert_negative(fingerprint).await;
            }
        } else {
            cache.insert(fingerprint, events.clone(), all_eose).await;
        }

        Ok(FetchOutcome { events, all_eose })
    }

    /// Fetch kind-0 metadata for `pubkeys`, singleflighted and cached per
    /// pubkey so concurrent callers asking for the same profile coalesce
    /// into one fan-out (§5 "Singleflight").
    pub async fn fetch_profiles(
        &self,
        relays: Vec<RelayUrl>,
        pubkeys: Vec<PublicKey>,
        cache_only: bool,
    ) -> HashMap<PublicKey, Metadata> {
        let mut out = HashMap::with_capacity(pubkeys.len());
        let mut misses = Vec::new();

        for pubkey in &pubkeys {
            match self.profile_cache.get(pubkey).await {
                Some(Some(metadata)) => {
                    out.insert(pubkey.clone(), metadata);
                }
                Some(None) => {}
                None => misses.push(pubkey.clone()),
            }
        }

        if cache_only || misses.is_empty() {
            return out;
        }

        let mut handles = Vec::with_capacity(misses.len());
        for pubkey in misses {
            let relays = relays.clone();
            let engine = self.clone();
            let singleflight_key = pubkey.clone();
            handles.push(tokio::spawn(async move {
                let filter_pubkey = pubkey.clone();
                let fetch_engine = engine.clone();
                let metadata = engine
                    .profile_singleflight
                    .work(singleflight_key, move || async move {
                        let filter = Filter::new().author(filter_pubkey).kind(Kind::Metadata).limit(1);
                        let grace = fetch_engine.options.profile_grace.max(Duration::from_millis(500));
                        match fetch_engine.fetch(relays, filter, Some(grace)).await {
                            Ok(outcome) => outcome
                                .events
                                .into_iter()
                                .max_by_key(|e| e.created_at)
                                .and_then(|e| Metadata::from_json(&e.content).ok()),
                            Err(_) => None,
                        }
                    })
                    .await;

                match &metadata {
                    Some(m) => engine.profile_cache.insert(pubkey.clone(), m.clone()).await,
                    None => engine.profile_cache.insert_negative(pubkey.clone()).await,
                }

                (pubkey, metadata)
            }));
        }

        for handle in handles {
            if let Ok((pubkey, Some(metadata))) = handle.await {
                out.insert(pubkey, metadata);
            }
        }

        out
    }

    /// Fetch kind-7 reactions tagging each of `event_ids`, summarized by
    /// reaction content. No limit-based exit: the tagged-fetch grace timer
    /// alone bounds how long this waits.
    pub async fn fetch_reactions(
        &self,
        relays: Vec<RelayUrl>,
        event_ids: Vec<EventId>,
    ) -> HashMap<EventId, ReactionsSummary> {
        if event_ids.is_empty() {
            return HashMap::new();
        }

        let filter = Filter::new().kind(Kind::Reaction).events(event_ids.iter().copied());
        let outcome = core::fanout(
            &self.pool,
            &self.health,
            relays,
            filter,
            self.options.tagged_grace + Duration::from_millis(500),
            ExitMode::Tagged,
            &self.options,
        )
        .await
        .unwrap_or_default();

        let mut summaries: HashMap<EventId, ReactionsSummary> = HashMap::new();
        for event in outcome.events {
            for target in event.tags.event_ids() {
                if !event_ids.contains(target) {
                    continue;
                }
                let summary = summaries.entry(*target).or_default();
                summary.total += 1;
                *summary.by_content.entry(event.content.clone()).or_insert(0) += 1;
            }
        }
        summaries
    }

    /// Fetch kind-1 replies (`#e`-tagging each of `event_ids`) and return the
    /// per-event reply count.
    pub async fn fetch_reply_counts(
        &self,
        relays: Vec<RelayUrl>,
        event_ids: Vec<EventId>,
    ) -> HashMap<EventId, usize> {
        if event_ids.is_empty() {
            return HashMap::new();
        }

        let filter = Filter::new()
            .kind(Kind::TextNote)
            .events(event_ids.iter().copied());
        let outcome = core::fanout(
            &self.pool,
            &self.health,
            relays,
            filter,
            self.options.tagged_grace + Duration::from_millis(500),
            ExitMode::Tagged,
            &self.options,
        )
        .await
        .unwrap_or_default();

        let mut counts: HashMap<EventId, usize> = HashMap::new();
        for event in outcome.events {
            for target in event.tags.event_ids() {
                if event_ids.contains(target) {
                    *counts.entry(*target).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Resolve `pubkey`'s NIP-65 relay list, consulting the relay-list cache
    /// first and singleflighting concurrent misses.
    pub async fn fetch_relay_list(
        &self,
        pubkey: PublicKey,
        relays: Vec<RelayUrl>,
    ) -> Option<RelayList> {
        if let Some(hit) = self.relay_list_cache.get(&pubkey).await {
            return hit;
        }

        let engine = self.clone();
        let filter_pubkey = pubkey.clone();
        let list = self
            .relay_list_singleflight
            .work(pubkey.clone(), move || async move {
                let filter = Filter::new().author(filter_pubkey).kind(Kind::RelayList).limit(1);
                match engine.fetch(relays, filter, None).await {
                    Ok(outcome) => outcome
                        .events
                        .into_iter()
                        .max_by_key(|e| e.created_at)
                        .map(|e| RelayList::from_event(&e)),
                    Err(_) => None,
                }
            })
            .await;

        match &list {
            Some(list) => self.relay_list_cache.insert(pubkey, list.clone()).await,
            None => self.relay_list_cache.insert_negative(pubkey).await,
        }

        list
    }

    /// Fetch a parameterized-replaceable event by its coordinate
    /// `(kind, author, d-tag)`: query by kind+author, then filter client-side
    /// for the matching `d` tag, since not every relay honors `#d` filtering.
    /// The newest matching event is cached and returned.
    pub async fn fetch_addressable(
        &self,
        relays: Vec<RelayUrl>,
        coordinate: Coordinate,
        cache_only: bool,
    ) -> Option<Event> {
        if let Some(cached) = self.registry_cache.lock().await.get(&coordinate).cloned() {
            return Some(cached);
        }

        if cache_only {
            return None;
        }

        let identifier = coordinate.identifier.clone();
        let filter = Filter::from(&coordinate);
        let outcome = self.fetch(relays, filter, None).await.ok()?;

        let event = outcome
            .events
            .into_iter()
            .filter(|e| e.tags.identifier().unwrap_or_default() == identifier)
            .max_by_key(|e| e.created_at)?;

        self.registry_cache
            .lock()
            .await
            .insert(coordinate, event.clone());
        Some(event)
    }

    /// Merge freshly fetched notification-relevant `events` into `pubkey`'s
    /// feed (mentions/reactions/replies/zaps), returning the merged view.
    pub async fn merge_notifications(
        &self,
        pubkey: PublicKey,
        events: Vec<Event>,
    ) -> crate::cache::notification_cache::NotificationEntry {
        self.notification_cache.merge(pubkey.clone(), events).await;
        // `merge` always inserts an entry for `pubkey`, so the immediate
        // follow-up read cannot miss.
        self.notification_cache
            .get(&pubkey)
            .await
            .expect("merge just inserted this pubkey's entry")
    }

    /// Thin passthrough: send a pre-signed `event` to `relays` and collect
    /// the relay's `OK`/error per target. The engine never originates writes
    /// on its own — this is the only path that can return a hard error.
    pub async fn publish(&self, event: Event, relays: Vec<RelayUrl>) -> PublishResult {
        let mut out = PublishResult::new();
        let mut futures = Vec::with_capacity(relays.len());

        for url in &relays {
            let pool = self.pool.clone();
            let url = url.clone();
            let event = event.clone();
            futures.push(async move {
                let relay = pool
                    .get_or_add_relay(url.clone(), crate::relay::options::RelayOptions::default())
                    .await;
                match relay {
                    Ok(relay) => {
                        relay.connect(Some(self.options.quick_timeout)).await;
                        let result = relay.send_event(event, RelaySendOptions::default()).await;
                        (url, result.map(|_| ()).map_err(|e| e.to_string()))
                    }
                    Err(e) => (url, Err(e.to_string())),
                }
            });
        }

        for (url, result) in futures_util::future::join_all(futures).await {
            out.insert(url, result);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use nostr::Keys;

    use super::*;
    use crate::pool::RelayPool;

    fn engine() -> Engine {
        Engine::new(RelayPool::default(), EngineOptions::default())
    }

    #[tokio::test]
    async fn test_fetch_addressable_cache_only_miss_skips_network() {
        let engine = engine();
        let coordinate = Coordinate::new(Kind::Custom(30_000), Keys::generate().public_key())
            .identifier("list-a");
        assert!(engine
            .fetch_addressable(Vec::new(), coordinate, true)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_fetch_addressable_serves_cached_entry_without_network() {
        let engine = engine();
        let keys = Keys::generate();
        let coordinate =
            Coordinate::new(Kind::Custom(30_000), keys.public_key()).identifier("list-a");

        let event = nostr::EventBuilder::new(
            Kind::Custom(30_000),
            "",
            &[nostr::Tag::identifier("list-a")],
        )
        .to_event(&keys)
        .unwrap();

        engine
            .registry_cache
            .lock()
            .await
            .insert(coordinate.clone(), event.clone());

        let fetched = engine
            .fetch_addressable(Vec::new(), coordinate, false)
            .await
            .expect("served from cache");
        assert_eq!(fetched.id, event.id);
    }
}
