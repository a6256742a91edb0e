// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Enrichment coordinator (C8): given an event list, fan out profile,
//! reactions and reply-count sub-fetches in parallel and join them into one
//! view.
//!
//! Grounded on the fan-out/join pattern `pool/mod.rs`'s
//! `batch_msg_to`/`send_event_to` build on (`future::join_all` over a
//! per-target future, then fold results into one map), applied here to three
//! concurrent sub-fetches that each re-enter the cache-aware engine facade.

use std::collections::HashMap;

use nostr::{Event, EventId, Metadata, PublicKey, RelayUrl};

use crate::engine::{Engine, ReactionsSummary};

/// An event plus everything the coordinator could attach to it: the
/// author's profile (if resolved), a reactions summary, and a reply count.
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    /// The underlying event.
    pub event: Event,
    /// The author's profile metadata, if known.
    pub author: Option<Metadata>,
    /// Reaction summary for this event, if any reactions were found.
    pub reactions: ReactionsSummary,
    /// Number of kind-1 replies referencing this event.
    pub reply_count: usize,
}

/// Enrich `events`: resolve each distinct author's profile (including
/// pubkeys mentioned via `p` tags), and each event's reaction summary and
/// reply count, then attach them.
///
/// `cache_only` short-circuits every sub-fetch to return only what is
/// already cached — used during incremental updates where responsiveness
/// matters more than freshness.
pub async fn enrich(
    engine: &Engine,
    relays: Vec<RelayUrl>,
    events: Vec<Event>,
    cache_only: bool,
) -> Vec<EnrichedEvent> {
    if events.is_empty() {
        return Vec::new();
    }

    let mut authors: Vec<PublicKey> = events.iter().map(|e| e.pubkey.clone()).collect();
    for event in &events {
        authors.extend(event.tags.public_keys().cloned());
    }
    authors.sort_unstable();
    authors.dedup();

    let event_ids: Vec<EventId> = events.iter().map(|e| e.id).collect();

    let (profiles, reactions, reply_counts) = if cache_only {
        // Reactions and reply counts have no cache of their own yet (unlike
        // profiles/relay-lists/events): a cache-only enrichment can only
        // serve cached profiles, never reaction/reply data.
        let profiles = engine.fetch_profiles(relays, authors, true).await;
        (profiles, HashMap::new(), HashMap::new())
    } else {
        let profiles_fut = engine.fetch_profiles(relays.clone(), authors, false);
        let reactions_fut = engine.fetch_reactions(relays.clone(), event_ids.clone());
        let reply_counts_fut = engine.fetch_reply_counts(relays, event_ids);

        tokio::join!(profiles_fut, reactions_fut, reply_counts_fut)
    };

    events
        .into_iter()
        .map(|event| {
            let author = profiles.get(&event.pubkey).cloned();
            let reactions_summary = reactions.get(&event.id).cloned().unwrap_or_default();
            let reply_count = reply_counts.get(&event.id).copied().unwrap_or(0);
            EnrichedEvent {
                event,
                author,
                reactions: reactions_summary,
                reply_count,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use nostr::{EventBuilder, Keys};

    use super::*;
    use crate::engine::{Engine, EngineOptions};
    use crate::pool::RelayPool;

    fn note(keys: &Keys) -> Event {
        EventBuilder::new_text_note("hello", &[]).to_event(keys).unwrap()
    }

    #[tokio::test]
    async fn test_enrich_empty_events_short_circuits() {
        let engine = Engine::new(RelayPool::default(), EngineOptions::default());
        let out = enrich(&engine, Vec::new(), Vec::new(), false).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_enrich_cache_only_never_touches_network_and_defaults_unknowns() {
        let engine = Engine::new(RelayPool::default(), EngineOptions::default());
        let keys = Keys::generate();
        let event = note(&keys);

        let out = enrich(&engine, Vec::new(), vec![event.clone()], true).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].author.is_none());
        assert_eq!(out[0].reactions, ReactionsSummary::default());
        assert_eq!(out[0].reply_count, 0);
    }
}
