// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Outbox router (C7): routes a per-author query to the relays that author
//! declared as their write destinations, rather than a fixed candidate set.
//!
//! Grounded on `nostr-gossip`'s `Gossip::break_down_filter`/`map_outbox_relays`
//! (relay-list-driven grouping of authors to relays), generalized with
//! score-based group ordering, a group cap, and a two-tier timeout-bounded
//! fan-out that `nostr-gossip`'s single flat map doesn't model.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use nostr::{Filter, PublicKey, RelayUrl, Url};

use crate::engine::{Engine, FetchOutcome};

const DEFAULT_MAX_OUTBOX_RELAY_GROUPS: usize = 25;
const DEFAULT_TOP_K_WRITE_RELAYS: usize = 2;
const DEFAULT_TIER1_GROUP_COUNT: usize = 8;
const DEFAULT_TIER1_TIMEOUT: Duration = Duration::from_millis(800);
const DEFAULT_TIER2_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_DIVERSITY_FLOOR: usize = 3;

const CONNECTED_BONUS: i64 = 100;
const COVERAGE_BONUS_PER_AUTHOR: i64 = 10;
const COVERAGE_BONUS_CAP: i64 = 30;

/// Config for the outbox router.
#[derive(Debug, Clone)]
pub struct OutboxOptions {
    pub(crate) max_relay_groups: usize,
    pub(crate) top_k_write_relays: usize,
    pub(crate) tier1_group_count: usize,
    pub(crate) tier1_timeout: Duration,
    pub(crate) tier2_timeout: Duration,
    pub(crate) diversity_floor: usize,
    pub(crate) aggregator_relays: Vec<RelayUrl>,
}

impl Default for OutboxOptions {
    fn default() -> Self {
        Self {
            max_relay_groups: DEFAULT_MAX_OUTBOX_RELAY_GROUPS,
            top_k_write_relays: DEFAULT_TOP_K_WRITE_RELAYS,
            tier1_group_count: DEFAULT_TIER1_GROUP_COUNT,
            tier1_timeout: DEFAULT_TIER1_TIMEOUT,
            tier2_timeout: DEFAULT_TIER2_TIMEOUT,
            diversity_floor: DEFAULT_DIVERSITY_FLOOR,
            aggregator_relays: Vec::new(),
        }
    }
}

impl OutboxOptions {
    /// New default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on the number of relay groups queried in total (default 25).
    pub fn max_relay_groups(mut self, max: usize) -> Self {
        self.max_relay_groups = max.max(1);
        self
    }

    /// Top-k write relays taken per author when grouping (default 2).
    pub fn top_k_write_relays(mut self, k: usize) -> Self {
        self.top_k_write_relays = k.max(1);
        self
    }

    /// Number of top-scored groups queried in tier 1 (default 8).
    pub fn tier1_group_count(mut self, count: usize) -> Self {
        self.tier1_group_count = count;
        self
    }

    /// Tier-1 fan-out timeout (default 800ms).
    pub fn tier1_timeout(mut self, timeout: Duration) -> Self {
        self.tier1_timeout = timeout;
        self
    }

    /// Tier-2 fan-out timeout (default 2s).
    pub fn tier2_timeout(mut self, timeout: Duration) -> Self {
        self.tier2_timeout = timeout;
        self
    }

    /// Distinct-author count tier 1 must reach, alongside the filter's
    /// limit, before tier 2 is skipped (default 3).
    pub fn diversity_floor(mut self, floor: usize) -> Self {
        self.diversity_floor = floor;
        self
    }

    /// Fixed high-availability relay set used for authors with no known
    /// per-author relay (no cached relay list, no NIP-05 hint).
    pub fn aggregator_relays(mut self, relays: Vec<RelayUrl>) -> Self {
        self.aggregator_relays = relays;
        self
    }
}

/// One relay and the authors routed to it for this query, ranked by score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayGroup {
    /// Target relay.
    pub relay: RelayUrl,
    /// Authors this query routes to `relay` for.
    pub authors: Vec<PublicKey>,
    /// Ranking score: health + connection-open bonus + coverage bonus.
    pub score: i64,
}

/// Resolve each pubkey's candidate write relays: relay-list cache first,
/// `nip05_hints` as a secondary source for authors the cache has nothing for.
/// Authors left with no candidate relay are the caller's responsibility to
/// route to the aggregator bucket (see [`group_authors`]).
async fn resolve_author_relays(
    engine: &Engine,
    pubkeys: &[PublicKey],
    nip05_hints: &HashMap<PublicKey, Vec<RelayUrl>>,
    opts: &OutboxOptions,
) -> HashMap<PublicKey, Vec<RelayUrl>> {
    let mut out = HashMap::with_capacity(pubkeys.len());

    for pubkey in pubkeys {
        if let Some(Some(list)) = engine.relay_list_cache().get(pubkey).await {
            let write = top_k_by_score(engine, list.write(), opts.top_k_write_relays).await;
            if !write.is_empty() {
                out.insert(pubkey.clone(), write);
                continue;
            }
        }
        if let Some(hints) = nip05_hints.get(pubkey) {
            if !hints.is_empty() {
                out.insert(pubkey.clone(), hints.clone());
            }
        }
    }

    out
}

async fn top_k_by_score(engine: &Engine, relays: &[RelayUrl], k: usize) -> Vec<RelayUrl> {
    let mut ranked = relays.to_vec();
    engine.health().sort_by_score(&mut ranked).await;
    ranked.truncate(k);
    ranked
}

/// Build `relay -> authors` groups from resolved per-author relay sets,
/// scoring each group by health + connection-open bonus + diminishing
/// author-coverage bonus, and returning them sorted by descending score.
async fn group_authors(
    engine: &Engine,
    per_author_relays: &HashMap<PublicKey, Vec<RelayUrl>>,
) -> Vec<RelayGroup> {
    let mut by_relay: HashMap<RelayUrl, Vec<PublicKey>> = HashMap::new();
    for (pubkey, relays) in per_author_relays {
        for relay in relays {
            by_relay.entry(relay.clone()).or_default().push(pubkey.clone());
        }
    }

    let open: HashSet<Url> = engine.pool().relays().await.into_keys().collect();

    let mut groups = Vec::with_capacity(by_relay.len());
    for (relay, mut authors) in by_relay {
        authors.sort_unstable();
        authors.dedup();

        let health_score = engine.health().score(&relay).await;
        let connected_bonus = if open.contains(&Url::from(relay.clone())) {
            CONNECTED_BONUS
        } else {
            0
        };
        let coverage_bonus =
            (authors.len() as i64 * COVERAGE_BONUS_PER_AUTHOR).min(COVERAGE_BONUS_CAP);

        groups.push(RelayGroup {
            relay,
            authors,
            score: health_score + connected_bonus + coverage_bonus,
        });
    }

    groups.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.relay.as_str().cmp(b.relay.as_str())));
    groups
}

/// Apply the group cap: keep the top `max_relay_groups` groups by score,
/// returning the authors who have no remaining group membership ("overflow",
/// to be relegated to the aggregator bucket).
fn cap_groups(mut groups: Vec<RelayGroup>, cap: usize) -> (Vec<RelayGroup>, HashSet<PublicKey>) {
    if groups.len() <= cap {
        return (groups, HashSet::new());
    }

    let dropped = groups.split_off(cap);
    let retained: HashSet<&PublicKey> = groups.iter().flat_map(|g| g.authors.iter()).collect();

    let mut overflow = HashSet::new();
    for group in dropped {
        for author in group.authors {
            if !retained.contains(&author) {
                overflow.insert(author);
            }
        }
    }

    (groups, overflow)
}

fn merge_events(mut merged: Vec<nostr::Event>, fresh: Vec<nostr::Event>) -> Vec<nostr::Event> {
    merged.extend(fresh);
    merged.sort_unstable_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    merged.dedup_by(|a, b| a.id == b.id);
    merged
}

/// Route `filter` (typically `.authors(pubkeys)`) through the outbox model:
/// group authors by their declared write relays, fan out tier 1 (top-scored
/// groups + aggregator set) first, and only launch tier 2 (the remaining
/// groups) if tier 1's result isn't already sufficient.
pub async fn fetch(
    engine: &Engine,
    pubkeys: Vec<PublicKey>,
    filter: Filter,
    nip05_hints: HashMap<PublicKey, Vec<RelayUrl>>,
    opts: &OutboxOptions,
) -> FetchOutcome {
    let per_author = resolve_author_relays(engine, &pubkeys, &nip05_hints, opts).await;
    let covered: HashSet<&PublicKey> = per_author.keys().collect();
    let mut overflow: HashSet<PublicKey> = pubkeys
        .iter()
        .filter(|p| !covered.contains(p))
        .cloned()
        .collect();

    let groups = group_authors(engine, &per_author).await;
    let (groups, capped_overflow) = cap_groups(groups, opts.max_relay_groups);
    overflow.extend(capped_overflow);

    let limit = filter.limit.unwrap_or(usize::MAX);

    let (tier1, tier2) = if groups.len() > opts.tier1_group_count {
        let rest = groups[opts.tier1_group_count..].to_vec();
        (groups[..opts.tier1_group_count].to_vec(), rest)
    } else {
        (groups, Vec::new())
    };

    let mut merged: Vec<nostr::Event> = Vec::new();
    let mut all_eose = true;

    let tier1_outcome = run_tier(
        engine,
        &tier1,
        &overflow,
        &filter,
        opts.tier1_timeout,
        limit,
        &opts.aggregator_relays,
    )
    .await;
    merged = merge_events(merged, tier1_outcome.events);
    all_eose &= tier1_outcome.all_eose;

    let distinct_authors: HashSet<_> = merged.iter().map(|e| e.pubkey.clone()).collect();
    let sufficient = merged.len() >= limit && distinct_authors.len() >= opts.diversity_floor;

    if !sufficient && !tier2.is_empty() {
        let tier2_outcome = run_tier(
            engine,
            &tier2,
            &HashSet::new(),
            &filter,
            opts.tier2_timeout,
            limit,
            &opts.aggregator_relays,
        )
        .await;
        merged = merge_events(merged, tier2_outcome.events);
        all_eose &= tier2_outcome.all_eose;
    }

    merged.truncate(limit);
    FetchOutcome {
        events: merged,
        all_eose,
    }
}

async fn run_tier(
    engine: &Engine,
    groups: &[RelayGroup],
    aggregator_authors: &HashSet<PublicKey>,
    filter: &Filter,
    timeout: Duration,
    limit: usize,
    aggregator_relays: &[RelayUrl],
) -> FetchOutcome {
    let mut calls = Vec::with_capacity(groups.len() + 1);

    for group in groups {
        let relay_filter = filter.clone().authors(group.authors.iter().cloned());
        calls.push(engine.fetch(vec![group.relay.clone()], relay_filter, Some(timeout)));
    }

    if !aggregator_authors.is_empty() && !aggregator_relays.is_empty() {
        let agg_filter = filter.clone().authors(aggregator_authors.iter().cloned());
        calls.push(engine.fetch(aggregator_relays.to_vec(), agg_filter, Some(timeout)));
    }

    let results = futures_util::future::join_all(calls).await;

    let mut events = Vec::new();
    let mut all_eose = true;
    for result in results {
        match result {
            Ok(outcome) => {
                all_eose &= outcome.all_eose;
                events.extend(outcome.events);
            }
            Err(_) => all_eose = false,
        }
    }

    events.sort_unstable_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    events.dedup_by(|a, b| a.id == b.id);
    events.truncate(limit);

    FetchOutcome { events, all_eose }
}

#[cfg(test)]
mod tests {
    use nostr::Keys;

    use super::*;

    fn relay(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    #[test]
    fn test_cap_groups_relegates_overflow_authors_not_covered_elsewhere() {
        let alice = Keys::generate().public_key();
        let bob = Keys::generate().public_key();

        let groups = vec![
            RelayGroup { relay: relay("wss://a.example.com"), authors: vec![alice.clone()], score: 100 },
            RelayGroup { relay: relay("wss://b.example.com"), authors: vec![bob.clone()], score: 10 },
        ];

        let (kept, overflow) = cap_groups(groups, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].relay, relay("wss://a.example.com"));
        assert!(overflow.contains(&bob));
        assert!(!overflow.contains(&alice));
    }

    #[test]
    fn test_cap_groups_keeps_author_covered_by_a_retained_group() {
        let alice = Keys::generate().public_key();

        let groups = vec![
            RelayGroup { relay: relay("wss://a.example.com"), authors: vec![alice.clone()], score: 100 },
            RelayGroup { relay: relay("wss://b.example.com"), authors: vec![alice.clone()], score: 10 },
        ];

        let (kept, overflow) = cap_groups(groups, 1);
        assert_eq!(kept.len(), 1);
        assert!(overflow.is_empty());
    }

    #[test]
    fn test_cap_groups_noop_under_the_cap() {
        let alice = Keys::generate().public_key();
        let groups = vec![RelayGroup { relay: relay("wss://a.example.com"), authors: vec![alice], score: 1 }];
        let (kept, overflow) = cap_groups(groups.clone(), 25);
        assert_eq!(kept, groups);
        assert!(overflow.is_empty());
    }
}
