// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Tiered parallel fan-out with early exit: the single algorithmic kernel
//! every fetch specialization in [`super::Engine`] is built on.
//!
//! Grounded on [`crate::relay::internal::InternalRelay::get_events_of_with_callback`]'s
//! notification loop (subscribe, listen on `RelayNotification::Message`,
//! match the wrapped [`RelayMessage`] variant, honor `RelayStatus`/`Stop`/
//! `Shutdown`) generalized from "one relay" to "every ranked candidate
//! concurrently, racing a shared early-exit predicate and grace timer".

use std::collections::HashSet;
use std::time::Duration;

use nostr::{Event, EventId, Filter, PublicKey, RelayMessage, RelayUrl};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::error::Error;
use super::options::EngineOptions;
use crate::guard::{self, GuardedUse};
use crate::health::{FailureKind, HealthStore};
use crate::pool::RelayPool;
use crate::relay::{Relay, RelayNotification, RelaySendOptions, SubscribeOptions};

/// What governs early exit for a given fan-out call. Every [`super::Engine`]
/// specialization maps onto one of these.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ExitMode {
    /// Generic filter-driven fetch: exit once `limit` is satisfied (plus the
    /// multi-author diversity/EOSE gates).
    Standard { limit: usize },
    /// Profile fetch: exit once every one of `authors_needed` distinct
    /// authors has been observed.
    Profile { authors_needed: usize },
    /// Tagged fetch (reactions/replies): no limit-based exit, grace timer
    /// alone governs how long we wait for stragglers.
    Tagged,
    /// Single event by id: the first result is sufficient.
    SingleEvent,
}

/// Result of one fan-out call.
#[derive(Debug, Clone)]
pub(crate) struct FanoutOutcome {
    pub events: Vec<Event>,
    /// True iff every queried relay reached EOSE (or closed/failed relays
    /// don't count: see the `all_eose` resolution in DESIGN.md).
    pub all_eose: bool,
    /// True iff at least one relay produced *any* signal (event, EOSE,
    /// closed). Gates negative caching: a result that's empty because
    /// nothing replied must not be mistaken for "found nothing".
    pub had_response: bool,
}

enum RelaySignal {
    Event { event: Box<Event> },
    Eose { url: RelayUrl, elapsed: Duration },
    Closed { url: RelayUrl },
    Failed { url: RelayUrl, kind: FailureKind },
}

/// Run the fan-out kernel against `relays` for `filter`, governed by `mode`
/// and bounded by `timeout`.
pub(crate) async fn fanout(
    pool: &RelayPool,
    health: &HealthStore,
    mut relays: Vec<RelayUrl>,
    filter: Filter,
    timeout: Duration,
    mode: ExitMode,
    opts: &EngineOptions,
) -> Result<FanoutOutcome, Error> {
    if relays.is_empty() {
        return Ok(FanoutOutcome {
            events: Vec::new(),
            all_eose: true,
            had_response: false,
        });
    }

    health.sort_by_score(&mut relays).await;

    let multi: bool = filter
        .authors
        .as_ref()
        .map(|a| a.len())
        .unwrap_or(0)
        > opts.multi_author_threshold;
    let min_responses: usize = if multi { 2 } else { 1 };

    let buffer: usize = filter
        .limit
        .map(|limit| limit.saturating_mul(3).clamp(opts.min_buffer, opts.max_buffer))
        .unwrap_or(opts.max_buffer);

    let grace_period: Duration = grace_period_for(mode, health, &relays, min_responses, opts).await;

    let (tx, mut rx) = mpsc::channel::<RelaySignal>(buffer);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let mut queried: Vec<RelayUrl> = Vec::with_capacity(relays.len());
    let mut handles = Vec::with_capacity(relays.len());

    for url in relays.iter() {
        match prepare_relay(pool, health, url, filter.clone(), opts).await {
            Some((relay, sub_id)) => {
                queried.push(url.clone());
                let task_tx = tx.clone();
                let task_rx = cancel_rx.clone();
                let task_url = url.clone();
                handles.push(tokio::spawn(run_relay_task(
                    relay, sub_id, task_url, task_tx, task_rx,
                )));
            }
            None => continue,
        }
    }
    drop(tx);

    if queried.is_empty() {
        return Ok(FanoutOutcome {
            events: Vec::new(),
            all_eose: false,
            had_response: false,
        });
    }

    let mut seen_ids: HashSet<EventId> = HashSet::new();
    let mut seen_authors: HashSet<PublicKey> = HashSet::new();
    let mut events: Vec<Event> = Vec::new();
    let mut eose_count: usize = 0;
    let mut eose_relays: HashSet<RelayUrl> = HashSet::new();
    let mut had_response = false;
    let mut grace_deadline: Option<Instant> = None;

    let overall_deadline = Instant::now() + timeout;

    'collect: loop {
        let grace_sleep = async {
            match grace_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(overall_deadline) => break 'collect,
            _ = grace_sleep => break 'collect,
            signal = rx.recv() => {
                match signal {
                    None => break 'collect,
                    Some(RelaySignal::Event { event }) => {
                        had_response = true;
                        if !seen_ids.insert(event.id) {
                            continue;
                        }
                        seen_authors.insert(event.pubkey);
                        events.push(*event);
                        if is_exit_ready(mode, &events, &seen_authors, eose_count, multi, opts) {
                            let _ = cancel_tx.send(true);
                            break 'collect;
                        }
                    }
                    Some(RelaySignal::Eose { url, elapsed }) => {
                        had_response = true;
                        if eose_relays.insert(url.clone()) {
                            eose_count += 1;
                            health.record_response_time(&url, elapsed).await;
                        }
                        if eose_count >= min_responses && grace_deadline.is_none() {
                            grace_deadline = Some(Instant::now() + grace_period);
                        }
                        if eose_relays.len() >= queried.len() {
                            break 'collect;
                        }
                        if is_exit_ready(mode, &events, &seen_authors, eose_count, multi, opts) {
                            let _ = cancel_tx.send(true);
                            break 'collect;
                        }
                    }
                    Some(RelaySignal::Closed { url }) => {
                        had_response = true;
                        health.record_failure(&url, FailureKind::Closed).await;
                    }
                    Some(RelaySignal::Failed { url, kind }) => {
                        health.record_failure(&url, kind).await;
                    }
                }
            }
        }
    }

    let _ = cancel_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }

    events.sort_unstable_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    if let ExitMode::Standard { limit } | ExitMode::Profile { authors_needed: limit } = mode {
        events.truncate(limit);
    }

    // A relay we never managed to visit (guard rejection, dial/subscribe
    // failure) counts as "did not EOSE": the conservative reading of
    // all_eose's semantics under partial backoff/failure.
    let all_eose = eose_relays.len() >= relays.len();

    Ok(FanoutOutcome {
        events,
        all_eose,
        had_response,
    })
}

async fn prepare_relay(
    pool: &RelayPool,
    health: &HealthStore,
    url: &RelayUrl,
    filter: Filter,
    opts: &EngineOptions,
) -> Option<(Relay, nostr::SubscriptionId)> {
    let guard_url = nostr::Url::parse(url.as_str()).ok()?;
    if let Err(e) = guard::check(&guard_url, GuardedUse::Relay, opts.guard).await {
        tracing::debug!("engine: candidate {url} rejected by guard: {e}");
        health.record_failure(url, FailureKind::Transport).await;
        return None;
    }

    let relay = match pool.get_or_add_relay(url.clone(), opts.relay_opts.clone()).await {
        Ok(relay) => relay,
        Err(e) => {
            tracing::debug!("engine: could not add relay {url}: {e}");
            health.record_failure(url, FailureKind::Transport).await;
            return None;
        }
    };

    relay.connect(Some(opts.quick_timeout)).await;

    match relay.subscribe(vec![filter], SubscribeOptions::default()).await {
        Ok(sub_id) => Some((relay, sub_id)),
        Err(e) => {
            tracing::debug!("engine: subscribe failed for {url}: {e}");
            health.record_failure(url, FailureKind::Transport).await;
            None
        }
    }
}

async fn run_relay_task(
    relay: Relay,
    sub_id: nostr::SubscriptionId,
    url: RelayUrl,
    tx: mpsc::Sender<RelaySignal>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut notifications = relay.notifications();
    let started_at = Instant::now();
    loop {
        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            notification = notifications.recv() => {
                match notification {
                    Ok(RelayNotification::Message { message }) => match message {
                        RelayMessage::Event { subscription_id, event } => {
                            if subscription_id == sub_id {
                                let _ = tx.send(RelaySignal::Event { event }).await;
                            }
                        }
                        RelayMessage::EndOfStoredEvents(subscription_id) => {
                            if subscription_id == sub_id {
                                let _ = tx
                                    .send(RelaySignal::Eose {
                                        url: url.clone(),
                                        elapsed: started_at.elapsed(),
                                    })
                                    .await;
                            }
                        }
                        RelayMessage::Closed { subscription_id, .. } => {
                            if subscription_id == sub_id {
                                let _ = tx.send(RelaySignal::Closed { url: url.clone() }).await;
                                break;
                            }
                        }
                        _ => {}
                    },
                    Ok(RelayNotification::RelayStatus { status }) => {
                        if status.is_disconnected() {
                            let _ = tx
                                .send(RelaySignal::Failed { url: url.clone(), kind: FailureKind::Transport })
                                .await;
                            break;
                        }
                    }
                    Ok(RelayNotification::Stop) | Ok(RelayNotification::Shutdown) => break,
                    Ok(RelayNotification::Event { .. }) => {}
                    Err(_) => break,
                }
            }
        }
    }

    let _ = relay.unsubscribe(sub_id, RelaySendOptions::default()).await;
}

async fn grace_period_for(
    mode: ExitMode,
    health: &HealthStore,
    relays: &[RelayUrl],
    min_responses: usize,
    opts: &EngineOptions,
) -> Duration {
    match mode {
        ExitMode::Profile { .. } => opts.profile_grace,
        ExitMode::Tagged => opts.tagged_grace,
        ExitMode::Standard { .. } | ExitMode::SingleEvent => {
            let expected = health.expected_response_time(relays, min_responses).await;
            expected
                .mul_f64(opts.grace_multiplier)
                .clamp(opts.min_grace, opts.max_grace)
        }
    }
}

fn is_exit_ready(
    mode: ExitMode,
    events: &[Event],
    seen_authors: &HashSet<PublicKey>,
    eose_count: usize,
    multi: bool,
    opts: &EngineOptions,
) -> bool {
    match mode {
        ExitMode::Standard { limit } => {
            let diversity_ok = !multi || seen_authors.len() >= opts.diversity_target;
            let eose_ok = !multi || eose_count >= opts.multi_author_eose_floor;

            if events.len() >= limit && diversity_ok && eose_ok {
                return true;
            }
            // Soft variant: accept a wider margin in exchange for not
            // waiting on any EOSE at all, as long as diversity holds.
            if events.len() >= limit + opts.soft_exit_margin && diversity_ok {
                return true;
            }
            false
        }
        ExitMode::Profile { authors_needed } => seen_authors.len() >= authors_needed,
        ExitMode::Tagged => false,
        ExitMode::SingleEvent => !events.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use nostr::{EventBuilder, Keys};

    use super::*;

    fn note(keys: &Keys) -> Event {
        EventBuilder::new_text_note("hi", &[]).to_event(keys).unwrap()
    }

    fn events(n: usize) -> Vec<Event> {
        (0..n).map(|_| note(&Keys::generate())).collect()
    }

    #[test]
    fn test_standard_exit_requires_limit_only_when_not_multi() {
        let opts = EngineOptions::default();
        assert!(!is_exit_ready(
            ExitMode::Standard { limit: 5 },
            &events(4),
            &HashSet::new(),
            0,
            false,
            &opts
        ));
        assert!(is_exit_ready(
            ExitMode::Standard { limit: 5 },
            &events(5),
            &HashSet::new(),
            0,
            false,
            &opts
        ));
    }

    #[test]
    fn test_standard_exit_requires_diversity_and_eose_floor_when_multi() {
        let opts = EngineOptions::default();
        let mut authors: HashSet<PublicKey> = HashSet::new();
        for _ in 0..opts.diversity_target - 1 {
            authors.insert(Keys::generate().public_key());
        }

        // Limit met, but diversity short: not ready.
        assert!(!is_exit_ready(
            ExitMode::Standard { limit: 5 },
            &events(5),
            &authors,
            opts.multi_author_eose_floor,
            true,
            &opts
        ));

        authors.insert(Keys::generate().public_key());
        assert_eq!(authors.len(), opts.diversity_target);

        // Diversity met but EOSE floor not reached: not ready.
        assert!(!is_exit_ready(
            ExitMode::Standard { limit: 5 },
            &events(5),
            &authors,
            opts.multi_author_eose_floor - 1,
            true,
            &opts
        ));

        // Both satisfied: ready.
        assert!(is_exit_ready(
            ExitMode::Standard { limit: 5 },
            &events(5),
            &authors,
            opts.multi_author_eose_floor,
            true,
            &opts
        ));
    }

    #[test]
    fn test_soft_exit_margin_allows_early_exit_without_eose() {
        let opts = EngineOptions::default();
        let mut authors: HashSet<PublicKey> = HashSet::new();
        for _ in 0..opts.diversity_target {
            authors.insert(Keys::generate().public_key());
        }

        // Below the soft margin: not ready even with zero EOSEs.
        assert!(!is_exit_ready(
            ExitMode::Standard { limit: 5 },
            &events(5 + opts.soft_exit_margin - 1),
            &authors,
            0,
            true,
            &opts
        ));

        // At/above the soft margin with diversity satisfied: ready despite zero EOSEs.
        assert!(is_exit_ready(
            ExitMode::Standard { limit: 5 },
            &events(5 + opts.soft_exit_margin),
            &authors,
            0,
            true,
            &opts
        ));
    }

    #[test]
    fn test_profile_exit_waits_for_every_requested_author() {
        let opts = EngineOptions::default();
        let mut authors: HashSet<PublicKey> = HashSet::new();
        authors.insert(Keys::generate().public_key());
        assert!(!is_exit_ready(
            ExitMode::Profile { authors_needed: 2 },
            &[],
            &authors,
            0,
            false,
            &opts
        ));
        authors.insert(Keys::generate().public_key());
        assert!(is_exit_ready(
            ExitMode::Profile { authors_needed: 2 },
            &[],
            &authors,
            0,
            false,
            &opts
        ));
    }

    #[test]
    fn test_tagged_exit_never_triggers_on_events_alone() {
        let opts = EngineOptions::default();
        assert!(!is_exit_ready(
            ExitMode::Tagged,
            &events(1000),
            &HashSet::new(),
            1000,
            false,
            &opts
        ));
    }

    #[test]
    fn test_single_event_exit_on_first_result() {
        let opts = EngineOptions::default();
        assert!(!is_exit_ready(
            ExitMode::SingleEvent,
            &[],
            &HashSet::new(),
            0,
            false,
            &opts
        ));
        assert!(is_exit_ready(
            ExitMode::SingleEvent,
            &events(1),
            &HashSet::new(),
            0,
            false,
            &opts
        ));
    }
}
