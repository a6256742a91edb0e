// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Process-wide, per-relay rolling health statistics used to rank candidate
//! relays and to drive backoff.
//!
//! Shaped after [`crate::relay::stats::RelayConnectionStats`] (a windowed
//! latency average behind a lock, atomic counters) but generalized: this
//! store is keyed by [`RelayUrl`] and lives independently of any single pool
//! or connection, since the engine and outbox router both rank relays that
//! may not currently have an open connection. Latency is tracked as an EWMA
//! rather than a windowed mean, so the score responds immediately to a
//! relay's most recent behavior instead of only as fast as old samples age
//! out of a fixed-size window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nostr::RelayUrl;
use tokio::sync::{Mutex, RwLock};

/// EWMA smoothing factor applied on every new latency sample: the weight
/// given to the freshest sample against the accumulated average. Mirrors the
/// recency-weighted intent of `RelayConnectionStats`' rolling latency window
/// (`relay/stats.rs`), generalized here into a true exponential moving
/// average instead of a plain windowed mean, per the HealthRecord data model
/// (§3: "EWMA of response time").
const EWMA_ALPHA: f64 = 0.3;
/// Minimum successful reads before latency is considered meaningful.
const LATENCY_MIN_READS: usize = 1;

/// Consecutive failures before a relay enters backoff.
const BACKOFF_FAILURE_THRESHOLD: u32 = 3;
/// Base backoff window; doubles per failure past the threshold, capped.
const BACKOFF_BASE: Duration = Duration::from_secs(10);
const BACKOFF_MAX: Duration = Duration::from_secs(120);

/// Score given to a relay this store has never observed: neither penalized
/// nor favored, so it ranks in the middle of the pack.
const NEUTRAL_SCORE: i64 = 50;

/// Thresholds used by [`HealthStore::stats`] to classify a relay as healthy.
const HEALTHY_SUCCESS_RATE: f64 = 0.5;
const HEALTHY_MAX_LATENCY: Duration = Duration::from_millis(2_000);

/// Fallback grace-period input when fewer than `k` relays have a known
/// latency sample.
const DEFAULT_EXPECTED_RESPONSE_TIME: Duration = Duration::from_millis(300);

/// Kind of failure being recorded; currently only used for diagnostics, all
/// kinds feed the same backoff counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The dial/handshake itself failed.
    Transport,
    /// The relay's subscription timed out without an EOSE.
    Timeout,
    /// The relay sent a CLOSED frame.
    Closed,
}

#[derive(Debug, Default)]
struct RelayHealthInner {
    attempts: usize,
    success: usize,
    consecutive_failures: u32,
    /// Exponential moving average of response time, in milliseconds.
    ewma_latency_ms: Option<f64>,
    latency_samples: usize,
    backoff_until: Option<Instant>,
}

impl RelayHealthInner {
    fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.success as f64 / self.attempts as f64
        }
    }

    fn record_latency(&mut self, duration: Duration) {
        let sample_ms = duration.as_secs_f64() * 1000.0;
        self.ewma_latency_ms = Some(match self.ewma_latency_ms {
            Some(prev) => EWMA_ALPHA * sample_ms + (1.0 - EWMA_ALPHA) * prev,
            None => sample_ms,
        });
        self.latency_samples += 1;
    }

    /// Recency-weighted average response time, or `None` until at least
    /// [`LATENCY_MIN_READS`] samples have been recorded.
    fn avg_latency(&self) -> Option<Duration> {
        if self.latency_samples < LATENCY_MIN_READS {
            return None;
        }
        self.ewma_latency_ms.map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    fn is_in_backoff(&self) -> bool {
        self.backoff_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    fn score(&self) -> i64 {
        if self.is_in_backoff() {
            return i64::MIN;
        }
        let rate_component = (self.success_rate() * 100.0) as i64;
        let latency_penalty = self
            .avg_latency()
            .map(|d| (d.as_millis() / 10) as i64)
            .unwrap_or(0);
        rate_component - latency_penalty
    }
}

#[derive(Debug, Default)]
struct RelayHealth {
    inner: Mutex<RelayHealthInner>,
}

/// Aggregate view over every relay this store has observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthStats {
    /// Relays currently considered healthy.
    pub healthy: usize,
    /// Relays currently considered unhealthy (including those in backoff).
    pub unhealthy: usize,
    /// Mean latency across every relay with a known sample, in milliseconds.
    pub avg_ms: f64,
}

/// Process-wide relay health store.
#[derive(Debug, Default)]
pub struct HealthStore {
    relays: RwLock<HashMap<RelayUrl, Arc<RelayHealth>>>,
}

impl HealthStore {
    /// New, empty health store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, url: &RelayUrl) -> Arc<RelayHealth> {
        if let Some(health) = self.relays.read().await.get(url) {
            return Arc::clone(health);
        }
        let mut relays = self.relays.write().await;
        Arc::clone(
            relays
                .entry(url.clone())
                .or_insert_with(|| Arc::new(RelayHealth::default())),
        )
    }

    /// Record a successful fetch that reached EOSE in `duration`.
    pub async fn record_response_time(&self, url: &RelayUrl, duration: Duration) {
        let health = self.entry(url).await;
        let mut inner = health.inner.lock().await;
        inner.attempts += 1;
        inner.success += 1;
        inner.consecutive_failures = 0;
        inner.backoff_until = None;
        inner.record_latency(duration);
    }

    /// Record a failure. After [`BACKOFF_FAILURE_THRESHOLD`] consecutive
    /// failures the relay enters a timed backoff window that doubles per
    /// additional failure, capped at [`BACKOFF_MAX`].
    pub async fn record_failure(&self, url: &RelayUrl, _kind: FailureKind) {
        let health = self.entry(url).await;
        let mut inner = health.inner.lock().await;
        inner.attempts += 1;
        inner.consecutive_failures += 1;

        if inner.consecutive_failures >= BACKOFF_FAILURE_THRESHOLD {
            let extra = inner.consecutive_failures - BACKOFF_FAILURE_THRESHOLD;
            let window = BACKOFF_BASE
                .checked_mul(1u32.checked_shl(extra).unwrap_or(u32::MAX))
                .unwrap_or(BACKOFF_MAX)
                .min(BACKOFF_MAX);
            inner.backoff_until = Some(Instant::now() + window);
        }
    }

    /// Whether `url` is currently in its backoff window.
    pub async fn is_in_backoff(&self, url: &RelayUrl) -> bool {
        let relays = self.relays.read().await;
        match relays.get(url) {
            Some(health) => health.inner.lock().await.is_in_backoff(),
            None => false,
        }
    }

    /// Integer score for `url`; higher is better. Unknown relays get a
    /// neutral mid-rank score; relays in backoff score lowest possible.
    pub async fn score(&self, url: &RelayUrl) -> i64 {
        let relays = self.relays.read().await;
        match relays.get(url) {
            Some(health) => health.inner.lock().await.score(),
            None => NEUTRAL_SCORE,
        }
    }

    /// Stable sort of `urls` by descending score.
    pub async fn sort_by_score(&self, urls: &mut [RelayUrl]) {
        let mut scored: Vec<(i64, RelayUrl)> = Vec::with_capacity(urls.len());
        for url in urls.iter() {
            scored.push((self.score(url).await, url.clone()));
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        for (slot, (_, url)) in urls.iter_mut().zip(scored.into_iter()) {
            *slot = url;
        }
    }

    /// Projected time for the `k`-th ranked relay (by ascending average
    /// latency) among `urls` to respond. Falls back to a fixed default when
    /// fewer than `k` relays have a known latency sample.
    pub async fn expected_response_time(&self, urls: &[RelayUrl], k: usize) -> Duration {
        let mut latencies = Vec::with_capacity(urls.len());
        for url in urls {
            let relays = self.relays.read().await;
            if let Some(health) = relays.get(url) {
                if let Some(avg) = health.inner.lock().await.avg_latency() {
                    latencies.push(avg);
                }
            }
        }
        latencies.sort_unstable();
        latencies
            .get(k.saturating_sub(1))
            .copied()
            .unwrap_or(DEFAULT_EXPECTED_RESPONSE_TIME)
    }

    /// Aggregate stats across every observed relay.
    pub async fn stats(&self) -> HealthStats {
        let relays = self.relays.read().await;
        let mut healthy = 0;
        let mut unhealthy = 0;
        let mut latency_sum = Duration::ZERO;
        let mut latency_count = 0u32;

        for health in relays.values() {
            let inner = health.inner.lock().await;
            let avg = inner.avg_latency();
            if let Some(avg) = avg {
                latency_sum += avg;
                latency_count += 1;
            }
            let is_healthy = !inner.is_in_backoff()
                && inner.success_rate() >= HEALTHY_SUCCESS_RATE
                && avg.map(|a| a <= HEALTHY_MAX_LATENCY).unwrap_or(true);
            if is_healthy {
                healthy += 1;
            } else {
                unhealthy += 1;
            }
        }

        let avg_ms = if latency_count > 0 {
            latency_sum.as_secs_f64() * 1000.0 / latency_count as f64
        } else {
            0.0
        };

        HealthStats {
            healthy,
            unhealthy,
            avg_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_relay_gets_neutral_score() {
        let store = HealthStore::new();
        assert_eq!(store.score(&relay("wss://unknown.example.com")).await, NEUTRAL_SCORE);
    }

    #[tokio::test]
    async fn test_success_raises_score_above_neutral() {
        let store = HealthStore::new();
        let url = relay("wss://good.example.com");
        for _ in 0..5 {
            store.record_response_time(&url, Duration::from_millis(50)).await;
        }
        assert!(store.score(&url).await > NEUTRAL_SCORE);
    }

    #[tokio::test]
    async fn test_backoff_after_threshold_failures() {
        let store = HealthStore::new();
        let url = relay("wss://flaky.example.com");
        for _ in 0..BACKOFF_FAILURE_THRESHOLD {
            store.record_failure(&url, FailureKind::Transport).await;
        }
        assert!(store.is_in_backoff(&url).await);
        assert_eq!(store.score(&url).await, i64::MIN);
    }

    #[tokio::test]
    async fn test_success_clears_backoff() {
        let store = HealthStore::new();
        let url = relay("wss://recovering.example.com");
        for _ in 0..BACKOFF_FAILURE_THRESHOLD {
            store.record_failure(&url, FailureKind::Timeout).await;
        }
        assert!(store.is_in_backoff(&url).await);
        store.record_response_time(&url, Duration::from_millis(10)).await;
        assert!(!store.is_in_backoff(&url).await);
    }

    #[tokio::test]
    async fn test_sort_by_score_descending() {
        let store = HealthStore::new();
        let fast = relay("wss://fast.example.com");
        let slow = relay("wss://slow.example.com");
        store.record_response_time(&fast, Duration::from_millis(10)).await;
        store.record_response_time(&slow, Duration::from_millis(900)).await;

        let mut urls = vec![slow.clone(), fast.clone()];
        store.sort_by_score(&mut urls).await;
        assert_eq!(urls, vec![fast, slow]);
    }

    #[tokio::test]
    async fn test_expected_response_time_falls_back_without_enough_samples() {
        let store = HealthStore::new();
        let url = relay("wss://lonely.example.com");
        store.record_response_time(&url, Duration::from_millis(50)).await;
        let projected = store.expected_response_time(&[url], 2).await;
        assert_eq!(projected, DEFAULT_EXPECTED_RESPONSE_TIME);
    }

    #[tokio::test]
    async fn test_stats_aggregate() {
        let store = HealthStore::new();
        let healthy = relay("wss://healthy.example.com");
        let unhealthy = relay("wss://unhealthy.example.com");
        store.record_response_time(&healthy, Duration::from_millis(100)).await;
        for _ in 0..BACKOFF_FAILURE_THRESHOLD {
            store.record_failure(&unhealthy, FailureKind::Closed).await;
        }
        let stats = store.stats().await;
        assert_eq!(stats.healthy, 1);
        assert_eq!(stats.unhealthy, 1);
    }
}
