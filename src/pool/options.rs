// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Pool options

use std::time::Duration;

/// Default cap on simultaneously-open connections (spec §5 "max total connections").
const DEFAULT_MAX_TOTAL_CONNECTIONS: usize = 100;
/// A relay with zero live subscriptions idle longer than this is janitor bait.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
/// How often the background janitor sweeps for closed/idle connections.
const DEFAULT_JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Relay Pool Options
#[derive(Debug, Clone, Copy)]
pub struct RelayPoolOptions {
    pub(super) notification_channel_size: usize,
    pub(super) max_total_connections: usize,
    pub(super) idle_timeout: Duration,
    pub(super) janitor_interval: Duration,
}

impl Default for RelayPoolOptions {
    fn default() -> Self {
        Self {
            notification_channel_size: 4096,
            max_total_connections: DEFAULT_MAX_TOTAL_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            janitor_interval: DEFAULT_JANITOR_INTERVAL,
        }
    }
}

impl RelayPoolOptions {
    /// New default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Notification channel size (default: 4096)
    pub fn notification_channel_size(mut self, size: usize) -> Self {
        self.notification_channel_size = size;
        self
    }

    /// Cap on simultaneously-open connections across the whole pool (default: 100).
    ///
    /// On overflow the least-recently-touched idle (closed or subscription-less)
    /// entry is evicted before a new relay is dialed.
    pub fn max_total_connections(mut self, max: usize) -> Self {
        self.max_total_connections = max.max(1);
        self
    }

    /// How long a relay may sit with zero live subscriptions before the
    /// janitor considers it idle and evicts it (default: 120s).
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Interval at which the background janitor sweeps for closed/idle
    /// connections (default: 60s).
    pub fn janitor_interval(mut self, interval: Duration) -> Self {
        self.janitor_interval = interval;
        self
    }
}
