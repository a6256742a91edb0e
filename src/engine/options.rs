// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Fetch engine options

use std::time::Duration;

use crate::guard::GuardOptions;
use crate::relay::options::RelayOptions;

/// Overall budget used by [`super::Engine::fetch`] when the caller doesn't
/// pass an explicit timeout.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1_500);

const DEFAULT_QUICK_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_STANDARD_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_EXTENDED_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_MIN_BUFFER: usize = 100;
const DEFAULT_MAX_BUFFER: usize = 500;

const DEFAULT_MULTI_AUTHOR_THRESHOLD: usize = 10;
const DEFAULT_DIVERSITY_TARGET: usize = 5;
const DEFAULT_SOFT_EXIT_MARGIN: usize = 20;
const DEFAULT_MULTI_AUTHOR_EOSE_FLOOR: usize = 2;

const DEFAULT_MIN_GRACE: Duration = Duration::from_millis(100);
const DEFAULT_MAX_GRACE: Duration = Duration::from_millis(400);
const DEFAULT_GRACE_MULTIPLIER: f64 = 1.2;

const DEFAULT_PROFILE_GRACE: Duration = Duration::from_millis(150);
const DEFAULT_TAGGED_GRACE: Duration = Duration::from_millis(500);

/// Config for the fan-out kernel shared by every specialization.
///
/// Every field has a default taken straight from the algorithm's design
/// constants; callers generally only touch `dev_mode` (local relay testing)
/// and possibly the timeouts.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub(crate) default_timeout: Duration,
    pub(crate) quick_timeout: Duration,
    pub(crate) standard_timeout: Duration,
    pub(crate) extended_timeout: Duration,
    pub(crate) min_buffer: usize,
    pub(crate) max_buffer: usize,
    pub(crate) multi_author_threshold: usize,
    pub(crate) diversity_target: usize,
    pub(crate) soft_exit_margin: usize,
    pub(crate) multi_author_eose_floor: usize,
    pub(crate) min_grace: Duration,
    pub(crate) max_grace: Duration,
    pub(crate) grace_multiplier: f64,
    pub(crate) profile_grace: Duration,
    pub(crate) tagged_grace: Duration,
    pub(crate) relay_opts: RelayOptions,
    pub(crate) guard: GuardOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            quick_timeout: DEFAULT_QUICK_TIMEOUT,
            standard_timeout: DEFAULT_STANDARD_TIMEOUT,
            extended_timeout: DEFAULT_EXTENDED_TIMEOUT,
            min_buffer: DEFAULT_MIN_BUFFER,
            max_buffer: DEFAULT_MAX_BUFFER,
            multi_author_threshold: DEFAULT_MULTI_AUTHOR_THRESHOLD,
            diversity_target: DEFAULT_DIVERSITY_TARGET,
            soft_exit_margin: DEFAULT_SOFT_EXIT_MARGIN,
            multi_author_eose_floor: DEFAULT_MULTI_AUTHOR_EOSE_FLOOR,
            min_grace: DEFAULT_MIN_GRACE,
            max_grace: DEFAULT_MAX_GRACE,
            grace_multiplier: DEFAULT_GRACE_MULTIPLIER,
            profile_grace: DEFAULT_PROFILE_GRACE,
            tagged_grace: DEFAULT_TAGGED_GRACE,
            relay_opts: RelayOptions::default(),
            guard: GuardOptions::default(),
        }
    }
}

impl EngineOptions {
    /// New default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overall fetch budget used when the caller doesn't pass one explicitly.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Quick timeout tier (default 2s), for cheap/likely-cached lookups.
    pub fn quick_timeout(mut self, timeout: Duration) -> Self {
        self.quick_timeout = timeout;
        self
    }

    /// Standard timeout tier (default 3s).
    pub fn standard_timeout(mut self, timeout: Duration) -> Self {
        self.standard_timeout = timeout;
        self
    }

    /// Extended timeout tier (default 5s), for broad/best-effort fan-out.
    pub fn extended_timeout(mut self, timeout: Duration) -> Self {
        self.extended_timeout = timeout;
        self
    }

    /// Lower/upper bound applied to the event-channel buffer size.
    pub fn buffer_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_buffer = min;
        self.max_buffer = max;
        self
    }

    /// Author count above which a filter is treated as "multi-author" for
    /// diversity/EOSE gating purposes (default 10).
    pub fn multi_author_threshold(mut self, threshold: usize) -> Self {
        self.multi_author_threshold = threshold;
        self
    }

    /// Distinct authors required before a multi-author fetch is considered
    /// diverse enough to exit early (default 5).
    pub fn diversity_target(mut self, target: usize) -> Self {
        self.diversity_target = target;
        self
    }

    /// Extra events (beyond `limit`) the soft-exit variant will accept in
    /// exchange for not waiting on any EOSE at all (default 20).
    pub fn soft_exit_margin(mut self, margin: usize) -> Self {
        self.soft_exit_margin = margin;
        self
    }

    /// Relay-connection options used when the engine dials a candidate relay.
    pub fn relay_opts(mut self, opts: RelayOptions) -> Self {
        self.relay_opts = opts;
        self
    }

    /// SSRF guard options applied before dialing any candidate relay.
    pub fn guard(mut self, opts: GuardOptions) -> Self {
        self.guard = opts;
        self
    }
}
