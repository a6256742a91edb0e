// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Nostr Relay Pool

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![allow(unknown_lints)]
#![allow(clippy::arc_with_non_send_sync)]

pub mod cache;
pub mod engine;
pub mod enrichment;
pub mod fingerprint;
pub mod guard;
pub mod health;
pub mod outbox;
pub mod pool;
pub mod prelude;
pub mod relay;
pub mod relay_list;
pub mod singleflight;

pub use self::engine::{Engine, EngineOptions, Error as EngineError, FetchOutcome, ReactionsSummary};
pub use self::enrichment::EnrichedEvent;
pub use self::fingerprint::Fingerprint;
pub use self::guard::{GuardOptions, GuardedUse};
pub use self::health::{FailureKind, HealthStats, HealthStore};
pub use self::outbox::{OutboxOptions, RelayGroup};
pub use self::pool::options::RelayPoolOptions;
pub use self::pool::{PoolStats, RelayPool, RelayPoolNotification};
pub use self::relay::flags::{AtomicRelayServiceFlags, RelayServiceFlags};
pub use self::relay::limits::Limits;
pub use self::relay::options::{
    FilterOptions, RelayOptions, RelaySendOptions, SubscribeAutoCloseOptions, SubscribeOptions,
};
pub use self::relay::stats::RelayConnectionStats;
pub use self::relay::{Relay, RelayNotification, RelayStatus};
pub use self::relay_list::RelayList;
pub use self::singleflight::Singleflight;
