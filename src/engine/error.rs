// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Fetch engine errors
//!
//! Per-relay transport failures never surface here: they update the health
//! store and are dropped. Only the handful of fatal, caller-visible
//! conditions (bad URLs, a guard rejection on every candidate, or the thin
//! passthrough in [`super::Engine::publish`]) become a [`Result`] error.

use thiserror::Error;

use crate::guard;
use crate::pool;
use crate::relay;

/// Fetch engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Pool-level error (e.g. failed to add/reach a relay)
    #[error(transparent)]
    Pool(#[from] pool::Error),
    /// Relay-level error
    #[error(transparent)]
    Relay(#[from] relay::Error),
    /// Every candidate relay was rejected by the SSRF guard
    #[error("no candidate relay passed the guard: {0}")]
    AllCandidatesRejected(guard::Error),
    /// No relay was supplied and none could be derived
    #[error("no relays to query")]
    NoRelays,
}
