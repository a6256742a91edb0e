// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

use std::time::{Duration, Instant};

/// One cache slot: either a positive value or a recorded "known absent"
/// negative result, each with its own insertion time and TTL.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: Option<V>,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// A positive entry.
    pub fn positive(value: V, ttl: Duration) -> Self {
        Self {
            value: Some(value),
            inserted_at: Instant::now(),
            ttl,
        }
    }

    /// A negative ("known absent") entry.
    pub fn negative(ttl: Duration) -> Self {
        Self {
            value: None,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    /// Whether this entry is a negative result.
    pub fn is_negative(&self) -> bool {
        self.value.is_none()
    }

    /// Whether `ttl` has elapsed since insertion.
    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }

    /// Borrow the positive value, if any and not expired.
    pub fn value(&self) -> Option<&V> {
        if self.is_expired() {
            None
        } else {
            self.value.as_ref()
        }
    }

    /// Consume into the positive value, if any.
    pub fn into_value(self) -> Option<V> {
        self.value
    }
}
