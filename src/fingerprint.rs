// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Stable cache-key fingerprints for (relay set, filter) pairs.

use core::fmt;

use nostr::{Filter, JsonUtil, RelayUrl};

/// Stable hash of a normalized filter + relay set, used as a cache key.
///
/// [`Filter`]'s `ids`/`authors`/`kinds`/tag-value collections are all
/// `BTreeSet`/`BTreeMap` internally, so its JSON serialization is already in
/// canonical field order; fingerprinting only has to additionally normalize
/// the caller-supplied relay set (sort + dedupe) before hashing the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Fingerprint {
    /// Compute the fingerprint for `filter` queried against `relays`.
    pub fn compute(relays: &[RelayUrl], filter: &Filter) -> Self {
        let mut normalized: Vec<&str> = relays.iter().map(RelayUrl::as_str).collect();
        normalized.sort_unstable();
        normalized.dedup();

        let mut hasher = Fnv1a::new();
        for url in normalized {
            hasher.write(url.as_bytes());
            hasher.write(b"\0");
        }
        hasher.write(filter.as_json().as_bytes());
        Self(hasher.finish())
    }
}

/// FNV-1a 64-bit: a fixed, allocation-free, cross-run-deterministic hash.
/// Deliberately not `DefaultHasher`, whose seed is randomized per process and
/// would defeat fingerprint stability guarantees across engine restarts.
struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use nostr::Kind;

    use super::*;

    fn relay(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    #[test]
    fn test_fingerprint_stable_across_relay_order() {
        let f = Filter::new().kind(Kind::TextNote).limit(10);
        let a = Fingerprint::compute(&[relay("wss://a"), relay("wss://b")], &f);
        let b = Fingerprint::compute(&[relay("wss://b"), relay("wss://a")], &f);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_stable_across_duplicate_relays() {
        let f = Filter::new().kind(Kind::TextNote);
        let a = Fingerprint::compute(&[relay("wss://a")], &f);
        let b = Fingerprint::compute(&[relay("wss://a"), relay("wss://a")], &f);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_on_semantic_change() {
        let relays = [relay("wss://a")];
        let a = Fingerprint::compute(&relays, &Filter::new().kind(Kind::TextNote).limit(10));
        let b = Fingerprint::compute(&relays, &Filter::new().kind(Kind::TextNote).limit(20));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_stable_across_author_set_order() {
        use nostr::PublicKey;

        let pk1 = PublicKey::parse(
            "npub180cvv07tjdrrgpa0j7j7tmnyl2yr6yr7l8j4s3evf6u64th6gkwsyjh6w6",
        )
        .unwrap();
        let pk2 = PublicKey::parse(
            "npub1rf9c9zjxhgykr5h6ct2zsppjzwl9vq2gdmsv0uh4pgmtvamqj6wskmrjqa",
        )
        .unwrap();

        let relays = [relay("wss://a")];
        let a = Fingerprint::compute(&relays, &Filter::new().authors([pk1, pk2]));
        let b = Fingerprint::compute(&relays, &Filter::new().authors([pk2, pk1]));
        assert_eq!(a, b);
    }
}
