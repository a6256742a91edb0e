// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay-URL guard: reject destinations that point at loopback, private,
//! link-local or cloud-metadata addresses (SSRF protection).
//!
//! Operates on the plain [`Url`] type rather than [`nostr::RelayUrl`], since
//! the latter only ever accepts `ws`/`wss` and can't represent the `http`/
//! `https` targets this guard also has to police.

use std::net::IpAddr;

use nostr::Url;
use thiserror::Error;
use tokio::net::lookup_host;

/// Cloud-metadata hostnames/addresses that never resolve legitimately from a
/// relay/HTTP fetch issued by this gateway.
const METADATA_HOSTS: &[&str] = &["metadata.google.internal", "metadata.internal"];
const METADATA_ADDRS: &[&str] = &["169.254.169.254", "fd00:ec2::254"];

/// Guard error
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
    /// Scheme is not one this guard accepts
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    /// URL has no host component
    #[error("URL has no host")]
    NoHost,
    /// Hostname resolved to (or literally is) a non-public address
    #[error("rejected non-public address: {0}")]
    NonPublicAddress(String),
    /// Loopback destinations are rejected unless dev mode is enabled
    #[error("loopback address rejected (enable dev mode to allow)")]
    LoopbackRejected,
}

/// What a guarded URL is being used for. HTTP fetches never get the
/// dev-mode loopback exemption that relay connections can.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedUse {
    /// A `ws`/`wss` relay connection
    Relay,
    /// A plain `http`/`https` fetch issued by an adjacent collaborator
    Http,
}

/// Relay/HTTP-URL guard options
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardOptions {
    /// Permit loopback destinations for relay connections (local development).
    /// Has no effect on [`GuardedUse::Http`], which always rejects loopback.
    pub dev_mode: bool,
}

fn is_internal_hostname(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
}

fn is_metadata_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    METADATA_HOSTS.contains(&host.as_str())
}

fn is_blocked_addr(ip: &IpAddr) -> bool {
    if METADATA_ADDRS
        .iter()
        .any(|a| a.parse::<IpAddr>().as_ref() == Ok(ip))
    {
        return true;
    }
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_documentation()
        }
        IpAddr::V6(v6) => {
            v6.is_unspecified()
                || v6.is_multicast()
                || v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // unique local fc00::/7
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // link-local fe80::/10
        }
    }
}

/// Check whether `url` is acceptable for the given [`GuardedUse`].
///
/// Scheme is restricted to `ws`/`wss` for relay connections and `http`/`https`
/// for HTTP fetches. Obvious internal hostnames are rejected without a DNS
/// lookup. Otherwise the host is resolved once; resolution failure is treated
/// as a soft-accept (the name simply doesn't look internal), while a
/// successful resolution to a private/link-local/loopback/multicast/metadata
/// address is a hard reject.
pub async fn check(url: &Url, use_as: GuardedUse, opts: GuardOptions) -> Result<(), Error> {
    let scheme = url.scheme();
    match use_as {
        GuardedUse::Relay => {
            if scheme != "ws" && scheme != "wss" {
                return Err(Error::UnsupportedScheme(scheme.to_string()));
            }
        }
        GuardedUse::Http => {
            if scheme != "http" && scheme != "https" {
                return Err(Error::UnsupportedScheme(scheme.to_string()));
            }
        }
    }

    let host: &str = url.host_str().ok_or(Error::NoHost)?;

    if let Ok(ip) = host.parse::<IpAddr>() {
        if ip.is_loopback() {
            return accept_loopback(use_as, opts, host);
        }
        if is_blocked_addr(&ip) {
            return Err(Error::NonPublicAddress(host.to_string()));
        }
        return Ok(());
    }

    if is_metadata_host(host) {
        return Err(Error::NonPublicAddress(host.to_string()));
    }

    if is_internal_hostname(host) {
        return accept_loopback(use_as, opts, host);
    }

    let port = url.port_or_known_default().unwrap_or(443);
    match lookup_host((host, port)).await {
        Ok(addrs) => {
            for addr in addrs {
                let ip = addr.ip();
                if ip.is_loopback() {
                    return accept_loopback(use_as, opts, host);
                }
                if is_blocked_addr(&ip) {
                    return Err(Error::NonPublicAddress(host.to_string()));
                }
            }
            Ok(())
        }
        // DNS failure for a name that doesn't look internal: soft-accept and
        // let the dial itself fail later if the name truly doesn't resolve.
        Err(_) => Ok(()),
    }
}

fn accept_loopback(use_as: GuardedUse, opts: GuardOptions, host: &str) -> Result<(), Error> {
    match use_as {
        GuardedUse::Relay if opts.dev_mode => Ok(()),
        GuardedUse::Relay => {
            tracing::warn!("guard: rejected loopback relay {host} (dev mode disabled)");
            Err(Error::LoopbackRejected)
        }
        GuardedUse::Http => {
            tracing::warn!("guard: rejected loopback HTTP fetch to {host}");
            Err(Error::LoopbackRejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_wrong_scheme_for_relay() {
        let err = check(&url("https://example.com"), GuardedUse::Relay, GuardOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, Error::UnsupportedScheme("https".to_string()));
    }

    #[tokio::test]
    async fn test_rejects_localhost_hostname() {
        let err = check(&url("ws://localhost:8080"), GuardedUse::Relay, GuardOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, Error::LoopbackRejected);
    }

    #[tokio::test]
    async fn test_dev_mode_allows_loopback_relay() {
        let opts = GuardOptions { dev_mode: true };
        check(&url("ws://127.0.0.1:7000"), GuardedUse::Relay, opts)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_guard_always_rejects_loopback_even_in_dev_mode() {
        let opts = GuardOptions { dev_mode: true };
        let err = check(&url("http://127.0.0.1:9000"), GuardedUse::Http, opts)
            .await
            .unwrap_err();
        assert_eq!(err, Error::LoopbackRejected);
    }

    #[tokio::test]
    async fn test_rejects_private_ip_literal() {
        let err = check(&url("wss://10.0.0.5"), GuardedUse::Relay, GuardOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, Error::NonPublicAddress("10.0.0.5".to_string()));
    }

    #[tokio::test]
    async fn test_rejects_cloud_metadata_literal() {
        let err = check(
            &url("wss://169.254.169.254"),
            GuardedUse::Relay,
            GuardOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, Error::NonPublicAddress("169.254.169.254".to_string()));
    }

    #[tokio::test]
    async fn test_accepts_ordinary_relay() {
        check(&url("wss://relay.damus.io"), GuardedUse::Relay, GuardOptions::default())
            .await
            .unwrap();
    }
}
