// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay Pool

use core::convert::Infallible;
use std::cmp;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_utility::{futures_util::future, thread};
use atomic_destructor::AtomicDestroyer;
use nostr::types::url;
use nostr::{ClientMessage, Event, EventId, Filter, SubscriptionId, TryIntoUrl, Url};
use nostr_database::{DatabaseError, DynNostrDatabase, IntoNostrDatabase};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};
use tokio::time::interval;

use super::options::RelayPoolOptions;
use super::{PoolStats, RelayPoolNotification};
use crate::relay::options::{FilterOptions, RelayOptions, RelaySendOptions};
use crate::relay::{self, Relay};
use crate::SubscribeOptions;

/// Relays are connected in chunks of this size, to avoid opening hundreds of
/// sockets at once when a pool holds many relays.
const MAX_CONNECTING_CHUNK: usize = 50;

/// [`super::RelayPool`] error
#[derive(Debug, Error)]
pub enum Error {
    /// Url parse error
    #[error("impossible to parse URL: {0}")]
    Url(#[from] url::ParseError),
    /// Relay error
    #[error(transparent)]
    Relay(#[from] relay::Error),
    /// Database error
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// Thread error
    #[error(transparent)]
    Thread(#[from] thread::Error),
    /// No relays
    #[error("no relays")]
    NoRelays,
    /// No relays specified
    #[error("no relays specified")]
    NoRelaysSpecified,
    /// Msg not sent
    #[error("message not sent")]
    MsgNotSent,
    /// Event/s not published
    #[error("event/s not published")]
    EventNotPublished,
    /// Not subscribed
    #[error("not subscribed")]
    NotSubscribed,
    /// Relay not found
    #[error("relay not found")]
    RelayNotFound,
    /// Notification Handler error
    #[error("notification handler error: {0}")]
    Handler(String),
    /// Infallible
    #[error(transparent)]
    Infallible(#[from] Infallible),
}

type Relays = HashMap<Url, Relay>;

#[derive(Debug, Clone)]
pub struct InternalRelayPool {
    database: Arc<DynNostrDatabase>,
    relays: Arc<RwLock<Relays>>,
    notification_sender: broadcast::Sender<RelayPoolNotification>,
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Vec<Filter>>>>,
    /// Last time each relay was touched (added, fetched, or used by a fetch).
    /// Drives the janitor's idle-eviction and the total-cap's LRU eviction.
    last_touched: Arc<RwLock<HashMap<Url, Instant>>>,
    opts: RelayPoolOptions,
}

impl AtomicDestroyer for InternalRelayPool {
    fn name(&self) -> Option<String> {
        Some(String::from("Relay Pool"))
    }

    fn on_destroy(&self) {
        let pool = self.clone();
        let _ = thread::spawn(async move {
            if let Err(e) = pool.shutdown().await {
                tracing::error!("Impossible to shutdown Relay Pool: {e}");
            }
        });
    }
}

impl InternalRelayPool {
    pub fn with_database<D>(opts: RelayPoolOptions, database: D) -> Self
    where
        D: IntoNostrDatabase,
    {
        let (notification_sender, _) = broadcast::channel(opts.notification_channel_size);

        let pool = Self {
            database: database.into_nostr_database(),
            relays: Arc::new(RwLock::new(HashMap::new())),
            notification_sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            last_touched: Arc::new(RwLock::new(HashMap::new())),
            opts,
        };
        pool.spawn_janitor();
        pool
    }

    /// Background task evicting closed or long-idle relays on a timer.
    ///
    /// Mirrors the cache sweeper: lazy-ish maintenance driven by a periodic
    /// tick rather than eager bookkeeping on every state change. The task
    /// holds `Arc` clones, not a reference back to the pool, and simply runs
    /// for as long as the owning Tokio runtime does; it does no harm once
    /// every relay has been dropped (the sweep just finds nothing to do).
    fn spawn_janitor(&self) {
        let relays = self.relays.clone();
        let last_touched = self.last_touched.clone();
        let idle_timeout = self.opts.idle_timeout;
        let mut ticker = interval(self.opts.janitor_interval);

        let _ = thread::spawn(async move {
            loop {
                ticker.tick().await;
                let stale: Vec<Url> = {
                    let relays = relays.read().await;
                    let touched = last_touched.read().await;
                    let mut stale = Vec::new();
                    for (url, relay) in relays.iter() {
                        let closed = relay.status().await.is_disconnected();
                        let idle = relay.subscriptions().await.is_empty()
                            && touched
                                .get(url)
                                .map(|t| t.elapsed() >= idle_timeout)
                                .unwrap_or(false);
                        if closed || idle {
                            stale.push(url.clone());
                        }
                    }
                    stale
                };

                if stale.is_empty() {
                    continue;
                }

                let mut relays = relays.write().await;
                let mut touched = last_touched.write().await;
                for url in stale {
                    if let Some(relay) = relays.remove(&url) {
                        tracing::debug!("pool janitor: evicting idle/closed relay {url}");
                        let _ = relay.terminate().await;
                    }
                    touched.remove(&url);
                }
            }
        });
    }

    async fn touch(&self, url: &Url) {
        self.last_touched.write().await.insert(url.clone(), Instant::now());
    }

    /// Evict the least-recently-touched idle (closed or subscription-less)
    /// entry to make room for a new dial, if the pool is at its total cap.
    async fn evict_lru_if_at_capacity(&self) {
        let at_capacity = self.relays.read().await.len() >= self.opts.max_total_connections;
        if !at_capacity {
            return;
        }

        let candidate: Option<Url> = {
            let relays = self.relays.read().await;
            let touched = self.last_touched.read().await;
            let mut idle: Vec<(Url, Instant)> = Vec::new();
            for (url, relay) in relays.iter() {
                let evictable =
                    relay.status().await.is_disconnected() || relay.subscriptions().await.is_empty();
                if evictable {
                    let last = touched.get(url).copied().unwrap_or_else(Instant::now);
                    idle.push((url.clone(), last));
                }
            }
            idle.into_iter().min_by_key(|(_, last)| *last).map(|(url, _)| url)
        };

        if let Some(url) = candidate {
            tracing::debug!("pool at capacity ({}): evicting LRU idle relay {url}", self.opts.max_total_connections);
            let mut relays = self.relays.write().await;
            if let Some(relay) = relays.remove(&url) {
                let _ = relay.terminate().await;
            }
            self.last_touched.write().await.remove(&url);
        }
    }

    /// Active-connection count and the configured total cap.
    pub async fn stats(&self) -> PoolStats {
        let relays = self.relays.read().await;
        let mut active = 0;
        for relay in relays.values() {
            if !relay.status().await.is_disconnected() {
                active += 1;
            }
        }
        PoolStats {
            active,
            max: self.opts.max_total_connections,
        }
    }

    pub async fn stop(&self) -> Result<(), Error> {
        let relays = self.relays.read().await;
        for relay in relays.values() {
            relay.stop().await?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), Error> {
        self.disconnect().await?;
        let _ = self
            .notification_sender
            .send(RelayPoolNotification::Shutdown);
        tracing::info!("Relay pool shutdown");
        Ok(())
    }

    pub fn notifications(&self) -> broadcast::Receiver<RelayPoolNotification> {
        self.notification_sender.subscribe()
    }

    pub fn database(&self) -> Arc<DynNostrDatabase> {
        self.database.clone()
    }

    pub async fn relays(&self) -> HashMap<Url, Relay> {
        self.relays.read().await.clone()
    }

    async fn relay_urls(&self) -> Vec<Url> {
        self.relays.read().await.keys().cloned().collect()
    }

    #[inline]
    fn internal_relay<'a>(
        &self,
        txn: &'a RwLockReadGuard<'a, Relays>,
        url: &Url,
    ) -> Result<&'a Relay, Error> {
        txn.get(url).ok_or(Error::RelayNotFound)
    }

    pub async fn relay<U>(&self, url: U) -> Result<Relay, Error>
    where
        U: TryIntoUrl,
        Error: From<<U as TryIntoUrl>::Err>,
    {
        let url: Url = url.try_into_url()?;
        let relays = self.relays.read().await;
        let relay = self.internal_relay(&relays, &url).cloned()?;
        drop(relays);
        self.touch(&url).await;
        Ok(relay)
    }

    pub async fn subscriptions(&self) -> HashMap<SubscriptionId, Vec<Filter>> {
        self.subscriptions.read().await.clone()
    }

    pub async fn subscription(&self, id: &SubscriptionId) -> Option<Vec<Filter>> {
        self.subscriptions.read().await.get(id).cloned()
    }

    async fn save_subscription(&self, id: SubscriptionId, filters: Vec<Filter>) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.insert(id, filters);
    }

    async fn remove_subscription(&self, id: &SubscriptionId) {
        self.subscriptions.write().await.remove(id);
    }

    async fn remove_all_subscriptions(&self) {
        self.subscriptions.write().await.clear();
    }

    pub async fn add_relay<U>(&self, url: U, opts: RelayOptions) -> Result<bool, Error>
    where
        U: TryIntoUrl,
        Error: From<<U as TryIntoUrl>::Err>,
    {
        let url: Url = url.try_into_url()?;

        if self.relays.read().await.contains_key(&url) {
            return Ok(false);
        }

        self.evict_lru_if_at_capacity().await;

        let mut relays = self.relays.write().await;
        if relays.contains_key(&url) {
            return Ok(false);
        }

        let relay: Relay = Relay::custom(url.clone(), self.database.clone(), opts);
        relay
            .set_notification_sender(Some(self.notification_sender.clone()))
            .await;

        relays.insert(url.clone(), relay);
        drop(relays);
        self.touch(&url).await;
        Ok(true)
    }

    /// Return the existing relay for `url`, adding it with default options first if unknown.
    pub async fn get_or_add_relay<U>(&self, url: U, opts: RelayOptions) -> Result<Relay, Error>
    where
        U: TryIntoUrl + Clone,
        Error: From<<U as TryIntoUrl>::Err>,
    {
        match self.relay(url.clone()).await {
            Ok(relay) => Ok(relay),
            Err(..) => {
                self.add_relay(url.clone(), opts).await?;
                self.relay(url).await
            }
        }
    }

    pub async fn remove_relay<U>(&self, url: U) -> Result<(), Error>
    where
        U: TryIntoUrl,
        Error: From<<U as TryIntoUrl>::Err>,
    {
        let url: Url = url.try_into_url()?;
        let mut relays = self.relays.write().await;
        if let Some(relay) = relays.remove(&url) {
            relay.terminate().await?;
        }
        drop(relays);
        self.last_touched.write().await.remove(&url);
        Ok(())
    }

    pub async fn remove_all_relays(&self) -> Result<(), Error> {
        let mut relays = self.relays.write().await;
        for (_, relay) in relays.drain() {
            relay.terminate().await?;
        }
        drop(relays);
        self.last_touched.write().await.clear();
        Ok(())
    }

    pub async fn connect(&self, connection_timeout: Option<Duration>) {
        let relays = self.relays.read().await;
        let mut futures: Vec<_> = relays
            .values()
            .map(|r| r.connect(connection_timeout))
            .collect();

        if futures.len() <= MAX_CONNECTING_CHUNK {
            future::join_all(futures).await;
            return;
        }

        tracing::warn!(
            "Too many relays ({}). Connecting in chunks of {MAX_CONNECTING_CHUNK}...",
            futures.len()
        );
        while !futures.is_empty() {
            let upper = cmp::min(MAX_CONNECTING_CHUNK, futures.len());
            let chunk = futures.drain(..upper);
            future::join_all(chunk).await;
        }
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        let relays = self.relays.read().await;
        for relay in relays.values() {
            relay.stop().await?;
        }
        Ok(())
    }

    pub async fn connect_relay(&self, relay: &Relay, connection_timeout: Option<Duration>) {
        relay.connect(connection_timeout).await;
    }

    pub async fn send_msg(&self, msg: ClientMessage, opts: RelaySendOptions) -> Result<(), Error> {
        self.batch_msg(vec![msg], opts).await
    }

    pub async fn batch_msg(
        &self,
        msgs: Vec<ClientMessage>,
        opts: RelaySendOptions,
    ) -> Result<(), Error> {
        let urls: Vec<Url> = self.relay_urls().await;
        self.batch_msg_to(urls, msgs, opts).await
    }

    pub async fn send_msg_to<I, U>(
        &self,
        urls: I,
        msg: ClientMessage,
        opts: RelaySendOptions,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = U>,
        U: TryIntoUrl,
        Error: From<<U as TryIntoUrl>::Err>,
    {
        self.batch_msg_to(urls, vec![msg], opts).await
    }

    pub async fn batch_msg_to<I, U>(
        &self,
        urls: I,
        msgs: Vec<ClientMessage>,
        opts: RelaySendOptions,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = U>,
        U: TryIntoUrl,
        Error: From<<U as TryIntoUrl>::Err>,
    {
        let set: HashSet<Url> = collect_urls(urls)?;

        if set.is_empty() {
            return Err(Error::NoRelaysSpecified);
        }

        let relays = self.relays.read().await;
        if relays.is_empty() {
            return Err(Error::NoRelays);
        }
        if !set.iter().all(|url| relays.contains_key(url)) {
            return Err(Error::RelayNotFound);
        }

        let mut targets: Vec<Url> = Vec::with_capacity(set.len());
        let mut futures = Vec::with_capacity(set.len());
        for url in set.into_iter() {
            let relay: &Relay = self.internal_relay(&relays, &url)?;
            targets.push(url);
            futures.push(relay.batch_msg(msgs.clone(), opts));
        }

        let list = future::join_all(futures).await;
        let mut any_success = false;
        for (url, result) in targets.into_iter().zip(list.into_iter()) {
            match result {
                Ok(..) => any_success = true,
                Err(e) => tracing::error!("Impossible to send message to '{url}': {e}"),
            }
        }

        if !any_success {
            return Err(Error::MsgNotSent);
        }
        Ok(())
    }

    pub async fn send_event(&self, event: Event, opts: RelaySendOptions) -> Result<EventId, Error> {
        let urls: Vec<Url> = self.relay_urls().await;
        self.send_event_to(urls, event, opts).await
    }

    pub async fn batch_event(
        &self,
        events: Vec<Event>,
        opts: RelaySendOptions,
    ) -> Result<(), Error> {
        let urls: Vec<Url> = self.relay_urls().await;
        self.batch_event_to(urls, events, opts).await
    }

    pub async fn send_event_to<I, U>(
        &self,
        urls: I,
        event: Event,
        opts: RelaySendOptions,
    ) -> Result<EventId, Error>
    where
        I: IntoIterator<Item = U>,
        U: TryIntoUrl,
        Error: From<<U as TryIntoUrl>::Err>,
    {
        let event_id: EventId = event.id;
        self.batch_event_to(urls, vec![event], opts).await?;
        Ok(event_id)
    }

    pub async fn batch_event_to<I, U>(
        &self,
        urls: I,
        events: Vec<Event>,
        opts: RelaySendOptions,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = U>,
        U: TryIntoUrl,
        Error: From<<U as TryIntoUrl>::Err>,
    {
        let set: HashSet<Url> = collect_urls(urls)?;

        if set.is_empty() {
            return Err(Error::NoRelaysSpecified);
        }

        let relays = self.relays.read().await;
        if relays.is_empty() {
            return Err(Error::NoRelays);
        }
        if !set.iter().all(|url| relays.contains_key(url)) {
            return Err(Error::RelayNotFound);
        }

        for event in events.iter() {
            self.database.save_event(event).await?;
        }

        let mut targets: Vec<Url> = Vec::with_capacity(set.len());
        let mut futures = Vec::with_capacity(set.len());
        for url in set.into_iter() {
            let relay: &Relay = self.internal_relay(&relays, &url)?;
            targets.push(url);
            futures.push(relay.batch_event(events.clone(), opts));
        }

        let list = future::join_all(futures).await;
        let mut any_success = false;
        for (url, result) in targets.into_iter().zip(list.into_iter()) {
            match result {
                Ok(..) => any_success = true,
                Err(e) => tracing::error!("Impossible to send event to '{url}': {e}"),
            }
        }

        if !any_success {
            return Err(Error::EventNotPublished);
        }
        Ok(())
    }

    pub async fn subscribe(&self, filters: Vec<Filter>, opts: SubscribeOptions) -> SubscriptionId {
        let id: SubscriptionId = SubscriptionId::generate();
        self.subscribe_with_id(id.clone(), filters, opts).await;
        id
    }

    pub async fn subscribe_with_id(
        &self,
        id: SubscriptionId,
        filters: Vec<Filter>,
        opts: SubscribeOptions,
    ) {
        if !opts.is_auto_closing() {
            self.save_subscription(id.clone(), filters.clone()).await;
        }

        let urls: Vec<Url> = self.relay_urls().await;
        if let Err(e) = self.subscribe_with_id_to(urls, id, filters, opts).await {
            tracing::error!("{e}");
        }
    }

    /// Subscribe to `filters` on exactly `urls`, which must already be added to the pool.
    pub async fn subscribe_with_id_to<I, U>(
        &self,
        urls: I,
        id: SubscriptionId,
        filters: Vec<Filter>,
        opts: SubscribeOptions,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = U>,
        U: TryIntoUrl,
        Error: From<<U as TryIntoUrl>::Err>,
    {
        let set: HashSet<Url> = collect_urls(urls)?;

        if set.is_empty() {
            return Err(Error::NoRelaysSpecified);
        }

        let relays = self.relays.read().await;
        if relays.is_empty() {
            return Err(Error::NoRelays);
        }
        if !set.iter().all(|url| relays.contains_key(url)) {
            return Err(Error::RelayNotFound);
        }

        let mut targets: Vec<Url> = Vec::with_capacity(set.len());
        let mut futures = Vec::with_capacity(set.len());
        for url in set.into_iter() {
            let relay: &Relay = self.internal_relay(&relays, &url)?;
            targets.push(url);
            futures.push(relay.subscribe_with_id(id.clone(), filters.clone(), opts));
        }

        let list = future::join_all(futures).await;
        let mut any_success = false;
        for (url, result) in targets.into_iter().zip(list.into_iter()) {
            match result {
                Ok(..) => any_success = true,
                Err(e) => tracing::error!("Impossible to subscribe to '{url}': {e}"),
            }
        }

        if !any_success {
            return Err(Error::NotSubscribed);
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, id: SubscriptionId, opts: RelaySendOptions) {
        self.remove_subscription(&id).await;
        let relays = self.relays.read().await;
        for relay in relays.values() {
            if let Err(e) = relay.unsubscribe(id.clone(), opts).await {
                tracing::error!("{e}");
            }
        }
    }

    pub async fn unsubscribe_all(&self, opts: RelaySendOptions) {
        self.remove_all_subscriptions().await;
        let relays = self.relays.read().await;
        for relay in relays.values() {
            if let Err(e) = relay.unsubscribe_all(opts).await {
                tracing::error!("{e}");
            }
        }
    }

    pub async fn get_events_of(
        &self,
        filters: Vec<Filter>,
        timeout: Duration,
        opts: FilterOptions,
    ) -> Result<Vec<Event>, Error> {
        let urls: Vec<Url> = self.relay_urls().await;
        self.get_events_from(urls, filters, timeout, opts).await
    }

    pub async fn get_events_from<I, U>(
        &self,
        urls: I,
        filters: Vec<Filter>,
        timeout: Duration,
        opts: FilterOptions,
    ) -> Result<Vec<Event>, Error>
    where
        I: IntoIterator<Item = U>,
        U: TryIntoUrl,
        Error: From<<U as TryIntoUrl>::Err>,
    {
        let set: HashSet<Url> = collect_urls(urls)?;

        if set.is_empty() {
            return Ok(Vec::new());
        }

        let relays = self.relays.read().await;
        if !set.iter().all(|url| relays.contains_key(url)) {
            return Err(Error::RelayNotFound);
        }

        let mut targets: Vec<Url> = Vec::with_capacity(set.len());
        let mut futures = Vec::with_capacity(set.len());
        for url in set.into_iter() {
            let relay: &Relay = self.internal_relay(&relays, &url)?;
            targets.push(url.clone());
            futures.push(relay.get_events_of(filters.clone(), timeout, opts));
        }

        let list = future::join_all(futures).await;

        let mut seen: HashSet<EventId> = HashSet::new();
        let mut events: Vec<Event> = Vec::new();
        for (url, result) in targets.into_iter().zip(list.into_iter()) {
            match result {
                Ok(batch) => {
                    for event in batch {
                        if seen.insert(event.id) {
                            events.push(event);
                        }
                    }
                }
                Err(e) => tracing::error!("Failed to fetch events from '{url}': {e}"),
            }
        }

        Ok(events)
    }
}

fn collect_urls<I, U>(urls: I) -> Result<HashSet<Url>, Error>
where
    I: IntoIterator<Item = U>,
    U: TryIntoUrl,
    Error: From<<U as TryIntoUrl>::Err>,
{
    urls.into_iter()
        .map(|u| Ok(u.try_into_url()?))
        .collect::<Result<HashSet<Url>, Error>>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_cap(max: usize) -> InternalRelayPool {
        let opts = RelayPoolOptions::new().max_total_connections(max);
        InternalRelayPool::with_database(opts, nostr_database::MemoryDatabase::default())
    }

    #[tokio::test]
    async fn test_stats_reports_configured_cap() {
        let pool = pool_with_cap(3);
        pool.add_relay("wss://a.example.com", RelayOptions::default())
            .await
            .unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.max, 3);
    }

    #[tokio::test]
    async fn test_at_capacity_evicts_lru_idle_relay_before_new_dial() {
        let pool = pool_with_cap(2);
        pool.add_relay("wss://a.example.com", RelayOptions::default())
            .await
            .unwrap();
        pool.add_relay("wss://b.example.com", RelayOptions::default())
            .await
            .unwrap();
        // touching `b` again makes `a` the least-recently-touched entry.
        pool.relay("wss://b.example.com").await.unwrap();

        pool.add_relay("wss://c.example.com", RelayOptions::default())
            .await
            .unwrap();

        let relays = pool.relays().await;
        assert_eq!(relays.len(), 2);
        assert!(!relays.contains_key(&Url::parse("wss://a.example.com").unwrap()));
        assert!(relays.contains_key(&Url::parse("wss://c.example.com").unwrap()));
    }

    #[tokio::test]
    async fn test_add_relay_is_idempotent_for_existing_url() {
        let pool = pool_with_cap(10);
        assert!(pool
            .add_relay("wss://a.example.com", RelayOptions::default())
            .await
            .unwrap());
        assert!(!pool
            .add_relay("wss://a.example.com", RelayOptions::default())
            .await
            .unwrap());
        assert_eq!(pool.relays().await.len(), 1);
    }
}
