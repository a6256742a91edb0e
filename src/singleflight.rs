// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Singleflight: coalesce concurrent cache-population calls for the same key

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

/// Coalesces concurrent callers asking for the same key into a single in-flight
/// operation. Followers await the leader's broadcast result instead of
/// triggering their own fan-out.
#[derive(Debug)]
pub struct Singleflight<K, V> {
    inflight: Mutex<HashMap<K, broadcast::Sender<V>>>,
}

impl<K, V> Default for Singleflight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Singleflight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Default + Send + Sync + 'static,
{
    /// Run `f` for `key`, unless another caller is already populating it.
    ///
    /// If a leader is already in flight, this waits on its broadcast result
    /// instead of invoking `f`. The leader publishes its own result to any
    /// followers once `f` resolves, whether it succeeds or not.
    pub async fn work<F, Fut>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let mut rx = {
            let mut inflight = self.inflight.lock().await;
            if let Some(tx) = inflight.get(&key) {
                Some(tx.subscribe())
            } else {
                let (tx, _rx) = broadcast::channel(1);
                inflight.insert(key.clone(), tx);
                None
            }
        };

        if let Some(rx) = rx.take() {
            return self.follow(rx).await;
        }

        let value: V = f().await;

        let mut inflight = self.inflight.lock().await;
        if let Some(tx) = inflight.remove(&key) {
            let _ = tx.send(value.clone());
        }

        value
    }

    async fn follow(&self, mut rx: broadcast::Receiver<V>) -> V {
        match rx.recv().await {
            Ok(value) => value,
            // Leader dropped its sender without publishing (panicked out, or raced
            // the remove). Followers have no result to adopt, so they fall back to
            // the type's default rather than propagate a panic across tasks.
            Err(_) => V::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_coalesces_concurrent_same_key() {
        let sf: Arc<Singleflight<&'static str, u64>> = Arc::new(Singleflight::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.work("alice", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    42
                })
                .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let sf: Singleflight<&'static str, u64> = Singleflight::default();
        let a = sf.work("a", || async { 1 }).await;
        let b = sf.work("b", || async { 2 }).await;
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }
}
