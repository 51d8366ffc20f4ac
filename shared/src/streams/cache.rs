use anyhow::{anyhow, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, Arc<anyhow::Error>>>>;

enum Entry<V> {
    /// A fetch is running; later callers with the same key await it instead
    /// of starting their own.
    InFlight(SharedFetch<V>),
    Ready { value: V, inserted_at: Instant },
}

/// Memoizes async results per key with a TTL.
///
/// Concurrent callers with the same key share a single in-flight
/// computation. Failures are not cached: the next caller fetches again.
pub struct TimedCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TimedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let shared = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(&key) {
                Some(Entry::Ready { value, inserted_at }) if inserted_at.elapsed() < self.ttl => {
                    return Ok(value.clone());
                }
                Some(Entry::InFlight(shared)) => shared.clone(),
                _ => {
                    let shared = fetch().map(|result| result.map_err(Arc::new)).boxed().shared();
                    entries.insert(key.clone(), Entry::InFlight(shared.clone()));
                    shared
                }
            }
        };

        let result = shared.await;
        let mut entries = self.entries.lock().unwrap();
        match &result {
            Ok(value) => {
                entries.insert(
                    key,
                    Entry::Ready {
                        value: value.clone(),
                        inserted_at: Instant::now(),
                    },
                );
            }
            Err(_) => {
                entries.remove(&key);
            }
        }
        result.map_err(|error| anyhow!("{:#}", error))
    }

    /// A ready, unexpired value without triggering a fetch.
    pub fn get(&self, key: &K) -> Option<V> {
        match self.entries.lock().unwrap().get(key) {
            Some(Entry::Ready { value, inserted_at }) if inserted_at.elapsed() < self.ttl => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    /// Stores a value directly, e.g. a forced chain head.
    pub fn insert(&self, key: K, value: V) {
        self.entries.lock().unwrap().insert(
            key,
            Entry::Ready {
                value,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = Arc::new(TimedCache::<&'static str, usize>::new(Duration::from_secs(60)));
        let fetches = Arc::new(AtomicUsize::new(0));

        let results = futures::future::join_all((0..5).map(|_| {
            let cache = cache.clone();
            let fetches = fetches.clone();
            async move {
                cache
                    .get_or_fetch("head", move || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(42)
                    })
                    .await
                    .unwrap()
            }
        }))
        .await;

        assert_eq!(results, vec![42; 5]);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = TimedCache::<&'static str, usize>::new(Duration::from_secs(60));
        let result = cache
            .get_or_fetch("key", || async { Err(anyhow!("node is down")) })
            .await;
        assert!(result.is_err());
        let value = cache.get_or_fetch("key", || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn forced_values_bypass_fetching() {
        let cache = TimedCache::<&'static str, usize>::new(Duration::from_secs(60));
        cache.insert("head", 1000);
        let value = cache
            .get_or_fetch("head", || async { panic!("must not fetch") })
            .await
            .unwrap();
        assert_eq!(value, 1000);
    }
}
