use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Hit and miss counters of a [`Cache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// A bounded memoizing cache with time based expiry.
///
/// Entries expire `timeout` after they were computed. When the cache grows
/// past `max_items` the entry that was inserted first is evicted, no matter
/// how often it has been read since. Every call purges the expired prefix of
/// the expiry queue, looks the key up and, on a miss, computes and stores the
/// value while holding the same lock.
#[derive(Clone)]
pub struct Cache<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

struct Inner<K, V> {
    timeout: Duration,
    max_items: usize,
    values: HashMap<K, V>,
    // Insertion order equals expiry order because every entry shares the
    // same timeout.
    expiry: VecDeque<(Instant, K)>,
    stats: CacheStats,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(timeout: Duration, max_items: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                timeout,
                max_items,
                values: HashMap::new(),
                expiry: VecDeque::new(),
                stats: CacheStats::default(),
            })),
        }
    }

    /// Return the cached value for `key`, computing it with `compute` on a
    /// miss. Errors are passed through and nothing is stored.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.purge(now);

        if let Some(value) = inner.values.get(&key) {
            let value = value.clone();
            inner.stats.hits += 1;
            return Ok(value);
        }

        inner.stats.misses += 1;
        let value = compute().await?;
        inner.insert(key, value.clone(), now);
        Ok(value)
    }

    pub async fn get_or_insert_with<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let result = self
            .get_or_try_insert_with(key, || async move { Ok::<V, Infallible>(compute().await) })
            .await;
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Drop every entry unconditionally.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.values.clear();
        inner.expiry.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.values.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq,
{
    fn purge(&mut self, now: Instant) {
        while let Some((expires_at, _)) = self.expiry.front() {
            if *expires_at > now {
                break;
            }
            if let Some((_, key)) = self.expiry.pop_front() {
                self.values.remove(&key);
            }
        }
    }

    fn insert(&mut self, key: K, value: V, now: Instant)
    where
        K: Clone,
    {
        self.values.insert(key.clone(), value);
        self.expiry.push_back((now + self.timeout, key));

        if self.expiry.len() > self.max_items {
            if let Some((_, oldest)) = self.expiry.pop_front() {
                self.values.remove(&oldest);
            }
        }
    }
}
