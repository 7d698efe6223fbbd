use std::{
    future::Future,
    time::{Duration, Instant},
};

use moka::{Expiry, future::Cache};

/// In-memory key/value cache with a time-to-live per entry.
///
/// Expired entries are never returned: a read of an expired key drops it and reports a miss.
/// There is no capacity bound; the key space is expected to be small (one key per resource and
/// repository).
#[derive(Clone)]
pub struct TtlCache<V> {
    name: &'static str,
    inner: Cache<String, CacheEntry<V>>,
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub ttl: Duration,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self { value, ttl, expires_at: Instant::now() + ttl }
    }

    fn is_expired(&self, now: Instant) -> bool { now > self.expires_at }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub total_keys: u64,
    pub valid_keys: u64,
    pub expired_keys: u64,
    pub max_size: Option<u64>,
}

struct EntryExpiry;

impl<V> Expiry<String, CacheEntry<V>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

impl<V> TtlCache<V>
where V: Clone + Send + Sync + 'static
{
    pub fn new(name: &'static str) -> Self {
        let inner = Cache::<String, CacheEntry<V>>::builder()
            .name(name)
            .expire_after(EntryExpiry)
            .eviction_listener(move |k, _v, cause| {
                tracing::debug!("Evicting {} from {} cache ({:?})", k, name, cause);
            })
            .build();
        Self { name, inner }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let entry = self.inner.get(key).await?;
        if entry.is_expired(Instant::now()) {
            self.inner.invalidate(key).await;
            tracing::debug!("Cache expired for {} key {}", self.name, key);
            return None;
        }
        tracing::debug!("Cache hit for {} key {}", self.name, key);
        Some(entry.value)
    }

    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        tracing::debug!("Caching {} key {} for {}s", self.name, key, ttl.as_secs_f32());
        self.inner.insert(key, CacheEntry::new(value, ttl)).await;
    }

    /// Remove one key, or every key when `key` is `None`.
    pub async fn clear(&self, key: Option<&str>) {
        match key {
            Some(key) => self.inner.invalidate(key).await,
            None => {
                self.inner.invalidate_all();
                self.inner.run_pending_tasks().await;
            }
        }
    }

    /// Return the cached value for `key`, or run `fetch` and cache its successful result.
    /// Errors are returned as-is and nothing is cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        tracing::debug!("Cache miss for {} key {}", self.name, key);
        let value = fetch().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    /// Key counts after pending evictions have run. Expired entries are evicted before they are
    /// counted, so `expired_keys` is always 0 and `valid_keys` equals `total_keys`.
    pub async fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks().await;
        let keys = self.inner.iter().count() as u64;
        CacheStats { total_keys: keys, valid_keys: keys, expired_keys: 0, max_size: None }
    }
}
