//! Query-result cache
//!
//! An explicit cache object handed to the code that needs it, instead of a
//! process-wide dictionary:
//! - Declared eviction policy (size bound with TinyLFU admission, optional TTL)
//! - Versioned key schema
//! - Loader errors are never cached and come back to the caller untouched
//! - Metrics integration

mod keys;
mod metrics;

pub use keys::{CacheKey, CACHE_VERSION};
pub use metrics::CacheMetrics;

use moka::future::Cache;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How entries leave the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Upper bound on the number of entries; least valuable entries are evicted first
    pub max_entries: u64,
    /// Entries expire this long after insertion; `None` keeps them until evicted by size
    pub time_to_live: Option<Duration>,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            time_to_live: Some(Duration::from_secs(300)),
        }
    }
}

impl EvictionPolicy {
    /// Size-bounded only: entries never expire by age.
    pub fn size_bounded(max_entries: u64) -> Self {
        Self {
            max_entries,
            time_to_live: None,
        }
    }
}

/// In-process cache for query results.
///
/// Cloning is cheap and every clone shares the same entries.
#[derive(Clone)]
pub struct QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<String, V>,
    /// Bumped before every invalidation; loads that straddle a bump are not kept
    generation: Arc<AtomicU64>,
    policy: EvictionPolicy,
    metrics: CacheMetrics,
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &str, policy: EvictionPolicy) -> Self {
        Self::with_metrics(policy, CacheMetrics::new(name))
    }

    /// Like [`QueryCache::new`], with the counters exported through the
    /// default Prometheus registry.
    pub fn registered(name: &str, policy: EvictionPolicy) -> Self {
        let metrics = CacheMetrics::new(name);
        metrics.register(prometheus::default_registry());
        Self::with_metrics(policy, metrics)
    }

    pub fn with_metrics(policy: EvictionPolicy, metrics: CacheMetrics) -> Self {
        let mut builder = Cache::builder().max_capacity(policy.max_entries);
        if let Some(ttl) = policy.time_to_live {
            builder = builder.time_to_live(ttl);
        }

        Self {
            inner: builder.build(),
            generation: Arc::new(AtomicU64::new(0)),
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        match self.inner.get(key).await {
            Some(value) => {
                debug!(key = %key, "Cache hit");
                self.metrics.hits.inc();
                Some(value)
            }
            None => {
                debug!(key = %key, "Cache miss");
                self.metrics.misses.inc();
                None
            }
        }
    }

    pub async fn insert(&self, key: String, value: V) {
        debug!(key = %key, "Cache set");
        self.inner.insert(key, value).await;
        self.metrics.inserts.inc();
    }

    /// Return the cached value or run `init`, caching its success.
    ///
    /// A value loaded while an invalidation ran is returned to the caller but
    /// never left in the cache, so a write that invalidates after committing
    /// cannot be shadowed by a load that read the old rows.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let seen = self.generation.load(Ordering::SeqCst);
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = init().await?;
        if self.generation.load(Ordering::SeqCst) != seen {
            debug!(key = %key, "Cache load raced an invalidation, not stored");
            return Ok(value);
        }

        self.insert(key.to_string(), value.clone()).await;
        // an invalidation may have landed between the check and the insert
        if self.generation.load(Ordering::SeqCst) != seen {
            debug!(key = %key, "Cache load raced an invalidation, discarded");
            self.inner.invalidate(key).await;
        }
        Ok(value)
    }

    pub async fn invalidate(&self, key: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate(key).await;
        self.metrics.invalidations.inc();
        debug!(key = %key, "Cache invalidate");
    }

    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate_all();
        self.metrics.invalidations.inc();
        debug!("Cache invalidate all");
    }

    /// Number of live entries after pending maintenance has run
    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loader_runs_once_then_hits() {
        let cache: QueryCache<Vec<u32>> = QueryCache::new("test", EvictionPolicy::default());
        let loads = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let loads = loads.clone();
            let value = cache
                .get_or_try_insert_with("k", || async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.metrics().misses.get(), 1);
        assert_eq!(cache.metrics().hits.get(), 2);
    }

    #[tokio::test]
    async fn test_loader_error_is_not_cached() {
        let cache: QueryCache<u32> = QueryCache::new("test", EvictionPolicy::default());

        let first = cache
            .get_or_try_insert_with("k", || async { Err::<u32, _>("db down") })
            .await;
        assert_eq!(first, Err("db down"));

        let second = cache
            .get_or_try_insert_with("k", || async { Ok::<_, &str>(7) })
            .await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let cache: QueryCache<u32> = QueryCache::new("test", EvictionPolicy::default());
        cache.insert("k".to_string(), 1).await;
        cache.invalidate("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_load_overlapping_invalidate_is_not_kept() {
        let cache: QueryCache<u32> = QueryCache::new("test", EvictionPolicy::default());
        let loaded = Arc::new(tokio::sync::Notify::new());
        let resume = Arc::new(tokio::sync::Notify::new());

        let reader = {
            let cache = cache.clone();
            let loaded = loaded.clone();
            let resume = resume.clone();
            tokio::spawn(async move {
                cache
                    .get_or_try_insert_with("k", || async move {
                        // old value read, writer commits before we return it
                        loaded.notify_one();
                        resume.notified().await;
                        Ok::<_, String>(1)
                    })
                    .await
            })
        };

        loaded.notified().await;
        cache.invalidate("k").await;
        resume.notify_one();

        assert_eq!(reader.await.unwrap(), Ok(1));
        assert_eq!(cache.get("k").await, None);

        let fresh = cache
            .get_or_try_insert_with("k", || async { Ok::<_, String>(2) })
            .await;
        assert_eq!(fresh, Ok(2));
        assert_eq!(cache.get("k").await, Some(2));
    }

    #[tokio::test]
    async fn test_registered_cache_is_exported() {
        let cache: QueryCache<u32> = QueryCache::registered("exported", EvictionPolicy::default());
        cache.insert("k".to_string(), 1).await;
        assert_eq!(cache.get("k").await, Some(1));

        let families = prometheus::gather();
        let hits = families
            .iter()
            .find(|f| f.get_name() == "query_cache_hits_total")
            .expect("hits counter registered");
        let exported = hits
            .get_metric()
            .iter()
            .find(|m| m.get_label().iter().any(|l| l.get_value() == "exported"))
            .expect("counter labelled with the cache name");
        assert_eq!(exported.get_counter().get_value(), 1.0);
    }

    #[tokio::test]
    async fn test_size_bound_is_enforced() {
        let cache: QueryCache<u32> = QueryCache::new("test", EvictionPolicy::size_bounded(5));
        for i in 0..50 {
            cache.insert(format!("k{}", i), i).await;
        }
        assert!(cache.entry_count().await <= 5);
    }

    #[tokio::test]
    async fn test_ttl_expires_entries() {
        let policy = EvictionPolicy {
            max_entries: 100,
            time_to_live: Some(Duration::from_millis(50)),
        };
        let cache: QueryCache<u32> = QueryCache::new("test", policy);
        cache.insert("k".to_string(), 1).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_invalidate_all_clears_every_entry() {
        let cache: QueryCache<u32> = QueryCache::new("test", EvictionPolicy::default());
        cache.insert("a".to_string(), 1).await;
        cache.insert("b".to_string(), 2).await;
        cache.invalidate_all();
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, None);
    }
}
