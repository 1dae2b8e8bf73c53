//! Cache metrics for observability

use prometheus::{IntCounter, Opts, Registry};
use tracing::warn;

/// Per-cache counters. Cloning shares the underlying counters.
#[derive(Clone)]
pub struct CacheMetrics {
    pub hits: IntCounter,
    pub misses: IntCounter,
    pub inserts: IntCounter,
    pub invalidations: IntCounter,
}

fn counter(name: &str, help: &str, cache: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help).const_label("cache", cache.to_string()))
        .expect("valid metric definition")
}

impl CacheMetrics {
    pub fn new(cache: &str) -> Self {
        Self {
            hits: counter("query_cache_hits_total", "Total cache hits", cache),
            misses: counter("query_cache_misses_total", "Total cache misses", cache),
            inserts: counter("query_cache_inserts_total", "Total cache inserts", cache),
            invalidations: counter(
                "query_cache_invalidations_total",
                "Total cache invalidations",
                cache,
            ),
        }
    }

    /// Register the counters with a Prometheus registry.
    ///
    /// Registration failures (e.g. duplicate names) are logged and ignored.
    pub fn register(&self, registry: &Registry) {
        for metric in [
            Box::new(self.hits.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(self.misses.clone()),
            Box::new(self.inserts.clone()),
            Box::new(self.invalidations.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register cache metric: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = CacheMetrics::new("test");
        assert_eq!(metrics.hits.get(), 0);
        assert_eq!(metrics.misses.get(), 0);
    }

    #[test]
    fn test_register_twice_is_harmless() {
        let registry = Registry::new();
        let metrics = CacheMetrics::new("test");
        metrics.register(&registry);
        metrics.register(&registry);
        metrics.hits.inc();
        assert_eq!(registry.gather().len(), 4);
    }
}
