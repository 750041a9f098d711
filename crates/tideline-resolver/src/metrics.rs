use std::sync::atomic::{AtomicU64, Ordering};

/// Resolver counters, exposed through [`crate::DidResolver::metrics`].
#[derive(Debug, Default)]
pub struct ResolverMetricsInner {
    pub total_requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub failures: AtomicU64,
}

/// Point-in-time snapshot of [`ResolverMetricsInner`], per spec §4.3
/// `getMetrics`: `{totalRequests, cacheHits, cacheMisses, failures,
/// cacheSize, hitRate}`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResolverMetrics {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failures: u64,
    pub cache_size: u64,
    /// `cacheHits / totalRequests`, rounded to 3 decimals. Zero when no
    /// requests have been made yet.
    pub hit_rate: f64,
}

impl ResolverMetricsInner {
    pub fn snapshot(&self, cache_size: u64) -> ResolverMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);

        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            round_to_3dp(cache_hits as f64 / total_requests as f64)
        };

        ResolverMetrics {
            total_requests,
            cache_hits,
            cache_misses,
            failures,
            cache_size,
            hit_rate,
        }
    }
}

fn round_to_3dp(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_zero_with_no_requests() {
        let inner = ResolverMetricsInner::default();
        assert_eq!(inner.snapshot(0).hit_rate, 0.0);
    }

    #[test]
    fn hit_rate_rounds_to_three_decimals() {
        let inner = ResolverMetricsInner::default();
        inner.total_requests.store(3, Ordering::Relaxed);
        inner.cache_hits.store(1, Ordering::Relaxed);
        assert_eq!(inner.snapshot(0).hit_rate, 0.333);
    }
}
