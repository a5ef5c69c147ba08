//! Metrics for the auth token cache.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for credential lookups and provider calls
#[derive(Debug, Default)]
pub struct AuthMetrics {
    /// Lookups served from the cache
    pub hits: AtomicU64,
    /// Lookups that needed a refresh
    pub misses: AtomicU64,
    /// Session provider calls started
    pub refreshes: AtomicU64,
    /// Refresh requests that joined one already in flight
    pub joined: AtomicU64,
    /// Provider calls that returned no session
    pub no_session: AtomicU64,
    /// Provider calls that failed
    pub failures: AtomicU64,
    /// Explicit invalidations
    pub invalidations: AtomicU64,
}

impl AuthMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_joined(&self) {
        self.joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_session(&self) {
        self.no_session.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of lookups served without touching the provider
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    pub fn snapshot(&self) -> AuthStats {
        AuthStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            no_session: self.no_session.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Snapshot of auth cache metrics
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub joined: u64,
    pub no_session: u64,
    pub failures: u64,
    pub invalidations: u64,
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let metrics = AuthMetrics::new();
        assert_eq!(metrics.hit_rate(), 0.0);

        metrics.record_miss();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        assert!((metrics.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(metrics.snapshot().hits, 3);
    }
}
