//! Process-wide counters exported on /metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Application metrics for Prometheus
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total HTTP requests processed
    requests_total: AtomicU64,
    /// Records accepted by the pipeline
    records_shipped_total: AtomicU64,
    /// Records the pipeline rejected or never received
    records_failed_total: AtomicU64,
    cache_hits_total: AtomicU64,
    cache_misses_total: AtomicU64,
    /// Cache reads or writes that failed and were bypassed
    cache_fallbacks_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_shipped(&self, success: u64, failed: u64) {
        self.records_shipped_total.fetch_add(success, Ordering::Relaxed);
        self.records_failed_total.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn inc_cache_hit(&self) {
        self.cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_miss(&self) {
        self.cache_misses_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_fallback(&self) {
        self.cache_fallbacks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            records_shipped_total: self.records_shipped_total.load(Ordering::Relaxed),
            records_failed_total: self.records_failed_total.load(Ordering::Relaxed),
            cache_hits_total: self.cache_hits_total.load(Ordering::Relaxed),
            cache_misses_total: self.cache_misses_total.load(Ordering::Relaxed),
            cache_fallbacks_total: self.cache_fallbacks_total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub records_shipped_total: u64,
    pub records_failed_total: u64,
    pub cache_hits_total: u64,
    pub cache_misses_total: u64,
    pub cache_fallbacks_total: u64,
}

impl MetricsSnapshot {
    /// Prometheus text exposition
    pub fn render(&self) -> String {
        format!(
            r#"# HELP logvault_requests_total Total number of HTTP requests processed
# TYPE logvault_requests_total counter
logvault_requests_total {}

# HELP logvault_records_shipped_total Log records accepted by the pipeline
# TYPE logvault_records_shipped_total counter
logvault_records_shipped_total {}

# HELP logvault_records_failed_total Log records that failed delivery
# TYPE logvault_records_failed_total counter
logvault_records_failed_total {}

# HELP logvault_cache_hits_total Query results served from cache
# TYPE logvault_cache_hits_total counter
logvault_cache_hits_total {}

# HELP logvault_cache_misses_total Query results computed on a cache miss
# TYPE logvault_cache_misses_total counter
logvault_cache_misses_total {}

# HELP logvault_cache_fallbacks_total Cache failures bypassed by direct computation
# TYPE logvault_cache_fallbacks_total counter
logvault_cache_fallbacks_total {}

# HELP logvault_info Build information
# TYPE logvault_info gauge
logvault_info{{version="{}"}} 1
"#,
            self.requests_total,
            self.records_shipped_total,
            self.records_failed_total,
            self.cache_hits_total,
            self.cache_misses_total,
            self.cache_fallbacks_total,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = Metrics::new();
        metrics.inc_requests();
        metrics.add_shipped(7, 3);
        metrics.inc_cache_hit();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_failed_total, 3);

        let text = snapshot.render();
        assert!(text.contains("logvault_records_shipped_total 7\n"));
        assert!(text.contains("logvault_cache_hits_total 1\n"));
        assert!(text.contains("logvault_requests_total 1\n"));
    }
}
