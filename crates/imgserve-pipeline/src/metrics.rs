//! Per-pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one pipeline run, cheap to clone and share
#[derive(Clone)]
pub struct PipelineMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    cycles: AtomicU64,
    items_succeeded: AtomicU64,
    items_failed: AtomicU64,
    delivery_failures: AtomicU64,
    total_latency_us: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                cycles: AtomicU64::new(0),
                items_succeeded: AtomicU64::new(0),
                items_failed: AtomicU64::new(0),
                delivery_failures: AtomicU64::new(0),
                total_latency_us: AtomicU64::new(0),
            }),
        }
    }

    /// Record a completed discovery cycle
    pub fn record_cycle(&self) {
        self.inner.cycles.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("imgserve_cycles_total").increment(1);
    }

    /// Record an item that produced a result
    pub fn record_success(&self, latency_us: u64) {
        self.inner.items_succeeded.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
    }

    /// Record an item that failed
    pub fn record_failure(&self, latency_us: u64) {
        self.inner.items_failed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
    }

    /// Record a result that could not be written or published
    pub fn record_delivery_failure(&self) {
        self.inner.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.inner.cycles.load(Ordering::Relaxed),
            items_succeeded: self.inner.items_succeeded.load(Ordering::Relaxed),
            items_failed: self.inner.items_failed.load(Ordering::Relaxed),
            delivery_failures: self.inner.delivery_failures.load(Ordering::Relaxed),
            total_latency_us: self.inner.total_latency_us.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub delivery_failures: u64,
    pub total_latency_us: u64,
}

impl MetricsSnapshot {
    pub fn items_total(&self) -> u64 {
        self.items_succeeded + self.items_failed
    }

    /// Average end-to-end latency per item
    pub fn avg_latency_us(&self) -> u64 {
        match self.items_total() {
            0 => 0,
            n => self.total_latency_us / n,
        }
    }

    pub fn failure_rate(&self) -> f64 {
        match self.items_total() {
            0 => 0.0,
            n => self.items_failed as f64 / n as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        let metrics = PipelineMetrics::new();

        metrics.record_cycle();
        metrics.record_success(3000);
        metrics.record_success(1000);
        metrics.record_failure(2000);
        metrics.record_delivery_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 1);
        assert_eq!(snapshot.items_total(), 3);
        assert_eq!(snapshot.delivery_failures, 1);
        assert_eq!(snapshot.avg_latency_us(), 2000);
        assert!((snapshot.failure_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = PipelineMetrics::new();
        let clone = metrics.clone();

        clone.record_failure(10);

        assert_eq!(metrics.snapshot().items_failed, 1);
        assert_eq!(PipelineMetrics::default().snapshot().avg_latency_us(), 0);
    }
}
