//! In-process metrics for recalculation and event store traffic.
//!
//! Plain atomics behind a global registry; the `/health` route exposes a
//! snapshot rather than shipping them to an external collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A value that moves both ways.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }
}

/// Latency histogram in milliseconds.
#[derive(Debug)]
pub struct Histogram {
    /// Upper bounds: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 30s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 30000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Upper bound of the bucket containing quantile `q` (0.0..=1.0).
    pub fn quantile(&self, q: f64) -> u64 {
        let count = self.count();
        if count == 0 {
            return 0;
        }
        let target = ((count as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (bound, bucket) in Self::BUCKET_BOUNDS.iter().zip(self.buckets.iter()) {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target {
                return *bound;
            }
        }
        Self::BUCKET_BOUNDS[Self::BUCKET_BOUNDS.len() - 1]
    }
}

/// Engine-wide metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    // Recalculation
    pub segment_recalculations: Counter,
    pub cohort_recalculations: Counter,
    pub recalculation_failures: Counter,
    pub recalculation_latency_ms: Histogram,

    // Retention analytics
    pub analytics_computed: Counter,
    pub analytics_cache_hits: Counter,

    // Event store
    pub event_store_queries: Counter,
    pub event_store_errors: Counter,
    pub event_store_latency_ms: Histogram,

    // HTTP
    pub requests_in_flight: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            segment_recalculations: self.segment_recalculations.get(),
            cohort_recalculations: self.cohort_recalculations.get(),
            recalculation_failures: self.recalculation_failures.get(),
            recalculation_latency_mean_ms: self.recalculation_latency_ms.mean(),
            recalculation_latency_p99_ms: self.recalculation_latency_ms.quantile(0.99),
            analytics_computed: self.analytics_computed.get(),
            analytics_cache_hits: self.analytics_cache_hits.get(),
            event_store_queries: self.event_store_queries.get(),
            event_store_errors: self.event_store_errors.get(),
            event_store_latency_mean_ms: self.event_store_latency_ms.mean(),
            requests_in_flight: self.requests_in_flight.get(),
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub segment_recalculations: u64,
    pub cohort_recalculations: u64,
    pub recalculation_failures: u64,
    pub recalculation_latency_mean_ms: f64,
    pub recalculation_latency_p99_ms: u64,
    pub analytics_computed: u64,
    pub analytics_cache_hits: u64,
    pub event_store_queries: u64,
    pub event_store_errors: u64,
    pub event_store_latency_mean_ms: f64,
    pub requests_in_flight: u64,
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
