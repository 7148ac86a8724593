//! Per-region request and invalidation metrics.
//!
//! Counters and a bounded window of latency samples live behind one mutex.
//! Every record call is mirrored to the `metrics` facade so an installed
//! exporter sees the same series.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::coherence::Strategy;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "collector";

/// Latency samples kept for percentile computation; older samples are evicted.
pub const LATENCY_WINDOW: usize = 10_000;

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "edge_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "edge_cache_miss_total";
pub(crate) const METRIC_INVALIDATION_TOTAL: &str = "edge_cache_invalidation_total";
pub(crate) const METRIC_REQUEST_LATENCY_MS: &str = "edge_request_latency_ms";
pub(crate) const METRIC_UPTIME_SECONDS: &str = "edge_uptime_seconds";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub stale_hits: u64,
    /// Percentage of requests served from cache, two decimals.
    pub hit_ratio: f64,
    pub avg_latency: f64,
    pub p50_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub total_invalidations: u64,
    pub eager_invalidations: u64,
    pub lazy_invalidations: u64,
    /// RFC 3339 instant the window started.
    pub start_time: String,
    /// Whole seconds since `start_time`.
    pub uptime: u64,
}

#[derive(Debug)]
struct Counters {
    hits: u64,
    stale_hits: u64,
    misses: u64,
    eager_invalidations: u64,
    lazy_invalidations: u64,
    latencies: VecDeque<f64>,
    started_at: OffsetDateTime,
    started: Instant,
}

impl Counters {
    fn new() -> Self {
        Self {
            hits: 0,
            stale_hits: 0,
            misses: 0,
            eager_invalidations: 0,
            lazy_invalidations: 0,
            latencies: VecDeque::new(),
            started_at: OffsetDateTime::now_utc(),
            started: Instant::now(),
        }
    }

    fn push_latency(&mut self, latency_ms: f64, capacity: usize) {
        if self.latencies.len() >= capacity {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);
    }
}

/// Thread-safe metrics for one region.
#[derive(Debug)]
pub struct MetricsCollector {
    counters: Mutex<Counters>,
    capacity: usize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_capacity(LATENCY_WINDOW)
    }

    /// Collector keeping at most `capacity` latency samples (minimum one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counters: Mutex::new(Counters::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record a request served from cache; `stale` marks a stale hit.
    pub fn record_hit(&self, latency_ms: f64, stale: bool) {
        {
            let mut counters = mutex_lock(&self.counters, SOURCE, "record_hit");
            counters.hits += 1;
            if stale {
                counters.stale_hits += 1;
            }
            counters.push_latency(latency_ms, self.capacity);
        }

        let status = if stale { "stale" } else { "fresh" };
        counter!(METRIC_CACHE_HIT_TOTAL, "status" => status).increment(1);
        histogram!(METRIC_REQUEST_LATENCY_MS, "source" => "cache").record(latency_ms);
    }

    pub fn record_miss(&self, latency_ms: f64) {
        {
            let mut counters = mutex_lock(&self.counters, SOURCE, "record_miss");
            counters.misses += 1;
            counters.push_latency(latency_ms, self.capacity);
        }

        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
        histogram!(METRIC_REQUEST_LATENCY_MS, "source" => "origin").record(latency_ms);
    }

    pub fn record_invalidation(&self, strategy: Strategy) {
        {
            let mut counters = mutex_lock(&self.counters, SOURCE, "record_invalidation");
            match strategy {
                Strategy::Eager => counters.eager_invalidations += 1,
                Strategy::Lazy => counters.lazy_invalidations += 1,
            }
        }

        counter!(METRIC_INVALIDATION_TOTAL, "strategy" => strategy.as_str()).increment(1);
    }

    /// Nearest-rank percentile over the current latency window; 0 when empty.
    pub fn percentile(&self, p: f64) -> f64 {
        let counters = mutex_lock(&self.counters, SOURCE, "percentile");
        nearest_rank(&sorted(&counters.latencies), p)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = mutex_lock(&self.counters, SOURCE, "snapshot");

        let total_requests = counters.hits + counters.misses;
        let hit_ratio = if total_requests == 0 {
            0.0
        } else {
            round2(counters.hits as f64 / total_requests as f64 * 100.0)
        };

        let samples = sorted(&counters.latencies);
        let avg_latency = if samples.is_empty() {
            0.0
        } else {
            round2(samples.iter().sum::<f64>() / samples.len() as f64)
        };

        MetricsSnapshot {
            total_requests,
            cache_hits: counters.hits,
            cache_misses: counters.misses,
            stale_hits: counters.stale_hits,
            hit_ratio,
            avg_latency,
            p50_latency: nearest_rank(&samples, 50.0),
            p95_latency: nearest_rank(&samples, 95.0),
            p99_latency: nearest_rank(&samples, 99.0),
            min_latency: samples.first().copied().unwrap_or(0.0),
            max_latency: samples.last().copied().unwrap_or(0.0),
            total_invalidations: counters.eager_invalidations + counters.lazy_invalidations,
            eager_invalidations: counters.eager_invalidations,
            lazy_invalidations: counters.lazy_invalidations,
            start_time: counters
                .started_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| counters.started_at.to_string()),
            uptime: counters.started.elapsed().as_secs(),
        }
    }

    /// Zero every counter, drop all samples and restart the uptime clock.
    pub fn reset(&self) {
        *mutex_lock(&self.counters, SOURCE, "reset") = Counters::new();
    }

    pub fn log_summary(&self, region: &str) {
        let snapshot = self.snapshot();
        gauge!(METRIC_UPTIME_SECONDS, "region" => region.to_string()).set(snapshot.uptime as f64);
        info!(
            target_module = SOURCE,
            region,
            total_requests = snapshot.total_requests,
            hit_ratio = snapshot.hit_ratio,
            cache_hits = snapshot.cache_hits,
            stale_hits = snapshot.stale_hits,
            cache_misses = snapshot.cache_misses,
            avg_latency_ms = snapshot.avg_latency,
            p50_latency_ms = snapshot.p50_latency,
            p95_latency_ms = snapshot.p95_latency,
            p99_latency_ms = snapshot.p99_latency,
            total_invalidations = snapshot.total_invalidations,
            eager_invalidations = snapshot.eager_invalidations,
            lazy_invalidations = snapshot.lazy_invalidations,
            uptime_secs = snapshot.uptime,
            "Metrics summary"
        );
    }
}

fn sorted(samples: &VecDeque<f64>) -> Vec<f64> {
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
