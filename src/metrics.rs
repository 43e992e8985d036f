//! Lock-free gateway metrics.
//!
//! Six monotone counters and one fixed-bucket latency histogram, all plain
//! atomics: the metric surface is deliberately label-free and fixed at
//! compile time, so a registry would only add indirection. Two exposition
//! formats are served — a JSON snapshot at `/metricsz` and, when enabled,
//! Prometheus text at `/metrics` with cumulative `le` buckets.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bucket bounds for the latency histogram, in milliseconds. A sixth
/// implicit bucket catches everything above the last bound.
pub const LATENCY_BUCKETS_MS: [u64; 5] = [5, 20, 100, 500, 1000];

/// Prefix for every metric in the text exposition.
const METRIC_PREFIX: &str = "mcp_proxy_gateway";

#[derive(Debug, Default)]
pub struct GatewayMetrics {
    requests_total: AtomicU64,
    batch_items_total: AtomicU64,
    replay_hits_total: AtomicU64,
    replay_misses_total: AtomicU64,
    validation_rejects_total: AtomicU64,
    upstream_errors_total: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_buckets: [AtomicU64; 6],
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_batch_items(&self, n: u64) {
        if n > 0 {
            self.batch_items_total.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn inc_replay_hit(&self) {
        self.replay_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replay_miss(&self) {
        self.replay_misses_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_validation_reject(&self) {
        self.validation_rejects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_upstream_error(&self) {
        self.upstream_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, elapsed: Duration) {
        let ms = elapsed.as_millis().min(u128::from(u64::MAX)) as u64;
        let index = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.latency_buckets[index].fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
    }

    fn bucket_counts(&self) -> [u64; 6] {
        let mut counts = [0u64; 6];
        for (slot, bucket) in counts.iter_mut().zip(&self.latency_buckets) {
            *slot = bucket.load(Ordering::Relaxed);
        }
        counts
    }

    /// Machine-readable snapshot for `/metricsz`.
    pub fn snapshot(&self) -> serde_json::Value {
        let buckets = self.bucket_counts();
        let total: u64 = buckets.iter().sum();
        serde_json::json!({
            "requests_total": self.requests_total.load(Ordering::Relaxed),
            "batch_items_total": self.batch_items_total.load(Ordering::Relaxed),
            "replay_hits_total": self.replay_hits_total.load(Ordering::Relaxed),
            "replay_misses_total": self.replay_misses_total.load(Ordering::Relaxed),
            "validation_rejects_total": self.validation_rejects_total.load(Ordering::Relaxed),
            "upstream_errors_total": self.upstream_errors_total.load(Ordering::Relaxed),
            "latency_buckets_ms": {
                "le_5": buckets[0],
                "le_20": buckets[1],
                "le_100": buckets[2],
                "le_500": buckets[3],
                "le_1000": buckets[4],
                "gt_1000": buckets[5],
                "total": total,
            },
        })
    }

    /// Prometheus text exposition for `/metrics`.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);
        let counters = [
            ("requests_total", self.requests_total.load(Ordering::Relaxed)),
            (
                "batch_items_total",
                self.batch_items_total.load(Ordering::Relaxed),
            ),
            (
                "replay_hits_total",
                self.replay_hits_total.load(Ordering::Relaxed),
            ),
            (
                "replay_misses_total",
                self.replay_misses_total.load(Ordering::Relaxed),
            ),
            (
                "validation_rejects_total",
                self.validation_rejects_total.load(Ordering::Relaxed),
            ),
            (
                "upstream_errors_total",
                self.upstream_errors_total.load(Ordering::Relaxed),
            ),
        ];
        for (name, value) in counters {
            let _ = writeln!(out, "# TYPE {METRIC_PREFIX}_{name} counter");
            let _ = writeln!(out, "{METRIC_PREFIX}_{name} {value}");
        }

        let buckets = self.bucket_counts();
        let _ = writeln!(out, "# TYPE {METRIC_PREFIX}_latency_ms histogram");
        let mut cumulative = 0u64;
        for (bound, count) in LATENCY_BUCKETS_MS.iter().zip(&buckets) {
            cumulative += count;
            let _ = writeln!(
                out,
                "{METRIC_PREFIX}_latency_ms_bucket{{le=\"{bound}\"}} {cumulative}"
            );
        }
        cumulative += buckets[5];
        let _ = writeln!(
            out,
            "{METRIC_PREFIX}_latency_ms_bucket{{le=\"+Inf\"}} {cumulative}"
        );
        let _ = writeln!(
            out,
            "{METRIC_PREFIX}_latency_ms_sum {}",
            self.latency_sum_ms.load(Ordering::Relaxed)
        );
        let _ = writeln!(out, "{METRIC_PREFIX}_latency_ms_count {cumulative}");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = GatewayMetrics::new();
        metrics.inc_requests();
        metrics.inc_requests();
        metrics.add_batch_items(3);
        metrics.add_batch_items(0);
        metrics.inc_replay_hit();
        metrics.inc_replay_miss();
        metrics.inc_validation_reject();
        metrics.inc_upstream_error();

        let snap = metrics.snapshot();
        assert_eq!(snap["requests_total"], 2);
        assert_eq!(snap["batch_items_total"], 3);
        assert_eq!(snap["replay_hits_total"], 1);
        assert_eq!(snap["replay_misses_total"], 1);
        assert_eq!(snap["validation_rejects_total"], 1);
        assert_eq!(snap["upstream_errors_total"], 1);
    }

    #[test]
    fn latency_lands_in_the_right_bucket() {
        let metrics = GatewayMetrics::new();
        metrics.observe_latency(Duration::from_millis(3));
        metrics.observe_latency(Duration::from_millis(5));
        metrics.observe_latency(Duration::from_millis(19));
        metrics.observe_latency(Duration::from_millis(400));
        metrics.observe_latency(Duration::from_millis(5000));

        let snap = metrics.snapshot();
        let buckets = &snap["latency_buckets_ms"];
        assert_eq!(buckets["le_5"], 2);
        assert_eq!(buckets["le_20"], 1);
        assert_eq!(buckets["le_100"], 0);
        assert_eq!(buckets["le_500"], 1);
        assert_eq!(buckets["le_1000"], 0);
        assert_eq!(buckets["gt_1000"], 1);
        assert_eq!(buckets["total"], 5);
    }

    #[test]
    fn prometheus_buckets_are_cumulative() {
        let metrics = GatewayMetrics::new();
        metrics.inc_requests();
        metrics.observe_latency(Duration::from_millis(3));
        metrics.observe_latency(Duration::from_millis(50));

        let text = metrics.render_prometheus();
        assert!(text.contains("mcp_proxy_gateway_requests_total 1"));
        assert!(text.contains("mcp_proxy_gateway_latency_ms_bucket{le=\"5\"} 1"));
        assert!(text.contains("mcp_proxy_gateway_latency_ms_bucket{le=\"20\"} 1"));
        assert!(text.contains("mcp_proxy_gateway_latency_ms_bucket{le=\"100\"} 2"));
        assert!(text.contains("mcp_proxy_gateway_latency_ms_bucket{le=\"+Inf\"} 2"));
        assert!(text.contains("mcp_proxy_gateway_latency_ms_count 2"));
    }
}
