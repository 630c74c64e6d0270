//! Metrics collection
//!
//! Counters, gauges, histograms and timers with a Prometheus text exposition
//! plus a JSON snapshot for programmatic use. Per-server request tracking
//! derives success rates and latency percentiles on demand.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Samples retained per histogram; percentiles are computed over this
/// rolling window.
const HISTOGRAM_WINDOW: usize = 2048;

#[derive(Debug, Default)]
struct Histogram {
    count: AtomicU64,
    sum_micros: AtomicU64,
    samples: Mutex<Vec<f64>>,
}

impl Histogram {
    fn record(&self, value_ms: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value_ms * 1000.0) as u64, Ordering::Relaxed);

        let mut samples = self.samples.lock();
        if samples.len() >= HISTOGRAM_WINDOW {
            samples.remove(0);
        }
        samples.push(value_ms);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let samples = self.samples.lock().clone();
        let count = self.count.load(Ordering::Relaxed);
        let sum_ms = self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0;
        let mean = if count == 0 { 0.0 } else { sum_ms / count as f64 };

        HistogramSnapshot {
            count,
            sum_ms,
            mean_ms: mean,
            p50_ms: percentile(&samples, 50.0),
            p95_ms: percentile(&samples, 95.0),
            p99_ms: percentile(&samples, 99.0),
        }
    }
}

fn percentile(samples: &[f64], p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    sorted[rank.round() as usize]
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Per-server request accumulator
#[derive(Debug, Default)]
struct ServerStats {
    successes: AtomicU64,
    failures: AtomicU64,
    latencies: Histogram,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerStatsSnapshot {
    pub server: String,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub latency: HistogramSnapshot,
}

/// Metrics collector shared across all toolgate components
#[derive(Default)]
pub struct MetricsCollector {
    counters: DashMap<String, AtomicU64>,
    gauges: DashMap<String, Mutex<f64>>,
    histograms: DashMap<String, Histogram>,
    servers: DashMap<String, ServerStats>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter increment
    pub fn increment_counter(&self, name: &str) {
        self.increment_counter_by(name, 1);
    }

    pub fn increment_counter_by(&self, name: &str, delta: u64) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time gauge value
    pub fn set_gauge(&self, name: &str, value: f64) {
        *self
            .gauges
            .entry(name.to_string())
            .or_insert_with(|| Mutex::new(0.0))
            .lock() = value;
    }

    pub fn gauge(&self, name: &str) -> f64 {
        self.gauges.get(name).map(|g| *g.lock()).unwrap_or(0.0)
    }

    pub fn record_histogram(&self, name: &str, value_ms: f64) {
        self.histograms
            .entry(name.to_string())
            .or_default()
            .record(value_ms);
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.get(name).map(|h| h.snapshot())
    }

    /// Start a scoped timer; call `observe` (or drop the guard) to record the
    /// elapsed duration into the named histogram.
    pub fn start_timer(self: &Arc<Self>, name: &str) -> Timer {
        Timer {
            metrics: Arc::clone(self),
            name: name.to_string(),
            started_at: Instant::now(),
            observed: false,
        }
    }

    /// Record the outcome of one request against a server.
    pub fn record_request(&self, server: &str, success: bool, latency_ms: f64) {
        let stats = self.servers.entry(server.to_string()).or_default();
        if success {
            stats.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        stats.latencies.record(latency_ms);
    }

    pub fn server_stats(&self, server: &str) -> Option<ServerStatsSnapshot> {
        self.servers.get(server).map(|s| {
            let successes = s.successes.load(Ordering::Relaxed);
            let failures = s.failures.load(Ordering::Relaxed);
            let total = successes + failures;
            ServerStatsSnapshot {
                server: server.to_string(),
                successes,
                failures,
                success_rate: if total == 0 {
                    0.0
                } else {
                    successes as f64 / total as f64
                },
                latency: s.latencies.snapshot(),
            }
        })
    }

    /// Structured snapshot of everything for programmatic use.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut counters = serde_json::Map::new();
        for entry in self.counters.iter() {
            counters.insert(
                entry.key().clone(),
                serde_json::json!(entry.value().load(Ordering::Relaxed)),
            );
        }

        let mut gauges = serde_json::Map::new();
        for entry in self.gauges.iter() {
            gauges.insert(entry.key().clone(), serde_json::json!(*entry.value().lock()));
        }

        let mut histograms = serde_json::Map::new();
        for entry in self.histograms.iter() {
            histograms.insert(
                entry.key().clone(),
                serde_json::to_value(entry.value().snapshot()).unwrap_or_default(),
            );
        }

        let servers: Vec<_> = self
            .servers
            .iter()
            .filter_map(|entry| {
                self.server_stats(entry.key())
                    .and_then(|s| serde_json::to_value(s).ok())
            })
            .collect();

        serde_json::json!({
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
            "servers": servers,
        })
    }

    /// Text exposition suitable for pull-based scraping.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        for entry in self.counters.iter() {
            let name = sanitize_metric_name(entry.key());
            output.push_str(&format!("# TYPE toolgate_{} counter\n", name));
            output.push_str(&format!(
                "toolgate_{} {}\n",
                name,
                entry.value().load(Ordering::Relaxed)
            ));
        }

        for entry in self.gauges.iter() {
            let name = sanitize_metric_name(entry.key());
            output.push_str(&format!("# TYPE toolgate_{} gauge\n", name));
            output.push_str(&format!("toolgate_{} {}\n", name, *entry.value().lock()));
        }

        for entry in self.histograms.iter() {
            let name = sanitize_metric_name(entry.key());
            let snap = entry.value().snapshot();
            output.push_str(&format!("# TYPE toolgate_{} summary\n", name));
            output.push_str(&format!(
                "toolgate_{}{{quantile=\"0.5\"}} {:.3}\n",
                name, snap.p50_ms
            ));
            output.push_str(&format!(
                "toolgate_{}{{quantile=\"0.95\"}} {:.3}\n",
                name, snap.p95_ms
            ));
            output.push_str(&format!(
                "toolgate_{}{{quantile=\"0.99\"}} {:.3}\n",
                name, snap.p99_ms
            ));
            output.push_str(&format!("toolgate_{}_sum {:.3}\n", name, snap.sum_ms));
            output.push_str(&format!("toolgate_{}_count {}\n", name, snap.count));
        }

        output.push_str("# TYPE toolgate_server_requests_total counter\n");
        for entry in self.servers.iter() {
            let server = entry.key();
            output.push_str(&format!(
                "toolgate_server_requests_total{{server=\"{}\",outcome=\"success\"}} {}\n",
                server,
                entry.value().successes.load(Ordering::Relaxed)
            ));
            output.push_str(&format!(
                "toolgate_server_requests_total{{server=\"{}\",outcome=\"failure\"}} {}\n",
                server,
                entry.value().failures.load(Ordering::Relaxed)
            ));
        }

        output
    }
}

fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Scoped duration measurement. Records on `observe` or on drop.
pub struct Timer {
    metrics: Arc<MetricsCollector>,
    name: String,
    started_at: Instant,
    observed: bool,
}

impl Timer {
    pub fn observe(mut self) -> f64 {
        let elapsed_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_histogram(&self.name, elapsed_ms);
        self.observed = true;
        elapsed_ms
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if !self.observed {
            let elapsed_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
            self.metrics.record_histogram(&self.name, elapsed_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_increments() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter("requests_total");
        metrics.increment_counter("requests_total");
        metrics.increment_counter_by("requests_total", 3);

        assert_eq!(metrics.counter("requests_total"), 5);
        assert_eq!(metrics.counter("unknown"), 0);
    }

    #[test]
    fn test_gauge_holds_latest_value() {
        let metrics = MetricsCollector::new();
        metrics.set_gauge("pool_active", 3.0);
        metrics.set_gauge("pool_active", 1.0);
        assert_eq!(metrics.gauge("pool_active"), 1.0);
    }

    #[test]
    fn test_histogram_stats() {
        let metrics = MetricsCollector::new();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            metrics.record_histogram("latency", v);
        }

        let snap = metrics.histogram("latency").unwrap();
        assert_eq!(snap.count, 5);
        assert!((snap.mean_ms - 30.0).abs() < 0.01);
        assert!((snap.p50_ms - 30.0).abs() < 0.01);
        assert!((snap.p99_ms - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_server_request_tracking() {
        let metrics = MetricsCollector::new();
        metrics.record_request("s1", true, 12.0);
        metrics.record_request("s1", true, 18.0);
        metrics.record_request("s1", false, 500.0);

        let stats = metrics.server_stats("s1").unwrap();
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 0.001);
        assert_eq!(stats.latency.count, 3);
    }

    #[test]
    fn test_timer_records_on_observe() {
        let metrics = Arc::new(MetricsCollector::new());
        let timer = metrics.start_timer("invoke_duration");
        let elapsed = timer.observe();
        assert!(elapsed >= 0.0);
        assert_eq!(metrics.histogram("invoke_duration").unwrap().count, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter("cache_hits");
        metrics.set_gauge("pool_active", 2.0);
        metrics.record_histogram("latency", 10.0);
        metrics.record_request("s1", true, 10.0);

        let output = metrics.export_prometheus();
        assert!(output.contains("toolgate_cache_hits 1"));
        assert!(output.contains("toolgate_pool_active 2"));
        assert!(output.contains("toolgate_latency_count 1"));
        assert!(output.contains("toolgate_server_requests_total{server=\"s1\",outcome=\"success\"} 1"));
    }

    #[test]
    fn test_json_snapshot() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter("requests_total");
        let snap = metrics.snapshot();
        assert_eq!(snap["counters"]["requests_total"], 1);
    }
}
