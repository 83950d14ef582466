//! Telemetry
//!
//! Lightweight metric primitives for the engine: counters, gauges, and
//! fixed-bucket histograms over atomics, collected in a registry that
//! renders the Prometheus text exposition format.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

// ============================================================================
// COUNTER
// ============================================================================

/// Monotonically increasing value
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_by(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// GAUGE
// ============================================================================

/// Point-in-time value that can move both ways
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// HISTOGRAM
// ============================================================================

/// Default latency buckets in milliseconds
pub const DEFAULT_BUCKETS_MS: [f64; 10] =
    [1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0];

/// Fixed-bucket histogram (cumulative counts per bucket + sum + count)
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    /// Sum scaled by 1000 so we can keep it atomic
    sum_millis: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::with_buckets(&DEFAULT_BUCKETS_MS)
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buckets(bounds: &[f64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_millis: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if value <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_millis
            .fetch_add((value * 1000.0).max(0.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        self.sum_millis.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn mean(&self) -> f64 {
        let n = self.count();
        if n == 0 { 0.0 } else { self.sum() / n as f64 }
    }

    fn snapshot(&self) -> Vec<(f64, u64)> {
        self.bounds
            .iter()
            .zip(&self.buckets)
            .map(|(b, c)| (*b, c.load(Ordering::Relaxed)))
            .collect()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Named metric registry
#[derive(Debug, Default)]
pub struct Telemetry {
    counters: RwLock<BTreeMap<String, Arc<Counter>>>,
    gauges: RwLock<BTreeMap<String, Arc<Gauge>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(c) = self.counters.read().expect("telemetry lock").get(name) {
            return Arc::clone(c);
        }
        let mut counters = self.counters.write().expect("telemetry lock");
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Counter::new())),
        )
    }

    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        if let Some(g) = self.gauges.read().expect("telemetry lock").get(name) {
            return Arc::clone(g);
        }
        let mut gauges = self.gauges.write().expect("telemetry lock");
        Arc::clone(
            gauges
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Gauge::new())),
        )
    }

    pub fn histogram(&self, name: &str) -> Arc<Histogram> {
        if let Some(h) = self.histograms.read().expect("telemetry lock").get(name) {
            return Arc::clone(h);
        }
        let mut histograms = self.histograms.write().expect("telemetry lock");
        Arc::clone(
            histograms
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Histogram::new())),
        )
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        for (name, counter) in self.counters.read().expect("telemetry lock").iter() {
            out.push_str(&format!("# TYPE {name} counter\n{name} {}\n", counter.get()));
        }
        for (name, gauge) in self.gauges.read().expect("telemetry lock").iter() {
            out.push_str(&format!("# TYPE {name} gauge\n{name} {}\n", gauge.get()));
        }
        for (name, histogram) in self.histograms.read().expect("telemetry lock").iter() {
            out.push_str(&format!("# TYPE {name} histogram\n"));
            for (bound, count) in histogram.snapshot() {
                out.push_str(&format!("{name}_bucket{{le=\"{bound}\"}} {count}\n"));
            }
            out.push_str(&format!(
                "{name}_bucket{{le=\"+Inf\"}} {}\n{name}_sum {}\n{name}_count {}\n",
                histogram.count(),
                histogram.sum(),
                histogram.count()
            ));
        }
        out
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let c = Counter::new();
        c.increment();
        c.increment_by(4);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn test_gauge() {
        let g = Gauge::new();
        g.set(10);
        g.add(-3);
        assert_eq!(g.get(), 7);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let h = Histogram::new();
        h.observe(3.0);
        h.observe(80.0);
        h.observe(9999.0);

        let snapshot = h.snapshot();
        let bucket_5 = snapshot.iter().find(|(b, _)| *b == 5.0).unwrap().1;
        let bucket_100 = snapshot.iter().find(|(b, _)| *b == 100.0).unwrap().1;
        assert_eq!(bucket_5, 1);
        assert_eq!(bucket_100, 2);
        assert_eq!(h.count(), 3);
        assert!((h.mean() - (3.0 + 80.0 + 9999.0) / 3.0).abs() < 0.1);
    }

    #[test]
    fn test_registry_returns_same_instance() {
        let t = Telemetry::new();
        t.counter("requests_total").increment();
        t.counter("requests_total").increment();
        assert_eq!(t.counter("requests_total").get(), 2);
    }

    #[test]
    fn test_prometheus_rendering() {
        let t = Telemetry::new();
        t.counter("greenroom_requests_total").increment();
        t.gauge("greenroom_sessions").set(3);
        t.histogram("greenroom_latency_ms").observe(42.0);

        let text = t.render_prometheus();
        assert!(text.contains("# TYPE greenroom_requests_total counter"));
        assert!(text.contains("greenroom_requests_total 1"));
        assert!(text.contains("greenroom_sessions 3"));
        assert!(text.contains("greenroom_latency_ms_bucket{le=\"50\"} 1"));
        assert!(text.contains("greenroom_latency_ms_count 1"));
    }
}
