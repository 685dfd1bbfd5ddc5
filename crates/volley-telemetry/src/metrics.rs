use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Type of metric.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// Point-in-time value of one metric series.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub name: String,
    pub value: f64,
    pub labels: Option<String>,
    pub metric_type: MetricType,
}

/// Query parameters for reading metrics.
#[derive(Clone, Debug, Default)]
pub struct MetricsQuery {
    pub name: Option<String>,
    pub labels: Option<HashMap<String, String>>,
    pub limit: Option<u32>,
}

/// In-memory counter. Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory gauge. Can go up or down.
struct Gauge {
    // Store as i64 bits to support negative values and atomics
    value: AtomicI64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }
    fn set(&self, v: f64) {
        self.value.store(v.to_bits() as i64, Ordering::Relaxed);
    }
    fn increment(&self, delta: f64) {
        loop {
            let current = self.value.load(Ordering::Relaxed);
            let current_f = f64::from_bits(current as u64);
            let new_f = current_f + delta;
            if self
                .value
                .compare_exchange_weak(
                    current,
                    new_f.to_bits() as i64,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed) as u64)
    }
}

/// In-memory histogram. Stores all observations for percentile computation.
struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn new() -> Self {
        Self {
            observations: Mutex::new(Vec::new()),
        }
    }
    fn observe(&self, value: f64) {
        self.observations.lock().push(value);
    }
    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        let sum: f64 = obs.iter().sum();
        let p50 = obs[count / 2];
        let p95 = obs[((count as f64 * 0.95) as usize).min(count - 1)];
        let p99 = obs[((count as f64 * 0.99) as usize).min(count - 1)];
        HistogramSummary {
            count: count as u64,
            sum,
            p50,
            p95,
            p99,
        }
    }
}

/// Summary statistics from a histogram.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Metric key: name + labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: impl Into<String>, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.into(),
            labels: sorted,
        }
    }

    fn labels_json(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        let map: HashMap<&str, &str> = self
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        serde_json::to_string(&map).ok()
    }

    fn matches_labels(&self, wanted: &HashMap<String, String>) -> bool {
        wanted
            .iter()
            .all(|(k, v)| self.labels.iter().any(|(lk, lv)| lk == k && lv == v))
    }
}

/// Thread-safe in-memory metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        let counters = self.counters.read();
        if let Some(c) = counters.get(&key) {
            c.increment(n);
            return;
        }
        drop(counters);
        let mut counters = self.counters.write();
        let c = counters.entry(key).or_insert_with(Counter::new);
        c.increment(n);
    }

    /// Current value of a counter, zero if never incremented.
    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters.read().get(&key).map(|c| c.get()).unwrap_or(0)
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(&key) {
            g.set(value);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        let g = gauges.entry(key).or_insert_with(Gauge::new);
        g.set(value);
    }

    /// Increment/decrement a gauge by delta.
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        let key = MetricKey::new(name, labels);
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(&key) {
            g.increment(delta);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        let g = gauges.entry(key).or_insert_with(Gauge::new);
        g.increment(delta);
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.gauges.read().get(&key).map(|g| g.get()).unwrap_or(0.0)
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let histograms = self.histograms.read();
        if let Some(h) = histograms.get(&key) {
            h.observe(value);
            return;
        }
        drop(histograms);
        let mut histograms = self.histograms.write();
        let h = histograms.entry(key).or_insert_with(Histogram::new);
        h.observe(value);
    }

    /// Summary statistics for one histogram series.
    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(|h| h.summary())
            .unwrap_or_default()
    }

    /// Current values of every series matching the query.
    pub fn query(&self, query: &MetricsQuery) -> Vec<MetricsSnapshot> {
        let now = Utc::now().to_rfc3339();
        let mut out = Vec::new();

        let keep = |key: &MetricKey| {
            if let Some(name) = &query.name {
                if &key.name != name {
                    return false;
                }
            }
            if let Some(labels) = &query.labels {
                if !key.matches_labels(labels) {
                    return false;
                }
            }
            true
        };

        for (key, counter) in self.counters.read().iter() {
            if keep(key) {
                out.push(MetricsSnapshot {
                    timestamp: now.clone(),
                    name: key.name.clone(),
                    value: counter.get() as f64,
                    labels: key.labels_json(),
                    metric_type: MetricType::Counter,
                });
            }
        }
        for (key, gauge) in self.gauges.read().iter() {
            if keep(key) {
                out.push(MetricsSnapshot {
                    timestamp: now.clone(),
                    name: key.name.clone(),
                    value: gauge.get(),
                    labels: key.labels_json(),
                    metric_type: MetricType::Gauge,
                });
            }
        }
        for (key, histogram) in self.histograms.read().iter() {
            if keep(key) {
                out.push(MetricsSnapshot {
                    timestamp: now.clone(),
                    name: key.name.clone(),
                    value: histogram.summary().sum,
                    labels: key.labels_json(),
                    metric_type: MetricType::Histogram,
                });
            }
        }

        out.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(limit) = query.limit {
            out.truncate(limit as usize);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("messages_sent", &[], 1);
        recorder.counter_inc("messages_sent", &[], 2);
        assert_eq!(recorder.counter_get("messages_sent", &[]), 3);
        assert_eq!(recorder.counter_get("never_touched", &[]), 0);
    }

    #[test]
    fn labels_separate_series() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("messages_sent", &[("session", "alpha")], 5);
        recorder.counter_inc("messages_sent", &[("session", "beta")], 1);
        assert_eq!(
            recorder.counter_get("messages_sent", &[("session", "alpha")]),
            5
        );
        assert_eq!(
            recorder.counter_get("messages_sent", &[("session", "beta")]),
            1
        );
    }

    #[test]
    fn label_order_does_not_matter() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("m", &[("a", "1"), ("b", "2")], 1);
        assert_eq!(recorder.counter_get("m", &[("b", "2"), ("a", "1")]), 1);
    }

    #[test]
    fn gauges_move_both_ways() {
        let recorder = MetricsRecorder::new();
        recorder.gauge_set("queue_depth", &[], 10.0);
        recorder.gauge_inc("queue_depth", &[], -3.0);
        assert_eq!(recorder.gauge_get("queue_depth", &[]), 7.0);
    }

    #[test]
    fn histogram_summary_reports_percentiles() {
        let recorder = MetricsRecorder::new();
        for i in 1..=100 {
            recorder.histogram_observe("delay_secs", &[], i as f64);
        }
        let summary = recorder.histogram_summary("delay_secs", &[]);
        assert_eq!(summary.count, 100);
        assert_eq!(summary.sum, 5050.0);
        assert!(summary.p50 >= 50.0 && summary.p50 <= 52.0);
        assert!(summary.p95 >= 95.0 && summary.p95 <= 97.0);
        assert!(summary.p99 >= 99.0);
    }

    #[test]
    fn empty_histogram_summarizes_to_zero() {
        let recorder = MetricsRecorder::new();
        let summary = recorder.histogram_summary("nothing", &[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.sum, 0.0);
    }

    #[test]
    fn query_filters_by_name_and_labels() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("sent", &[("session", "alpha")], 2);
        recorder.counter_inc("sent", &[("session", "beta")], 4);
        recorder.gauge_set("depth", &[], 9.0);

        let all = recorder.query(&MetricsQuery::default());
        assert_eq!(all.len(), 3);

        let by_name = recorder.query(&MetricsQuery {
            name: Some("sent".into()),
            ..Default::default()
        });
        assert_eq!(by_name.len(), 2);
        assert!(by_name.iter().all(|s| s.metric_type == MetricType::Counter));

        let mut labels = HashMap::new();
        labels.insert("session".to_string(), "beta".to_string());
        let by_label = recorder.query(&MetricsQuery {
            name: Some("sent".into()),
            labels: Some(labels),
            ..Default::default()
        });
        assert_eq!(by_label.len(), 1);
        assert_eq!(by_label[0].value, 4.0);
        assert!(by_label[0].labels.as_deref().unwrap().contains("beta"));
    }

    #[test]
    fn query_limit_truncates() {
        let recorder = MetricsRecorder::new();
        for i in 0..5 {
            recorder.counter_inc(&format!("m{i}"), &[], 1);
        }
        let limited = recorder.query(&MetricsQuery {
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(limited.len(), 2);
    }
}
