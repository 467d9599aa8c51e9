//! Scheduler metrics: counters, gauges, and histograms.
//!
//! The registry is injectable; [`MetricsRegistry::global`] exposes the one
//! process-wide instance for callers that do not thread their own through.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Histogram with fixed millisecond buckets.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [u64],
    counts: Mutex<HistogramState>,
}

#[derive(Debug, Default, Clone)]
struct HistogramState {
    buckets: Vec<u64>,
    count: u64,
    sum: u64,
}

/// Snapshot of a histogram's state.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    pub bounds: Vec<u64>,
    pub buckets: Vec<u64>,
    pub count: u64,
    pub sum: u64,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

const LATENCY_BOUNDS_MS: &[u64] = &[5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10_000];

impl Histogram {
    fn new(bounds: &'static [u64]) -> Self {
        Self {
            bounds,
            counts: Mutex::new(HistogramState {
                buckets: vec![0; bounds.len() + 1],
                count: 0,
                sum: 0,
            }),
        }
    }

    pub fn observe(&self, value_ms: u64) {
        let idx = self
            .bounds
            .iter()
            .position(|&bound| value_ms <= bound)
            .unwrap_or(self.bounds.len());
        let mut state = self.counts.lock().expect("histogram lock poisoned");
        state.buckets[idx] += 1;
        state.count += 1;
        state.sum += value_ms;
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.counts.lock().expect("histogram lock poisoned").clone();
        HistogramSnapshot {
            bounds: self.bounds.to_vec(),
            buckets: state.buckets,
            count: state.count,
            sum: state.sum,
        }
    }
}

/// Counter and gauge registry for the scheduler.
#[derive(Debug)]
pub struct MetricsRegistry {
    /// (user_id, task_type) → count.
    tasks_enqueued: Mutex<HashMap<(String, String), u64>>,
    tasks_dequeued: Mutex<HashMap<(String, String), u64>>,
    tasks_dropped: Mutex<HashMap<(String, String), u64>>,
    /// user_id → current queue length.
    queue_length: Mutex<HashMap<String, usize>>,
    pub queue_wait_ms: Histogram,
    pub handler_duration_ms: Histogram,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            tasks_enqueued: Mutex::new(HashMap::new()),
            tasks_dequeued: Mutex::new(HashMap::new()),
            tasks_dropped: Mutex::new(HashMap::new()),
            queue_length: Mutex::new(HashMap::new()),
            queue_wait_ms: Histogram::new(LATENCY_BOUNDS_MS),
            handler_duration_ms: Histogram::new(LATENCY_BOUNDS_MS),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static MetricsRegistry {
        static GLOBAL: OnceLock<MetricsRegistry> = OnceLock::new();
        GLOBAL.get_or_init(MetricsRegistry::new)
    }

    pub fn task_enqueued(&self, user_id: &str, task_type: &str) {
        let mut counters = self.tasks_enqueued.lock().expect("metrics lock poisoned");
        *counters
            .entry((user_id.to_string(), task_type.to_string()))
            .or_insert(0) += 1;
    }

    pub fn task_dequeued(&self, user_id: &str, task_type: &str) {
        let mut counters = self.tasks_dequeued.lock().expect("metrics lock poisoned");
        *counters
            .entry((user_id.to_string(), task_type.to_string()))
            .or_insert(0) += 1;
    }

    pub fn task_dropped(&self, user_id: &str, task_type: &str) {
        let mut counters = self.tasks_dropped.lock().expect("metrics lock poisoned");
        *counters
            .entry((user_id.to_string(), task_type.to_string()))
            .or_insert(0) += 1;
    }

    pub fn update_queue_length(&self, user_id: &str, length: usize) {
        let mut gauges = self.queue_length.lock().expect("metrics lock poisoned");
        gauges.insert(user_id.to_string(), length);
    }

    pub fn enqueued_count(&self, user_id: &str, task_type: &str) -> u64 {
        self.tasks_enqueued
            .lock()
            .expect("metrics lock poisoned")
            .get(&(user_id.to_string(), task_type.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn dequeued_count(&self, user_id: &str, task_type: &str) -> u64 {
        self.tasks_dequeued
            .lock()
            .expect("metrics lock poisoned")
            .get(&(user_id.to_string(), task_type.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn dropped_count(&self, user_id: &str, task_type: &str) -> u64 {
        self.tasks_dropped
            .lock()
            .expect("metrics lock poisoned")
            .get(&(user_id.to_string(), task_type.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn queue_length(&self, user_id: &str) -> usize {
        self.queue_length
            .lock()
            .expect("metrics lock poisoned")
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = MetricsRegistry::new();
        metrics.task_enqueued("u1", "query");
        metrics.task_enqueued("u1", "query");
        metrics.task_dequeued("u1", "query");
        assert_eq!(metrics.enqueued_count("u1", "query"), 2);
        assert_eq!(metrics.dequeued_count("u1", "query"), 1);
        assert_eq!(metrics.enqueued_count("u2", "query"), 0);
    }

    #[test]
    fn test_queue_length_gauge() {
        let metrics = MetricsRegistry::new();
        metrics.update_queue_length("u1", 7);
        metrics.update_queue_length("u1", 3);
        assert_eq!(metrics.queue_length("u1"), 3);
    }

    #[test]
    fn test_histogram_buckets() {
        let metrics = MetricsRegistry::new();
        metrics.queue_wait_ms.observe(3);
        metrics.queue_wait_ms.observe(70);
        metrics.queue_wait_ms.observe(999_999);
        let snapshot = metrics.queue_wait_ms.snapshot();
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.buckets[0], 1); // <= 5ms
        // overflow bucket
        assert_eq!(snapshot.buckets[snapshot.bounds.len()], 1);
        assert!((snapshot.mean() - (3 + 70 + 999_999) as f64 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_global_is_stable() {
        let a = MetricsRegistry::global() as *const _;
        let b = MetricsRegistry::global() as *const _;
        assert_eq!(a, b);
    }
}
