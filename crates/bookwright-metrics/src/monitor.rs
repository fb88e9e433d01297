//! Bounded metric history.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bookwright_core::config::MetricsConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

/// Sink for operation durations.
///
/// Implementations are shared across concurrent tasks, so `record` takes
/// `&self` and must not block for long.
pub trait MetricsRecorder: Send + Sync {
    /// Record one completed operation.
    fn record(&self, name: &str, duration: Duration, metadata: Value);
}

/// Recorder that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn record(&self, _name: &str, _duration: Duration, _metadata: Value) {}
}

/// A single recorded measurement.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub duration_ms: f64,
    pub metadata: Value,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip)]
    instant: Instant,
}

/// Aggregate over the retained records of one metric name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub name: String,
    pub count: usize,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
}

/// In-memory recorder with a capacity and an age limit.
///
/// The oldest records are dropped first when either bound is exceeded.
pub struct PerformanceMonitor {
    records: Mutex<VecDeque<MetricRecord>>,
    capacity: usize,
    max_age: Duration,
    shut_down: AtomicBool,
}

impl PerformanceMonitor {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            max_age,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(config.capacity, config.max_age())
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        let mut records = self.records.lock();
        self.prune_expired(&mut records, Instant::now());
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct metric names currently retained, sorted.
    pub fn names(&self) -> Vec<String> {
        let records = self.records.lock();
        records
            .iter()
            .map(|r| r.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Copy of the retained records, oldest first.
    pub fn snapshot(&self) -> Vec<MetricRecord> {
        let mut records = self.records.lock();
        self.prune_expired(&mut records, Instant::now());
        records.iter().cloned().collect()
    }

    /// Summarize the retained records for `name`.
    pub fn summary(&self, name: &str) -> Option<MetricSummary> {
        let mut durations: Vec<f64> = {
            let mut records = self.records.lock();
            self.prune_expired(&mut records, Instant::now());
            records
                .iter()
                .filter(|r| r.name == name)
                .map(|r| r.duration_ms)
                .collect()
        };

        if durations.is_empty() {
            return None;
        }

        durations.sort_by(|a, b| a.total_cmp(b));
        let count = durations.len();
        let total_ms: f64 = durations.iter().sum();
        let p95_index = ((count as f64 * 0.95) as usize).min(count - 1);

        Some(MetricSummary {
            name: name.to_string(),
            count,
            total_ms,
            mean_ms: total_ms / count as f64,
            min_ms: durations[0],
            max_ms: durations[count - 1],
            p95_ms: durations[p95_index],
        })
    }

    /// Summaries for every retained metric name.
    pub fn summaries(&self) -> Vec<MetricSummary> {
        self.names()
            .iter()
            .filter_map(|name| self.summary(name))
            .collect()
    }

    /// Stop accepting records and log a final summary.
    ///
    /// Safe to call more than once; only the first call logs.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for summary in self.summaries() {
            info!(
                metric = %summary.name,
                count = summary.count,
                mean_ms = summary.mean_ms,
                p95_ms = summary.p95_ms,
                "Metric summary"
            );
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn prune_expired(&self, records: &mut VecDeque<MetricRecord>, now: Instant) {
        while let Some(front) = records.front() {
            if now.saturating_duration_since(front.instant) > self.max_age {
                records.pop_front();
            } else {
                break;
            }
        }
    }
}

impl MetricsRecorder for PerformanceMonitor {
    fn record(&self, name: &str, duration: Duration, metadata: Value) {
        if self.is_shut_down() {
            return;
        }

        let now = Instant::now();
        let record = MetricRecord {
            name: name.to_string(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            metadata,
            recorded_at: Utc::now(),
            instant: now,
        };

        let mut records = self.records.lock();
        self.prune_expired(&mut records, now);
        while records.len() >= self.capacity {
            records.pop_front();
        }
        debug!(metric = name, duration_ms = record.duration_ms, "Recorded metric");
        records.push_back(record);
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("capacity", &self.capacity)
            .field("max_age", &self.max_age)
            .field("retained", &self.records.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let monitor = PerformanceMonitor::new(3, Duration::from_secs(60));
        for i in 0..5 {
            monitor.record(&format!("op{}", i), ms(i), Value::Null);
        }

        let names: Vec<String> = monitor.snapshot().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["op2", "op3", "op4"]);
    }

    #[test]
    fn test_max_age_drops_stale_records() {
        let monitor = PerformanceMonitor::new(10, ms(20));
        monitor.record("old", ms(1), Value::Null);
        std::thread::sleep(ms(40));
        monitor.record("fresh", ms(1), Value::Null);

        assert_eq!(monitor.len(), 1);
        assert!(monitor.summary("old").is_none());
    }

    #[test]
    fn test_summary_statistics() {
        let monitor = PerformanceMonitor::new(100, Duration::from_secs(60));
        for n in 1..=20 {
            monitor.record("gateway.generate_text", ms(n), Value::Null);
        }
        monitor.record("other", ms(500), Value::Null);

        let summary = monitor.summary("gateway.generate_text").unwrap();
        assert_eq!(summary.count, 20);
        assert_eq!(summary.min_ms, 1.0);
        assert_eq!(summary.max_ms, 20.0);
        assert_eq!(summary.p95_ms, 20.0);
        assert!((summary.mean_ms - 10.5).abs() < 1e-9);
        assert_eq!(monitor.names(), vec!["gateway.generate_text", "other"]);
    }

    #[test]
    fn test_shutdown_stops_recording() {
        let monitor = PerformanceMonitor::new(10, Duration::from_secs(60));
        monitor.record("a", ms(1), Value::Null);
        monitor.shutdown();
        monitor.shutdown();
        monitor.record("a", ms(1), Value::Null);

        assert!(monitor.is_shut_down());
        assert_eq!(monitor.len(), 1);
    }

    #[test]
    fn test_concurrent_recording_stays_bounded() {
        let monitor = Arc::new(PerformanceMonitor::new(50, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let monitor = Arc::clone(&monitor);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        monitor.record("load", ms(t * 100 + i), serde_json::json!({"thread": t}));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(monitor.len(), 50);
    }
}
