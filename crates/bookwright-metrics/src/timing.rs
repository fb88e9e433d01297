//! Call-site timing.

use std::future::Future;
use std::time::Instant;

use serde_json::Value;

use crate::monitor::MetricsRecorder;

/// Await `fut`, then record how long it took under `name`.
///
/// The duration is recorded whether the future resolves to success or
/// failure; callers that need the outcome in the metadata should add it
/// themselves.
pub async fn timed<F, T>(recorder: &dyn MetricsRecorder, name: &str, metadata: Value, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let output = fut.await;
    recorder.record(name, start.elapsed(), metadata);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::PerformanceMonitor;
    use std::time::Duration;

    #[tokio::test]
    async fn test_timed_records_duration_and_returns_output() {
        let monitor = PerformanceMonitor::new(10, Duration::from_secs(60));
        let value = timed(&monitor, "sleepy", Value::Null, async {
            tokio::time::sleep(Duration::from_millis(15)).await;
            42
        })
        .await;

        assert_eq!(value, 42);
        let summary = monitor.summary("sleepy").unwrap();
        assert_eq!(summary.count, 1);
        assert!(summary.min_ms >= 15.0);
    }

    #[tokio::test]
    async fn test_timed_records_failures_too() {
        let monitor = PerformanceMonitor::new(10, Duration::from_secs(60));
        let result: Result<(), &str> =
            timed(&monitor, "fails", serde_json::json!({"k": 1}), async { Err("boom") }).await;

        assert!(result.is_err());
        assert_eq!(monitor.snapshot()[0].metadata["k"], 1);
    }
}
