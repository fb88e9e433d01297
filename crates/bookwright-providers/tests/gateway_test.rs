//! End-to-end gateway behaviour over scripted providers.

use std::sync::Arc;
use std::time::Duration;

use bookwright_core::ProviderError;
use bookwright_metrics::PerformanceMonitor;
use bookwright_providers::{
    GenerateOptions, ProviderGateway, ProviderRegistry, RetryPolicy, ScriptedProvider,
};

fn quick_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        min_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        attempt_timeout: None,
    }
}

#[tokio::test]
async fn test_fallback_cascade_uses_second_provider() {
    let primary = Arc::new(ScriptedProvider::new("primary").always_failing(
        ProviderError::NetworkError {
            provider: "primary".into(),
            message: "connection refused".into(),
        },
    ));
    let backup = Arc::new(ScriptedProvider::new("backup").with_reply("from backup"));

    let mut registry = ProviderRegistry::new();
    registry.register(backup.clone());
    registry.register(primary.clone());
    registry.set_fallback_order(&["primary", "backup"]);

    let monitor = Arc::new(PerformanceMonitor::new(100, Duration::from_secs(60)));
    let gateway = ProviderGateway::new(Arc::new(registry))
        .with_retry(quick_retry(1))
        .with_metrics(monitor.clone());

    let result = gateway
        .generate_text("write a title", &GenerateOptions::new())
        .await
        .unwrap();

    assert_eq!(result.text, "from backup");
    assert_eq!(result.provider, "backup");
    assert_eq!(primary.calls(), 2);
    assert_eq!(backup.calls(), 1);
    assert_eq!(result.failed_attempts.len(), 1);
    assert_eq!(result.failed_attempts[0].provider, "primary");

    let names = monitor.names();
    assert!(names.contains(&"gateway.generate_text".to_string()));
    assert!(names.contains(&"gateway.provider.primary".to_string()));
    assert!(names.contains(&"gateway.provider.backup".to_string()));
}

#[tokio::test]
async fn test_permanent_failure_moves_on_without_retry() {
    let primary = Arc::new(ScriptedProvider::new("primary").always_failing(
        ProviderError::AuthenticationFailed {
            provider: "primary".into(),
            message: "invalid key".into(),
        },
    ));
    let backup = Arc::new(ScriptedProvider::new("backup"));

    let mut registry = ProviderRegistry::new();
    registry.register(primary.clone());
    registry.register(backup.clone());

    let gateway = ProviderGateway::new(Arc::new(registry)).with_retry(quick_retry(4));
    let result = gateway
        .generate_text("hello", &GenerateOptions::new())
        .await
        .unwrap();

    assert_eq!(result.provider, "backup");
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn test_transient_failure_recovers_on_same_provider() {
    let flaky = Arc::new(
        ScriptedProvider::new("flaky")
            .with_failure(ProviderError::ApiError {
                provider: "flaky".into(),
                status: 429,
                message: "rate limited".into(),
            })
            .with_reply("second time lucky"),
    );
    let backup = Arc::new(ScriptedProvider::new("backup"));

    let mut registry = ProviderRegistry::new();
    registry.register(flaky.clone());
    registry.register(backup.clone());

    let gateway = ProviderGateway::new(Arc::new(registry)).with_retry(quick_retry(2));
    let result = gateway
        .generate_text("hello", &GenerateOptions::new())
        .await
        .unwrap();

    assert_eq!(result.text, "second time lucky");
    assert!(result.failed_attempts.is_empty());
    assert_eq!(backup.calls(), 0);
}

#[tokio::test]
async fn test_attempt_timeout_triggers_fallback() {
    let slow = Arc::new(ScriptedProvider::new("slow").with_delay(Duration::from_secs(5)));
    let fast = Arc::new(ScriptedProvider::new("fast").with_reply("quick"));

    let mut registry = ProviderRegistry::new();
    registry.register(slow.clone());
    registry.register(fast.clone());

    let gateway = ProviderGateway::new(Arc::new(registry))
        .with_retry(quick_retry(0).with_attempt_timeout(Some(Duration::from_millis(20))));

    let result = gateway
        .generate_text("hello", &GenerateOptions::new())
        .await
        .unwrap();

    assert_eq!(result.provider, "fast");
    assert!(result.failed_attempts[0].error.contains("timed out"));
}

#[tokio::test]
async fn test_options_change_the_cache_key() {
    let provider = Arc::new(ScriptedProvider::new("p"));
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());
    let gateway = ProviderGateway::new(Arc::new(registry));

    gateway
        .generate_text("same prompt", &GenerateOptions::new().with_temperature(0.2))
        .await
        .unwrap();
    gateway
        .generate_text("same prompt", &GenerateOptions::new().with_temperature(0.9))
        .await
        .unwrap();
    let third = gateway
        .generate_text("same prompt", &GenerateOptions::new().with_temperature(0.2))
        .await
        .unwrap();

    assert!(third.cached);
    assert_eq!(provider.calls(), 2);
}
