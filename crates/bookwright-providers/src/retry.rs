//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use bookwright_core::config::GatewayConfig;
use bookwright_core::ProviderError;
use tracing::debug;

use crate::traits::ProviderResult;

/// How one provider call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Wait before the first retry
    pub min_backoff: Duration,
    /// Upper bound on any wait
    pub max_backoff: Duration,
    /// Deadline for each individual attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// Final result of a retried call plus the number of attempts made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: ProviderResult<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            min_backoff: Duration::from_millis(config.min_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_timeout: config.request_timeout(),
        }
    }

    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Wait before retry number `retry` (0-based): doubles from the minimum, capped at the maximum.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.min(16));
        self.min_backoff
            .saturating_mul(factor)
            .clamp(self.min_backoff, self.max_backoff.max(self.min_backoff))
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<F, Fut, T>(&self, provider: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        provider: provider.to_string(),
                        elapsed_ms: limit.as_millis() as u64,
                    }),
                },
                None => op(attempt).await,
            };

            let err = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt > self.max_retries {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            let wait = self.backoff(attempt - 1);
            debug!(
                provider,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "Retrying provider call"
            );
            tokio::time::sleep(wait).await;
        }
    }
}
