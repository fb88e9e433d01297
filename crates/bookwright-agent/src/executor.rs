//! Runs a single action under its timeout.
//!
//! ## Architecture
//!
//! ```text
//! Agent (task state machine)
//!   └─> ActionExecutor (timeout race + metrics)
//!       └─> ActionHandler (usually a ProviderGateway call)
//! ```
//!
//! When an action times out its future is dropped, which cancels it at the
//! next await point. Work already sent to a remote provider is not
//! guaranteed to stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bookwright_metrics::{timed, MetricsRecorder, NoopRecorder};
use serde_json::json;
use tracing::{debug, warn};

use crate::action::{Action, ActionContext, ActionResult};

/// Default ceiling for actions that declare no timeout.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes actions one at a time. Never returns an error: failures are
/// reported in the [`ActionResult`].
pub struct ActionExecutor {
    default_timeout: Duration,
    metrics: Arc<dyn MetricsRecorder>,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_ACTION_TIMEOUT)
    }
}

impl ActionExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            metrics: Arc::new(NoopRecorder),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Timeout that applies to `action`.
    pub fn timeout_for(&self, action: &Action) -> Duration {
        action.timeout.unwrap_or(self.default_timeout)
    }

    /// Run the action's handler, racing it against the action's timeout.
    pub async fn run(&self, action: &Action, ctx: ActionContext) -> ActionResult {
        let limit = self.timeout_for(action);
        let started = Instant::now();
        debug!(action = %action.name, timeout_ms = limit.as_millis() as u64, "Running action");

        let outcome = timed(
            self.metrics.as_ref(),
            &format!("action.{}", action.name),
            json!({ "goal": ctx.goal }),
            tokio::time::timeout(limit, action.handler.run(ctx)),
        )
        .await;

        match outcome {
            Ok(Ok(output)) => ActionResult::succeeded(&action.name, output, started.elapsed()),
            Ok(Err(e)) => {
                warn!(action = %action.name, error = %e, "Action failed");
                ActionResult::failed(&action.name, e.to_string(), started.elapsed())
            }
            Err(_) => {
                warn!(action = %action.name, timeout_ms = limit.as_millis() as u64, "Action timed out");
                ActionResult::timed_out(&action.name, limit)
            }
        }
    }
}
