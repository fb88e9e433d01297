//! Task lifecycle events and their subscribers.

use bookwright_core::{StateDiff, WorldState};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::action::ActionResult;

/// Something that happened while an agent worked on a task.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TaskStarted {
        task_id: Uuid,
        goal: String,
    },
    ActionStarted {
        task_id: Uuid,
        action: String,
        /// Zero-based position in the plan
        index: usize,
        total: usize,
    },
    ActionCompleted {
        task_id: Uuid,
        result: ActionResult,
    },
    StateUpdated {
        task_id: Uuid,
        diff: StateDiff,
        state: WorldState,
    },
    TaskCompleted {
        task_id: Uuid,
        goal: String,
        result: Option<Value>,
    },
    TaskFailed {
        task_id: Uuid,
        goal: String,
        code: &'static str,
        error: String,
    },
}

impl AgentEvent {
    pub fn task_id(&self) -> Uuid {
        match self {
            AgentEvent::TaskStarted { task_id, .. }
            | AgentEvent::ActionStarted { task_id, .. }
            | AgentEvent::ActionCompleted { task_id, .. }
            | AgentEvent::StateUpdated { task_id, .. }
            | AgentEvent::TaskCompleted { task_id, .. }
            | AgentEvent::TaskFailed { task_id, .. } => *task_id,
        }
    }

    /// Short name, e.g. `"action_completed"`.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::TaskStarted { .. } => "task_started",
            AgentEvent::ActionStarted { .. } => "action_started",
            AgentEvent::ActionCompleted { .. } => "action_completed",
            AgentEvent::StateUpdated { .. } => "state_updated",
            AgentEvent::TaskCompleted { .. } => "task_completed",
            AgentEvent::TaskFailed { .. } => "task_failed",
        }
    }
}

/// Receives agent events. Called synchronously, in order, on the task's task.
///
/// Implementations should return quickly; hand work off to a channel if it
/// might block.
pub trait AgentEventHandler: Send + Sync {
    fn on_event(&self, event: &AgentEvent);
}

/// Handler that drops every event.
pub struct NoOpEventHandler;

impl AgentEventHandler for NoOpEventHandler {
    fn on_event(&self, _event: &AgentEvent) {}
}

/// Forwards events to an unbounded tokio channel.
pub struct ChannelEventHandler {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelEventHandler {
    /// Create a handler and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AgentEventHandler for ChannelEventHandler {
    fn on_event(&self, event: &AgentEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}

/// Logs each event as a `tracing` line.
pub struct LoggingEventHandler;

impl AgentEventHandler for LoggingEventHandler {
    fn on_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::TaskStarted { task_id, goal } => {
                info!(%task_id, goal = %goal, "Task started");
            }
            AgentEvent::ActionStarted {
                action,
                index,
                total,
                ..
            } => {
                info!(action = %action, step = index + 1, total, "Action started");
            }
            AgentEvent::ActionCompleted { result, .. } => {
                info!(
                    action = %result.action,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "Action completed"
                );
            }
            AgentEvent::StateUpdated { diff, .. } => {
                info!(changed = ?diff.keys(), "World state updated");
            }
            AgentEvent::TaskCompleted { goal, .. } => {
                info!(goal = %goal, "Task completed");
            }
            AgentEvent::TaskFailed {
                goal, code, error, ..
            } => {
                warn!(goal = %goal, code, error = %error, "Task failed");
            }
        }
    }
}
