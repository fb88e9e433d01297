//! Task orchestration.
//!
//! The [`Agent`] owns the live world state and drives one task at a time:
//!
//! ```text
//! Agent
//! ├── Registry (goals + actions, shared read-only)
//! ├── Planner (A* over world states)
//! ├── ActionExecutor (timeout race per action)
//! └── AgentEventHandler(s) (lifecycle callbacks)
//! ```
//!
//! A task moves through `Planning → Executing → Completed | Failed`. Actions
//! run strictly in order. When one fails the task stops; effects already
//! applied by earlier actions stay in the world state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bookwright_core::config::PlannerConfig;
use bookwright_core::{
    Error, ExecutionError, PlanningError, Result, StateFragment, StateValue, WorldState,
};
use bookwright_metrics::{MetricsRecorder, NoopRecorder};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::action::{ActionContext, ActionResult};
use crate::events::{AgentEvent, AgentEventHandler};
use crate::executor::ActionExecutor;
use crate::plan::{ActionPlan, PlanSummary};
use crate::planner::Planner;
use crate::registry::Registry;

// ============================================================================
// Task Types
// ============================================================================

/// A request to reach a goal.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub goal: String,
    /// Free-form input available to every action
    pub context: Value,
}

impl Task {
    pub fn new(goal: impl Into<String>, context: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            context,
        }
    }
}

/// Where the agent is in its current (or last) task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Planning,
    Executing,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Planning => "planning",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of a completed task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub goal: String,
    pub plan: PlanSummary,
    pub results: Vec<ActionResult>,
    /// Payload of the last action
    pub payload: Option<Value>,
    pub state: WorldState,
}

// ============================================================================
// Agent
// ============================================================================

/// Plans and executes tasks against a registry of goals and actions.
pub struct Agent {
    registry: Arc<Registry>,
    planner: Planner,
    executor: ActionExecutor,
    state: WorldState,
    status: TaskStatus,
    handlers: Vec<Arc<dyn AgentEventHandler>>,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Copy of the live world state.
    pub fn world_state(&self) -> WorldState {
        self.state.clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Seed or overwrite a single fact.
    pub fn set_state(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.state = self.state.with(key, value);
    }

    /// Merge a fragment into the live state.
    pub fn apply(&mut self, fragment: &StateFragment) {
        self.state = self.state.merge(fragment);
    }

    /// Subscribe to lifecycle events of future tasks.
    pub fn subscribe(&mut self, handler: Arc<dyn AgentEventHandler>) {
        self.handlers.push(handler);
    }

    // ========================================================================
    // Planning
    // ========================================================================

    /// Plan for a registered goal from the current state without running it.
    pub fn plan(&self, goal: &str) -> Result<ActionPlan> {
        let goal = self
            .registry
            .goal(goal)
            .ok_or_else(|| PlanningError::GoalNotFound {
                goal: goal.to_string(),
                state: self.state.clone(),
            })?;
        Ok(self
            .planner
            .plan(goal, self.registry.actions(), &self.state)?)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Plan for the task's goal and run the plan to completion.
    #[instrument(skip(self, task), fields(task_id = %task.id, goal = %task.goal))]
    pub async fn execute(&mut self, task: Task) -> Result<TaskOutcome> {
        self.emit(AgentEvent::TaskStarted {
            task_id: task.id,
            goal: task.goal.clone(),
        });

        self.status = TaskStatus::Planning;
        let plan = match self.plan(&task.goal) {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(&task, e)),
        };
        info!(
            steps = plan.len(),
            cost = plan.estimated_cost,
            actions = ?plan.action_names(),
            "Plan ready"
        );

        self.status = TaskStatus::Executing;
        let total = plan.len();
        let mut results: Vec<ActionResult> = Vec::with_capacity(total);

        for (index, action) in plan.actions.iter().enumerate() {
            self.emit(AgentEvent::ActionStarted {
                task_id: task.id,
                action: action.name.clone(),
                index,
                total,
            });

            let ctx = ActionContext {
                state: self.state.clone(),
                goal: task.goal.clone(),
                context: task.context.clone(),
                results: results.clone(),
            };
            let result = self.executor.run(action, ctx).await;

            if !result.success {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "action failed".to_string());
                let err = if result.timed_out {
                    ExecutionError::ActionTimedOut {
                        goal: task.goal.clone(),
                        action: action.name.clone(),
                        timeout: self.executor.timeout_for(action),
                        state: self.state.clone(),
                    }
                } else {
                    ExecutionError::ActionFailed {
                        goal: task.goal.clone(),
                        action: action.name.clone(),
                        message,
                        state: self.state.clone(),
                    }
                };
                return Err(self.fail(&task, err.into()));
            }

            let fragment = result.state.as_ref().unwrap_or(&action.effects);
            let next = self.state.merge(fragment);
            let diff = self.state.diff(&next);
            self.state = next;
            debug!(action = %action.name, changed = ?diff.keys(), "Applied action result");

            self.emit(AgentEvent::StateUpdated {
                task_id: task.id,
                diff,
                state: self.state.clone(),
            });
            self.emit(AgentEvent::ActionCompleted {
                task_id: task.id,
                result: result.clone(),
            });
            results.push(result);
        }

        let payload = results.last().and_then(|r| r.payload.clone());
        self.status = TaskStatus::Completed;
        self.emit(AgentEvent::TaskCompleted {
            task_id: task.id,
            goal: task.goal.clone(),
            result: payload.clone(),
        });

        Ok(TaskOutcome {
            task_id: task.id,
            goal: task.goal,
            plan: plan.summary(),
            results,
            payload,
            state: self.state.clone(),
        })
    }

    fn fail(&mut self, task: &Task, err: Error) -> Error {
        self.status = TaskStatus::Failed;
        self.emit(AgentEvent::TaskFailed {
            task_id: task.id,
            goal: task.goal.clone(),
            code: err.code(),
            error: err.to_string(),
        });
        err
    }

    fn emit(&self, event: AgentEvent) {
        for handler in &self.handlers {
            handler.on_event(&event);
        }
    }
}

// ============================================================================
// Agent Builder
// ============================================================================

/// Builder for constructing an [`Agent`].
pub struct AgentBuilder {
    registry: Option<Arc<Registry>>,
    planner: Planner,
    default_action_timeout: Option<Duration>,
    metrics: Arc<dyn MetricsRecorder>,
    state: WorldState,
    handlers: Vec<Arc<dyn AgentEventHandler>>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            planner: Planner::default(),
            default_action_timeout: None,
            metrics: Arc::new(NoopRecorder),
            state: WorldState::new(),
            handlers: Vec::new(),
        }
    }

    /// Set the goal and action registry. Required.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    /// Planner limits and the default action timeout from config.
    pub fn planner_config(mut self, config: &PlannerConfig) -> Self {
        self.planner = Planner::from_config(config);
        self
    }

    /// Override the timeout for actions that declare none.
    pub fn default_action_timeout(mut self, timeout: Duration) -> Self {
        self.default_action_timeout = Some(timeout);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn initial_state(mut self, state: WorldState) -> Self {
        self.state = state;
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn AgentEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Build the agent.
    ///
    /// Returns an error if no registry was set.
    pub fn build(self) -> Result<Agent> {
        let registry = self
            .registry
            .ok_or_else(|| Error::Config("agent registry is required".into()))?;

        let timeout = self
            .default_action_timeout
            .unwrap_or_else(|| self.planner.default_action_timeout());
        let planner = self.planner.with_default_action_timeout(timeout);
        let executor = ActionExecutor::new(timeout).with_metrics(self.metrics);

        Ok(Agent {
            registry,
            planner,
            executor,
            state: self.state,
            status: TaskStatus::Idle,
            handlers: self.handlers,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{handler_fn, Action, ActionOutput};
    use crate::events::ChannelEventHandler;
    use crate::goal::Goal;
    use bookwright_core::fragment;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn draft_registry() -> Registry {
        Registry::new()
            .with_goal(Goal::new("draft").require("draftComplete", true))
            .with_action(
                Action::new(
                    "MakeOutline",
                    handler_fn(|_| async { Ok(ActionOutput::with_payload("outline")) }),
                )
                .with_cost(1.0)
                .requires("draftComplete", false)
                .sets("outlineReady", true),
            )
            .and_then(|r| {
                r.with_action(
                    Action::new(
                        "WriteDraft",
                        handler_fn(|ctx: ActionContext| async move {
                            let outline = ctx.previous_payload().cloned().unwrap_or_default();
                            Ok(ActionOutput::with_payload(json!({ "from": outline })))
                        }),
                    )
                    .with_cost(2.0)
                    .requires("outlineReady", true)
                    .sets("draftComplete", true),
                )
            })
            .unwrap()
    }

    fn initial() -> WorldState {
        WorldState::from_pairs([("draftComplete", false), ("outlineReady", false)])
    }

    fn agent_with_events(registry: Registry) -> (Agent, UnboundedReceiver<AgentEvent>) {
        let (handler, rx) = ChannelEventHandler::new();
        let agent = Agent::builder()
            .registry(Arc::new(registry))
            .initial_state(initial())
            .event_handler(Arc::new(handler))
            .build()
            .unwrap();
        (agent, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_execute_reaches_goal() {
        let (mut agent, mut rx) = agent_with_events(draft_registry());
        let outcome = agent
            .execute(Task::new("draft", json!({ "title": "Rust" })))
            .await
            .unwrap();

        assert_eq!(
            agent.world_state(),
            WorldState::from_pairs([("draftComplete", true), ("outlineReady", true)])
        );
        assert_eq!(agent.status(), TaskStatus::Completed);
        assert_eq!(outcome.plan.actions, vec!["MakeOutline", "WriteDraft"]);
        assert_eq!(outcome.payload, Some(json!({ "from": "outline" })));

        let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "task_started",
                "action_started",
                "state_updated",
                "action_completed",
                "action_started",
                "state_updated",
                "action_completed",
                "task_completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_goal() {
        let (mut agent, mut rx) = agent_with_events(draft_registry());
        let err = agent.execute(Task::new("publish", Value::Null)).await.unwrap_err();

        assert_eq!(err.code(), "GOAL_NOT_FOUND");
        match err {
            Error::Planning(planning) => assert_eq!(planning.state(), &initial()),
            other => panic!("expected planning error, got {other:?}"),
        }
        assert_eq!(agent.status(), TaskStatus::Failed);
        let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["task_started", "task_failed"]);
    }

    #[tokio::test]
    async fn test_failure_stops_without_rollback() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();

        let registry = Registry::new()
            .with_goal(Goal::new("review").require("reviewed", true))
            .with_action(
                Action::effects_only("Outline")
                    .requires("outlineReady", false)
                    .sets("outlineReady", true),
            )
            .and_then(|r| {
                r.with_action(
                    Action::new(
                        "Draft",
                        handler_fn(|_| async { Err(Error::Internal("model refused".into())) }),
                    )
                    .requires("outlineReady", true)
                    .sets("draftComplete", true),
                )
            })
            .and_then(|r| {
                r.with_action(
                    Action::new(
                        "Review",
                        handler_fn(move |_| {
                            counter.fetch_add(1, Ordering::SeqCst);
                            async { Ok(ActionOutput::empty()) }
                        }),
                    )
                    .requires("draftComplete", true)
                    .sets("reviewed", true),
                )
            })
            .unwrap();

        let (mut agent, mut rx) = agent_with_events(registry);
        let err = agent.execute(Task::new("review", Value::Null)).await.unwrap_err();

        match err {
            Error::Execution(ExecutionError::ActionFailed {
                ref action,
                ref state,
                ..
            }) => {
                assert_eq!(action, "Draft");
                assert_eq!(state.get("outlineReady"), Some(&StateValue::Bool(true)));
            }
            ref other => panic!("unexpected error: {other:?}"),
        }
        // Outline's effect is kept
        assert_eq!(
            agent.world_state().get("outlineReady"),
            Some(&StateValue::Bool(true))
        );
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert_eq!(drain(&mut rx).last().unwrap().kind(), "task_failed");
    }

    #[tokio::test]
    async fn test_action_timeout_fails_task() {
        let registry = Registry::new()
            .with_goal(Goal::new("g").require("done", true))
            .with_action(
                Action::new(
                    "Hang",
                    handler_fn(|_| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(ActionOutput::empty())
                    }),
                )
                .sets("done", true),
            )
            .unwrap();

        let mut agent = Agent::builder()
            .registry(Arc::new(registry))
            .default_action_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let err = agent.execute(Task::new("g", Value::Null)).await.unwrap_err();
        assert_eq!(err.code(), "ACTION_TIMED_OUT");
        assert!(agent.world_state().get("done").is_none());
    }

    #[tokio::test]
    async fn test_returned_fragment_overrides_effects() {
        let registry = Registry::new()
            .with_goal(Goal::new("g").require("done", true))
            .with_action(
                Action::new(
                    "Count",
                    handler_fn(|_| async {
                        Ok(ActionOutput::empty().with_state(fragment([
                            ("done", StateValue::from(true)),
                            ("words", StateValue::from(1200)),
                        ])))
                    }),
                )
                .sets("done", true),
            )
            .unwrap();

        let mut agent = Agent::builder().registry(Arc::new(registry)).build().unwrap();
        agent.execute(Task::new("g", Value::Null)).await.unwrap();

        assert_eq!(agent.world_state().get("words"), Some(&StateValue::Number(1200.0)));
    }

    #[test]
    fn test_plan_dry_run_and_seeded_state() {
        let mut agent = Agent::builder()
            .registry(Arc::new(draft_registry()))
            .initial_state(initial())
            .build()
            .unwrap();

        assert_eq!(agent.plan("draft").unwrap().len(), 2);
        agent.set_state("outlineReady", true);
        assert_eq!(agent.plan("draft").unwrap().action_names(), vec!["WriteDraft"]);
        assert_eq!(agent.status(), TaskStatus::Idle);
    }

    #[test]
    fn test_builder_requires_registry() {
        let err = AgentBuilder::new().build().err().unwrap();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
