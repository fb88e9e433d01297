//! Actions: the steps a plan is made of.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bookwright_core::{Result, StateFragment, StateValue, WorldState};
use serde::Serialize;
use serde_json::Value;

/// Everything a handler sees when its action runs.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Snapshot of the world state before this action
    pub state: WorldState,
    /// Goal being pursued
    pub goal: String,
    /// Caller-supplied task input
    pub context: Value,
    /// Results of the actions already run in this task
    pub results: Vec<ActionResult>,
}

impl ActionContext {
    pub fn new(goal: impl Into<String>, state: WorldState, context: Value) -> Self {
        Self {
            state,
            goal: goal.into(),
            context,
            results: Vec::new(),
        }
    }

    /// Payload of the most recent action that produced one.
    pub fn previous_payload(&self) -> Option<&Value> {
        self.results.iter().rev().find_map(|r| r.payload.as_ref())
    }
}

/// What a handler hands back on success.
#[derive(Debug, Clone, Default)]
pub struct ActionOutput {
    /// State writes; when `None` the action's declared effects are applied
    pub state: Option<StateFragment>,
    pub payload: Option<Value>,
}

impl ActionOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: impl Into<Value>) -> Self {
        Self {
            state: None,
            payload: Some(payload.into()),
        }
    }

    pub fn with_state(mut self, state: StateFragment) -> Self {
        self.state = Some(state);
        self
    }
}

/// Behaviour behind an action.
///
/// Returning `Err` marks the action failed; the executor turns it into a
/// failed [`ActionResult`] rather than propagating it.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(&self, ctx: ActionContext) -> Result<ActionOutput>;
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ActionOutput>> + Send,
{
    async fn run(&self, ctx: ActionContext) -> Result<ActionOutput> {
        (self.f)(ctx).await
    }
}

/// Wrap an async closure as an [`ActionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ActionOutput>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Handler that succeeds immediately and applies the declared effects.
pub struct EffectsOnly;

#[async_trait]
impl ActionHandler for EffectsOnly {
    async fn run(&self, _ctx: ActionContext) -> Result<ActionOutput> {
        Ok(ActionOutput::empty())
    }
}

/// A registered action.
#[derive(Clone)]
pub struct Action {
    pub name: String,
    /// Non-negative search cost
    pub cost: f64,
    /// Facts that must hold (strict equality) before the action can run
    pub preconditions: StateFragment,
    /// Facts the action sets when it succeeds
    pub effects: StateFragment,
    pub timeout: Option<Duration>,
    pub handler: Arc<dyn ActionHandler>,
}

impl Action {
    pub fn new(name: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        Self {
            name: name.into(),
            cost: 1.0,
            preconditions: StateFragment::new(),
            effects: StateFragment::new(),
            timeout: None,
            handler,
        }
    }

    /// An action whose only behaviour is its declared effects.
    pub fn effects_only(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(EffectsOnly))
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn requires(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.preconditions.insert(key.into(), value.into());
        self
    }

    pub fn sets(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.effects.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_applicable(&self, state: &WorldState) -> bool {
        state.satisfies(&self.preconditions)
    }

    /// State after applying the declared effects to `state`.
    pub fn apply(&self, state: &WorldState) -> WorldState {
        state.merge(&self.effects)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("cost", &self.cost)
            .field("preconditions", &self.preconditions)
            .field("effects", &self.effects)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Outcome of running one action. Failures are data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub action: String,
    pub success: bool,
    pub state: Option<StateFragment>,
    pub payload: Option<Value>,
    pub error: Option<String>,
    pub timed_out: bool,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl ActionResult {
    pub fn succeeded(action: impl Into<String>, output: ActionOutput, elapsed: Duration) -> Self {
        Self {
            action: action.into(),
            success: true,
            state: output.state,
            payload: output.payload,
            error: None,
            timed_out: false,
            elapsed,
        }
    }

    pub fn failed(action: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            action: action.into(),
            success: false,
            state: None,
            payload: None,
            error: Some(error.into()),
            timed_out: false,
            elapsed,
        }
    }

    pub fn timed_out(action: impl Into<String>, limit: Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::failed(
                action,
                format!("timed out after {}ms", limit.as_millis()),
                limit,
            )
        }
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookwright_core::fragment;

    #[test]
    fn test_builder_and_applicability() {
        let action = Action::effects_only("WriteDraft")
            .with_cost(2.0)
            .requires("outlineReady", true)
            .sets("draftComplete", true);

        let before = WorldState::from_pairs([("outlineReady", false)]);
        assert!(!action.is_applicable(&before));

        let ready = before.with("outlineReady", true);
        assert!(action.is_applicable(&ready));
        assert_eq!(
            action.apply(&ready).get("draftComplete"),
            Some(&StateValue::Bool(true))
        );
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let handler = handler_fn(|ctx: ActionContext| async move {
            let goal = ctx.goal.clone();
            Ok(ActionOutput::with_payload(goal).with_state(fragment([("seen", true)])))
        });

        let out = handler
            .run(ActionContext::new("draft", WorldState::new(), Value::Null))
            .await
            .unwrap();
        assert_eq!(out.payload, Some(Value::from("draft")));
        assert!(out.state.is_some());
    }

    #[test]
    fn test_previous_payload_skips_empty_results() {
        let mut ctx = ActionContext::new("g", WorldState::new(), Value::Null);
        ctx.results.push(ActionResult::succeeded(
            "a",
            ActionOutput::with_payload("outline"),
            Duration::ZERO,
        ));
        ctx.results
            .push(ActionResult::succeeded("b", ActionOutput::empty(), Duration::ZERO));

        assert_eq!(ctx.previous_payload(), Some(&Value::from("outline")));
    }

    #[test]
    fn test_result_serializes_elapsed_as_millis() {
        let result = ActionResult::timed_out("slow", Duration::from_millis(250));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["elapsed_ms"], 250);
        assert_eq!(json["timed_out"], true);
    }
}
