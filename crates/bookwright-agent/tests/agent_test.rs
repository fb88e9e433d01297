//! Planning and execution through the gateway, end to end.

use std::sync::Arc;
use std::time::Duration;

use bookwright_agent::book::{self, book_context, BookOptions, DRAFT_COMPLETE, OUTLINE_READY};
use bookwright_agent::{
    Action, ActionOutput, Agent, AgentEvent, ChannelEventHandler, Goal, Registry, Task,
};
use bookwright_core::{ProviderError, StateValue, WorldState};
use bookwright_metrics::PerformanceMonitor;
use bookwright_providers::{ProviderGateway, ProviderRegistry, RetryPolicy, ScriptedProvider};
use serde_json::Value;

fn collect(rx: &mut tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_outline_and_draft_scenario() {
    let registry = Registry::new()
        .with_goal(Goal::new("draft").require("draftComplete", true))
        .with_action(
            Action::effects_only("MakeOutline")
                .with_cost(1.0)
                .requires("draftComplete", false)
                .sets("outlineReady", true),
        )
        .and_then(|r| {
            r.with_action(
                Action::effects_only("WriteDraft")
                    .with_cost(2.0)
                    .requires("outlineReady", true)
                    .sets("draftComplete", true),
            )
        })
        .unwrap();

    let (handler, mut rx) = ChannelEventHandler::new();
    let mut agent = Agent::builder()
        .registry(Arc::new(registry))
        .initial_state(WorldState::from_pairs([
            ("draftComplete", false),
            ("outlineReady", false),
        ]))
        .event_handler(Arc::new(handler))
        .build()
        .unwrap();

    let plan = agent.plan("draft").unwrap();
    assert_eq!(plan.action_names(), vec!["MakeOutline", "WriteDraft"]);
    assert_eq!(plan.estimated_cost, 3.0);

    agent.execute(Task::new("draft", Value::Null)).await.unwrap();
    assert_eq!(
        agent.world_state(),
        WorldState::from_pairs([("draftComplete", true), ("outlineReady", true)])
    );

    let events = collect(&mut rx);
    let completed: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ActionCompleted { result, .. } => Some(result.action.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec!["MakeOutline", "WriteDraft"]);

    let task_completed = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::TaskCompleted { .. }))
        .count();
    assert_eq!(task_completed, 1);
    assert!(matches!(events.last(), Some(AgentEvent::TaskCompleted { .. })));
}

#[tokio::test]
async fn test_book_actions_survive_provider_outage() {
    let down = Arc::new(ScriptedProvider::new("primary").always_failing(
        ProviderError::ApiError {
            provider: "primary".into(),
            status: 503,
            message: "overloaded".into(),
        },
    ));
    let backup = Arc::new(ScriptedProvider::new("backup"));

    let mut providers = ProviderRegistry::new();
    providers.register(down.clone());
    providers.register(backup.clone());

    let monitor = Arc::new(PerformanceMonitor::new(100, Duration::from_secs(60)));
    let gateway = Arc::new(
        ProviderGateway::new(Arc::new(providers))
            .with_retry(RetryPolicy {
                max_retries: 1,
                min_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                attempt_timeout: None,
            })
            .with_metrics(monitor.clone()),
    );

    let mut agent = Agent::builder()
        .registry(Arc::new(book::registry(gateway, &BookOptions::default()).unwrap()))
        .initial_state(book::initial_state())
        .metrics(monitor.clone())
        .build()
        .unwrap();

    let outcome = agent
        .execute(Task::new("draft", book_context("Ferris", "Rust", "plain")))
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.state.get(OUTLINE_READY), Some(&StateValue::Bool(true)));
    assert_eq!(outcome.state.get(DRAFT_COMPLETE), Some(&StateValue::Bool(true)));
    assert!(outcome
        .payload
        .as_ref()
        .and_then(Value::as_str)
        .unwrap()
        .starts_with("[backup]"));

    // Two actions, two attempts each on the failing provider
    assert_eq!(down.calls(), 4);
    assert_eq!(backup.calls(), 2);
    assert_eq!(monitor.summary("action.WriteDraft").unwrap().count, 1);
}

#[tokio::test]
async fn test_gateway_failure_surfaces_as_action_failure() {
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(ScriptedProvider::new("only").always_failing(
        ProviderError::AuthenticationFailed {
            provider: "only".into(),
            message: "bad key".into(),
        },
    )));
    let gateway = Arc::new(ProviderGateway::new(Arc::new(providers)));

    let (handler, mut rx) = ChannelEventHandler::new();
    let mut agent = Agent::builder()
        .registry(Arc::new(book::registry(gateway, &BookOptions::default()).unwrap()))
        .initial_state(book::initial_state())
        .event_handler(Arc::new(handler))
        .build()
        .unwrap();

    let err = agent
        .execute(Task::new("draft", book_context("T", "x", "plain")))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "ACTION_FAILED");
    assert!(err.to_string().contains("All providers failed"));
    assert!(matches!(
        collect(&mut rx).last(),
        Some(AgentEvent::TaskFailed { code: "ACTION_FAILED", .. })
    ));
    assert_eq!(agent.world_state().get(OUTLINE_READY), Some(&StateValue::Bool(false)));
}

#[tokio::test]
async fn test_handlers_see_prior_results() {
    let registry = Registry::new()
        .with_goal(Goal::new("g").require("b", true))
        .with_action(
            Action::new(
                "A",
                bookwright_agent::handler_fn(|_| async { Ok(ActionOutput::with_payload(41)) }),
            )
            .sets("a", true),
        )
        .and_then(|r| {
            r.with_action(
                Action::new(
                    "B",
                    bookwright_agent::handler_fn(|ctx| async move {
                        let prev = ctx.previous_payload().and_then(Value::as_i64).unwrap_or(0);
                        Ok(ActionOutput::with_payload(prev + 1))
                    }),
                )
                .requires("a", true)
                .sets("b", true),
            )
        })
        .unwrap();

    let mut agent = Agent::builder().registry(Arc::new(registry)).build().unwrap();
    let outcome = agent.execute(Task::new("g", Value::Null)).await.unwrap();
    assert_eq!(outcome.payload, Some(Value::from(42)));
}
