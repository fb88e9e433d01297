//! eBook actions and goals built on the provider gateway.
//!
//! Three actions take a book from nothing to a reviewed draft:
//!
//! | Action         | Requires              | Sets                  | Cost |
//! |----------------|-----------------------|-----------------------|------|
//! | `DraftOutline` | `outlineReady=false`  | `outlineReady=true`   | 1    |
//! | `WriteDraft`   | `outlineReady=true`   | `draftComplete=true`  | 2    |
//! | `ReviewDraft`  | `draftComplete=true`  | `reviewed=true`       | 1    |

use std::sync::Arc;

use async_trait::async_trait;
use bookwright_core::{fragment, Result, StateValue, WorldState};
use bookwright_providers::{GenerateOptions, ProviderGateway};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::action::{Action, ActionContext, ActionHandler, ActionOutput};
use crate::goal::Goal;
use crate::registry::Registry;

pub const OUTLINE_READY: &str = "outlineReady";
pub const DRAFT_COMPLETE: &str = "draftComplete";
pub const REVIEWED: &str = "reviewed";

const OUTLINE_PROMPT: &str = "You are planning an eBook titled \"{title}\" about {topic}. \
Write a numbered chapter outline with a one-sentence summary per chapter.";

const DRAFT_PROMPT: &str = "Write the first draft of the eBook \"{title}\" in a {tone} tone, \
following this outline:\n\n{previous}";

const REVIEW_PROMPT: &str = "Review the following eBook draft. List the five most important \
improvements, most important first.\n\n{previous}";

/// Chapter entry of a structured outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChapterOutline {
    pub title: String,
    pub summary: String,
}

/// Structured outline produced through `generate_object`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BookOutline {
    pub title: String,
    pub chapters: Vec<ChapterOutline>,
}

/// Fill `{key}` placeholders from the task context, then the world state.
///
/// `{previous}` is the payload of the last action that produced one. Unknown
/// placeholders are left as written.
pub fn render_prompt(template: &str, ctx: &ActionContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = &after[..close];
        match lookup(key, ctx) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn lookup(key: &str, ctx: &ActionContext) -> Option<String> {
    if key == "previous" {
        return ctx.previous_payload().map(value_text);
    }
    if let Some(value) = ctx.context.get(key) {
        return Some(value_text(value));
    }
    ctx.state.get(key).map(|value| match value {
        StateValue::Text(s) => s.clone(),
        other => other.to_string(),
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Renders a prompt template and sends it through the gateway.
///
/// The generated text becomes the action's payload; the action's declared
/// effects are applied on success.
pub struct PromptAction {
    gateway: Arc<ProviderGateway>,
    template: String,
    options: GenerateOptions,
}

impl PromptAction {
    pub fn new(gateway: Arc<ProviderGateway>, template: impl Into<String>) -> Self {
        Self {
            gateway,
            template: template.into(),
            options: GenerateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl ActionHandler for PromptAction {
    async fn run(&self, ctx: ActionContext) -> Result<ActionOutput> {
        let prompt = render_prompt(&self.template, &ctx);
        let generation = self.gateway.generate_text(&prompt, &self.options).await?;
        debug!(
            provider = %generation.provider,
            cached = generation.cached,
            characters = generation.text.len(),
            "Generated text"
        );
        Ok(ActionOutput::with_payload(generation.text))
    }
}

/// Generates a [`BookOutline`] and records the chapter count in the state.
pub struct StructuredOutlineAction {
    gateway: Arc<ProviderGateway>,
    options: GenerateOptions,
}

impl StructuredOutlineAction {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self {
            gateway,
            options: GenerateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl ActionHandler for StructuredOutlineAction {
    async fn run(&self, ctx: ActionContext) -> Result<ActionOutput> {
        let prompt = format!(
            "{}\nRespond with JSON matching the provided schema.",
            render_prompt(OUTLINE_PROMPT, &ctx)
        );
        let generated = self
            .gateway
            .generate_object::<BookOutline>(&prompt, &self.options)
            .await?;
        let chapters = generated.value.chapters.len() as u32;

        Ok(ActionOutput::with_payload(serde_json::to_value(&generated.value)?).with_state(
            fragment([
                (OUTLINE_READY, StateValue::from(true)),
                ("chapterCount", StateValue::from(chapters)),
            ]),
        ))
    }
}

/// Starting facts for a new book.
pub fn initial_state() -> WorldState {
    WorldState::from_pairs([
        (OUTLINE_READY, false),
        (DRAFT_COMPLETE, false),
        (REVIEWED, false),
    ])
}

/// How the book actions call the gateway.
#[derive(Debug, Clone, Default)]
pub struct BookOptions {
    /// Ask for a typed [`BookOutline`] instead of free text
    pub structured_outline: bool,
    /// Provider, model and sampling overrides for every action
    pub generate: GenerateOptions,
}

/// Goals and actions for writing a book.
///
/// Registers the goals `draft` and `review`.
pub fn registry(gateway: Arc<ProviderGateway>, options: &BookOptions) -> Result<Registry> {
    let prompt = |template: &str| -> Arc<dyn ActionHandler> {
        Arc::new(
            PromptAction::new(gateway.clone(), template).with_options(options.generate.clone()),
        )
    };
    let outline: Arc<dyn ActionHandler> = if options.structured_outline {
        Arc::new(
            StructuredOutlineAction::new(gateway.clone()).with_options(options.generate.clone()),
        )
    } else {
        prompt(OUTLINE_PROMPT)
    };

    Registry::new()
        .with_goal(Goal::new("draft").with_priority(1).require(DRAFT_COMPLETE, true))
        .with_goal(Goal::new("review").with_priority(2).require(REVIEWED, true))
        .with_action(
            Action::new("DraftOutline", outline)
                .with_cost(1.0)
                .requires(OUTLINE_READY, false)
                .sets(OUTLINE_READY, true),
        )?
        .with_action(
            Action::new("WriteDraft", prompt(DRAFT_PROMPT))
                .with_cost(2.0)
                .requires(OUTLINE_READY, true)
                .sets(DRAFT_COMPLETE, true),
        )?
        .with_action(
            Action::new("ReviewDraft", prompt(REVIEW_PROMPT))
                .with_cost(1.0)
                .requires(DRAFT_COMPLETE, true)
                .sets(REVIEWED, true),
        )
}

/// Default task context for a book.
pub fn book_context(title: &str, topic: &str, tone: &str) -> Value {
    json!({ "title": title, "topic": topic, "tone": tone })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionResult;
    use crate::agent::{Agent, Task};
    use bookwright_providers::{ProviderRegistry, ResponseFormat, ScriptedProvider};
    use std::time::Duration;

    fn gateway_with(provider: ScriptedProvider) -> (Arc<ProviderGateway>, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        (Arc::new(ProviderGateway::new(Arc::new(registry))), provider)
    }

    #[test]
    fn test_render_prompt_sources() {
        let mut ctx = ActionContext::new(
            "draft",
            WorldState::from_pairs([("tone", "dry"), ("chapters", "ignored")]),
            json!({ "title": "Ferris", "chapters": 3 }),
        );
        ctx.results.push(ActionResult::succeeded(
            "DraftOutline",
            ActionOutput::with_payload("1. Intro"),
            Duration::ZERO,
        ));

        let rendered = render_prompt("{title}/{tone}/{chapters}/{previous}/{missing}/{", &ctx);
        assert_eq!(rendered, "Ferris/dry/3/1. Intro/{missing}/{");
    }

    #[tokio::test]
    async fn test_review_goal_runs_all_three_actions() {
        let (gateway, provider) = gateway_with(ScriptedProvider::new("scripted"));
        let registry = registry(gateway, &BookOptions::default()).unwrap();

        let mut agent = Agent::builder()
            .registry(Arc::new(registry))
            .initial_state(initial_state())
            .build()
            .unwrap();

        let outcome = agent
            .execute(Task::new("review", book_context("Ferris", "Rust", "warm")))
            .await
            .unwrap();

        assert_eq!(
            outcome.plan.actions,
            vec!["DraftOutline", "WriteDraft", "ReviewDraft"]
        );
        assert_eq!(outcome.state.get(REVIEWED), Some(&StateValue::Bool(true)));

        let prompts: Vec<String> = provider
            .requests()
            .iter()
            .map(|r| r.prompt().to_string())
            .collect();
        assert!(prompts[0].contains("\"Ferris\" about Rust"));
        // The draft prompt embeds the outline reply
        assert!(prompts[1].contains(&prompts[0]));
    }

    #[tokio::test]
    async fn test_structured_outline_sets_chapter_count() {
        let (gateway, provider) = gateway_with(ScriptedProvider::new("scripted").with_reply(
            r#"{"title":"Ferris","chapters":[{"title":"One","summary":"a"},{"title":"Two","summary":"b"}]}"#,
        ));
        let options = BookOptions {
            structured_outline: true,
            ..Default::default()
        };
        let registry = registry(gateway, &options).unwrap();

        let mut agent = Agent::builder()
            .registry(Arc::new(registry))
            .initial_state(initial_state())
            .build()
            .unwrap();
        let outcome = agent
            .execute(Task::new("draft", book_context("Ferris", "Rust", "warm")))
            .await
            .unwrap();

        assert_eq!(outcome.state.get("chapterCount"), Some(&StateValue::Number(2.0)));
        assert!(matches!(
            provider.requests()[0].response_format,
            Some(ResponseFormat::JsonSchema { .. })
        ));
    }
}
