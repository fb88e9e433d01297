//! Canned provider behind `--offline`.

use std::sync::Arc;

use bookwright_providers::{CompletionRequest, ProviderRegistry, ResponseFormat, ScriptedProvider};
use serde_json::json;

pub const PROVIDER_ID: &str = "scripted";

/// Registry holding only the scripted provider.
pub fn registry() -> ProviderRegistry {
    let provider = ScriptedProvider::new(PROVIDER_ID).with_responder(|request| Ok(reply(request)));
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(provider));
    registry.set_fallback_order(&[PROVIDER_ID]);
    registry
}

fn reply(request: &CompletionRequest) -> String {
    if let Some(ResponseFormat::JsonSchema { .. }) = request.response_format {
        return json!({
            "title": "Offline Draft",
            "chapters": [
                { "title": "Getting Started", "summary": "Why the topic matters." },
                { "title": "Going Deeper", "summary": "The core ideas, one at a time." },
                { "title": "Wrapping Up", "summary": "What to try next." }
            ]
        })
        .to_string();
    }

    let first_line = request.prompt().lines().next().unwrap_or_default();
    format!("(offline) {}", first_line)
}
