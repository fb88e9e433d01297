//! Provider trait definitions.

use std::pin::Pin;

use async_trait::async_trait;
use bookwright_core::{Message, ProviderError};
use futures::Stream;
use serde::{Deserialize, Serialize};

/// Result type at the provider RPC boundary.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Lazy sequence of completion increments.
pub type ChunkStream = Pin<Box<dyn Stream<Item = ProviderResult<StreamChunk>> + Send>>;

/// Model information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Provider name
    pub provider: String,
    /// Context window size in tokens
    pub context_window: u32,
    /// Maximum output tokens
    pub max_output_tokens: u32,
    /// Supports streaming
    pub supports_streaming: bool,
    /// Honors a JSON schema response format
    pub supports_structured_output: bool,
}

/// Requested shape of the completion body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free text
    Text,
    /// JSON matching `schema`
    JsonSchema {
        name: String,
        schema: serde_json::Value,
    },
}

/// Request for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use (empty means the provider default)
    pub model: String,
    /// Messages in the conversation
    pub messages: Vec<Message>,
    /// System prompt
    pub system: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Expected response format
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
}

impl CompletionRequest {
    /// A single-turn request for `prompt` with default sampling settings.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            model: String::new(),
            messages: vec![Message::user(prompt)],
            system: None,
            max_tokens: 4096,
            temperature: 0.7,
            response_format: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Text of the last user message.
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == bookwright_core::Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Response from a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response content
    pub content: String,
    /// Model that produced the response
    pub model: String,
    /// Finish reason
    pub finish_reason: FinishReason,
    /// Usage statistics
    pub usage: Usage,
}

/// Reason the completion finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Normal completion
    Stop,
    /// Hit max tokens limit
    MaxTokens,
    /// Content was filtered
    ContentFilter,
}

impl FinishReason {
    pub(crate) fn from_openai(reason: Option<&str>) -> Self {
        match reason {
            Some("length") => FinishReason::MaxTokens,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens used
    pub input_tokens: u32,
    /// Output tokens generated
    pub output_tokens: u32,
    /// Cached tokens (if applicable)
    pub cached_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Fold another partial usage report into this one.
    pub fn absorb(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
        self.cached_tokens = self.cached_tokens.max(other.cached_tokens);
    }
}

/// Streaming chunk from a completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Content delta
    pub delta: Option<String>,
    /// Whether this is the final chunk
    pub is_final: bool,
    /// Usage, when the provider reports it
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            ..Default::default()
        }
    }

    pub fn usage(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..Default::default()
        }
    }

    pub fn finished() -> Self {
        Self {
            is_final: true,
            ..Default::default()
        }
    }
}

/// Core provider trait - all generation backends implement this.
///
/// Errors are classified by [`ProviderError::is_retryable`]; the gateway
/// retries transient failures and moves on after permanent ones.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Model used when a request names none.
    fn default_model(&self) -> &str;

    /// Get available models for this provider.
    fn available_models(&self) -> Vec<ModelInfo>;

    /// Check if provider is configured and ready.
    fn is_configured(&self) -> bool;

    /// Pick the concrete model for a request.
    ///
    /// Fails when the provider is not configured or when the model belongs
    /// to another provider's family (see [`model_family`]). Providers with a
    /// closed model catalogue override this to reject unknown names.
    fn resolve_model(&self, requested: Option<&str>) -> ProviderResult<String> {
        if !self.is_configured() {
            return Err(ProviderError::not_configured(self.id()));
        }
        let model = match requested {
            Some(model) if !model.is_empty() => model,
            _ => return Ok(self.default_model().to_string()),
        };
        match model_family(model) {
            Some(family) if family != self.id() => Err(ProviderError::ModelNotFound {
                provider: self.id().to_string(),
                model: model.to_string(),
            }),
            _ => Ok(model.to_string()),
        }
    }

    /// Generate a completion (non-streaming).
    async fn complete(&self, request: CompletionRequest) -> ProviderResult<CompletionResponse>;

    /// Generate a completion (streaming).
    async fn complete_stream(&self, request: CompletionRequest) -> ProviderResult<ChunkStream>;
}

/// Provider id that owns a model name, for the families only one vendor serves.
///
/// Returns `None` for names any OpenAI-compatible or local server might host.
pub fn model_family(model: &str) -> Option<&'static str> {
    let model = model.to_ascii_lowercase();
    let openai_reasoning = ["o1", "o3", "o4"]
        .iter()
        .any(|series| model == *series || model.starts_with(&format!("{}-", series)));

    if model.starts_with("claude") {
        Some("anthropic")
    } else if (model.starts_with("gpt-") && !model.starts_with("gpt-oss"))
        || model.starts_with("chatgpt-")
        || openai_reasoning
    {
        Some("openai")
    } else {
        None
    }
}

/// Map a transport failure from reqwest onto the provider error taxonomy.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider: provider.to_string(),
            elapsed_ms: 0,
        }
    } else if err.is_decode() {
        ProviderError::InvalidResponse {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    } else {
        ProviderError::NetworkError {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::from_prompt("Write an outline")
            .with_model("gpt-4o-mini")
            .with_system("You are an editor")
            .with_temperature(0.2)
            .with_max_tokens(256);

        assert_eq!(request.prompt(), "Write an outline");
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.system.as_deref(), Some("You are an editor"));
        assert_eq!(request.max_tokens, 256);
        assert!(request.response_format.is_none());
    }

    #[test]
    fn test_model_family() {
        assert_eq!(model_family("claude-sonnet-4-20250514"), Some("anthropic"));
        assert_eq!(model_family("gpt-4o-mini"), Some("openai"));
        assert_eq!(model_family("o3-mini"), Some("openai"));
        assert_eq!(model_family("gpt-oss:20b"), None);
        assert_eq!(model_family("llama3.2"), None);
        assert_eq!(model_family("o3ish"), None);
    }

    #[test]
    fn test_usage_absorb_keeps_largest_counts() {
        let mut usage = Usage {
            input_tokens: 12,
            ..Default::default()
        };
        usage.absorb(&Usage {
            input_tokens: 0,
            output_tokens: 40,
            cached_tokens: 0,
        });
        assert_eq!(usage.total(), 52);
    }
}
