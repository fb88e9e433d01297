//! Anthropic (Claude) provider implementation.

use async_trait::async_trait;
use bookwright_core::{Message, ProviderError, Role};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::sse::{chunk_stream, SseEvent};
use crate::traits::{
    transport_error, ChunkStream, CompletionRequest, CompletionResponse, FinishReason, ModelInfo,
    Provider, ProviderResult, ResponseFormat, StreamChunk, Usage,
};

/// Anthropic API base URL.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";

/// Current Anthropic API version.
const ANTHROPIC_VERSION: &str = "2023-06-01";

const PROVIDER_ID: &str = "anthropic";

/// Anthropic provider for Claude models.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            default_model: "claude-sonnet-4-20250514".to_string(),
        }
    }

    /// Create from environment variable.
    pub fn from_env() -> Option<Self> {
        std::env::var("ANTHROPIC_API_KEY").ok().map(Self::new)
    }

    /// Set a custom base URL (proxies, gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Convert messages to Anthropic format; system messages travel separately.
    fn format_messages(&self, messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    /// Build the system prompt, folding in any schema instructions.
    ///
    /// The messages API has no JSON schema response format, so structured
    /// requests are steered through the system prompt instead.
    fn system_prompt(&self, request: &CompletionRequest) -> Option<String> {
        let base = request.system.clone().or_else(|| {
            request
                .messages
                .iter()
                .find(|m| m.role == Role::System)
                .map(|m| m.content.clone())
        });

        match request.response_format {
            Some(ResponseFormat::JsonSchema { ref schema, .. }) => {
                let instructions = format!(
                    "Respond with a single JSON value that validates against this JSON schema. \
                     Do not add commentary.\n{}",
                    schema
                );
                Some(match base {
                    Some(base) => format!("{}\n\n{}", base, instructions),
                    None => instructions,
                })
            }
            _ => base,
        }
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        AnthropicRequest {
            model,
            messages: self.format_messages(&request.messages),
            system: self.system_prompt(request),
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
            stream,
        }
    }

    async fn send(&self, body: &AnthropicRequest) -> ProviderResult<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Anthropic API error: {} - {}", status, error_text);
            // 529 is Anthropic's "overloaded"; treat it like any other 5xx
            return Err(ProviderError::from_model_status(
                PROVIDER_ID,
                status.as_u16(),
                body.model.as_str(),
                error_text,
            ));
        }

        Ok(response)
    }

    fn parse_response(&self, response: AnthropicResponse) -> ProviderResult<CompletionResponse> {
        let content: String = response
            .content
            .iter()
            .filter_map(|block| match block {
                AnthropicContent::Text { text } => Some(text.as_str()),
                AnthropicContent::Other => None,
            })
            .collect();

        let finish_reason = match response.stop_reason.as_deref() {
            Some("max_tokens") => FinishReason::MaxTokens,
            Some("refusal") => {
                return Err(ProviderError::ContentFiltered {
                    provider: PROVIDER_ID.to_string(),
                    reason: Some("model refused the request".to_string()),
                })
            }
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            model: response.model,
            finish_reason,
            usage: Usage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
                cached_tokens: response.usage.cache_read_input_tokens.unwrap_or(0),
            },
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        [
            ("claude-opus-4-20250514", "Claude Opus 4", 32_000),
            ("claude-sonnet-4-20250514", "Claude Sonnet 4", 64_000),
            ("claude-3-5-haiku-20241022", "Claude 3.5 Haiku", 8_192),
        ]
        .into_iter()
        .map(|(id, name, max_output_tokens)| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            provider: PROVIDER_ID.to_string(),
            context_window: 200_000,
            max_output_tokens,
            supports_streaming: true,
            supports_structured_output: false,
        })
        .collect()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> ProviderResult<CompletionResponse> {
        let body = self.build_request(&request, false);
        debug!("Sending request to Anthropic API");

        let response = self.send(&body).await?;
        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;
        self.parse_response(api_response)
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete_stream(&self, request: CompletionRequest) -> ProviderResult<ChunkStream> {
        let body = self.build_request(&request, true);
        debug!("Sending streaming request to Anthropic API");

        let response = self.send(&body).await?;
        Ok(chunk_stream(PROVIDER_ID, response.bytes_stream(), parse_stream_event))
    }
}

fn parse_stream_event(event: &SseEvent) -> ProviderResult<Option<StreamChunk>> {
    let parsed: StreamEvent = match serde_json::from_str(&event.data) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Failed to parse Anthropic stream event: {}", e);
            return Ok(None);
        }
    };

    Ok(match parsed {
        StreamEvent::MessageStart { message } => Some(StreamChunk::usage(Usage {
            input_tokens: message.usage.input_tokens,
            output_tokens: message.usage.output_tokens,
            cached_tokens: message.usage.cache_read_input_tokens.unwrap_or(0),
        })),
        StreamEvent::ContentBlockDelta { delta } => delta
            .text
            .filter(|t| !t.is_empty())
            .map(StreamChunk::text),
        StreamEvent::MessageDelta { usage } => usage.map(|u| {
            StreamChunk::usage(Usage {
                output_tokens: u.output_tokens,
                ..Default::default()
            })
        }),
        StreamEvent::MessageStop => Some(StreamChunk::finished()),
        StreamEvent::Error { error } => {
            return Err(ProviderError::StreamError {
                provider: PROVIDER_ID.to_string(),
                message: error.message,
            })
        }
        StreamEvent::Other => None,
    })
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    cache_read_input_tokens: Option<u32>,
}

// Streaming event types

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart { message: StreamMessage },
    ContentBlockDelta { delta: ContentDelta },
    MessageDelta { usage: Option<DeltaUsage> },
    MessageStop,
    Error { error: StreamErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentDelta {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    message: String,
}
