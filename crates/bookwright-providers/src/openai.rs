//! OpenAI (GPT) provider implementation.

use async_trait::async_trait;
use bookwright_core::{Message, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::sse::{chunk_stream, SseEvent};
use crate::traits::{
    transport_error, ChunkStream, CompletionRequest, CompletionResponse, FinishReason, ModelInfo,
    Provider, ProviderResult, ResponseFormat, StreamChunk, Usage,
};

/// Default OpenAI API base URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// OpenAI provider for GPT models.
///
/// Also used for OpenAI-compatible endpoints through [`with_base_url`].
///
/// [`with_base_url`]: OpenAIProvider::with_base_url
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    id: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            default_model: "gpt-4o".to_string(),
            id: "openai".to_string(),
        }
    }

    /// Create from environment variable.
    pub fn from_env() -> Option<Self> {
        std::env::var("OPENAI_API_KEY").ok().map(Self::new)
    }

    /// Set a custom base URL (for OpenRouter, Azure, Ollama, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Report errors and metrics under a different provider id.
    pub(crate) fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OpenAIRequest {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(convert_message));

        let response_format = match request.response_format {
            Some(ResponseFormat::JsonSchema {
                ref name,
                ref schema,
            }) => Some(OpenAIResponseFormat::JsonSchema {
                json_schema: OpenAIJsonSchema {
                    name: sanitize_schema_name(name),
                    schema: schema.clone(),
                    strict: false,
                },
            }),
            _ => None,
        };

        OpenAIRequest {
            model,
            messages,
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            response_format,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn send(&self, body: &OpenAIRequest) -> ProviderResult<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&self.id, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("{} API error: {} - {}", self.id, status, error_text);
            return Err(ProviderError::from_model_status(
                self.id.clone(),
                status.as_u16(),
                body.model.as_str(),
                error_text,
            ));
        }

        Ok(response)
    }

    fn parse_response(&self, response: OpenAIResponse) -> ProviderResult<CompletionResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: self.id.clone(),
                message: "response contained no choices".to_string(),
            })?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProviderError::ContentFiltered {
                provider: self.id.clone(),
                reason: None,
            });
        }

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: response.model,
            finish_reason: FinishReason::from_openai(choice.finish_reason.as_deref()),
            usage: response.usage.map(Usage::from).unwrap_or_default(),
        })
    }
}

fn convert_message(message: &Message) -> OpenAIMessage {
    OpenAIMessage {
        role: message.role.as_str().to_string(),
        content: message.content.clone(),
    }
}

/// OpenAI requires `^[a-zA-Z0-9_-]{1,64}$` for schema names.
fn sanitize_schema_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "response".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        [
            ("gpt-4o", "GPT-4o", 128_000, 16_384),
            ("gpt-4o-mini", "GPT-4o Mini", 128_000, 16_384),
            ("gpt-4.1", "GPT-4.1", 1_047_576, 32_768),
            ("gpt-4.1-mini", "GPT-4.1 Mini", 1_047_576, 32_768),
        ]
        .into_iter()
        .map(|(id, name, context_window, max_output_tokens)| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            provider: self.id.clone(),
            context_window,
            max_output_tokens,
            supports_streaming: true,
            supports_structured_output: true,
        })
        .collect()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[instrument(skip(self, request), fields(provider = %self.id, model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> ProviderResult<CompletionResponse> {
        let body = self.build_request(&request, false);
        debug!("Sending request to {} API", self.id);

        let response = self.send(&body).await?;
        let api_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| transport_error(&self.id, e))?;
        self.parse_response(api_response)
    }

    #[instrument(skip(self, request), fields(provider = %self.id, model = %request.model))]
    async fn complete_stream(&self, request: CompletionRequest) -> ProviderResult<ChunkStream> {
        let body = self.build_request(&request, true);
        debug!("Sending streaming request to {} API", self.id);

        let response = self.send(&body).await?;
        let provider = self.id.clone();
        Ok(chunk_stream(
            &self.id,
            response.bytes_stream(),
            move |event| parse_stream_event(&provider, event),
        ))
    }
}

/// Map one streamed chat-completion chunk.
///
/// Finish reasons are not final: the usage chunk and `[DONE]` follow them.
fn parse_stream_event(provider: &str, event: &SseEvent) -> ProviderResult<Option<StreamChunk>> {
    let chunk: StreamChunkResponse = match serde_json::from_str(&event.data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Failed to parse {} stream event: {}", provider, e);
            return Ok(None);
        }
    };

    if let Some(err) = chunk.error {
        return Err(ProviderError::StreamError {
            provider: provider.to_string(),
            message: err.message,
        });
    }

    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|text| !text.is_empty());

    match (delta, chunk.usage) {
        (Some(text), usage) => Ok(Some(StreamChunk {
            delta: Some(text),
            is_final: false,
            usage: usage.map(Usage::from),
        })),
        (None, Some(usage)) => Ok(Some(StreamChunk::usage(usage.into()))),
        (None, None) => Ok(None),
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAIResponseFormat>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIResponseFormat {
    JsonSchema { json_schema: OpenAIJsonSchema },
}

#[derive(Debug, Serialize)]
struct OpenAIJsonSchema {
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    cached_tokens: u32,
}

impl From<OpenAIUsage> for Usage {
    fn from(u: OpenAIUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cached_tokens: u.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
        }
    }
}

// Streaming types

#[derive(Debug, Deserialize)]
struct StreamChunkResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<OpenAIUsage>,
    error: Option<StreamErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_provider_metadata() {
        let provider = OpenAIProvider::new("test-key");
        assert_eq!(provider.id(), "openai");
        assert_eq!(provider.name(), "OpenAI");
        assert!(provider.is_configured());
        assert!(provider.available_models().iter().any(|m| m.id == "gpt-4o"));
        assert_eq!(provider.resolve_model(None).unwrap(), "gpt-4o");
        assert_eq!(provider.resolve_model(Some("gpt-4o-mini")).unwrap(), "gpt-4o-mini");
    }

    #[test]
    fn test_foreign_model_is_rejected() {
        let provider = OpenAIProvider::new("test-key");
        assert!(matches!(
            provider.resolve_model(Some("claude-sonnet-4-20250514")),
            Err(ProviderError::ModelNotFound { ref provider, .. }) if provider == "openai"
        ));
    }

    #[tokio::test]
    async fn test_missing_model_reply_is_model_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {
                    "message": "The model `gpt-9` does not exist",
                    "code": "model_not_found"
                }
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("test-key").with_base_url(server.uri());
        let err = provider
            .complete(CompletionRequest::from_prompt("hi").with_model("gpt-9"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProviderError::ModelNotFound { ref model, .. } if model == "gpt-9"
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unconfigured_provider_cannot_resolve_model() {
        let provider = OpenAIProvider::new("");
        assert!(matches!(
            provider.resolve_model(None),
            Err(ProviderError::NotConfigured { .. })
        ));
    }

    #[test]
    fn test_schema_name_sanitized() {
        assert_eq!(sanitize_schema_name("book::Outline"), "book__Outline");
        assert_eq!(sanitize_schema_name(""), "response");
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4o-mini",
                "choices": [{"message": {"content": "Chapter One"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 9, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("test-key").with_base_url(server.uri());
        let response = provider
            .complete(CompletionRequest::from_prompt("Title?").with_model("gpt-4o-mini"))
            .await
            .unwrap();

        assert_eq!(response.content, "Chapter One");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.total(), 12);
    }

    #[tokio::test]
    async fn test_status_codes_map_to_error_classes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("test-key").with_base_url(server.uri());

        let throttled = provider
            .complete(CompletionRequest::from_prompt("hi"))
            .await
            .unwrap_err();
        assert!(throttled.is_retryable());

        let denied = provider
            .complete(CompletionRequest::from_prompt("hi"))
            .await
            .unwrap_err();
        assert!(matches!(denied, ProviderError::AuthenticationFailed { .. }));
        assert!(!denied.is_retryable());
    }

    #[tokio::test]
    async fn test_response_format_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "response_format": {"type": "json_schema", "json_schema": {"name": "Outline"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "{}"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("k").with_base_url(server.uri());
        let request = CompletionRequest::from_prompt("outline").with_response_format(
            ResponseFormat::JsonSchema {
                name: "Outline".to_string(),
                schema: json!({"type": "object"}),
            },
        );
        assert_eq!(provider.complete(request).await.unwrap().content, "{}");
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_then_final_chunk() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Once \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"upon\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("k").with_base_url(server.uri());
        let chunks: Vec<StreamChunk> = provider
            .complete_stream(CompletionRequest::from_prompt("story"))
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        let text: String = chunks.iter().filter_map(|c| c.delta.clone()).collect();
        assert_eq!(text, "Once upon");
        assert_eq!(chunks[2].usage.map(|u| u.total()), Some(6));
        assert!(chunks.last().unwrap().is_final);
    }
}
