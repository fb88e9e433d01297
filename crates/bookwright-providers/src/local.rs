//! Local model provider (Ollama).
//!
//! Ollama serves an OpenAI-compatible API, so requests go through an inner
//! [`OpenAIProvider`] pointed at the local server.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::openai::OpenAIProvider;
use crate::traits::{
    transport_error, ChunkStream, CompletionRequest, CompletionResponse, ModelInfo, Provider,
    ProviderResult,
};

/// Default Ollama API URL.
const OLLAMA_API_URL: &str = "http://localhost:11434/v1";

const DEFAULT_LOCAL_MODEL: &str = "llama3.2";

/// Local provider for Ollama models.
pub struct LocalProvider {
    inner: OpenAIProvider,
    client: Client,
    base_url: String,
}

impl LocalProvider {
    /// Create a new local provider connecting to Ollama.
    pub fn new() -> Self {
        Self::with_url(OLLAMA_API_URL)
    }

    /// Create with a custom Ollama URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        let base_url = url.into();
        Self {
            inner: Self::inner_provider(&base_url, DEFAULT_LOCAL_MODEL),
            client: Client::new(),
            base_url,
        }
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.inner = Self::inner_provider(&self.base_url, &model.into());
        self
    }

    // Ollama ignores the key, but the OpenAI adapter treats empty as unconfigured
    fn inner_provider(base_url: &str, model: &str) -> OpenAIProvider {
        OpenAIProvider::new("ollama")
            .with_base_url(base_url)
            .with_default_model(model)
            .with_id("local")
    }

    fn api_root(&self) -> &str {
        self.base_url.trim_end_matches('/').trim_end_matches("/v1")
    }

    /// Check if Ollama is running.
    pub async fn is_running(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.api_root()))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// List models installed in Ollama.
    pub async fn list_models(&self) -> ProviderResult<Vec<OllamaModel>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.api_root()))
            .send()
            .await
            .map_err(|e| transport_error("local", e))?;

        if !response.status().is_success() {
            return Err(bookwright_core::ProviderError::from_status(
                "local",
                response.status().as_u16(),
                "failed to list Ollama models",
            ));
        }

        let tags: OllamaTags = response
            .json()
            .await
            .map_err(|e| transport_error("local", e))?;
        Ok(tags.models)
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn id(&self) -> &str {
        "local"
    }

    fn name(&self) -> &str {
        "Local (Ollama)"
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        // Common pulls; the installed set comes from list_models()
        [
            ("llama3.2", "Llama 3.2", 128_000),
            ("mistral", "Mistral", 32_000),
            ("qwen2.5", "Qwen 2.5", 32_000),
        ]
        .into_iter()
        .map(|(id, name, context_window)| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            provider: "local".to_string(),
            context_window,
            max_output_tokens: 4_096,
            supports_streaming: true,
            supports_structured_output: true,
        })
        .collect()
    }

    fn is_configured(&self) -> bool {
        // Reachability is checked separately by is_running()
        true
    }

    async fn complete(&self, request: CompletionRequest) -> ProviderResult<CompletionResponse> {
        debug!("Sending request to Ollama");
        self.inner.complete(request).await
    }

    async fn complete_stream(&self, request: CompletionRequest) -> ProviderResult<ChunkStream> {
        debug!("Sending streaming request to Ollama");
        self.inner.complete_stream(request).await
    }
}

// Ollama-specific types

#[derive(Debug, Deserialize)]
struct OllamaTags {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub size: u64,
}
