//! Provider gateway: caching, retry and fallback in front of the providers.
//!
//! Actions never talk to a [`Provider`] directly. They call the gateway,
//! which checks the [`ResponseCache`], then walks the candidate providers
//! in order, retrying transient failures with backoff before moving on.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bookwright_core::config::Config;
use bookwright_core::{GatewayError, ProviderAttempt, ProviderError};
use bookwright_metrics::{timed, MetricsRecorder, NoopRecorder};
use futures::{future, stream, Stream, StreamExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheKey, CacheStats, ResponseCache};
use crate::registry::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::traits::{
    model_family, ChunkStream, CompletionRequest, Provider, ProviderResult, ResponseFormat, Usage,
};

/// Per-call overrides. Unset fields fall back to the gateway defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Use only this provider instead of the fallback order
    pub provider: Option<String>,
    /// Model override
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system: Option<String>,
    /// Skip the response cache for this call
    pub bypass_cache: bool,
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Gateway-wide defaults.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub cache_enabled: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub cache_key_prompt_chars: usize,
    /// Deadline for each health check request
    pub health_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            temperature: 0.7,
            max_tokens: 4096,
            cache_key_prompt_chars: 200,
            health_timeout: Duration::from_secs(15),
        }
    }
}

/// What the cache stores for a successful call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
}

/// Result of [`ProviderGateway::generate_text`].
#[derive(Debug, Clone)]
pub struct TextGeneration {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
    /// Served from the cache without calling a provider
    pub cached: bool,
    /// Providers that failed before the one that answered
    pub failed_attempts: Vec<ProviderAttempt>,
}

/// Result of [`ProviderGateway::generate_object`].
#[derive(Debug, Clone)]
pub struct ObjectGeneration<T> {
    pub value: T,
    pub raw: String,
    pub provider: String,
    pub model: String,
    pub cached: bool,
}

/// One item of a [`TextStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Next piece of text
    Delta(String),
    /// Terminal marker, emitted exactly once
    Done { usage: Usage, characters: usize },
}

/// Lazy, finite, non-restartable text stream.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GatewayError>> + Send>>;

/// Availability of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub model: Option<String>,
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Multi-provider generation with cache, retry and fallback.
pub struct ProviderGateway {
    registry: Arc<ProviderRegistry>,
    cache: Arc<ResponseCache<CachedResponse>>,
    retry: RetryPolicy,
    settings: GatewaySettings,
    metrics: Arc<dyn MetricsRecorder>,
}

impl ProviderGateway {
    /// Gateway with default settings, a private cache and no metrics.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            cache: Arc::new(ResponseCache::new(500, Duration::from_secs(3600))),
            retry: RetryPolicy::default(),
            settings: GatewaySettings::default(),
            metrics: Arc::new(NoopRecorder),
        }
    }

    /// Gateway configured from the `gateway` and `cache` sections.
    pub fn from_config(
        config: &Config,
        registry: Arc<ProviderRegistry>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        let gateway = &config.gateway;
        Self {
            registry,
            cache: Arc::new(ResponseCache::from_config(&config.cache)),
            retry: RetryPolicy::from_config(gateway),
            settings: GatewaySettings {
                cache_enabled: gateway.cache_enabled,
                temperature: gateway.temperature,
                max_tokens: gateway.max_tokens,
                cache_key_prompt_chars: gateway.cache_key_prompt_chars,
                health_timeout: gateway
                    .request_timeout()
                    .unwrap_or(Duration::from_secs(15))
                    .min(Duration::from_secs(15)),
            },
            metrics,
        }
    }

    /// Share a cache between gateways.
    pub fn with_cache(mut self, cache: Arc<ResponseCache<CachedResponse>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // ========================================================================
    // Text
    // ========================================================================

    /// Generate text, trying providers in order until one succeeds.
    #[instrument(skip(self, prompt, options), fields(provider = ?options.provider, model = ?options.model))]
    pub async fn generate_text(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextGeneration, GatewayError> {
        let metadata = json!({
            "provider": options.provider,
            "model": options.model,
        });
        timed(
            self.metrics.as_ref(),
            "gateway.generate_text",
            metadata,
            self.cascade(prompt, options),
        )
        .await
    }

    async fn cascade(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextGeneration, GatewayError> {
        let key = self.cache_key("text", prompt, options, None);
        if let Some(ref key) = key {
            if let Some(hit) = self.cache.get(key) {
                debug!(provider = %hit.provider, "Cache hit");
                return Ok(TextGeneration {
                    text: hit.content,
                    provider: hit.provider,
                    model: hit.model,
                    usage: hit.usage,
                    cached: true,
                    failed_attempts: Vec::new(),
                });
            }
        }

        let candidates = self.candidates(options)?;
        let mut failed: Vec<ProviderAttempt> = Vec::new();
        let mut last_error = String::from("no providers registered");

        for provider in candidates {
            let id = provider.id().to_string();

            let model = match provider.resolve_model(requested_model(options, &id)) {
                Ok(model) => model,
                Err(e) => {
                    if options.provider.is_some() {
                        return Err(model_unavailable(&id, options, e));
                    }
                    warn!(provider = %id, error = %e, "Skipping provider, model unavailable");
                    last_error = e.to_string();
                    failed.push(ProviderAttempt {
                        provider: id,
                        model: options.model.clone(),
                        attempts: 0,
                        error: last_error.clone(),
                    });
                    continue;
                }
            };

            let request = self.build_request(prompt, &model, options, None);
            let outcome = self.call_with_retry(provider.as_ref(), &model, &request).await;

            match outcome.result {
                Ok(response) => {
                    let generation = TextGeneration {
                        text: response.content,
                        provider: id,
                        model: if response.model.is_empty() {
                            model
                        } else {
                            response.model
                        },
                        usage: response.usage,
                        cached: false,
                        failed_attempts: failed,
                    };
                    if let Some(key) = key {
                        self.cache.set(
                            key,
                            CachedResponse {
                                content: generation.text.clone(),
                                provider: generation.provider.clone(),
                                model: generation.model.clone(),
                                usage: generation.usage,
                            },
                        );
                    }
                    return Ok(generation);
                }
                Err(e) => {
                    let pinned = options.provider.is_some();
                    if pinned && matches!(e, ProviderError::ModelNotFound { .. }) {
                        return Err(model_unavailable(&id, options, e));
                    }
                    warn!(
                        provider = %id,
                        attempts = outcome.attempts,
                        error = %e,
                        "Provider failed, trying next"
                    );
                    last_error = e.to_string();
                    failed.push(ProviderAttempt {
                        provider: id,
                        model: Some(model),
                        attempts: outcome.attempts,
                        error: last_error.clone(),
                    });
                }
            }
        }

        Err(GatewayError::AllProvidersFailed {
            attempts: failed,
            last_error,
        })
    }

    // ========================================================================
    // Structured objects
    // ========================================================================

    /// Generate a value of type `T` from a single provider.
    ///
    /// The JSON schema is derived from `T`. Transient call failures are
    /// retried; a reply that does not deserialize into `T` is not.
    #[instrument(skip(self, prompt, options), fields(provider = ?options.provider))]
    pub async fn generate_object<T>(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<ObjectGeneration<T>, GatewayError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema_name = T::schema_name();
        let schema = serde_json::to_value(schemars::schema_for!(T)).map_err(|e| {
            GatewayError::ObjectGenerationFailed {
                provider: options.provider.clone().unwrap_or_default(),
                schema: schema_name.clone(),
                message: format!("schema could not be rendered: {}", e),
            }
        })?;

        let metadata = json!({"provider": options.provider, "schema": schema_name});
        timed(
            self.metrics.as_ref(),
            "gateway.generate_object",
            metadata,
            self.generate_object_inner(prompt, options, schema_name.clone(), schema),
        )
        .await
    }

    async fn generate_object_inner<T>(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        schema_name: String,
        schema: serde_json::Value,
    ) -> Result<ObjectGeneration<T>, GatewayError>
    where
        T: DeserializeOwned,
    {
        let provider = self.single_provider(options)?;
        let id = provider.id().to_string();
        let failed = |message: String| GatewayError::ObjectGenerationFailed {
            provider: id.clone(),
            schema: schema_name.clone(),
            message,
        };

        let schema_identity = format!("{}#{:016x}", schema_name, fingerprint(&schema));
        let key = self.cache_key("object", prompt, options, Some(&schema_identity));

        if let Some(ref key) = key {
            if let Some(hit) = self.cache.get(key) {
                if let Ok(value) = parse_object::<T>(&hit.content) {
                    debug!(schema = %schema_name, "Cache hit");
                    return Ok(ObjectGeneration {
                        value,
                        raw: hit.content,
                        provider: hit.provider,
                        model: hit.model,
                        cached: true,
                    });
                }
            }
        }

        let model = provider
            .resolve_model(requested_model(options, &id))
            .map_err(|e| model_unavailable(&id, options, e))?;

        let format = ResponseFormat::JsonSchema {
            name: schema_name.clone(),
            schema,
        };
        let request = self.build_request(prompt, &model, options, Some(format));
        let outcome = self.call_with_retry(provider.as_ref(), &model, &request).await;
        let response = outcome.result.map_err(|e| failed(e.to_string()))?;

        let value = parse_object::<T>(&response.content)
            .map_err(|e| failed(format!("reply does not match schema: {}", e)))?;

        if let Some(key) = key {
            self.cache.set(
                key,
                CachedResponse {
                    content: response.content.clone(),
                    provider: id.clone(),
                    model: model.clone(),
                    usage: response.usage,
                },
            );
        }

        Ok(ObjectGeneration {
            value,
            raw: response.content,
            provider: id,
            model,
            cached: false,
        })
    }

    // ========================================================================
    // Streaming
    // ========================================================================

    /// Stream text from a single provider.
    ///
    /// Opening the stream is retried like any other call. Once open, errors
    /// end the stream. Dropping the stream stops reading but does not
    /// guarantee the remote request is cancelled.
    #[instrument(skip(self, prompt, options), fields(provider = ?options.provider))]
    pub async fn stream_text(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream, GatewayError> {
        let provider = self.single_provider(options)?;
        let id = provider.id().to_string();
        let model = provider
            .resolve_model(requested_model(options, &id))
            .map_err(|e| model_unavailable(&id, options, e))?;

        let request = self.build_request(prompt, &model, options, None);
        let outcome = timed(
            self.metrics.as_ref(),
            "gateway.stream_text",
            json!({"provider": id, "model": model}),
            self.retry
                .run(&id, |_| provider.complete_stream(request.clone())),
        )
        .await;

        let chunks = outcome.result.map_err(|e| GatewayError::StreamFailed {
            provider: id.clone(),
            message: e.to_string(),
        })?;

        Ok(text_stream(id, chunks))
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Probe every registered provider once, concurrently.
    ///
    /// Probes bypass the cache and are not retried.
    pub async fn health_check(&self) -> Vec<ProviderHealth> {
        let probes = self.registry.providers().map(|provider| {
            let provider = Arc::clone(provider);
            let timeout = self.settings.health_timeout;
            async move { probe(provider, timeout).await }
        });
        let results = future::join_all(probes).await;

        for health in &results {
            if health.healthy {
                info!(provider = %health.provider, latency_ms = health.latency_ms, "Provider healthy");
            } else {
                warn!(
                    provider = %health.provider,
                    error = health.error.as_deref().unwrap_or(""),
                    "Provider unhealthy"
                );
            }
        }
        results
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn candidates(&self, options: &GenerateOptions) -> Result<Vec<Arc<dyn Provider>>, GatewayError> {
        match options.provider {
            Some(ref id) => self
                .registry
                .get(id)
                .map(|p| vec![p])
                .ok_or_else(|| GatewayError::ModelUnavailable {
                    provider: id.clone(),
                    model: options.model.clone(),
                    reason: "provider is not registered".to_string(),
                }),
            None => Ok(self.registry.fallback_order()),
        }
    }

    fn single_provider(&self, options: &GenerateOptions) -> Result<Arc<dyn Provider>, GatewayError> {
        self.candidates(options)?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::ModelUnavailable {
                provider: "(none)".to_string(),
                model: options.model.clone(),
                reason: "no providers registered".to_string(),
            })
    }

    fn cache_key(
        &self,
        kind: &str,
        prompt: &str,
        options: &GenerateOptions,
        schema: Option<&str>,
    ) -> Option<String> {
        if !self.settings.cache_enabled || options.bypass_cache {
            return None;
        }
        let system = options.system.as_deref().unwrap_or("");
        let keyed_prompt;
        let prompt = if system.is_empty() {
            prompt
        } else {
            keyed_prompt = format!("{}\n---\n{}", system, prompt);
            keyed_prompt.as_str()
        };

        Some(
            CacheKey {
                kind,
                provider: options.provider.as_deref().unwrap_or("auto"),
                model: options.model.as_deref().unwrap_or("default"),
                temperature: options.temperature.unwrap_or(self.settings.temperature),
                max_tokens: options.max_tokens.unwrap_or(self.settings.max_tokens),
                prompt,
                schema,
            }
            .render(self.settings.cache_key_prompt_chars),
        )
    }

    fn build_request(
        &self,
        prompt: &str,
        model: &str,
        options: &GenerateOptions,
        format: Option<ResponseFormat>,
    ) -> CompletionRequest {
        let mut request = CompletionRequest::from_prompt(prompt)
            .with_model(model)
            .with_temperature(options.temperature.unwrap_or(self.settings.temperature))
            .with_max_tokens(options.max_tokens.unwrap_or(self.settings.max_tokens));
        if let Some(ref system) = options.system {
            request = request.with_system(system);
        }
        if let Some(format) = format {
            request = request.with_response_format(format);
        }
        request
    }

    async fn call_with_retry(
        &self,
        provider: &dyn Provider,
        model: &str,
        request: &CompletionRequest,
    ) -> crate::retry::RetryOutcome<crate::traits::CompletionResponse> {
        let id = provider.id();
        timed(
            self.metrics.as_ref(),
            &format!("gateway.provider.{}", id),
            json!({"model": model}),
            self.retry.run(id, |attempt| {
                debug!(provider = id, attempt, "Calling provider");
                provider.complete(request.clone())
            }),
        )
        .await
    }
}

/// Model to ask `provider` for during a cascade.
///
/// Without a pinned provider, an override from another vendor's family is
/// dropped so the provider falls back to its own default.
fn requested_model<'a>(options: &'a GenerateOptions, provider: &str) -> Option<&'a str> {
    let model = options.model.as_deref()?;
    if options.provider.is_some() {
        return Some(model);
    }
    match model_family(model) {
        Some(family) if family != provider => {
            debug!(provider, model, "Override belongs to {}, using provider default", family);
            None
        }
        _ => Some(model),
    }
}

fn model_unavailable(provider: &str, options: &GenerateOptions, err: ProviderError) -> GatewayError {
    GatewayError::ModelUnavailable {
        provider: provider.to_string(),
        model: options.model.clone(),
        reason: err.to_string(),
    }
}

fn fingerprint(schema: &serde_json::Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    schema.to_string().hash(&mut hasher);
    hasher.finish()
}

/// Strip Markdown code fences some models wrap around JSON.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().trim_end_matches("```").trim()
}

fn parse_object<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json(text))
}

async fn probe(provider: Arc<dyn Provider>, timeout: Duration) -> ProviderHealth {
    let id = provider.id().to_string();
    let model = match provider.resolve_model(None) {
        Ok(model) => model,
        Err(e) => {
            return ProviderHealth {
                provider: id,
                model: None,
                healthy: false,
                latency_ms: 0,
                error: Some(e.to_string()),
            }
        }
    };

    let request = CompletionRequest::from_prompt("Reply with OK.")
        .with_model(model.clone())
        .with_max_tokens(5)
        .with_temperature(0.0);

    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, provider.complete(request)).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(ProviderError::Timeout {
            provider: id.clone(),
            elapsed_ms: timeout.as_millis() as u64,
        }),
    };

    ProviderHealth {
        provider: id,
        model: Some(model),
        healthy: result.is_ok(),
        latency_ms: started.elapsed().as_millis() as u64,
        error: result.err().map(|e| e.to_string()),
    }
}

struct StreamState {
    chunks: ChunkStream,
    provider: String,
    usage: Usage,
    characters: usize,
    finished: bool,
}

/// Adapt provider chunks into gateway events with exactly one `Done`.
fn text_stream(provider: String, chunks: ChunkStream) -> TextStream {
    let state = StreamState {
        chunks,
        provider,
        usage: Usage::default(),
        characters: 0,
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            let next: Option<ProviderResult<_>> = state.chunks.next().await;
            match next {
                Some(Ok(chunk)) => {
                    if let Some(ref usage) = chunk.usage {
                        state.usage.absorb(usage);
                    }
                    if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
                        state.characters += delta.chars().count();
                        // A final chunk carrying text still gets its own Done next
                        if chunk.is_final {
                            return Some((Ok(StreamEvent::Delta(delta)), close_after_delta(state)));
                        }
                        return Some((Ok(StreamEvent::Delta(delta)), state));
                    }
                    if chunk.is_final {
                        return Some((done_event(&state), finish(state)));
                    }
                }
                Some(Err(e)) => {
                    let err = GatewayError::StreamFailed {
                        provider: state.provider.clone(),
                        message: e.to_string(),
                    };
                    return Some((Err(err), finish(state)));
                }
                None => {
                    return Some((done_event(&state), finish(state)));
                }
            }
        }
    }))
}

fn done_event(state: &StreamState) -> Result<StreamEvent, GatewayError> {
    Ok(StreamEvent::Done {
        usage: state.usage,
        characters: state.characters,
    })
}

fn finish(mut state: StreamState) -> StreamState {
    state.finished = true;
    state
}

// After a final chunk with text, replace the inner stream with an empty one
// so the next poll emits Done and stops.
fn close_after_delta(mut state: StreamState) -> StreamState {
    state.chunks = Box::pin(stream::empty());
    state
}
