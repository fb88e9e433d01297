//! Deterministic provider for offline runs and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bookwright_core::ProviderError;
use futures::stream;
use parking_lot::Mutex;

use crate::traits::{
    ChunkStream, CompletionRequest, CompletionResponse, FinishReason, ModelInfo, Provider,
    ProviderResult, StreamChunk, Usage,
};

type Responder = Box<dyn Fn(&CompletionRequest) -> ProviderResult<String> + Send + Sync>;

/// Provider that replays queued outcomes, then falls back to a responder.
///
/// With nothing queued and no responder it echoes the prompt.
pub struct ScriptedProvider {
    id: String,
    default_model: String,
    models: Vec<String>,
    configured: bool,
    delay: Option<Duration>,
    queue: Mutex<VecDeque<ProviderResult<String>>>,
    responder: Option<Responder>,
    calls: AtomicU32,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default_model: "scripted-1".to_string(),
            models: Vec::new(),
            configured: true,
            delay: None,
            queue: Mutex::new(VecDeque::new()),
            responder: None,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful reply.
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.queue.lock().push_back(Ok(text.into()));
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, error: ProviderError) -> Self {
        self.queue.lock().push_back(Err(error));
        self
    }

    /// Answer every unqueued call with `f`.
    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&CompletionRequest) -> ProviderResult<String> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    /// Fail every unqueued call with a clone of `error`.
    pub fn always_failing(self, error: ProviderError) -> Self {
        self.with_responder(move |_| Err(error.clone()))
    }

    /// Restrict the accepted models; other names fail model resolution.
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        if let Some(first) = self.models.first() {
            self.default_model = first.clone();
        }
        self
    }

    /// Wait this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report as unconfigured, as if credentials were missing.
    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    /// Number of `complete`/`complete_stream` calls received.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    async fn answer(&self, request: &CompletionRequest) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.queue.lock().pop_front();
        match (queued, &self.responder) {
            (Some(outcome), _) => outcome,
            (None, Some(responder)) => responder(request),
            (None, None) => Ok(format!("[{}] {}", self.id, request.prompt())),
        }
    }

    fn usage_for(request: &CompletionRequest, text: &str) -> Usage {
        Usage {
            input_tokens: request.prompt().split_whitespace().count() as u32,
            output_tokens: text.split_whitespace().count() as u32,
            cached_tokens: 0,
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        let ids = if self.models.is_empty() {
            vec![self.default_model.clone()]
        } else {
            self.models.clone()
        };
        ids.into_iter()
            .map(|id| ModelInfo {
                name: id.clone(),
                id,
                provider: self.id.clone(),
                context_window: 8_192,
                max_output_tokens: 4_096,
                supports_streaming: true,
                supports_structured_output: true,
            })
            .collect()
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn resolve_model(&self, requested: Option<&str>) -> ProviderResult<String> {
        if !self.configured {
            return Err(ProviderError::not_configured(&self.id));
        }
        match requested {
            Some(model) if !model.is_empty() => {
                if self.models.is_empty() || self.models.iter().any(|m| m == model) {
                    Ok(model.to_string())
                } else {
                    Err(ProviderError::ModelNotFound {
                        provider: self.id.clone(),
                        model: model.to_string(),
                    })
                }
            }
            _ => Ok(self.default_model.clone()),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> ProviderResult<CompletionResponse> {
        let content = self.answer(&request).await?;
        Ok(CompletionResponse {
            usage: Self::usage_for(&request, &content),
            model: if request.model.is_empty() {
                self.default_model.clone()
            } else {
                request.model.clone()
            },
            finish_reason: FinishReason::Stop,
            content,
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> ProviderResult<ChunkStream> {
        let content = self.answer(&request).await?;
        let usage = Self::usage_for(&request, &content);

        let mut chunks: Vec<ProviderResult<StreamChunk>> = content
            .split_inclusive(' ')
            .map(|word| Ok(StreamChunk::text(word)))
            .collect();
        chunks.push(Ok(StreamChunk::usage(usage)));
        chunks.push(Ok(StreamChunk::finished()));
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_queue_then_echo() {
        let provider = ScriptedProvider::new("a")
            .with_reply("first")
            .with_failure(ProviderError::NetworkError {
                provider: "a".into(),
                message: "reset".into(),
            });

        let req = || CompletionRequest::from_prompt("hello there");
        assert_eq!(provider.complete(req()).await.unwrap().content, "first");
        assert!(provider.complete(req()).await.unwrap_err().is_retryable());
        assert_eq!(provider.complete(req()).await.unwrap().content, "[a] hello there");
        assert_eq!(provider.calls(), 3);
    }

    #[test]
    fn test_closed_model_list() {
        let provider = ScriptedProvider::new("a").with_models(["small", "large"]);
        assert_eq!(provider.resolve_model(None).unwrap(), "small");
        assert!(matches!(
            provider.resolve_model(Some("huge")),
            Err(ProviderError::ModelNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_reassembles_reply() {
        let provider = ScriptedProvider::new("a").with_reply("three small words");
        let chunks: Vec<StreamChunk> = provider
            .complete_stream(CompletionRequest::from_prompt("go"))
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        let text: String = chunks.iter().filter_map(|c| c.delta.clone()).collect();
        assert_eq!(text, "three small words");
        assert!(chunks.last().unwrap().is_final);
    }
}
