//! # bookwright-providers
//!
//! Language-model access for Bookwright.
//!
//! This crate provides:
//! - The [`Provider`] trait and adapters for Anthropic, OpenAI and local (Ollama) models
//! - A scripted provider for offline runs and tests
//! - Server-sent event decoding for streamed completions
//! - [`ProviderGateway`]: response caching, bounded retry and provider fallback

pub mod anthropic;
pub mod cache;
pub mod gateway;
pub mod local;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod scripted;
pub mod sse;
pub mod traits;

pub use anthropic::AnthropicProvider;
pub use cache::{CacheKey, CacheStats, EvictionPolicy, ResponseCache};
pub use gateway::{
    CachedResponse, GatewaySettings, GenerateOptions, ObjectGeneration, ProviderGateway,
    ProviderHealth, StreamEvent, TextGeneration, TextStream,
};
pub use local::LocalProvider;
pub use openai::OpenAIProvider;
pub use registry::ProviderRegistry;
pub use retry::{RetryOutcome, RetryPolicy};
pub use scripted::ScriptedProvider;
pub use traits::{
    ChunkStream, CompletionRequest, CompletionResponse, FinishReason, ModelInfo, Provider,
    ProviderResult, ResponseFormat, StreamChunk, Usage,
};
