//! Provider registry for managing available providers.

use std::collections::HashMap;
use std::sync::Arc;

use bookwright_core::Config;
use tracing::{debug, warn};

use super::anthropic::AnthropicProvider;
use super::local::LocalProvider;
use super::openai::OpenAIProvider;
use super::traits::{ModelInfo, Provider};

/// Registry of available providers, in registration order.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    order: Vec<String>,
    fallback_order: Vec<String>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            order: Vec::new(),
            fallback_order: Vec::new(),
        }
    }

    /// Register every provider whose credentials resolve.
    ///
    /// API keys come from the config first, then from `ANTHROPIC_API_KEY` /
    /// `OPENAI_API_KEY`. The local provider needs no key and is registered
    /// unless disabled.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        let providers = &config.providers;

        let anthropic_key = providers
            .anthropic
            .as_ref()
            .and_then(|c| c.resolve_api_key())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());

        if let Some(api_key) = anthropic_key {
            let mut provider = AnthropicProvider::new(api_key);
            if let Some(ref anthropic) = providers.anthropic {
                if let Some(ref base_url) = anthropic.base_url {
                    provider = provider.with_base_url(base_url);
                }
                if let Some(ref model) = anthropic.default_model {
                    provider = provider.with_default_model(model);
                }
            }
            registry.register(Arc::new(provider));
        }

        let openai_key = providers
            .openai
            .as_ref()
            .and_then(|c| c.resolve_api_key())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());

        if let Some(api_key) = openai_key {
            let mut provider = OpenAIProvider::new(api_key);
            if let Some(ref openai) = providers.openai {
                if let Some(ref base_url) = openai.base_url {
                    provider = provider.with_base_url(base_url);
                }
                if let Some(ref model) = openai.default_model {
                    provider = provider.with_default_model(model);
                }
            }
            if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
                provider = provider.with_base_url(base_url);
            }
            registry.register(Arc::new(provider));
        }

        let local = providers.local.clone().unwrap_or_default();
        if local.enabled {
            let mut provider = local
                .base_url
                .clone()
                .or_else(|| std::env::var("OLLAMA_HOST").ok())
                .map(LocalProvider::with_url)
                .unwrap_or_default();
            if let Some(model) = local.default_model {
                provider = provider.with_default_model(model);
            }
            registry.register(Arc::new(provider));
        }

        registry.set_fallback_order(config.gateway.fallback_order.as_slice());
        registry
    }

    /// Register a provider, replacing any with the same id.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let id = provider.id().to_string();
        debug!(provider = %id, "Registered provider");
        if self.providers.insert(id.clone(), provider).is_none() {
            self.order.push(id);
        }
    }

    /// Set the cascade order; unknown ids are skipped with a warning.
    pub fn set_fallback_order<S: AsRef<str>>(&mut self, ids: &[S]) {
        self.fallback_order = ids
            .iter()
            .map(|id| id.as_ref())
            .filter(|id| {
                let known = self.providers.contains_key(*id);
                if !known {
                    warn!(provider = %id, "Skipping unregistered provider in fallback order");
                }
                known
            })
            .map(str::to_string)
            .collect();
    }

    /// Providers to try, in order, when a call names none.
    ///
    /// Falls back to registration order when no order was configured or
    /// none of its entries are registered.
    pub fn fallback_order(&self) -> Vec<Arc<dyn Provider>> {
        let ids = if self.fallback_order.is_empty() {
            &self.order
        } else {
            &self.fallback_order
        };
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Get a provider by ID.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    /// First provider in the fallback order.
    pub fn default_provider(&self) -> Option<Arc<dyn Provider>> {
        self.fallback_order().into_iter().next()
    }

    /// Registered provider ids in registration order.
    pub fn list(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Iterate over all registered providers in registration order.
    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.order.iter().filter_map(|id| self.providers.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Get all available models across all providers.
    pub fn all_models(&self) -> Vec<ModelInfo> {
        self.providers().flat_map(|p| p.available_models()).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;
    use bookwright_core::config::{LocalProviderConfig, ProviderConfig};

    fn ids(providers: Vec<Arc<dyn Provider>>) -> Vec<String> {
        providers.iter().map(|p| p.id().to_string()).collect()
    }

    #[test]
    fn test_registration_order_is_default_fallback() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("b")));
        registry.register(Arc::new(ScriptedProvider::new("a")));
        registry.register(Arc::new(ScriptedProvider::new("b")));

        assert_eq!(registry.list(), vec!["b", "a"]);
        assert_eq!(ids(registry.fallback_order()), vec!["b", "a"]);
    }

    #[test]
    fn test_configured_fallback_order_skips_unknown() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("a")));
        registry.register(Arc::new(ScriptedProvider::new("b")));
        registry.set_fallback_order(&["b", "ghost", "a"]);

        assert_eq!(ids(registry.fallback_order()), vec!["b", "a"]);
        assert_eq!(registry.default_provider().unwrap().id(), "b");
    }

    #[test]
    fn test_from_config_registers_keyed_providers() {
        let mut config = Config::default();
        config.providers.openai = Some(ProviderConfig {
            api_key: Some("sk-test".to_string()),
            default_model: Some("gpt-4o-mini".to_string()),
            ..Default::default()
        });
        config.providers.local = Some(LocalProviderConfig {
            enabled: false,
            ..Default::default()
        });
        config.gateway.fallback_order = vec!["openai".to_string()];

        let registry = ProviderRegistry::from_config(&config);
        let openai = registry.get("openai").unwrap();
        assert_eq!(openai.default_model(), "gpt-4o-mini");
        assert!(registry.get("local").is_none());
        assert_eq!(ids(registry.fallback_order()), vec!["openai"]);
    }
}
