//! Configuration system for Bookwright.
//!
//! Values are layered with figment: built-in defaults, the user config file,
//! the project config files, then `BOOKWRIGHT_` environment variables. The
//! core only consumes the resolved [`Config`]; it never reads files itself.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

/// Main configuration struct for Bookwright.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Planner limits
    pub planner: PlannerConfig,
    /// Provider gateway behavior
    pub gateway: GatewayConfig,
    /// Response cache sizing
    pub cache: CacheConfig,
    /// Metric history retention
    pub metrics: MetricsConfig,
    /// Provider configurations
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default provider
    pub provider: String,
    /// Default model (empty means the provider's default)
    pub model: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum number of actions in a plan
    pub max_plan_length: usize,
    /// Wall-clock budget for a single search
    pub timeout_ms: u64,
    /// Timeout applied to actions that declare none
    pub default_action_timeout_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_plan_length: 10,
            timeout_ms: 5_000,
            default_action_timeout_ms: 30_000,
        }
    }
}

impl PlannerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn default_action_timeout(&self) -> Duration {
        Duration::from_millis(self.default_action_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Providers tried in order when the caller names none
    pub fallback_order: Vec<String>,
    /// Retries per provider after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry
    pub min_backoff_ms: u64,
    /// Upper bound for any single backoff
    pub max_backoff_ms: u64,
    /// Per-attempt deadline (none means wait indefinitely)
    pub request_timeout_ms: Option<u64>,
    /// Whether responses are memoized
    pub cache_enabled: bool,
    /// Default sampling temperature
    pub temperature: f32,
    /// Default maximum output tokens
    pub max_tokens: u32,
    /// Number of prompt characters kept verbatim in cache keys
    pub cache_key_prompt_chars: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            fallback_order: vec![
                "anthropic".to_string(),
                "openai".to_string(),
                "local".to_string(),
            ],
            max_retries: 2,
            min_backoff_ms: 500,
            max_backoff_ms: 8_000,
            request_timeout_ms: Some(120_000),
            cache_enabled: true,
            temperature: 0.7,
            max_tokens: 4096,
            cache_key_prompt_chars: 200,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// Which entry the cache drops when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Drop the earliest inserted entry
    #[default]
    Insertion,
    /// Drop the least recently read or written entry
    Lru,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached responses
    pub capacity: usize,
    /// Entry time-to-live
    pub ttl_secs: u64,
    /// Eviction policy on overflow
    pub eviction: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            ttl_secs: 3_600,
            eviction: EvictionPolicy::Insertion,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Maximum retained metric records
    pub capacity: usize,
    /// Records older than this are dropped
    pub max_age_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            max_age_secs: 3_600,
        }
    }
}

impl MetricsConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Anthropic configuration
    pub anthropic: Option<ProviderConfig>,
    /// OpenAI configuration
    pub openai: Option<ProviderConfig>,
    /// Local/Ollama configuration
    pub local: Option<LocalProviderConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key (can be set directly or via environment)
    pub api_key: Option<String>,
    /// Environment variable name for API key
    pub api_key_env: Option<String>,
    /// Default model for this provider
    pub default_model: Option<String>,
    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key from either direct value or environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        if let Some(ref env_var) = self.api_key_env {
            if let Ok(key) = std::env::var(env_var) {
                return Some(key);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalProviderConfig {
    /// Enable local provider
    pub enabled: bool,
    /// Ollama URL
    pub base_url: Option<String>,
    /// Default model
    pub default_model: Option<String>,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            default_model: None,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "planner.max_plan_length")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

const KNOWN_PROVIDERS: [&str; 4] = ["anthropic", "openai", "local", "scripted"];

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_dir = Self::config_dir();

        Self::base_figment()
            .merge(Toml::file(config_dir.join("config.toml")))
            .merge(Toml::file(".bookwright/config.toml"))
            // Project local config (gitignored)
            .merge(Toml::file(".bookwright/config.local.toml"))
            .merge(Env::prefixed("BOOKWRIGHT_").split("__"))
            .extract()
    }

    /// Load configuration from defaults and a single explicit file.
    ///
    /// Unlike [`Config::load`], the file must exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Self::base_figment()
            .merge(Toml::file_exact(path.as_ref()))
            .merge(Env::prefixed("BOOKWRIGHT_").split("__"))
            .extract()
    }

    fn base_figment() -> Figment {
        Figment::new().merge(Serialized::defaults(Config::default()))
    }

    /// Validate, logging warnings and failing on errors.
    pub fn ensure_valid(self) -> Result<Self, Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.general.provider.is_empty() {
            result.add_error("general.provider", "Provider name cannot be empty");
        }

        // Planner
        if self.planner.max_plan_length == 0 {
            result.add_error("planner.max_plan_length", "max_plan_length must be greater than 0");
        }
        if self.planner.max_plan_length > 50 {
            result.add_warning(
                "planner.max_plan_length",
                "max_plan_length is very high (> 50), planning may be slow",
            );
        }
        if self.planner.timeout_ms == 0 {
            result.add_error("planner.timeout_ms", "timeout_ms must be greater than 0");
        }
        if self.planner.default_action_timeout_ms == 0 {
            result.add_error(
                "planner.default_action_timeout_ms",
                "default_action_timeout_ms must be greater than 0",
            );
        }

        // Gateway
        if self.gateway.fallback_order.is_empty() {
            result.add_error("gateway.fallback_order", "At least one provider is required");
        }
        for name in &self.gateway.fallback_order {
            if !KNOWN_PROVIDERS.contains(&name.as_str()) {
                result.add_warning(
                    "gateway.fallback_order",
                    format!("Unknown provider '{}' will be skipped", name),
                );
            }
        }
        if self.gateway.min_backoff_ms > self.gateway.max_backoff_ms {
            result.add_error(
                "gateway.min_backoff_ms",
                "min_backoff_ms cannot exceed max_backoff_ms",
            );
        }
        if self.gateway.max_retries > 10 {
            result.add_warning("gateway.max_retries", "max_retries is very high (> 10)");
        }
        if self.gateway.request_timeout_ms == Some(0) {
            result.add_error("gateway.request_timeout_ms", "request_timeout_ms must be greater than 0");
        }
        if !(0.0..=2.0).contains(&self.gateway.temperature) {
            result.add_error("gateway.temperature", "temperature must be between 0.0 and 2.0");
        }
        if self.gateway.max_tokens == 0 {
            result.add_error("gateway.max_tokens", "max_tokens must be greater than 0");
        }
        if self.gateway.cache_key_prompt_chars == 0 {
            result.add_error(
                "gateway.cache_key_prompt_chars",
                "cache_key_prompt_chars must be greater than 0",
            );
        }

        // Cache
        if self.cache.capacity == 0 {
            result.add_error("cache.capacity", "capacity must be greater than 0");
        }
        if self.cache.ttl_secs == 0 {
            result.add_warning("cache.ttl_secs", "ttl_secs is 0, every cached entry expires immediately");
        }

        // Metrics
        if self.metrics.capacity == 0 {
            result.add_error("metrics.capacity", "capacity must be greater than 0");
        }

        // Providers
        if let Some(ref anthropic) = self.providers.anthropic {
            if anthropic.api_key.as_ref().map(|k| k.is_empty()).unwrap_or(false) {
                result.add_warning("providers.anthropic.api_key", "API key is empty string");
            }
        }

        if let Some(ref openai) = self.providers.openai {
            if openai.api_key.as_ref().map(|k| k.is_empty()).unwrap_or(false) {
                result.add_warning("providers.openai.api_key", "API key is empty string");
            }
            if let Some(ref base_url) = openai.base_url {
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    result.add_error(
                        "providers.openai.base_url",
                        "base_url must start with http:// or https://",
                    );
                }
            }
        }

        result
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("bookwright"))
            .unwrap_or_else(|| PathBuf::from("~/.config/bookwright"))
    }
}
