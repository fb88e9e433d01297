//! Error types for Bookwright.
//!
//! Errors are grouped by the layer that raises them: planning, plan
//! execution, the provider gateway, and the provider RPC boundary. Every
//! variant exposes a stable [`Error::code`] that hosts can surface to users,
//! and terminal errors carry enough context (goal, world-state snapshot,
//! attempted providers) to diagnose a failure from logs alone.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::WorldState;

/// Result type alias using the Bookwright [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Bookwright.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid registration or input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Planning failed
    #[error("{0}")]
    Planning(#[from] PlanningError),

    /// Plan execution failed
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// Provider gateway exhausted its options
    #[error("{0}")]
    Gateway(#[from] GatewayError),

    /// Provider error with structured details
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Planning(e) => e.code(),
            Error::Execution(e) => e.code(),
            Error::Gateway(e) => e.code(),
            Error::Provider(e) => e.code(),
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/bookwright/config.toml"),
            Error::Planning(e) => e.recovery_suggestion(),
            Error::Execution(e) => e.recovery_suggestion(),
            Error::Gateway(e) => e.recovery_suggestion(),
            Error::Provider(e) => e.recovery_suggestion(),
            _ => None,
        }
    }

    /// Create a provider-not-configured error.
    pub fn provider_not_configured(provider: &str) -> Self {
        Error::Provider(ProviderError::not_configured(provider))
    }
}

/// Errors raised while searching for a plan.
#[derive(Error, Debug, Clone)]
pub enum PlanningError {
    /// No goal with this name is registered
    #[error("Goal '{goal}' is not registered")]
    GoalNotFound { goal: String, state: WorldState },

    /// The open set emptied without reaching the goal
    #[error("No plan reaches goal '{goal}' from {state} ({explored} states explored)")]
    NoPlanFound {
        goal: String,
        explored: usize,
        state: WorldState,
    },

    /// The wall-clock budget ran out before the goal was reached
    #[error("Planning for goal '{goal}' timed out after {}ms ({explored} states explored)", .elapsed.as_millis())]
    PlanningTimeout {
        goal: String,
        elapsed: Duration,
        explored: usize,
        state: WorldState,
    },
}

impl PlanningError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PlanningError::GoalNotFound { .. } => "GOAL_NOT_FOUND",
            PlanningError::NoPlanFound { .. } => "NO_PLAN_FOUND",
            PlanningError::PlanningTimeout { .. } => "PLANNING_TIMEOUT",
        }
    }

    /// Name of the goal being planned for.
    pub fn goal(&self) -> &str {
        match self {
            PlanningError::GoalNotFound { goal, .. }
            | PlanningError::NoPlanFound { goal, .. }
            | PlanningError::PlanningTimeout { goal, .. } => goal,
        }
    }

    /// World state the search started from.
    pub fn state(&self) -> &WorldState {
        match self {
            PlanningError::GoalNotFound { state, .. }
            | PlanningError::NoPlanFound { state, .. }
            | PlanningError::PlanningTimeout { state, .. } => state,
        }
    }

    fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            PlanningError::GoalNotFound { .. } => Some("Register the goal before triggering it"),
            PlanningError::NoPlanFound { .. } => {
                Some("Check that registered actions can reach the goal within the max plan length")
            }
            PlanningError::PlanningTimeout { .. } => {
                Some("Increase planner.timeout_ms or reduce the number of registered actions")
            }
        }
    }
}

/// Errors raised while running a plan's actions.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    /// An action reported failure
    #[error("Action '{action}' failed while pursuing goal '{goal}': {message}")]
    ActionFailed {
        goal: String,
        action: String,
        message: String,
        state: WorldState,
    },

    /// An action did not finish within its timeout
    #[error("Action '{action}' timed out after {}ms while pursuing goal '{goal}'", .timeout.as_millis())]
    ActionTimedOut {
        goal: String,
        action: String,
        timeout: Duration,
        state: WorldState,
    },
}

impl ExecutionError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::ActionFailed { .. } => "ACTION_FAILED",
            ExecutionError::ActionTimedOut { .. } => "ACTION_TIMED_OUT",
        }
    }

    /// Name of the failing action.
    pub fn action(&self) -> &str {
        match self {
            ExecutionError::ActionFailed { action, .. }
            | ExecutionError::ActionTimedOut { action, .. } => action,
        }
    }

    /// World state at the moment of failure.
    pub fn state(&self) -> &WorldState {
        match self {
            ExecutionError::ActionFailed { state, .. }
            | ExecutionError::ActionTimedOut { state, .. } => state,
        }
    }

    fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ExecutionError::ActionFailed { .. } => Some("Inspect the action error and re-run the task"),
            ExecutionError::ActionTimedOut { .. } => {
                Some("Raise the action timeout or planner.default_action_timeout_ms")
            }
        }
    }
}

/// One provider's share of a gateway call, used for diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    /// Provider identifier
    pub provider: String,
    /// Model that was requested, if it resolved
    pub model: Option<String>,
    /// Number of calls made (0 when the model could not be resolved)
    pub attempts: u32,
    /// Final error message from this provider
    pub error: String,
}

/// Terminal errors surfaced by the provider gateway.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// The provider could not supply the requested model
    #[error("Model {} is unavailable on provider '{provider}': {reason}", .model.as_deref().unwrap_or("(default)"))]
    ModelUnavailable {
        provider: String,
        model: Option<String>,
        reason: String,
    },

    /// Every candidate provider failed
    #[error("All providers failed (tried: {}): {last_error}", attempted_list(.attempts))]
    AllProvidersFailed {
        attempts: Vec<ProviderAttempt>,
        last_error: String,
    },

    /// Structured generation failed or did not match the schema
    #[error("Object generation with schema '{schema}' failed on provider '{provider}': {message}")]
    ObjectGenerationFailed {
        provider: String,
        schema: String,
        message: String,
    },

    /// Streaming failed
    #[error("Streaming from provider '{provider}' failed: {message}")]
    StreamFailed { provider: String, message: String },
}

fn attempted_list(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "none".to_string();
    }
    attempts
        .iter()
        .map(|a| a.provider.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::ModelUnavailable { .. } => "MODEL_UNAVAILABLE",
            GatewayError::AllProvidersFailed { .. } => "ALL_PROVIDERS_FAILED",
            GatewayError::ObjectGenerationFailed { .. } => "OBJECT_GENERATION_FAILED",
            GatewayError::StreamFailed { .. } => "STREAM_FAILED",
        }
    }

    /// Providers tried, in order.
    pub fn attempted_providers(&self) -> Vec<&str> {
        match self {
            GatewayError::AllProvidersFailed { attempts, .. } => {
                attempts.iter().map(|a| a.provider.as_str()).collect()
            }
            GatewayError::ModelUnavailable { provider, .. }
            | GatewayError::ObjectGenerationFailed { provider, .. }
            | GatewayError::StreamFailed { provider, .. } => vec![provider.as_str()],
        }
    }

    fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            GatewayError::ModelUnavailable { .. } => {
                Some("Run 'bookwright provider list' to see configured providers and models")
            }
            GatewayError::AllProvidersFailed { .. } => {
                Some("Check provider credentials with 'bookwright health' and try again")
            }
            GatewayError::ObjectGenerationFailed { .. } => {
                Some("Try a model with structured output support or simplify the schema")
            }
            GatewayError::StreamFailed { .. } => Some("Retry the request or disable streaming"),
        }
    }
}

/// Provider-specific errors with detailed context.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Provider not configured
    #[error("Provider '{provider}' is not configured")]
    NotConfigured {
        provider: String,
        env_var: Option<String>,
    },

    /// Authentication failed
    #[error("Authentication failed for {provider}: {message}")]
    AuthenticationFailed { provider: String, message: String },

    /// API request failed
    #[error("API request to {provider} failed: {status} - {message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
    },

    /// Model not found
    #[error("Model '{model}' not found for provider '{provider}'")]
    ModelNotFound { provider: String, model: String },

    /// Streaming error
    #[error("Streaming error from {provider}: {message}")]
    StreamError { provider: String, message: String },

    /// Content filtered
    #[error("Content was filtered by {provider}{}", .reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    ContentFiltered {
        provider: String,
        reason: Option<String>,
    },

    /// Timeout
    #[error("Request to {provider} timed out after {elapsed_ms}ms")]
    Timeout { provider: String, elapsed_ms: u64 },

    /// Network error
    #[error("Network error connecting to {provider}: {message}")]
    NetworkError { provider: String, message: String },

    /// Response body could not be interpreted
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    ///
    /// Network failures, timeouts, stream interruptions, throttling and
    /// server-side errors are transient. Everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::ApiError { status, .. } => {
                matches!(status, 408 | 409 | 429 | 500..=599)
            }
            ProviderError::Timeout { .. }
            | ProviderError::NetworkError { .. }
            | ProviderError::StreamError { .. } => true,
            ProviderError::NotConfigured { .. }
            | ProviderError::AuthenticationFailed { .. }
            | ProviderError::ModelNotFound { .. }
            | ProviderError::ContentFiltered { .. }
            | ProviderError::InvalidResponse { .. } => false,
        }
    }

    /// Provider that raised the error.
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::NotConfigured { provider, .. }
            | ProviderError::AuthenticationFailed { provider, .. }
            | ProviderError::ApiError { provider, .. }
            | ProviderError::ModelNotFound { provider, .. }
            | ProviderError::StreamError { provider, .. }
            | ProviderError::ContentFiltered { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::NetworkError { provider, .. }
            | ProviderError::InvalidResponse { provider, .. } => provider,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured { .. } => "PROVIDER_NOT_CONFIGURED",
            ProviderError::AuthenticationFailed { .. } => "PROVIDER_AUTH_FAILED",
            ProviderError::ApiError { .. } => "PROVIDER_API_ERROR",
            ProviderError::ModelNotFound { .. } => "MODEL_UNAVAILABLE",
            ProviderError::StreamError { .. } => "STREAM_FAILED",
            ProviderError::ContentFiltered { .. } => "CONTENT_FILTERED",
            ProviderError::Timeout { .. } => "PROVIDER_TIMEOUT",
            ProviderError::NetworkError { .. } => "PROVIDER_NETWORK_ERROR",
            ProviderError::InvalidResponse { .. } => "PROVIDER_INVALID_RESPONSE",
        }
    }

    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ProviderError::NotConfigured {
                env_var: Some(_), ..
            } => Some("Set the API key environment variable"),
            ProviderError::NotConfigured { .. } => {
                Some("Configure the provider in ~/.config/bookwright/config.toml")
            }
            ProviderError::AuthenticationFailed { .. } => {
                Some("Check that your API key is valid and not expired")
            }
            ProviderError::ApiError { status: 429, .. } => {
                Some("You've hit rate limits. Wait a moment and try again")
            }
            ProviderError::ApiError {
                status: 500..=599, ..
            } => Some("The API service is having issues. Try again later"),
            ProviderError::ModelNotFound { .. } => {
                Some("Use 'bookwright provider list' to see available models")
            }
            ProviderError::ContentFiltered { .. } => {
                Some("Rephrase your request to avoid triggering content filters")
            }
            ProviderError::Timeout { .. } => {
                Some("Try a simpler request or raise gateway.request_timeout_ms")
            }
            ProviderError::NetworkError { .. } => Some("Check your internet connection"),
            _ => None,
        }
    }

    /// Create a not-configured error, naming the usual API key variable.
    pub fn not_configured(provider: &str) -> Self {
        ProviderError::NotConfigured {
            provider: provider.to_string(),
            env_var: match provider {
                "anthropic" => Some("ANTHROPIC_API_KEY".to_string()),
                "openai" => Some("OPENAI_API_KEY".to_string()),
                _ => None,
            },
        }
    }

    /// Create an error from a non-success HTTP status and response body.
    pub fn from_status(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let provider = provider.into();
        let message = message.into();
        match status {
            401 | 403 => ProviderError::AuthenticationFailed { provider, message },
            _ => ProviderError::ApiError {
                provider,
                status,
                message,
            },
        }
    }

    /// Like [`ProviderError::from_status`], but a 404 that mentions the model
    /// becomes [`ProviderError::ModelNotFound`].
    pub fn from_model_status(
        provider: impl Into<String>,
        status: u16,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        if status == 404 && message.to_ascii_lowercase().contains("model") {
            return ProviderError::ModelNotFound {
                provider: provider.into(),
                model: model.into(),
            };
        }
        Self::from_status(provider, status, message)
    }
}

/// Format an error with its code and recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = format!("[{}] {}", error.code(), error);
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}
