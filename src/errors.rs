use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Classified failure of a single completion call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Invalid API key or insufficient quota: {message}")]
    Auth { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    #[error("Provider temporarily unavailable: {message}")]
    Transient { message: String },

    #[error("Model '{model}' not available: {message}")]
    ModelUnavailable { model: String, message: String },

    #[error("Provider did not answer within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Provider not configured: {message}")]
    NotConfigured { message: String },

    #[error("Provider error: {message}")]
    Other { message: String },
}

impl ProviderError {
    /// Errors the orchestrator may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. } | ProviderError::Transient { .. })
    }

    /// Classifies provider error text the way the upstream API reports it.
    /// Status codes only count as whole numbers.
    pub fn classify(model: &str, raw: impl Into<String>) -> Self {
        let message = raw.into();
        if AUTH_RE.is_match(&message) {
            ProviderError::Auth { message }
        } else if RATE_LIMIT_RE.is_match(&message) {
            ProviderError::RateLimited { message }
        } else if MODEL_RE.is_match(&message) {
            ProviderError::ModelUnavailable { model: model.to_string(), message }
        } else if TRANSIENT_RE.is_match(&message) {
            ProviderError::Transient { message }
        } else {
            ProviderError::Other { message }
        }
    }
}

static AUTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)invalid_api_key|invalid api key|\b40[13]\b|unauthorized|insufficient_quota")
        .expect("valid auth regex")
});

static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate_limit|rate limit|\b429\b|too many requests").expect("valid rate regex")
});

static MODEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)model_not_found|model_decommissioned|does not exist")
        .expect("valid model regex")
});

static TRANSIENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b50[0234]\b|connection (refused|reset|closed)|failed to connect",
        r"|error sending request|overloaded|service unavailable|bad gateway",
    ))
    .expect("valid transient regex")
});

/// Top-level application error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    // ── Conversation errors ──────────────────────────────────────────────────
    #[error("Conversation '{id}' not found")]
    ConversationNotFound { id: String },

    // ── Provider errors ──────────────────────────────────────────────────────
    #[error("Provider rejected credentials: {message}")]
    ProviderAuth { message: String },

    #[error("Provider unavailable after {attempts} attempt(s): {message}")]
    ProviderTransient { attempts: u32, message: String },

    #[error("Provider timed out after {seconds}s")]
    ProviderTimeout { seconds: u64 },

    #[error("No usable model left (last tried '{model}'): {message}")]
    ModelUnavailable { model: String, message: String },

    #[error("Failed to switch to {model}: {reason}")]
    ModelSwitchRejected { model: String, reason: String },

    #[error("Groq API error: {message}")]
    Provider { message: String },
}

impl AppError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::ConversationNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::EmptyField { .. } | AppError::FieldTooLong { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::ProviderTimeout { .. })
    }

    /// Maps the terminal outcome of the provider retry loop.
    pub fn from_provider(err: ProviderError, attempts: u32) -> Self {
        match err {
            ProviderError::Auth { message } | ProviderError::NotConfigured { message } => {
                AppError::ProviderAuth { message }
            }
            ProviderError::RateLimited { message } | ProviderError::Transient { message } => {
                AppError::ProviderTransient { attempts, message }
            }
            ProviderError::ModelUnavailable { model, message } => {
                AppError::ModelUnavailable { model, message }
            }
            ProviderError::Timeout { seconds } => AppError::ProviderTimeout { seconds },
            ProviderError::Other { message } => AppError::Provider { message },
        }
    }
}
