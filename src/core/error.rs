use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::keys::KeyStoreError;

/// Failure taxonomy for everything that talks to OpenRouter or local state.
///
/// Single-shot queries propagate the first error to the caller; the watch
/// loop only escalates after its consecutive-error ceiling.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("no API key configured; add one with `ormon keys add` or set OPENROUTER_API_KEY")]
    MissingApiKey,

    /// HTTP 401 — the key is invalid or expired. Not retryable.
    #[error("API key rejected by OpenRouter: {0}")]
    Unauthorized(String),

    /// HTTP 429. `retry_after_secs` carries the upstream hint when present.
    #[error("rate limited by OpenRouter: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// HTTP 5xx — retryable by the polling loop.
    #[error("OpenRouter server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("request to OpenRouter timed out after {0} seconds")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response from OpenRouter ({status}): {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("failed to persist {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

impl MonitorError {
    /// Whether a polling loop may reasonably retry after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerError { .. } | Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = MonitorError::ServerError {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_retryable());
        assert!(MonitorError::Timeout(10).is_retryable());
        assert!(MonitorError::Network("reset".into()).is_retryable());
    }

    #[test]
    fn auth_errors_are_not_retryable() {
        assert!(!MonitorError::Unauthorized("expired".into()).is_retryable());
        assert!(!MonitorError::MissingApiKey.is_retryable());
    }

    #[test]
    fn rate_limited_display_includes_message() {
        let err = MonitorError::RateLimited {
            message: "free tier ceiling".into(),
            retry_after_secs: Some(30),
        };
        assert!(err.to_string().contains("free tier ceiling"));
    }
}
