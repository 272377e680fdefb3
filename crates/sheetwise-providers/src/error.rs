//! Error types for the providers module

use thiserror::Error;

/// Errors that can occur when calling a completion service
#[derive(Debug, Error, PartialEq, Clone)]
pub enum ProviderError {
    /// Authentication failed (never includes key details)
    #[error("Authentication failed")]
    AuthError,

    /// Rate limited by provider
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// The call did not finish in time
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Network error occurred
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Generic provider error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Timeout(_) | ProviderError::NetworkError(_)
        )
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(0)
        } else if err.is_connect() {
            ProviderError::NetworkError(err.to_string())
        } else {
            ProviderError::ProviderError(err.to_string())
        }
    }
}
