//! Typed failures a signal provider can report

use thiserror::Error;

/// Failure of a single provider call, health probe or configuration
///
/// Every variant names the provider it came from so failures can be reported
/// per provider without extra bookkeeping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("{provider}: authentication failed: {message}")]
    Authentication { provider: String, message: String },

    #[error("{provider}: rate limited: {message}")]
    RateLimit { provider: String, message: String },

    #[error("{provider}: timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("{provider}: invalid response: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("{provider}: invalid configuration: {message}")]
    InvalidConfig { provider: String, message: String },

    #[error("{provider}: request failed: {message}")]
    Request { provider: String, message: String },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Authentication { provider, .. }
            | ProviderError::RateLimit { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::InvalidResponse { provider, .. }
            | ProviderError::InvalidConfig { provider, .. }
            | ProviderError::Request { provider, .. } => provider,
        }
    }

    /// Short machine-friendly label for logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Authentication { .. } => "authentication",
            ProviderError::RateLimit { .. } => "rate_limit",
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::InvalidResponse { .. } => "invalid_response",
            ProviderError::InvalidConfig { .. } => "invalid_config",
            ProviderError::Request { .. } => "request",
        }
    }

    /// Whether another attempt could plausibly succeed
    ///
    /// Authentication and configuration problems never fix themselves.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::Authentication { .. } | ProviderError::InvalidConfig { .. }
        )
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, ProviderError::Authentication { .. })
    }

    pub(crate) fn invalid_response(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::InvalidResponse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_config(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::InvalidConfig {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}
