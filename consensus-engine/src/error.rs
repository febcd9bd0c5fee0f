//! Errors surfaced by the consensus engine

use signal_providers::ProviderError;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ConsensusError {
    /// Malformed request or configuration; never retried
    #[error("validation failed: {0}")]
    Validation(String),

    /// Not enough usable providers before any call was made, or too few
    /// responses handed to the aggregator
    #[error("insufficient providers: {available} available, {required} required ({providers:?})")]
    InsufficientProviders {
        available: usize,
        required: usize,
        providers: Vec<String>,
    },

    /// Calls were made but too few of them succeeded
    #[error(
        "insufficient successful responses: {successful}/{required} required (succeeded: {succeeded:?}, failed: {})",
        format_failures(.failures)
    )]
    InsufficientSuccessfulResponses {
        successful: usize,
        required: usize,
        succeeded: Vec<String>,
        failures: BTreeMap<String, ProviderError>,
    },

    #[error("aggregation failed: {0}")]
    AggregationFailure(String),
}

fn format_failures(failures: &BTreeMap<String, ProviderError>) -> String {
    if failures.is_empty() {
        return "none".to_string();
    }
    failures
        .iter()
        .map(|(name, error)| format!("{} ({})", name, error.kind()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConsensusError {
    /// Names of providers that were attempted but failed
    pub fn failed_providers(&self) -> Vec<&str> {
        match self {
            ConsensusError::InsufficientSuccessfulResponses { failures, .. } => {
                failures.keys().map(String::as_str).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_successful_message_names_providers() {
        let mut failures = BTreeMap::new();
        failures.insert(
            "grok".to_string(),
            ProviderError::Timeout {
                provider: "grok".to_string(),
                timeout_ms: 30_000,
            },
        );
        let err = ConsensusError::InsufficientSuccessfulResponses {
            successful: 1,
            required: 2,
            succeeded: vec!["openai".to_string()],
            failures,
        };

        let message = err.to_string();
        assert!(message.contains("1/2"));
        assert!(message.contains("openai"));
        assert!(message.contains("grok (timeout)"));
        assert_eq!(err.failed_providers(), vec!["grok"]);
    }

    #[test]
    fn test_insufficient_providers_message() {
        let err = ConsensusError::InsufficientProviders {
            available: 0,
            required: 2,
            providers: vec![],
        };
        assert!(err.to_string().contains("0 available, 2 required"));
        assert!(err.failed_providers().is_empty());
    }
}
