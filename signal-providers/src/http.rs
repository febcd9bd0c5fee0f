//! Plumbing shared by the HTTP-backed providers

use super::error::ProviderError;
use super::parse::ParsedSignal;
use super::provider::ProviderConfig;
use common::ProviderResponse;
use reqwest::{Client, StatusCode};

/// USD per one million (input, output) tokens, keyed by model name
pub(crate) type PriceTable = &'static [(&'static str, f64, f64)];

/// Client whose timeout bounds a single attempt
pub(crate) fn build_client(config: &ProviderConfig) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| ProviderError::Request {
            provider: config.name.clone(),
            message: format!("failed to initialize HTTP client: {}", e),
        })
}

/// Configured base URL or `default`, without a trailing slash
pub(crate) fn resolve_base_url(config: &ProviderConfig, default: &str) -> String {
    config
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

pub(crate) fn transport_error(config: &ProviderConfig, error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout {
            provider: config.name.clone(),
            timeout_ms: config.timeout.as_millis() as u64,
        }
    } else {
        ProviderError::Request {
            provider: config.name.clone(),
            message: error.to_string(),
        }
    }
}

pub(crate) fn status_error(config: &ProviderConfig, status: StatusCode, body: &str) -> ProviderError {
    let provider = config.name.clone();
    let message = format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication { provider, message }
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimit { provider, message },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout {
            provider,
            timeout_ms: config.timeout.as_millis() as u64,
        },
        _ => ProviderError::Request { provider, message },
    }
}

/// Cost in USD rounded to six decimals. Exact model match first, then
/// prefix (dated model ids), then the first row of the table.
pub(crate) fn price(table: PriceTable, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let (_, input_price, output_price) = table
        .iter()
        .find(|(name, _, _)| *name == model)
        .or_else(|| table.iter().find(|(name, _, _)| model.starts_with(name)))
        .copied()
        .unwrap_or(table[0]);

    let cost = (input_tokens as f64 / 1_000_000.0) * input_price
        + (output_tokens as f64 / 1_000_000.0) * output_price;
    (cost * 1_000_000.0).round() / 1_000_000.0
}

/// Assemble the provider response for a parsed model answer
pub(crate) fn signal_response(
    config: &ProviderConfig,
    signal: ParsedSignal,
    latency_ms: f64,
    tokens: u64,
    cost: f64,
) -> ProviderResponse {
    let mut response = ProviderResponse::new(&config.name, signal.decision, signal.confidence, signal.reasoning)
        .with_model(config.model.clone())
        .with_usage(latency_ms, tokens, cost);
    response.risk_level = signal.risk_level;
    response.stop_loss = signal.stop_loss;
    response.take_profit = signal.take_profit;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: PriceTable = &[("big", 10.0, 30.0), ("small", 1.0, 2.0)];

    #[test]
    fn test_price_lookup() {
        // 1000 * 10/1M + 500 * 30/1M
        assert!((price(TABLE, "big", 1000, 500) - 0.025).abs() < 1e-9);
        assert!((price(TABLE, "small-2024-01-01", 1_000_000, 0) - 1.0).abs() < 1e-9);
        assert!((price(TABLE, "unknown", 1_000_000, 0) - 10.0).abs() < 1e-9);
        assert_eq!(price(TABLE, "big", 0, 0), 0.0);
    }

    #[test]
    fn test_status_mapping() {
        let config = ProviderConfig::new("remote", "big", "key");
        assert!(status_error(&config, StatusCode::UNAUTHORIZED, "bad key").is_authentication());
        assert!(status_error(&config, StatusCode::FORBIDDEN, "").is_authentication());
        assert!(matches!(
            status_error(&config, StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimit { .. }
        ));
        assert!(matches!(
            status_error(&config, StatusCode::GATEWAY_TIMEOUT, ""),
            ProviderError::Timeout { .. }
        ));
        assert!(matches!(
            status_error(&config, StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            ProviderError::Request { .. }
        ));
    }

    #[test]
    fn test_base_url_resolution() {
        let config = ProviderConfig::new("remote", "big", "key");
        assert_eq!(resolve_base_url(&config, "https://api.example.com/v1/"), "https://api.example.com/v1");

        let config = config.with_base_url("http://localhost:8080/");
        assert_eq!(resolve_base_url(&config, "https://api.example.com/v1"), "http://localhost:8080");
    }
}
