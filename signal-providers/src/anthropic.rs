//! Provider for Anthropic's Messages API (Claude models)

use super::error::ProviderError;
use super::http::{self, PriceTable};
use super::parse::parse_signal;
use super::prompt::build_prompt;
use super::provider::{ProviderConfig, ProviderHandle, ProviderState, SignalProvider};
use super::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use common::{ProviderResponse, SignalRequest};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const PRICING: PriceTable = &[
    ("claude-3-5-sonnet-20241022", 3.0, 15.0),
    ("claude-3-opus-20240229", 15.0, 75.0),
    ("claude-3-sonnet-20240229", 3.0, 15.0),
    ("claude-3-haiku-20240307", 0.25, 1.25),
];

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Claude backed signal provider
pub struct AnthropicProvider {
    state: ProviderState,
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = http::build_client(&config)?;
        let base_url = http::resolve_base_url(&config, ANTHROPIC_BASE_URL);
        let retry = RetryPolicy::from_max_retries(config.max_retries);
        let state = ProviderState::new(config)?;

        info!("{} provider targeting {}", state.name(), base_url);

        Ok(Self {
            state,
            client,
            base_url,
            retry,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Factory constructor for the `anthropic` kind
    pub fn create(config: ProviderConfig) -> Result<ProviderHandle, ProviderError> {
        Ok(Arc::new(Self::new(config)?))
    }

    async fn send_message(&self, prompt: &str) -> Result<(String, MessagesUsage), ProviderError> {
        let config = self.state.config();
        let body = MessagesRequest {
            model: &config.model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(config, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http::status_error(config, status, &text));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(self.state.name(), e.to_string()))?;

        let text = message_text(parsed.content)
            .ok_or_else(|| ProviderError::invalid_response(self.state.name(), "message has no text content"))?;
        Ok((text, parsed.usage.unwrap_or_default()))
    }
}

/// Concatenated text blocks of a message, `None` when there are none
fn message_text(blocks: Vec<ContentBlock>) -> Option<String> {
    let text: Vec<String> = blocks
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}

#[async_trait]
impl SignalProvider for AnthropicProvider {
    fn state(&self) -> &ProviderState {
        &self.state
    }

    async fn generate_signal(&self, request: &SignalRequest) -> Result<ProviderResponse, ProviderError> {
        let started = Instant::now();
        let prompt = build_prompt(request);
        let name = self.state.name();

        debug!(
            "{}: generating signal for {} on {} using {}",
            name,
            request.pair,
            request.timeframe,
            self.state.config().model
        );

        let prompt = prompt.as_str();
        let (signal, usage) = retry_with_backoff(&self.retry, name, move || async move {
            let (text, usage) = self.send_message(prompt).await?;
            let signal = parse_signal(name, &text)?;
            Ok((signal, usage))
        })
        .await?;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let tokens = usage.input_tokens + usage.output_tokens;
        let cost = self.estimate_cost(usage.input_tokens, usage.output_tokens);

        info!(
            "{} signal generated: {} (confidence: {:.2}, latency: {:.0}ms, tokens: {})",
            name, signal.decision, signal.confidence, latency_ms, tokens
        );

        Ok(http::signal_response(self.state.config(), signal, latency_ms, tokens, cost))
    }

    async fn health_check(&self) -> bool {
        let config = self.state.config();
        let result = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("x-api-key", &config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!("{} health check: OK", self.state.name());
                true
            }
            Ok(response) => {
                warn!("{} health check returned {}", self.state.name(), response.status());
                false
            }
            Err(e) => {
                warn!("{} health check failed: {}", self.state.name(), e);
                false
            }
        }
    }

    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        http::price(PRICING, &self.state.config().model, input_tokens, output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(model: &str) -> AnthropicProvider {
        AnthropicProvider::new(ProviderConfig::new("anthropic", model, "sk-ant-test")).unwrap()
    }

    #[test]
    fn test_estimate_cost() {
        let sonnet = provider("claude-3-5-sonnet-20241022");
        // 1000 * 3/1M + 500 * 15/1M
        assert!((sonnet.estimate_cost(1000, 500) - 0.0105).abs() < 1e-9);

        let haiku = provider("claude-3-haiku-20240307");
        assert!((haiku.estimate_cost(1_000_000, 1_000_000) - 1.5).abs() < 1e-9);

        // Unknown models are priced like sonnet 3.5
        let unknown = provider("claude-next");
        assert!((unknown.estimate_cost(1_000_000, 0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_message_text_joins_text_blocks() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "text", "text": "{\"decision\": \"BUY\","},
                    {"type": "tool_use", "id": "x"},
                    {"type": "text", "text": "\"confidence\": 0.8, \"reasoning\": \"trend\"}"}
                ],
                "usage": {"input_tokens": 120, "output_tokens": 40}
            }"#,
        )
        .unwrap();

        let usage = response.usage.unwrap_or_default();
        assert_eq!(usage.input_tokens + usage.output_tokens, 160);

        let text = message_text(response.content).unwrap();
        let signal = parse_signal("anthropic", &text).unwrap();
        assert_eq!(signal.decision, common::Decision::Buy);
        assert_eq!(signal.reasoning, "trend");

        assert!(message_text(Vec::new()).is_none());
    }

    #[test]
    fn test_base_url_default_and_override() {
        assert_eq!(provider("claude-3-5-sonnet-20241022").base_url(), ANTHROPIC_BASE_URL);

        let config = ProviderConfig::new("claude", "claude-3-opus-20240229", "sk-ant-test")
            .with_base_url("http://localhost:9000/v1/");
        assert_eq!(AnthropicProvider::new(config).unwrap().base_url(), "http://localhost:9000/v1");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_without_panicking() {
        let config = ProviderConfig::new("claude", "claude-3-haiku-20240307", "sk-ant-test")
            .with_base_url("http://127.0.0.1:9")
            .with_max_retries(1)
            .with_timeout(std::time::Duration::from_millis(500));
        let p = AnthropicProvider::new(config).unwrap();

        let request = SignalRequest::new("ETH/USDT", common::Timeframe::OneHour, 2400.0);
        let err = p.generate_signal(&request).await.unwrap_err();
        assert_eq!(err.provider(), "claude");
        assert!(!p.health_check().await);
    }
}
