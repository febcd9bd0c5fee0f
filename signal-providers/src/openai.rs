//! Provider for OpenAI-compatible chat-completions endpoints
//!
//! Works against api.openai.com and any service exposing the same wire
//! format (x.ai's Grok API, local gateways) through `base_url`.

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

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROK_BASE_URL: &str = "https://api.x.ai/v1";

/// USD per one million (input, output) tokens
const PRICING: PriceTable = &[
    ("gpt-4-turbo", 10.0, 30.0),
    ("gpt-4o", 2.5, 10.0),
    ("gpt-4o-mini", 0.15, 0.6),
    ("gpt-3.5-turbo", 0.5, 1.5),
    ("grok-beta", 5.0, 15.0),
    ("grok-2", 2.0, 10.0),
];

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

struct Completion {
    content: String,
    usage: ChatUsage,
}

/// Chat-completions backed signal provider
pub struct OpenAiCompatibleProvider {
    state: ProviderState,
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAiCompatibleProvider {
    /// Create a provider, using `default_base_url` unless the config overrides it
    pub fn new(config: ProviderConfig, default_base_url: &str) -> Result<Self, ProviderError> {
        let client = http::build_client(&config)?;
        let base_url = http::resolve_base_url(&config, default_base_url);
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

    /// Factory constructor for the `openai` kind
    pub fn create_openai(config: ProviderConfig) -> Result<ProviderHandle, ProviderError> {
        Ok(Arc::new(Self::new(config, OPENAI_BASE_URL)?))
    }

    /// Factory constructor for the `grok` kind
    pub fn create_grok(config: ProviderConfig) -> Result<ProviderHandle, ProviderError> {
        Ok(Arc::new(Self::new(config, GROK_BASE_URL)?))
    }

    async fn complete(&self, prompt: &str) -> Result<Completion, ProviderError> {
        let config = self.state.config();
        let body = ChatRequest {
            model: &config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(config, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http::status_error(config, status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(self.state.name(), e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderError::invalid_response(self.state.name(), "completion has no content")
            })?;

        Ok(Completion {
            content,
            usage: parsed.usage.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl SignalProvider for OpenAiCompatibleProvider {
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
            let completion = self.complete(prompt).await?;
            let signal = parse_signal(name, &completion.content)?;
            Ok((signal, completion.usage))
        })
        .await?;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let tokens = usage.prompt_tokens + usage.completion_tokens;
        let cost = self.estimate_cost(usage.prompt_tokens, usage.completion_tokens);

        info!(
            "{} signal generated: {} (confidence: {:.2}, latency: {:.0}ms, tokens: {})",
            name, signal.decision, signal.confidence, latency_ms, tokens
        );

        Ok(http::signal_response(self.state.config(), signal, latency_ms, tokens, cost))
    }

    async fn health_check(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.state.config().api_key)
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

    fn provider(model: &str) -> OpenAiCompatibleProvider {
        let config = ProviderConfig::new("openai", model, "sk-test");
        OpenAiCompatibleProvider::new(config, OPENAI_BASE_URL).unwrap()
    }

    #[test]
    fn test_estimate_cost_known_model() {
        let p = provider("gpt-4-turbo");
        // 1000 * 10/1M + 500 * 30/1M
        assert!((p.estimate_cost(1000, 500) - 0.025).abs() < 1e-9);
        assert_eq!(p.estimate_cost(0, 0), 0.0);
    }

    #[test]
    fn test_estimate_cost_prefix_and_fallback() {
        let dated = provider("gpt-4o-mini-2024-07-18");
        assert!((dated.estimate_cost(1_000_000, 0) - 0.15).abs() < 1e-9);

        let unknown = provider("some-local-model");
        assert!((unknown.estimate_cost(1_000_000, 0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_base_url_override() {
        let config = ProviderConfig::new("grok", "grok-beta", "xai-test")
            .with_base_url("http://localhost:8080/v1/");
        let p = OpenAiCompatibleProvider::new(config, GROK_BASE_URL).unwrap();
        assert_eq!(p.base_url(), "http://localhost:8080/v1");

        let default = OpenAiCompatibleProvider::new(
            ProviderConfig::new("grok", "grok-beta", "xai-test"),
            GROK_BASE_URL,
        )
        .unwrap();
        assert_eq!(default.base_url(), GROK_BASE_URL);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_without_panicking() {
        let config = ProviderConfig::new("local", "gpt-4o", "sk-test")
            .with_base_url("http://127.0.0.1:9")
            .with_max_retries(1)
            .with_timeout(std::time::Duration::from_millis(500));
        let p = OpenAiCompatibleProvider::new(config, OPENAI_BASE_URL).unwrap();

        let request = SignalRequest::new("BTC/USDT", common::Timeframe::FiveMinutes, 100.0);
        let err = p.generate_signal(&request).await.unwrap_err();
        assert_eq!(err.provider(), "local");
        assert!(!p.health_check().await);
    }
}
