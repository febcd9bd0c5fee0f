//! Provider for Google's Gemini `generateContent` API

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

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const PRICING: PriceTable = &[
    ("gemini-1.5-pro", 3.5, 10.5),
    ("gemini-1.5-flash", 0.35, 1.05),
    ("gemini-1.0-pro", 0.5, 1.5),
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

/// Rough token count for text the API did not meter: 4 characters per token
fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// Text of the first candidate, `None` when it has no text parts
fn candidate_text(candidates: Vec<Candidate>) -> Option<String> {
    let parts = candidates.into_iter().next()?.content?.parts;
    let text: Vec<String> = parts.into_iter().filter_map(|part| part.text).collect();
    if text.is_empty() {
        None
    } else {
        Some(text.concat())
    }
}

/// Gemini backed signal provider
pub struct GeminiProvider {
    state: ProviderState,
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = http::build_client(&config)?;
        let base_url = http::resolve_base_url(&config, GEMINI_BASE_URL);
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

    /// Factory constructor for the `gemini` kind
    pub fn create(config: ProviderConfig) -> Result<ProviderHandle, ProviderError> {
        Ok(Arc::new(Self::new(config)?))
    }

    fn model_url(&self) -> String {
        format!("{}/models/{}", self.base_url, self.state.config().model)
    }

    /// Returns the answer text and (input, output) token counts
    async fn generate_content(&self, prompt: &str) -> Result<(String, u64, u64), ProviderError> {
        let config = self.state.config();
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: config.max_tokens,
                temperature: config.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}:generateContent", self.model_url()))
            .header("x-goog-api-key", &config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(config, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http::status_error(config, status, &text));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(self.state.name(), e.to_string()))?;

        let usage = parsed.usage_metadata;
        let text = candidate_text(parsed.candidates)
            .ok_or_else(|| ProviderError::invalid_response(self.state.name(), "response has no candidate text"))?;

        let (input, output) = match usage {
            Some(usage) => (usage.prompt_token_count, usage.candidates_token_count),
            None => (estimate_tokens(prompt), estimate_tokens(&text)),
        };
        Ok((text, input, output))
    }
}

#[async_trait]
impl SignalProvider for GeminiProvider {
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
        let (signal, input_tokens, output_tokens) =
            retry_with_backoff(&self.retry, name, move || async move {
                let (text, input, output) = self.generate_content(prompt).await?;
                let signal = parse_signal(name, &text)?;
                Ok((signal, input, output))
            })
            .await?;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let tokens = input_tokens + output_tokens;
        let cost = self.estimate_cost(input_tokens, output_tokens);

        info!(
            "{} signal generated: {} (confidence: {:.2}, latency: {:.0}ms, tokens: {})",
            name, signal.decision, signal.confidence, latency_ms, tokens
        );

        Ok(http::signal_response(self.state.config(), signal, latency_ms, tokens, cost))
    }

    async fn health_check(&self) -> bool {
        let result = self
            .client
            .get(self.model_url())
            .header("x-goog-api-key", &self.state.config().api_key)
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
