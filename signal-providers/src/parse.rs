//! Parsing and validation of provider answers
//!
//! Language models wrap their JSON in prose or markdown fences more often
//! than not, so extraction tries fenced blocks first, then the outermost
//! brace pair, then the raw text.

use super::error::ProviderError;
use common::{Decision, ProviderResponse, RiskLevel};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fenced block pattern is valid");
}

/// Validated content of one provider answer
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSignal {
    pub decision: Decision,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_level: Option<RiskLevel>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// Find the first JSON object embedded in free text
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let fenced = FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim()));

    let braced = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&text[start..=end]),
        _ => None,
    };

    fenced
        .chain(braced)
        .chain(std::iter::once(text.trim()))
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// Parse and validate a raw model answer
pub fn parse_signal(provider: &str, text: &str) -> Result<ParsedSignal, ProviderError> {
    if text.trim().is_empty() {
        return Err(ProviderError::invalid_response(provider, "response text is empty"));
    }

    let object = extract_json_object(text).ok_or_else(|| {
        let preview: String = text.chars().take(200).collect();
        ProviderError::invalid_response(
            provider,
            format!("could not extract a JSON object from response: {}", preview),
        )
    })?;

    // Keys are matched case-insensitively
    let fields: Map<String, Value> = object
        .into_iter()
        .map(|(key, value)| (key.to_lowercase(), value))
        .collect();

    let require = |field: &str| {
        fields.get(field).ok_or_else(|| {
            ProviderError::invalid_response(
                provider,
                format!(
                    "missing required field '{}', available fields: {:?}",
                    field,
                    fields.keys().collect::<Vec<_>>()
                ),
            )
        })
    };

    let decision = match require("decision")? {
        Value::String(s) => s
            .parse::<Decision>()
            .map_err(|e| ProviderError::invalid_response(provider, e.to_string()))?,
        other => {
            return Err(ProviderError::invalid_response(
                provider,
                format!("decision must be a string, got {}", other),
            ))
        }
    };

    let confidence = as_number(require("confidence")?).ok_or_else(|| {
        ProviderError::invalid_response(provider, "confidence must be a number")
    })?;
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(ProviderError::invalid_response(
            provider,
            format!("confidence must be between 0 and 1, got {}", confidence),
        ));
    }

    let reasoning = match require("reasoning")? {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if reasoning.is_empty() {
        return Err(ProviderError::invalid_response(provider, "reasoning cannot be empty"));
    }

    let risk_level = match fields.get("risk_level") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(value) => match value.as_str().map(str::parse::<RiskLevel>) {
            Some(Ok(level)) => Some(level),
            _ => {
                warn!("{}: ignoring invalid risk_level {}", provider, value);
                None
            }
        },
    };

    let stop_loss = optional_price(provider, &fields, &["suggested_stop_loss", "stop_loss"]);
    let take_profit = optional_price(provider, &fields, &["suggested_take_profit", "take_profit"]);

    let parsed = ParsedSignal {
        decision,
        confidence,
        reasoning,
        risk_level,
        stop_loss,
        take_profit,
    };
    debug!("{}: parsed signal {:?}", provider, parsed);
    Ok(parsed)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn optional_price(provider: &str, fields: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    let (key, value) = keys
        .iter()
        .find_map(|key| fields.get(*key).map(|value| (*key, value)))?;
    if value.is_null() {
        return None;
    }
    match as_number(value) {
        Some(price) if price.is_finite() => Some(price),
        _ => {
            warn!("{}: ignoring invalid {} {}", provider, key, value);
            None
        }
    }
}

/// Reject responses that violate the provider contract
///
/// Applied at the orchestration boundary so a misbehaving adapter can never
/// slip a malformed answer into the vote.
pub fn validate_response(response: &ProviderResponse) -> Result<(), ProviderError> {
    let provider = response.provider_name.as_str();
    if provider.is_empty() {
        return Err(ProviderError::invalid_response("<unnamed>", "provider name is empty"));
    }
    if !response.confidence.is_finite() || !(0.0..=1.0).contains(&response.confidence) {
        return Err(ProviderError::invalid_response(
            provider,
            format!("confidence must be between 0 and 1, got {}", response.confidence),
        ));
    }
    if response.reasoning.trim().is_empty() {
        return Err(ProviderError::invalid_response(provider, "reasoning cannot be empty"));
    }
    Ok(())
}
