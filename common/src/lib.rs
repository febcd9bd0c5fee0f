//! Shared value types for the consensus workspace
//!
//! Everything in here is plain data: the trading decision vocabulary, the
//! request handed to every signal provider, a single provider's answer and
//! the aggregated consensus produced from several answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque key/value market data forwarded verbatim to providers
pub type MarketContext = serde_json::Map<String, serde_json::Value>;

/// Error returned when a string does not name a known enum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseError {}

/// Trading decision a provider can recommend
///
/// Declaration order doubles as the tie-break order used when two decisions
/// carry exactly the same weighted vote mass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl Decision {
    pub const ALL: [Decision; 3] = [Decision::Buy, Decision::Sell, Decision::Hold];

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Buy => "BUY",
            Decision::Sell => "SELL",
            Decision::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Decision::Buy),
            "SELL" => Ok(Decision::Sell),
            "HOLD" => Ok(Decision::Hold),
            _ => Err(ParseError {
                kind: "decision",
                value: s.to_string(),
            }),
        }
    }
}

/// Risk level attached to a recommendation, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            _ => Err(ParseError {
                kind: "risk level",
                value: s.to_string(),
            }),
        }
    }
}

/// Candle timeframe the market context was sampled at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::OneMinute,
        Timeframe::FiveMinutes,
        Timeframe::FifteenMinutes,
        Timeframe::ThirtyMinutes,
        Timeframe::OneHour,
        Timeframe::FourHours,
        Timeframe::OneDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::ThirtyMinutes => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHours => "4h",
            Timeframe::OneDay => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .find(|tf| tf.as_str() == s.trim())
            .copied()
            .ok_or_else(|| ParseError {
                kind: "timeframe",
                value: s.to_string(),
            })
    }
}

/// Everything a provider needs to produce one recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    pub market_context: MarketContext,
    pub pair: String,
    pub timeframe: Timeframe,
    pub current_price: f64,
}

impl SignalRequest {
    pub fn new(pair: impl Into<String>, timeframe: Timeframe, current_price: f64) -> Self {
        Self {
            market_context: MarketContext::new(),
            pair: pair.into(),
            timeframe,
            current_price,
        }
    }

    pub fn with_context(mut self, market_context: MarketContext) -> Self {
        self.market_context = market_context;
        self
    }
}

/// A single provider's validated recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub provider_name: String,
    pub model: String,
    pub decision: Decision,
    pub confidence: f64, // 0.0 to 1.0
    pub reasoning: String,
    pub risk_level: Option<RiskLevel>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub latency_ms: f64,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
}

impl ProviderResponse {
    pub fn new(
        provider_name: impl Into<String>,
        decision: Decision,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            model: String::new(),
            decision,
            confidence,
            reasoning: reasoning.into(),
            risk_level: None,
            stop_loss: None,
            take_profit: None,
            latency_ms: 0.0,
            tokens_used: 0,
            cost_usd: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }

    pub fn with_stop_loss(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_usage(mut self, latency_ms: f64, tokens_used: u64, cost_usd: f64) -> Self {
        self.latency_ms = latency_ms;
        self.tokens_used = tokens_used;
        self.cost_usd = cost_usd;
        self
    }
}

/// Aggregated decision across every provider that answered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub id: Uuid,
    pub decision: Decision,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_level: RiskLevel,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,

    /// Providers asked (orchestration-level)
    pub total_providers: usize,
    /// Providers whose responses were aggregated
    pub participating_providers: usize,
    /// Share of weighted conviction backing the decision (1.0 = unanimous)
    pub agreement_score: f64,
    pub vote_breakdown: BTreeMap<Decision, usize>,
    pub weighted_votes: BTreeMap<Decision, f64>,

    pub total_latency_ms: f64,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub timestamp: DateTime<Utc>,

    pub provider_responses: Vec<ProviderResponse>,
}

impl ConsensusResult {
    /// True when the consensus recommends a trade with enough confidence to act on
    pub fn is_actionable(&self, min_confidence: f64) -> bool {
        self.decision != Decision::Hold && self.confidence >= min_confidence
    }

    /// Responses that voted for the consensus decision
    pub fn supporters(&self) -> impl Iterator<Item = &ProviderResponse> {
        self.provider_responses
            .iter()
            .filter(move |r| r.decision == self.decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_parsing() {
        assert_eq!(" buy ".parse::<Decision>().unwrap(), Decision::Buy);
        assert_eq!("Sell".parse::<Decision>().unwrap(), Decision::Sell);
        assert_eq!("HOLD".parse::<Decision>().unwrap(), Decision::Hold);
        assert!("SHORT".parse::<Decision>().is_err());
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert_eq!(RiskLevel::default(), RiskLevel::Medium);
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
    }

    #[test]
    fn test_timeframe_round_trip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("2h".parse::<Timeframe>().is_err());

        let json = serde_json::to_string(&Timeframe::FourHours).unwrap();
        assert_eq!(json, "\"4h\"");
    }

    #[test]
    fn test_decision_map_keys_serialize_as_strings() {
        let mut votes = BTreeMap::new();
        votes.insert(Decision::Buy, 3usize);
        votes.insert(Decision::Hold, 1usize);
        let json = serde_json::to_string(&votes).unwrap();
        assert_eq!(json, r#"{"BUY":3,"HOLD":1}"#);
    }

    #[test]
    fn test_is_actionable() {
        let result = ConsensusResult {
            id: Uuid::new_v4(),
            decision: Decision::Buy,
            confidence: 0.72,
            reasoning: String::new(),
            risk_level: RiskLevel::Medium,
            stop_loss: None,
            take_profit: None,
            total_providers: 1,
            participating_providers: 1,
            agreement_score: 1.0,
            vote_breakdown: BTreeMap::new(),
            weighted_votes: BTreeMap::new(),
            total_latency_ms: 0.0,
            total_cost_usd: 0.0,
            total_tokens: 0,
            timestamp: Utc::now(),
            provider_responses: vec![],
        };
        assert!(result.is_actionable(0.5));
        assert!(!result.is_actionable(0.8));

        let hold = ConsensusResult {
            decision: Decision::Hold,
            ..result
        };
        assert!(!hold.is_actionable(0.1));
    }
}
