//! Consensus engine - the request-level entry point
//!
//! Validates incoming requests, then hands them to the orchestrator.

use super::error::ConsensusError;
use super::orchestrator::{HealthReport, Orchestrator, OrchestratorConfig, OrchestratorMetrics};
use super::registry::ProviderRegistry;
use common::{ConsensusResult, MarketContext, SignalRequest, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Inbound consensus request as received from callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRequest {
    #[serde(default)]
    pub market_context: MarketContext,
    pub pair: String,
    pub timeframe: String,
    pub current_price: f64,
    #[serde(default)]
    pub provider_weights: Option<HashMap<String, f64>>,
}

impl ConsensusRequest {
    /// Check the request and convert it into a provider-facing signal request
    pub fn validate(&self) -> Result<SignalRequest, ConsensusError> {
        let pair = self.pair.trim();
        if pair.is_empty() {
            return Err(ConsensusError::Validation("pair cannot be empty".to_string()));
        }

        let timeframe: Timeframe = self.timeframe.parse().map_err(|_| {
            ConsensusError::Validation(format!(
                "invalid timeframe '{}', expected one of {}",
                self.timeframe,
                Timeframe::ALL.map(|t| t.as_str()).join(", ")
            ))
        })?;

        if !self.current_price.is_finite() || self.current_price <= 0.0 {
            return Err(ConsensusError::Validation(format!(
                "current_price must be a positive number, got {}",
                self.current_price
            )));
        }

        if let Some(weights) = &self.provider_weights {
            for (name, weight) in weights {
                if !weight.is_finite() || !(0.0..=1.0).contains(weight) {
                    return Err(ConsensusError::Validation(format!(
                        "weight for provider '{}' must be between 0 and 1, got {}",
                        name, weight
                    )));
                }
            }
        }

        Ok(SignalRequest::new(pair, timeframe, self.current_price)
            .with_context(self.market_context.clone()))
    }
}

pub struct ConsensusEngine {
    registry: Arc<ProviderRegistry>,
    orchestrator: Orchestrator,
}

impl ConsensusEngine {
    pub fn new(registry: Arc<ProviderRegistry>, config: OrchestratorConfig) -> Result<Self, ConsensusError> {
        if registry.is_empty() {
            warn!("Consensus engine created with an empty provider registry");
        }
        let orchestrator = Orchestrator::new(registry.clone(), config)?;
        Ok(Self {
            registry,
            orchestrator,
        })
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn generate_consensus(&self, request: &ConsensusRequest) -> Result<ConsensusResult, ConsensusError> {
        let signal_request = request.validate()?;
        self.orchestrator
            .generate_consensus(&signal_request, request.provider_weights.as_ref())
            .await
    }

    pub async fn health_check(&self) -> HealthReport {
        self.orchestrator.health_check().await
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        self.orchestrator.metrics()
    }

    pub fn reset_metrics(&self) {
        self.orchestrator.reset_metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Behavior, MockProvider};
    use common::{Decision, RiskLevel};
    use serde_json::json;
    use signal_providers::ProviderFactory;

    fn request_json() -> serde_json::Value {
        json!({
            "market_context": {"rsi": 61.5, "macd": "bullish_cross", "closes": [1, 2, 3]},
            "pair": "ETH/USDT",
            "timeframe": "1h",
            "current_price": 2450.25
        })
    }

    #[test]
    fn test_request_validation() {
        let request: ConsensusRequest = serde_json::from_value(request_json()).unwrap();
        let signal = request.validate().unwrap();
        assert_eq!(signal.pair, "ETH/USDT");
        assert_eq!(signal.timeframe, Timeframe::OneHour);
        assert_eq!(signal.market_context.len(), 3);

        let mut bad = request.clone();
        bad.timeframe = "2h".to_string();
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("1m, 5m, 15m, 30m, 1h, 4h, 1d"));

        let mut bad = request.clone();
        bad.current_price = -1.0;
        assert!(matches!(bad.validate(), Err(ConsensusError::Validation(_))));

        let mut bad = request.clone();
        bad.pair = "  ".to_string();
        assert!(bad.validate().is_err());

        let mut bad = request;
        bad.provider_weights = Some(HashMap::from([("openai".to_string(), 1.5)]));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_market_context_defaults_to_empty() {
        let request: ConsensusRequest = serde_json::from_value(json!({
            "pair": "BTC/USDT",
            "timeframe": "5m",
            "current_price": 43000.0
        }))
        .unwrap();
        assert!(request.validate().unwrap().market_context.is_empty());
        assert!(request.provider_weights.is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_consensus() {
        let registry = Arc::new(ProviderRegistry::new(ProviderFactory::new()));
        let providers = [
            ("alpha", 1.0, Decision::Buy, 0.85),
            ("beta", 1.0, Decision::Buy, 0.90),
            ("gamma", 0.8, Decision::Hold, 0.75),
            ("delta", 0.7, Decision::Buy, 0.80),
        ];
        for (name, weight, decision, confidence) in providers {
            registry.register(
                name,
                MockProvider::weighted(name, weight, Behavior::Respond { decision, confidence }).handle(),
            );
        }

        let engine = ConsensusEngine::new(registry, OrchestratorConfig::default()).unwrap();
        let request: ConsensusRequest = serde_json::from_value(request_json()).unwrap();
        let result = engine.generate_consensus(&request).await.unwrap();

        assert_eq!(result.decision, Decision::Buy);
        assert_eq!(result.vote_breakdown.get(&Decision::Buy), Some(&3));
        assert_eq!(result.vote_breakdown.get(&Decision::Hold), Some(&1));
        assert!((result.agreement_score - 0.79).abs() < 0.01);
        assert_eq!(result.participating_providers, 4);
        assert_eq!(result.total_providers, 4);
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert!(result.is_actionable(0.5));
        assert_eq!(result.supporters().count(), 3);
        assert!((result.total_cost_usd - 0.004).abs() < 1e-9);
        assert_eq!(result.total_tokens, 400);

        assert_eq!(engine.metrics().successful_requests, 1);
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_providers() {
        let provider = Arc::new(MockProvider::responding("a", Decision::Buy, 0.9));
        let registry = Arc::new(ProviderRegistry::new(ProviderFactory::new()));
        registry.register("a", provider.clone());
        let engine = ConsensusEngine::new(registry, OrchestratorConfig::default()).unwrap();

        let mut request: ConsensusRequest = serde_json::from_value(request_json()).unwrap();
        request.timeframe = "weekly".to_string();
        assert!(matches!(
            engine.generate_consensus(&request).await,
            Err(ConsensusError::Validation(_))
        ));
        assert_eq!(provider.calls(), 0);
        assert_eq!(engine.metrics().total_requests, 0);
    }
}
