//! Consensus over scripted in-process providers
//!
//! Runs the full engine without network access:
//! 1. Four analysts that answer after a short delay
//! 2. One analyst that never answers and hits the deadline
//! 3. One analyst with a rejected API key
//! 4. A health check and the orchestrator metrics

use anyhow::Result;
use async_trait::async_trait;
use consensus_engine::{
    ConsensusEngine, ConsensusRequest, Decision, OrchestratorConfig, ProviderError,
    ProviderFactory, ProviderRegistry, ProviderResponse, RiskLevel, SignalProvider, SignalRequest,
};
use serde_json::json;
use signal_providers::{ProviderConfig, ProviderState};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

enum Script {
    Answer {
        decision: Decision,
        confidence: f64,
        risk: RiskLevel,
        delay: Duration,
    },
    Silent,
    BadKey,
}

struct ScriptedAnalyst {
    state: ProviderState,
    script: Script,
}

impl ScriptedAnalyst {
    fn new(name: &str, weight: f64, script: Script) -> Result<Arc<Self>> {
        let config = ProviderConfig::new(name, "scripted", "demo-key").with_weight(weight)?;
        Ok(Arc::new(Self {
            state: ProviderState::new(config)?,
            script,
        }))
    }
}

#[async_trait]
impl SignalProvider for ScriptedAnalyst {
    fn state(&self) -> &ProviderState {
        &self.state
    }

    async fn generate_signal(&self, request: &SignalRequest) -> Result<ProviderResponse, ProviderError> {
        match &self.script {
            Script::Answer { decision, confidence, risk, delay } => {
                tokio::time::sleep(*delay).await;
                let stop = request.current_price * 0.97;
                let target = request.current_price * 1.05;
                Ok(ProviderResponse::new(
                    self.state.name(),
                    *decision,
                    *confidence,
                    format!("{} reads {} on {} as {}", self.state.name(), request.pair, request.timeframe, decision),
                )
                .with_risk_level(*risk)
                .with_stop_loss(stop)
                .with_take_profit(target)
                .with_usage(delay.as_secs_f64() * 1000.0, 850, self.estimate_cost(600, 250)))
            }
            Script::Silent => std::future::pending().await,
            Script::BadKey => Err(ProviderError::Authentication {
                provider: self.state.name().to_string(),
                message: "invalid api key".to_string(),
            }),
        }
    }

    async fn health_check(&self) -> bool {
        !matches!(self.script, Script::BadKey)
    }

    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * 2.5 + output_tokens as f64 * 10.0) / 1_000_000.0
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🤖 Signal Consensus Engine - Scripted Example");
    info!("=============================================");

    // Step 1: Register analysts
    let registry = Arc::new(ProviderRegistry::new(ProviderFactory::new()));
    let answer = |decision, confidence, risk, millis| Script::Answer {
        decision,
        confidence,
        risk,
        delay: Duration::from_millis(millis),
    };
    let analysts = vec![
        ScriptedAnalyst::new("momentum", 1.0, answer(Decision::Buy, 0.85, RiskLevel::Medium, 40))?,
        ScriptedAnalyst::new("sentiment", 1.0, answer(Decision::Buy, 0.90, RiskLevel::Low, 80))?,
        ScriptedAnalyst::new("mean-reversion", 0.8, answer(Decision::Hold, 0.75, RiskLevel::Medium, 60))?,
        ScriptedAnalyst::new("volume", 0.7, answer(Decision::Buy, 0.80, RiskLevel::High, 20))?,
        ScriptedAnalyst::new("stalled", 0.5, Script::Silent)?,
        ScriptedAnalyst::new("expired-key", 0.5, Script::BadKey)?,
    ];
    for analyst in analysts {
        let name = analyst.state().name().to_string();
        registry.register(name, analyst);
    }
    info!("✅ {} analysts registered", registry.len());

    // Step 2: Build the engine with a short deadline so the stalled analyst times out
    let engine = ConsensusEngine::new(
        registry.clone(),
        OrchestratorConfig {
            min_providers: 3,
            timeout: Duration::from_millis(500),
            ..Default::default()
        },
    )?;

    // Step 3: Ask for consensus
    let request: ConsensusRequest = serde_json::from_value(json!({
        "market_context": {
            "rsi_14": 58.2,
            "macd_histogram": 12.75,
            "closes": [42850.0, 42910.5, 43020.0, 43100.25, 43180.0, 43250.5],
            "trend": "higher highs on 4h"
        },
        "pair": "BTC/USDT",
        "timeframe": "1h",
        "current_price": 43250.5
    }))?;

    let result = engine.generate_consensus(&request).await?;

    info!("📊 Consensus Result:");
    info!("  Decision: {} (confidence {:.3})", result.decision, result.confidence);
    info!("  Agreement: {:.3}", result.agreement_score);
    info!("  Votes: {:?}", result.vote_breakdown);
    info!("  Weighted: {:?}", result.weighted_votes);
    info!("  Risk: {:?}", result.risk_level);
    info!("  Stop loss: {:?}, take profit: {:?}", result.stop_loss, result.take_profit);
    info!(
        "  Providers: {}/{} participated, latency {:.0}ms, cost ${:.6}",
        result.participating_providers, result.total_providers, result.total_latency_ms, result.total_cost_usd
    );
    info!("  Reasoning: {}", result.reasoning);
    info!("  Actionable at 0.6: {}", result.is_actionable(0.6));

    // Step 4: Health and metrics
    for snapshot in registry.snapshots() {
        info!(
            "  {:<15} {:<12} requests={} errors={}",
            snapshot.name, snapshot.status, snapshot.requests, snapshot.errors
        );
    }

    let health = engine.health_check().await;
    info!("🩺 Health: {:?}, {:?}", health.status, health.provider_health);

    let metrics = engine.metrics();
    info!(
        "📈 Requests: {} total, {} successful, success rate {:.0}%",
        metrics.total_requests,
        metrics.successful_requests,
        metrics.success_rate * 100.0
    );

    Ok(())
}
