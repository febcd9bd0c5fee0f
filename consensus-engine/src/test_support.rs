//! Scripted providers for tests

use async_trait::async_trait;
use common::{Decision, ProviderResponse, SignalRequest};
use signal_providers::{ProviderConfig, ProviderError, ProviderHandle, ProviderState, SignalProvider};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Behavior {
    Respond { decision: Decision, confidence: f64 },
    Fail(ProviderError),
    Delay { delay: Duration, decision: Decision, confidence: f64 },
    Hang,
}

pub struct MockProvider {
    state: ProviderState,
    behavior: Behavior,
    healthy: AtomicBool,
    health_delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockProvider {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self::with_config(ProviderConfig::new(name, "mock-model", "test-key"), behavior)
    }

    pub fn with_config(config: ProviderConfig, behavior: Behavior) -> Self {
        Self {
            state: ProviderState::new(config).unwrap(),
            behavior,
            healthy: AtomicBool::new(true),
            health_delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn weighted(name: &str, weight: f64, behavior: Behavior) -> Self {
        let config = ProviderConfig::new(name, "mock-model", "test-key")
            .with_weight(weight)
            .unwrap();
        Self::with_config(config, behavior)
    }

    pub fn responding(name: &str, decision: Decision, confidence: f64) -> Self {
        Self::new(name, Behavior::Respond { decision, confidence })
    }

    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self::new(name, Behavior::Fail(error))
    }

    pub fn hanging(name: &str) -> Self {
        Self::new(name, Behavior::Hang)
    }

    pub fn with_health(self, healthy: bool) -> Self {
        self.healthy.store(healthy, Ordering::SeqCst);
        self
    }

    /// Health probe that takes `delay` before answering
    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.health_delay = Some(delay);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn handle(self) -> ProviderHandle {
        Arc::new(self)
    }

    fn respond(&self, decision: Decision, confidence: f64) -> ProviderResponse {
        ProviderResponse::new(
            self.state.name(),
            decision,
            confidence,
            format!("{} sees {}", self.state.name(), decision),
        )
        .with_model(self.state.config().model.clone())
        .with_usage(10.0, 100, 0.001)
    }
}

#[async_trait]
impl SignalProvider for MockProvider {
    fn state(&self) -> &ProviderState {
        &self.state
    }

    async fn generate_signal(&self, _request: &SignalRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Respond { decision, confidence } => Ok(self.respond(*decision, *confidence)),
            Behavior::Fail(error) => Err(error.clone()),
            Behavior::Delay { delay, decision, confidence } => {
                tokio::time::sleep(*delay).await;
                Ok(self.respond(*decision, *confidence))
            }
            Behavior::Hang => std::future::pending().await,
        }
    }

    async fn health_check(&self) -> bool {
        if let Some(delay) = self.health_delay {
            tokio::time::sleep(delay).await;
        }
        self.healthy.load(Ordering::SeqCst)
    }

    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens + output_tokens) as f64 * 0.000_001
    }
}

pub fn auth_error(name: &str) -> ProviderError {
    ProviderError::Authentication {
        provider: name.to_string(),
        message: "invalid api key".to_string(),
    }
}

pub fn rate_limit_error(name: &str) -> ProviderError {
    ProviderError::RateLimit {
        provider: name.to_string(),
        message: "slow down".to_string(),
    }
}
