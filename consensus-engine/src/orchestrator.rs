//! Orchestrator - parallel fan-out to providers and consensus
//!
//! One task per available provider, all bounded by a shared deadline.
//! Providers that fail or miss the deadline are recorded as failures without
//! affecting their siblings; whatever succeeded goes to the aggregator if it
//! meets the quorum.

use super::aggregator::{SignalAggregator, DEFAULT_WEIGHT};
use super::error::ConsensusError;
use super::registry::{ProviderRegistry, RegistryStatus};
use chrono::{DateTime, Utc};
use common::{ConsensusResult, ProviderResponse, SignalRequest};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use signal_providers::{validate_response, ProviderError, ProviderHandle, SignalProvider};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout_at;
use tracing::{debug, error, info, warn};

/// Deadline used when `now + timeout` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Instant `timeout` from now, saturating for very large timeouts
fn deadline_after(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Configuration for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Minimum number of successful providers required
    pub min_providers: usize,
    /// Consensus confidence below this is reported as not actionable
    pub min_confidence: f64,
    /// Deadline for the whole fan-out
    pub timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_providers: 1,
            min_confidence: 0.5,
            timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.min_providers == 0 {
            return Err(ConsensusError::Validation(
                "min_providers must be at least 1".to_string(),
            ));
        }
        if !self.min_confidence.is_finite() || !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConsensusError::Validation(format!(
                "min_confidence must be between 0 and 1, got {}",
                self.min_confidence
            )));
        }
        if self.timeout.is_zero() {
            return Err(ConsensusError::Validation(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Request counters since start or the last reset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub configuration: OrchestratorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub orchestrator: OrchestratorMetrics,
    pub registry: RegistryStatus,
}

/// Result of probing every registered provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub available_providers: usize,
    pub required_providers: usize,
    pub provider_health: BTreeMap<String, bool>,
    pub metrics: HealthMetrics,
    pub timestamp: DateTime<Utc>,
}

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    config: OrchestratorConfig,

    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, config: OrchestratorConfig) -> Result<Self, ConsensusError> {
        config.validate()?;
        info!(
            "Orchestrator initialized (min_providers={}, min_confidence={}, timeout={:?})",
            config.min_providers, config.min_confidence, config.timeout
        );
        Ok(Self {
            registry,
            config,
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Consensus using the orchestrator's own configuration
    pub async fn generate_consensus(
        &self,
        request: &SignalRequest,
        weight_overrides: Option<&HashMap<String, f64>>,
    ) -> Result<ConsensusResult, ConsensusError> {
        self.generate_consensus_with(request, weight_overrides, &self.config)
            .await
    }

    /// Consensus with per-call quorum, confidence threshold and deadline
    pub async fn generate_consensus_with(
        &self,
        request: &SignalRequest,
        weight_overrides: Option<&HashMap<String, f64>>,
        config: &OrchestratorConfig,
    ) -> Result<ConsensusResult, ConsensusError> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let result = self.run(request, weight_overrides, config).await;
        match &result {
            Ok(_) => self.successful_requests.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed_requests.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn run(
        &self,
        request: &SignalRequest,
        weight_overrides: Option<&HashMap<String, f64>>,
        config: &OrchestratorConfig,
    ) -> Result<ConsensusResult, ConsensusError> {
        config.validate()?;
        let started = Instant::now();

        info!(
            "Generating consensus signal for {} ({}) at price {}",
            request.pair, request.timeframe, request.current_price
        );

        let providers = self.registry.get_available();
        let names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();

        if providers.is_empty() || providers.len() < config.min_providers {
            error!(
                "Insufficient available providers: {} < {} (available: {:?})",
                providers.len(),
                config.min_providers,
                names
            );
            return Err(ConsensusError::InsufficientProviders {
                available: providers.len(),
                required: config.min_providers,
                providers: names,
            });
        }

        info!("Querying {} providers: {:?}", providers.len(), names);

        let (responses, failures) = self.call_providers(&providers, request, config.timeout).await;

        if !failures.is_empty() {
            warn!(
                "{} provider(s) failed: {:?}",
                failures.len(),
                failures.keys().collect::<Vec<_>>()
            );
        }

        let succeeded: Vec<String> = responses.iter().map(|r| r.provider_name.clone()).collect();
        if responses.len() < config.min_providers {
            error!(
                "Insufficient successful provider responses: {} < {}",
                responses.len(),
                config.min_providers
            );
            return Err(ConsensusError::InsufficientSuccessfulResponses {
                successful: responses.len(),
                required: config.min_providers,
                succeeded,
                failures,
            });
        }

        info!("Received {} successful responses: {:?}", responses.len(), succeeded);

        let weights = self.build_weights(&responses, weight_overrides);
        debug!("Provider weights: {:?}", weights);

        let mut consensus = SignalAggregator::new(config.min_providers)
            .aggregate(responses, &weights)
            .map_err(|e| match e {
                ConsensusError::AggregationFailure(_) => e,
                other => ConsensusError::AggregationFailure(other.to_string()),
            })?;

        consensus.total_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        consensus.total_providers = providers.len();

        info!(
            "Consensus reached: {} (confidence: {:.2}, agreement: {:.2}, providers: {}/{}, latency: {:.0}ms, cost: ${:.6})",
            consensus.decision,
            consensus.confidence,
            consensus.agreement_score,
            consensus.participating_providers,
            consensus.total_providers,
            consensus.total_latency_ms,
            consensus.total_cost_usd
        );
        if !consensus.is_actionable(config.min_confidence) {
            warn!(
                "Consensus {} at confidence {:.2} is not actionable (min_confidence {:.2})",
                consensus.decision, consensus.confidence, config.min_confidence
            );
        }

        Ok(consensus)
    }

    /// Call every provider concurrently; nothing outlives `overall_timeout`
    async fn call_providers(
        &self,
        providers: &[ProviderHandle],
        request: &SignalRequest,
        overall_timeout: Duration,
    ) -> (Vec<ProviderResponse>, BTreeMap<String, ProviderError>) {
        let deadline = deadline_after(overall_timeout);
        let request = Arc::new(request.clone());

        let tasks = providers.iter().map(|provider| {
            let provider = provider.clone();
            let request = request.clone();
            tokio::spawn(async move {
                let name = provider.name().to_string();
                let started = Instant::now();
                debug!("Calling provider: {}", name);

                let outcome = match timeout_at(deadline, provider.generate_signal(&request)).await {
                    Ok(Ok(response)) => validate_response(&response).map(|_| response),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ProviderError::Timeout {
                        provider: name.clone(),
                        timeout_ms: overall_timeout.as_millis() as u64,
                    }),
                };

                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                provider.update_metrics(latency_ms, outcome.as_ref().err());
                match &outcome {
                    Ok(response) => debug!(
                        "Provider {} responded: {} (confidence: {:.2})",
                        name, response.decision, response.confidence
                    ),
                    Err(e) if e.is_authentication() => error!("Authentication failed for {}: {}", name, e),
                    Err(e) => warn!("Provider {} failed: {}", name, e),
                }
                outcome
            })
        });

        let results = join_all(tasks).await;

        let mut responses = Vec::new();
        let mut failures = BTreeMap::new();
        for (provider, result) in providers.iter().zip(results) {
            let name = provider.name().to_string();
            match result {
                Ok(Ok(response)) => responses.push(response),
                Ok(Err(e)) => {
                    failures.insert(name, e);
                }
                Err(join_error) => {
                    error!("Provider task for {} aborted: {}", name, join_error);
                    failures.insert(
                        name.clone(),
                        ProviderError::Request {
                            provider: name,
                            message: format!("provider task aborted: {}", join_error),
                        },
                    );
                }
            }
        }
        (responses, failures)
    }

    /// Override, then configured weight, then the default weight
    fn build_weights(
        &self,
        responses: &[ProviderResponse],
        overrides: Option<&HashMap<String, f64>>,
    ) -> HashMap<String, f64> {
        responses
            .iter()
            .map(|response| {
                let name = &response.provider_name;
                let weight = overrides
                    .and_then(|o| o.get(name).copied())
                    .or_else(|| self.registry.get(name).map(|p| p.state().weight()))
                    .unwrap_or(DEFAULT_WEIGHT);
                (name.clone(), weight)
            })
            .collect()
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        OrchestratorMetrics {
            total_requests: total,
            successful_requests: successful,
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            success_rate: if total > 0 { successful as f64 / total as f64 } else { 0.0 },
            configuration: self.config.clone(),
        }
    }

    pub fn reset_metrics(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        info!("Orchestrator metrics reset");
    }

    /// Probe all providers and summarise whether quorum is reachable
    pub async fn health_check(&self) -> HealthReport {
        info!("Performing health check on all providers");
        let provider_health = self.registry.health_check_all().await;
        let available = provider_health.values().filter(|healthy| **healthy).count();

        HealthReport {
            status: if available >= self.config.min_providers {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            available_providers: available,
            required_providers: self.config.min_providers,
            provider_health,
            metrics: HealthMetrics {
                orchestrator: self.metrics(),
                registry: self.registry.status(),
            },
            timestamp: Utc::now(),
        }
    }
}
