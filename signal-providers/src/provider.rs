//! Signal provider contract and per-provider runtime state
//!
//! Every analyst backend implements [`SignalProvider`]. The provider owns a
//! [`ProviderState`] holding its configuration plus the health and usage
//! counters that the registry reads and the orchestrator feeds back into.

use super::error::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ProviderResponse, SignalRequest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Static configuration for one provider instance
#[derive(Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub model: String,
    pub api_key: String,
    /// Influence on the consensus vote, 0.0 to 1.0
    pub weight: f64,
    pub enabled: bool,
    pub max_retries: u32,
    /// Per-attempt timeout
    pub timeout: Duration,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Custom endpoint, adapters fall back to their public API when unset
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            api_key: api_key.into(),
            weight: 1.0,
            enabled: true,
            max_retries: 3,
            timeout: Duration::from_secs(30),
            temperature: 0.7,
            max_tokens: 1024,
            base_url: None,
        }
    }

    /// Set the consensus weight, rejecting values outside [0, 1]
    pub fn with_weight(mut self, weight: f64) -> Result<Self, ProviderError> {
        self.weight = weight;
        self.validate()?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if !self.weight.is_finite() || !(0.0..=1.0).contains(&self.weight) {
            return Err(ProviderError::invalid_config(
                &self.name,
                format!("weight must be between 0 and 1, got {}", self.weight),
            ));
        }
        if self.max_tokens < 1 {
            return Err(ProviderError::invalid_config(&self.name, "max_tokens must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(ProviderError::invalid_config(&self.name, "timeout must be positive"));
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("weight", &self.weight)
            .field("enabled", &self.enabled)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Operational status of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Active,
    Degraded,
    Unavailable,
    /// Reserved for rate-limit policy; treated like `Unavailable`
    CircuitOpen,
}

impl ProviderStatus {
    pub const ALL: [ProviderStatus; 4] = [
        ProviderStatus::Active,
        ProviderStatus::Degraded,
        ProviderStatus::Unavailable,
        ProviderStatus::CircuitOpen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Active => "active",
            ProviderStatus::Degraded => "degraded",
            ProviderStatus::Unavailable => "unavailable",
            ProviderStatus::CircuitOpen => "circuit_open",
        }
    }

    /// Whether the orchestrator may route requests to a provider in this status
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ProviderStatus::Active | ProviderStatus::Degraded)
    }

    fn to_u8(self) -> u8 {
        match self {
            ProviderStatus::Active => 0,
            ProviderStatus::Degraded => 1,
            ProviderStatus::Unavailable => 2,
            ProviderStatus::CircuitOpen => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProviderStatus::Active,
            1 => ProviderStatus::Degraded,
            2 => ProviderStatus::Unavailable,
            _ => ProviderStatus::CircuitOpen,
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct LastObservation {
    error: Option<String>,
    request_time: Option<DateTime<Utc>>,
}

/// Mutable runtime state of one provider
///
/// Counters are atomics and the remaining fields sit behind a lock scoped to
/// this provider, so updates for unrelated providers never contend.
#[derive(Debug)]
pub struct ProviderState {
    config: ProviderConfig,
    enabled: AtomicBool,
    status: AtomicU8,
    request_count: AtomicU64,
    error_count: AtomicU64,
    total_latency_us: AtomicU64,
    last: Mutex<LastObservation>,
}

impl ProviderState {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        info!(
            "Initialized {} provider with model {}",
            config.name, config.model
        );
        Ok(Self {
            enabled: AtomicBool::new(config.enabled),
            status: AtomicU8::new(ProviderStatus::Active.to_u8()),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            last: Mutex::new(LastObservation::default()),
            config,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn weight(&self) -> f64 {
        self.config.weight
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ProviderStatus) {
        let previous = ProviderStatus::from_u8(self.status.swap(status.to_u8(), Ordering::AcqRel));
        if previous != status {
            info!("{} status changed: {} -> {}", self.config.name, previous, status);
        }
    }

    /// Move between two statuses only if the provider is still in `from`
    fn transition(&self, from: ProviderStatus, to: ProviderStatus) -> bool {
        let swapped = self
            .status
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            info!("{} status changed: {} -> {}", self.config.name, from, to);
        }
        swapped
    }

    /// Enabled and in a status that accepts requests
    pub fn is_available(&self) -> bool {
        self.is_enabled() && self.status().accepts_requests()
    }

    /// Record a successful call; a degraded provider recovers
    pub fn record_success(&self, latency_ms: f64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add((latency_ms.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
        self.touch(None);
        self.transition(ProviderStatus::Degraded, ProviderStatus::Active);
    }

    /// Record a failed call and apply the matching status transition
    ///
    /// Authentication failures make the provider unavailable until a passing
    /// health check; anything else only degrades an active provider.
    pub fn record_failure(&self, error: &ProviderError) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.touch(Some(error.to_string()));
        warn!("{} error: {}", self.config.name, error);

        if error.is_authentication() {
            if self.status().accepts_requests() {
                self.set_status(ProviderStatus::Unavailable);
            }
        } else {
            self.transition(ProviderStatus::Active, ProviderStatus::Degraded);
        }
    }

    fn touch(&self, error: Option<String>) {
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        last.request_time = Some(Utc::now());
        if error.is_some() {
            last.error = error;
        }
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        let requests = self.request_count.load(Ordering::Relaxed);
        let errors = self.error_count.load(Ordering::Relaxed);
        let successes = requests.saturating_sub(errors);
        let total_latency_ms = self.total_latency_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        ProviderSnapshot {
            name: self.config.name.clone(),
            model: self.config.model.clone(),
            status: self.status(),
            enabled: self.is_enabled(),
            weight: self.config.weight,
            requests,
            errors,
            error_rate: if requests > 0 { errors as f64 / requests as f64 } else { 0.0 },
            avg_latency_ms: if successes > 0 { total_latency_ms / successes as f64 } else { 0.0 },
            total_latency_ms,
            last_request: last.request_time,
            last_error: last.error.clone(),
        }
    }
}

/// Point-in-time view of a provider for status listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub name: String,
    pub model: String,
    pub status: ProviderStatus,
    pub enabled: bool,
    pub weight: f64,
    pub requests: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub total_latency_ms: f64,
    pub last_request: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Capability contract every signal provider implements
///
/// Implementations own their credentials and client; nothing is shared
/// between providers. Retries happen inside `generate_signal`.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Configuration plus runtime health/usage state
    fn state(&self) -> &ProviderState;

    fn name(&self) -> &str {
        self.state().name()
    }

    /// Produce one validated recommendation for the request
    ///
    /// Malformed answers must come back as `ProviderError::InvalidResponse`,
    /// never as a response.
    async fn generate_signal(&self, request: &SignalRequest) -> Result<ProviderResponse, ProviderError>;

    /// Best-effort liveness probe
    async fn health_check(&self) -> bool;

    /// Cost in USD for the given token usage; pure
    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64;

    /// Fold the outcome of one call into this provider's metrics and status
    fn update_metrics(&self, latency_ms: f64, error: Option<&ProviderError>) {
        match error {
            Some(error) => self.state().record_failure(error),
            None => self.state().record_success(latency_ms),
        }
    }
}

/// Shared handle to a registered provider
pub type ProviderHandle = Arc<dyn SignalProvider>;

/// Constructor used by the factory to build providers of one kind
pub type ProviderConstructor = fn(ProviderConfig) -> Result<ProviderHandle, ProviderError>;
