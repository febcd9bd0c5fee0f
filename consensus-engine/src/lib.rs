//! Signal Consensus Engine
//!
//! Turns recommendations from several independent signal providers into one
//! weighted decision:
//! - Provider registry tracking availability, health and weights
//! - Orchestrator fanning out to providers under a shared deadline
//! - Aggregator combining responses by weighted voting
//! - TOML/environment configuration and a request-level engine facade
//! - Command line interface for provider management

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use aggregator::SignalAggregator;
pub use cli::Cli;
pub use config::{
    load_config, read_config_file, set_provider_enabled, EngineConfig, OrchestratorSettings,
    ProviderSettings,
};
pub use engine::{ConsensusEngine, ConsensusRequest};
pub use error::ConsensusError;
pub use orchestrator::{
    HealthReport, HealthStatus, Orchestrator, OrchestratorConfig, OrchestratorMetrics,
};
pub use registry::{ProviderRegistry, RegistryStatus};

// Re-export common types for convenience
pub use common::{ConsensusResult, Decision, ProviderResponse, RiskLevel, SignalRequest, Timeframe};
pub use signal_providers::{ProviderError, ProviderFactory, ProviderStatus, SignalProvider};
