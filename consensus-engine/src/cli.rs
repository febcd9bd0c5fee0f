//! Command line interface
//!
//! consensus-engine                         - Health report as JSON
//! consensus-engine consensus <request>     - Run one consensus round
//! consensus-engine providers list          - Provider kinds and env variables
//! consensus-engine providers status        - Registry status
//! consensus-engine providers health        - Probe every provider
//! consensus-engine providers test <name>   - Probe one provider
//! consensus-engine providers enable <name> - Enable a provider in the config file
//! consensus-engine providers disable <name>
//! consensus-engine init <path>             - Write a configuration template

use super::config::{create_config_template, load_config, set_provider_enabled};
use super::engine::{ConsensusEngine, ConsensusRequest};
use super::registry::{ProviderRegistry, RegistryStatus};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signal_providers::{ProviderFactory, ProviderSnapshot};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

const ENV_HELP: &[(&str, &str)] = &[
    ("API_KEY", "API key (required)"),
    ("ENABLED", "Enable/disable (default: true)"),
    ("MODEL", "Model name (optional)"),
    ("WEIGHT", "Consensus weight (default: 1.0)"),
    ("MAX_TOKENS", "Max tokens (default: 1024)"),
    ("TEMPERATURE", "Temperature (default: 0.7)"),
    ("TIMEOUT", "Timeout in seconds (default: 30)"),
    ("MAX_RETRIES", "Max attempts (default: 3)"),
    ("BASE_URL", "API endpoint override (optional)"),
];

#[derive(Parser, Debug)]
#[command(name = "consensus-engine")]
#[command(version)]
#[command(about = "Multi-provider trading signal consensus", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CONSENSUS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one consensus round for a request JSON file
    Consensus {
        /// Request file with pair, timeframe, current_price and market_context
        request: PathBuf,
    },

    /// Inspect and manage signal providers
    #[command(subcommand)]
    Providers(ProviderCommands),

    /// Write a commented configuration template
    Init {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProviderCommands {
    /// List provider kinds and their environment variables
    List,

    /// Show registry status and per-provider details
    Status,

    /// Run a health check on every provider
    Health,

    /// Run a health check on one provider
    Test { name: String },

    /// Enable a provider in the configuration file
    Enable { name: String },

    /// Disable a provider in the configuration file
    Disable { name: String },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = self.config;
        match self.command {
            None => print_health_report(config.as_deref()).await,
            Some(Commands::Consensus { request }) => run_consensus(config.as_deref(), &request).await,
            Some(Commands::Providers(command)) => command.run(config.as_deref()).await,
            Some(Commands::Init { path, force }) => init_config(&path, force),
        }
    }
}

impl ProviderCommands {
    pub async fn run(self, config: Option<&Path>) -> Result<()> {
        match self {
            Self::List => {
                print!("{}", render_kinds(&ProviderFactory::with_defaults()));
                Ok(())
            }
            Self::Status => {
                let registry = build_registry(config)?;
                print!("{}", render_status(&registry.status()));
                Ok(())
            }
            Self::Health => {
                let registry = build_registry(config)?;
                if registry.is_empty() {
                    warn!("No providers registered");
                    return Ok(());
                }
                let results = registry.health_check_all().await;
                print!("{}", render_health(&results));
                Ok(())
            }
            Self::Test { name } => {
                let registry = build_registry(config)?;
                test_provider(&registry, &name).await.map(|report| print!("{}", report))
            }
            Self::Enable { name } => toggle(config, &name, true),
            Self::Disable { name } => toggle(config, &name, false),
        }
    }
}

fn build_registry(config: Option<&Path>) -> Result<ProviderRegistry> {
    let config = load_config(config)?;
    Ok(config.build_registry(ProviderFactory::with_defaults()))
}

fn build_engine(config: Option<&Path>) -> Result<ConsensusEngine> {
    let config = load_config(config)?;
    info!(
        "✅ Configuration loaded (min_providers={}, timeout={}s, {} provider table(s))",
        config.orchestrator.min_providers,
        config.orchestrator.timeout_secs,
        config.providers.len()
    );

    let registry = Arc::new(config.build_registry(ProviderFactory::with_defaults()));
    if registry.is_empty() {
        warn!("No providers registered; set ANTHROPIC_API_KEY, OPENAI_API_KEY, GEMINI_API_KEY or GROK_API_KEY, or add provider tables");
    }
    Ok(ConsensusEngine::new(registry, config.orchestrator_config())?)
}

async fn print_health_report(config: Option<&Path>) -> Result<()> {
    let engine = build_engine(config)?;
    let health = engine.health_check().await;
    info!(
        "🩺 Health: {:?} ({}/{} providers available)",
        health.status, health.available_providers, health.required_providers
    );
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

async fn run_consensus(config: Option<&Path>, request_path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(request_path)
        .with_context(|| format!("failed to read request file {}", request_path.display()))?;
    let request: ConsensusRequest = serde_json::from_str(&content)
        .with_context(|| format!("invalid consensus request in {}", request_path.display()))?;

    let engine = build_engine(config)?;
    match engine.generate_consensus(&request).await {
        Ok(result) => {
            info!(
                "📊 {} {}: {} (confidence {:.2}, agreement {:.2})",
                request.pair, request.timeframe, result.decision, result.confidence, result.agreement_score
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            error!("❌ Consensus failed: {}", e);
            Err(e.into())
        }
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists, use --force to overwrite", path.display());
    }
    create_config_template(path)?;
    info!("✅ Configuration template written to {}", path.display());
    Ok(())
}

fn toggle(config: Option<&Path>, name: &str, enabled: bool) -> Result<()> {
    let Some(path) = config else {
        anyhow::bail!("--config (or CONSENSUS_CONFIG) is required to change provider settings");
    };
    set_provider_enabled(path, name, enabled)
}

/// Probe one provider and describe the outcome
pub async fn test_provider(registry: &ProviderRegistry, name: &str) -> Result<String> {
    let Some(healthy) = registry.check_provider(name).await else {
        anyhow::bail!("provider '{}' not found, registered: {:?}", name, registry.names());
    };

    let mut out = String::new();
    if healthy {
        writeln!(out, "✅ Provider \"{}\" is HEALTHY", name)?;
    } else {
        writeln!(out, "❌ Provider \"{}\" is UNHEALTHY", name)?;
    }
    if let Some(snapshot) = registry.snapshots().into_iter().find(|s| s.name == name) {
        write_snapshot(&mut out, &snapshot)?;
    }
    Ok(out)
}

pub fn render_kinds(factory: &ProviderFactory) -> String {
    let mut out = String::from("Available provider kinds:\n");
    for kind in factory.kinds() {
        let model = ProviderFactory::default_model(&kind).unwrap_or("n/a");
        let _ = writeln!(out, "  {:<12} (default model: {})", kind, model);
    }
    out.push_str("\nConfigure a provider with these environment variables:\n");
    for (suffix, help) in ENV_HELP {
        let _ = writeln!(out, "  {{PROVIDER}}_{:<12} {}", suffix, help);
    }
    out
}

pub fn render_status(status: &RegistryStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total providers:     {}", status.total);
    let _ = writeln!(out, "Available providers: {}", status.available);

    if status.total == 0 {
        out.push_str("\nNo providers registered. Check the API key configuration.\n");
        return out;
    }

    out.push_str("\nProviders by status:\n");
    for (provider_status, count) in status.by_status.iter().filter(|(_, count)| **count > 0) {
        let _ = writeln!(out, "  {}: {}", provider_status, count);
    }
    for snapshot in &status.providers {
        let _ = write_snapshot(&mut out, snapshot);
    }
    out
}

pub fn render_health(results: &BTreeMap<String, bool>) -> String {
    let healthy = results.values().filter(|ok| **ok).count();
    let mut out = format!("Health check: {}/{} providers healthy\n", healthy, results.len());
    for (name, ok) in results {
        let _ = writeln!(out, "  {} {}", if *ok { "✅" } else { "❌" }, name);
    }
    out
}

fn write_snapshot(out: &mut String, snapshot: &ProviderSnapshot) -> std::fmt::Result {
    writeln!(out, "\n{}:", snapshot.name.to_uppercase())?;
    writeln!(out, "  Model:        {}", snapshot.model)?;
    writeln!(out, "  Status:       {}", snapshot.status.as_str().to_uppercase())?;
    writeln!(out, "  Enabled:      {}", if snapshot.enabled { "yes" } else { "no" })?;
    writeln!(out, "  Weight:       {:.2}", snapshot.weight)?;
    writeln!(out, "  Requests:     {}", snapshot.requests)?;
    writeln!(out, "  Errors:       {}", snapshot.errors)?;
    writeln!(out, "  Error rate:   {:.2}%", snapshot.error_rate * 100.0)?;
    writeln!(out, "  Avg latency:  {:.2}ms", snapshot.avg_latency_ms)?;
    if let Some(last_request) = snapshot.last_request {
        writeln!(out, "  Last request: {}", last_request)?;
    }
    if let Some(last_error) = &snapshot.last_error {
        writeln!(out, "  Last error:   {}", last_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{auth_error, MockProvider};
    use common::Decision;
    use signal_providers::SignalProvider;

    #[test]
    fn test_parse_provider_commands() {
        let cli = Cli::try_parse_from(["consensus-engine", "providers", "test", "openai"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Providers(ProviderCommands::Test { ref name })) if name == "openai"
        ));

        let cli = Cli::try_parse_from([
            "consensus-engine",
            "providers",
            "disable",
            "grok",
            "--config",
            "engine.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("engine.toml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Providers(ProviderCommands::Disable { .. }))
        ));

        let cli = Cli::try_parse_from(["consensus-engine", "consensus", "request.json"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Consensus { .. })));

        assert!(Cli::try_parse_from(["consensus-engine", "providers", "enable"]).is_err());
    }

    #[test]
    fn test_render_kinds_lists_builtins() {
        let out = render_kinds(&ProviderFactory::with_defaults());
        assert!(out.contains("anthropic"));
        assert!(out.contains("claude-3-5-sonnet-20241022"));
        assert!(out.contains("gemini-1.5-pro"));
        assert!(out.contains("{PROVIDER}_API_KEY"));
    }

    #[test]
    fn test_render_status() {
        let registry = ProviderRegistry::new(ProviderFactory::new());
        assert!(render_status(&registry.status()).contains("No providers registered"));

        let failing = MockProvider::responding("beta", Decision::Sell, 0.7);
        failing.update_metrics(12.0, Some(&auth_error("beta")));
        registry.register("alpha", MockProvider::responding("alpha", Decision::Buy, 0.9).handle());
        registry.register("beta", failing.handle());

        let out = render_status(&registry.status());
        assert!(out.contains("Total providers:     2"));
        assert!(out.contains("Available providers: 1"));
        assert!(out.contains("ALPHA:"));
        assert!(out.contains("UNAVAILABLE"));
        assert!(out.contains("Last error:"));
    }

    #[test]
    fn test_render_health() {
        let results = BTreeMap::from([("a".to_string(), true), ("b".to_string(), false)]);
        let out = render_health(&results);
        assert!(out.starts_with("Health check: 1/2 providers healthy"));
        assert!(out.contains("❌ b"));
    }

    #[tokio::test]
    async fn test_provider_probe_report() {
        let registry = ProviderRegistry::new(ProviderFactory::new());
        registry.register(
            "flaky",
            MockProvider::responding("flaky", Decision::Hold, 0.5).with_health(false).handle(),
        );

        let report = test_provider(&registry, "flaky").await.unwrap();
        assert!(report.contains("UNHEALTHY"));
        assert!(report.contains("DEGRADED"));

        let err = test_provider(&registry, "ghost").await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_toggle_requires_config_path() {
        assert!(toggle(None, "openai", false).is_err());
    }
}
