//! Consensus engine configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. Optional TOML file
//! 3. `CONSENSUS__...` environment overrides (e.g. `CONSENSUS__ORCHESTRATOR__MIN_PROVIDERS`)
//! 4. Per-provider variables such as `OPENAI_API_KEY`, `GROK_WEIGHT`

use super::orchestrator::OrchestratorConfig;
use super::registry::ProviderRegistry;
use anyhow::Context;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use signal_providers::{ProviderConfig, ProviderFactory};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Provider kinds whose environment variables are always consulted
pub const BUILTIN_KINDS: &[&str] = &["anthropic", "openai", "gemini", "grok"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Provider tables keyed by provider name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_min_providers")]
    pub min_providers: usize,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Deadline for one whole fan-out (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            min_providers: default_min_providers(),
            min_confidence: default_min_confidence(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_min_providers() -> usize {
    1
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Factory kind; the table name is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Providers without a key are not registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Falls back to the kind's default model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Per-attempt timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: None,
            api_key: None,
            enabled: default_enabled(),
            model: None,
            weight: default_weight(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_url: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_retries() -> u32 {
    3
}

impl EngineConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            min_providers: self.orchestrator.min_providers,
            min_confidence: self.orchestrator.min_confidence,
            timeout: Duration::from_secs(self.orchestrator.timeout_secs),
        }
    }

    /// Apply `{PROVIDER}_*` variables from the process environment
    pub fn apply_env(&mut self, kinds: &[&str]) {
        self.apply_env_with(|key| std::env::var(key).ok(), kinds)
    }

    /// Apply `{PROVIDER}_*` variables read through `lookup`
    ///
    /// A provider table is created only when its API key is set; other
    /// variables just adjust an existing table. Values that fail to parse
    /// are ignored and the current setting is kept.
    pub fn apply_env_with<F>(&mut self, lookup: F, kinds: &[&str])
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut names: Vec<String> = kinds.iter().map(|k| k.to_lowercase()).collect();
        names.extend(self.providers.keys().cloned());
        names.sort();
        names.dedup();

        for name in names {
            let prefix = name.to_uppercase().replace('-', "_");
            let var = |suffix: &str| {
                lookup(format!("{}_{}", prefix, suffix).as_str()).filter(|v| !v.trim().is_empty())
            };

            if let Some(api_key) = var("API_KEY") {
                self.providers.entry(name.clone()).or_default().api_key = Some(api_key);
            }
            let Some(settings) = self.providers.get_mut(&name) else {
                continue;
            };

            if let Some(value) = var("ENABLED") {
                match parse_bool(&value) {
                    Some(enabled) => settings.enabled = enabled,
                    None => warn!("Ignoring {}_ENABLED={}: not a boolean", prefix, value),
                }
            }
            if let Some(model) = var("MODEL") {
                settings.model = Some(model);
            }
            if let Some(base_url) = var("BASE_URL") {
                settings.base_url = Some(base_url);
            }
            parse_into(&prefix, "WEIGHT", var("WEIGHT"), &mut settings.weight);
            parse_into(&prefix, "MAX_TOKENS", var("MAX_TOKENS"), &mut settings.max_tokens);
            parse_into(&prefix, "TEMPERATURE", var("TEMPERATURE"), &mut settings.temperature);
            parse_into(&prefix, "TIMEOUT", var("TIMEOUT"), &mut settings.timeout_secs);
            parse_into(&prefix, "MAX_RETRIES", var("MAX_RETRIES"), &mut settings.max_retries);
        }
    }

    /// Turn one provider table into a provider configuration
    ///
    /// Returns `None` when the provider should not be registered.
    pub fn provider_config(&self, name: &str) -> Option<(String, ProviderConfig)> {
        let settings = self.providers.get(name)?;
        let kind = settings.kind.clone().unwrap_or_else(|| name.to_string());

        let Some(api_key) = settings.api_key.clone() else {
            warn!("No API key configured for {}, skipping", name);
            return None;
        };

        let Some(model) = settings
            .model
            .clone()
            .or_else(|| ProviderFactory::default_model(&kind).map(str::to_string))
        else {
            warn!("No model configured for {} ({}), skipping", name, kind);
            return None;
        };

        let mut config = ProviderConfig::new(name, model, api_key)
            .with_timeout(Duration::from_secs(settings.timeout_secs))
            .with_max_retries(settings.max_retries);
        config.weight = settings.weight;
        config.enabled = settings.enabled;
        config.max_tokens = settings.max_tokens;
        config.temperature = settings.temperature;
        if let Some(base_url) = &settings.base_url {
            config = config.with_base_url(base_url.clone());
        }
        Some((kind, config))
    }

    /// Build and register every configured provider
    ///
    /// Providers that are missing a key or fail to build are logged and
    /// left out; a partially populated registry is still usable.
    pub fn build_registry(&self, factory: ProviderFactory) -> ProviderRegistry {
        let registry = ProviderRegistry::new(factory);

        for name in self.providers.keys() {
            let Some((kind, config)) = self.provider_config(name) else {
                continue;
            };
            match registry.create_provider(&kind, config) {
                Ok(_) => info!("✅ {} provider registered ({})", name, kind),
                Err(e) => warn!("Failed to initialize {} provider: {}", name, e),
            }
        }

        info!(
            "Provider registry ready: {} provider(s) {:?}",
            registry.len(),
            registry.names()
        );
        registry
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_into<T: FromStr>(prefix: &str, suffix: &str, value: Option<String>, target: &mut T) {
    let Some(value) = value else {
        return;
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!("Ignoring {}_{}={}: not a valid number", prefix, suffix, value),
    }
}

/// Load configuration from an optional TOML file plus the environment
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(
        Environment::with_prefix("CONSENSUS")
            .separator("__")
            .try_parsing(true),
    );

    let mut config: EngineConfig = builder
        .build()
        .and_then(|settings| settings.try_deserialize())
        .with_context(|| match path {
            Some(path) => format!("failed to load configuration from {}", path.display()),
            None => "failed to load configuration from environment".to_string(),
        })?;

    config.apply_env(BUILTIN_KINDS);
    Ok(config)
}

/// Save configuration to a TOML file
pub fn save_config(config: &EngineConfig, path: &Path) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write configuration to {}", path.display()))?;
    Ok(())
}

/// Read a TOML file as-is, without environment overrides
pub fn read_config_file(path: &Path) -> anyhow::Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("invalid configuration in {}", path.display()))
}

/// Persist `enabled` for one provider table in a configuration file
///
/// The file is rewritten from its own contents only, so keys that come from
/// the environment never end up on disk.
pub fn set_provider_enabled(path: &Path, name: &str, enabled: bool) -> anyhow::Result<()> {
    let mut config = read_config_file(path)?;
    let names: Vec<String> = config.providers.keys().cloned().collect();
    let Some(settings) = config.providers.get_mut(name) else {
        anyhow::bail!("no provider '{}' in {}, configured: {:?}", name, path.display(), names);
    };
    settings.enabled = enabled;
    save_config(&config, path)?;
    info!(
        "{} provider {} in {}",
        if enabled { "Enabled" } else { "Disabled" },
        name,
        path.display()
    );
    Ok(())
}

/// Write a commented configuration template
pub fn create_config_template(path: &Path) -> anyhow::Result<()> {
    let template = r#"# Signal Consensus Engine Configuration
# Environment variables override these values:
#   CONSENSUS__ORCHESTRATOR__MIN_PROVIDERS=2
#   OPENAI_API_KEY=sk-...  GROK_WEIGHT=0.8

[orchestrator]
# Minimum number of successful providers required for consensus
min_providers = 1

# Consensus below this confidence is reported as not actionable (0.0 - 1.0)
min_confidence = 0.5

# Deadline for one whole fan-out (seconds)
timeout_secs = 30

[providers.anthropic]
kind = "anthropic"
# api_key = "sk-ant-..."
enabled = true
model = "claude-3-5-sonnet-20241022"
weight = 1.0
max_tokens = 1024
temperature = 0.7
timeout_secs = 30
max_retries = 3

[providers.openai]
kind = "openai"
# api_key = "sk-..."
enabled = true
model = "gpt-4-turbo"
weight = 1.0
max_tokens = 1024
temperature = 0.7
timeout_secs = 30
max_retries = 3

[providers.grok]
kind = "grok"
# api_key = "xai-..."
enabled = true
model = "grok-beta"
weight = 0.8
max_tokens = 1024
temperature = 0.7
timeout_secs = 30
max_retries = 3
# base_url = "https://api.x.ai/v1"

[providers.gemini]
kind = "gemini"
# api_key = "AIza..."
enabled = true
model = "gemini-1.5-pro"
weight = 0.9
max_tokens = 1024
temperature = 0.7
timeout_secs = 30
max_retries = 3
"#;

    std::fs::write(path, template)
        .with_context(|| format!("failed to write template to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_providers::SignalProvider;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("consensus-{}-{}.toml", label, uuid::Uuid::new_v4()))
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.orchestrator.min_providers, 1);
        assert_eq!(config.orchestrator.min_confidence, 0.5);
        assert_eq!(config.orchestrator_config().timeout, Duration::from_secs(30));
        assert!(config.providers.is_empty());

        let provider = ProviderSettings::default();
        assert!(provider.enabled);
        assert_eq!(provider.weight, 1.0);
        assert_eq!(provider.max_tokens, 1024);
        assert_eq!(provider.temperature, 0.7);
        assert_eq!(provider.timeout_secs, 30);
        assert_eq!(provider.max_retries, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [orchestrator]
            min_providers = 2

            [providers.openai]
            api_key = "sk-test"
            weight = 0.9
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.min_providers, 2);
        assert_eq!(config.orchestrator.timeout_secs, 30);
        let openai = &config.providers["openai"];
        assert_eq!(openai.weight, 0.9);
        assert_eq!(openai.max_retries, 3);
        assert!(openai.model.is_none());
    }

    #[test]
    fn test_env_convention() {
        let mut config = EngineConfig::default();
        config.apply_env_with(
            lookup(&[
                ("OPENAI_API_KEY", "sk-env"),
                ("OPENAI_WEIGHT", "0.6"),
                ("OPENAI_ENABLED", "no"),
                ("OPENAI_TIMEOUT", "soon"),
                ("OPENAI_MAX_RETRIES", "5"),
                ("GROK_MODEL", "grok-2"),
            ]),
            BUILTIN_KINDS,
        );

        let openai = &config.providers["openai"];
        assert_eq!(openai.api_key.as_deref(), Some("sk-env"));
        assert_eq!(openai.weight, 0.6);
        assert!(!openai.enabled);
        assert_eq!(openai.timeout_secs, 30);
        assert_eq!(openai.max_retries, 5);

        // No key, no provider table
        assert!(!config.providers.contains_key("grok"));
    }

    #[test]
    fn test_env_covers_every_builtin_kind() {
        let mut config = EngineConfig::default();
        config.apply_env_with(
            lookup(&[
                ("ANTHROPIC_API_KEY", "sk-ant-env"),
                ("GEMINI_API_KEY", "AIza-env"),
                ("GEMINI_WEIGHT", "0.4"),
            ]),
            BUILTIN_KINDS,
        );

        assert_eq!(config.providers["anthropic"].api_key.as_deref(), Some("sk-ant-env"));
        assert_eq!(config.providers["gemini"].weight, 0.4);

        let registry = config.build_registry(ProviderFactory::with_defaults());
        assert_eq!(registry.names(), vec!["anthropic".to_string(), "gemini".to_string()]);
        let claude = registry.get("anthropic").unwrap();
        assert_eq!(claude.state().config().model, "claude-3-5-sonnet-20241022");
        let gemini = registry.get("gemini").unwrap();
        assert_eq!(gemini.state().config().model, "gemini-1.5-pro");
    }

    #[test]
    fn test_env_applies_to_configured_providers() {
        let mut config: EngineConfig = toml::from_str(
            r#"
            [providers.local-llm]
            kind = "openai"
            api_key = "file-key"
            "#,
        )
        .unwrap();
        config.apply_env_with(lookup(&[("LOCAL_LLM_BASE_URL", "http://localhost:8000/v1")]), &[]);
        assert_eq!(
            config.providers["local-llm"].base_url.as_deref(),
            Some("http://localhost:8000/v1")
        );
    }

    #[test]
    fn test_build_registry_skips_unusable_providers() {
        let config: EngineConfig = toml::from_str(
            r#"
            [providers.openai]
            api_key = "sk-test"

            [providers.grok]
            model = "grok-beta"

            [providers.mystery]
            api_key = "key"
            model = "m"

            [providers.heavy]
            kind = "openai"
            api_key = "sk-test"
            weight = 3.0
            "#,
        )
        .unwrap();

        let registry = config.build_registry(ProviderFactory::with_defaults());
        assert_eq!(registry.names(), vec!["openai".to_string()]);

        let openai = registry.get("openai").unwrap();
        assert_eq!(openai.state().config().model, "gpt-4-turbo");
        assert_eq!(openai.state().config().max_tokens, 1024);
    }

    #[test]
    fn test_template_round_trip() {
        let path = temp_path("template");
        create_config_template(&path).unwrap();
        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.orchestrator.min_providers, 1);
        assert_eq!(config.providers["grok"].weight, 0.8);
        assert_eq!(config.providers["grok"].kind.as_deref(), Some("grok"));
        for kind in BUILTIN_KINDS {
            assert_eq!(config.providers[*kind].kind.as_deref(), Some(*kind));
        }
    }

    #[test]
    fn test_set_provider_enabled() {
        let path = temp_path("toggle");
        create_config_template(&path).unwrap();

        set_provider_enabled(&path, "grok", false).unwrap();
        let config = read_config_file(&path).unwrap();
        assert!(!config.providers["grok"].enabled);
        assert!(config.providers["openai"].enabled);
        assert_eq!(config.providers["grok"].model.as_deref(), Some("grok-beta"));

        set_provider_enabled(&path, "grok", true).unwrap();
        assert!(read_config_file(&path).unwrap().providers["grok"].enabled);

        let err = set_provider_enabled(&path, "mistral", true).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(err.to_string().contains("mistral"));
    }

    #[test]
    fn test_save_and_load() {
        let mut config = EngineConfig::default();
        config.orchestrator.min_providers = 3;
        config.providers.insert(
            "backup".to_string(),
            ProviderSettings {
                kind: Some("grok".to_string()),
                weight: 0.4,
                ..Default::default()
            },
        );

        let path = temp_path("save");
        save_config(&config, &path).unwrap();
        let loaded = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.orchestrator.min_providers, 3);
        assert_eq!(loaded.providers["backup"].weight, 0.4);
        assert_eq!(loaded.providers["backup"].kind.as_deref(), Some("grok"));
    }
}
