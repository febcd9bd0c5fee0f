//! Provider factory keyed by provider kind

use super::anthropic::AnthropicProvider;
use super::error::ProviderError;
use super::gemini::GeminiProvider;
use super::openai::OpenAiCompatibleProvider;
use super::provider::{ProviderConfig, ProviderConstructor, ProviderHandle};
use std::collections::HashMap;
use tracing::{info, warn};

/// Default model per built-in kind
const DEFAULT_MODELS: &[(&str, &str)] = &[
    ("anthropic", "claude-3-5-sonnet-20241022"),
    ("openai", "gpt-4-turbo"),
    ("gemini", "gemini-1.5-pro"),
    ("grok", "grok-beta"),
];

/// Maps a provider kind (e.g. `"openai"`) to the function that builds it
#[derive(Clone, Default)]
pub struct ProviderFactory {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderFactory {
    /// Factory with no kinds registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with the built-in HTTP providers registered
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register("anthropic", AnthropicProvider::create);
        factory.register("openai", OpenAiCompatibleProvider::create_openai);
        factory.register("gemini", GeminiProvider::create);
        factory.register("grok", OpenAiCompatibleProvider::create_grok);
        factory
    }

    /// Register a constructor; a later registration replaces an earlier one
    pub fn register(&mut self, kind: impl Into<String>, constructor: ProviderConstructor) {
        let kind = kind.into().to_lowercase();
        if self.constructors.insert(kind.clone(), constructor).is_some() {
            warn!("Provider kind '{}' re-registered, previous constructor replaced", kind);
        } else {
            info!("Registered provider kind: {}", kind);
        }
    }

    /// Build a provider of `kind` from `config`
    pub fn create(&self, kind: &str, config: ProviderConfig) -> Result<ProviderHandle, ProviderError> {
        let constructor = self.constructors.get(&kind.to_lowercase()).ok_or_else(|| {
            ProviderError::invalid_config(
                &config.name,
                format!("unknown provider kind '{}', available: {:?}", kind, self.kinds()),
            )
        })?;
        constructor(config)
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.constructors.contains_key(&kind.to_lowercase())
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Model used for `kind` when configuration does not name one
    pub fn default_model(kind: &str) -> Option<&'static str> {
        let kind = kind.to_lowercase();
        DEFAULT_MODELS
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, model)| *model)
    }
}

impl std::fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactory").field("kinds", &self.kinds()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let factory = ProviderFactory::with_defaults();
        assert_eq!(factory.kinds(), vec!["anthropic", "gemini", "grok", "openai"]);
        assert!(factory.supports("OpenAI"));
        assert!(factory.supports("Anthropic"));
        assert!(!factory.supports("mistral"));
        assert!(!ProviderFactory::new().supports("openai"));
    }

    #[test]
    fn test_create_each_builtin_kind() {
        let factory = ProviderFactory::with_defaults();
        for kind in ["anthropic", "openai", "gemini", "grok"] {
            let model = ProviderFactory::default_model(kind).unwrap();
            let provider = factory
                .create(kind, ProviderConfig::new(kind, model, "test-key"))
                .unwrap();
            assert_eq!(provider.name(), kind);
            assert_eq!(provider.state().config().model, model);
        }
    }

    #[test]
    fn test_create_unknown_kind_is_config_error() {
        let factory = ProviderFactory::with_defaults();
        let err = match factory.create("mistral", ProviderConfig::new("mistral", "x", "key")) {
            Ok(_) => panic!("unknown kind must not build a provider"),
            Err(err) => err,
        };
        assert!(matches!(err, ProviderError::InvalidConfig { .. }));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("mistral"));
    }

    #[test]
    fn test_default_models() {
        assert_eq!(ProviderFactory::default_model("anthropic"), Some("claude-3-5-sonnet-20241022"));
        assert_eq!(ProviderFactory::default_model("openai"), Some("gpt-4-turbo"));
        assert_eq!(ProviderFactory::default_model("Gemini"), Some("gemini-1.5-pro"));
        assert_eq!(ProviderFactory::default_model("GROK"), Some("grok-beta"));
        assert_eq!(ProviderFactory::default_model("mystery"), None);
    }
}
