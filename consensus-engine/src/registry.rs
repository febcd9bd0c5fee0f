//! Provider Registry - lifecycle, health and weight bookkeeping
//!
//! The registry is constructed explicitly and shared by `Arc`; there is no
//! process-wide instance. Lookups go through a `DashMap`, and every health
//! or status change happens on the provider's own state, so providers never
//! contend with each other.

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use signal_providers::{
    ProviderConfig, ProviderError, ProviderFactory, ProviderHandle, ProviderSnapshot,
    ProviderStatus, SignalProvider,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Summary of everything registered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub total: usize,
    pub available: usize,
    pub by_status: BTreeMap<ProviderStatus, usize>,
    pub names: Vec<String>,
    pub registered_kinds: Vec<String>,
    pub providers: Vec<ProviderSnapshot>,
}

pub struct ProviderRegistry {
    providers: DashMap<String, ProviderHandle>,
    factory: ProviderFactory,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(ProviderFactory::with_defaults())
    }
}

impl ProviderRegistry {
    pub fn new(factory: ProviderFactory) -> Self {
        Self {
            providers: DashMap::new(),
            factory,
        }
    }

    pub fn factory(&self) -> &ProviderFactory {
        &self.factory
    }

    /// Register a provider under `name`, replacing any previous one
    pub fn register(&self, name: impl Into<String>, provider: ProviderHandle) {
        let name = name.into();
        if name != provider.name() {
            warn!(
                "Provider registered as '{}' reports its name as '{}'",
                name,
                provider.name()
            );
        }
        if self.providers.insert(name.clone(), provider).is_some() {
            warn!("Provider {} already registered, overwriting", name);
        } else {
            info!("Registered provider: {}", name);
        }
    }

    /// Build a provider through the factory and register it under its configured name
    pub fn create_provider(&self, kind: &str, config: ProviderConfig) -> Result<ProviderHandle, ProviderError> {
        let name = config.name.clone();
        let provider = self.factory.create(kind, config)?;
        self.register(name, provider.clone());
        Ok(provider)
    }

    pub fn remove(&self, name: &str) -> Option<ProviderHandle> {
        let removed = self.providers.remove(name).map(|(_, provider)| provider);
        if removed.is_some() {
            info!("Unregistered provider: {}", name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<ProviderHandle> {
        self.providers.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn clear(&self) {
        self.providers.clear();
        info!("Cleared all providers from registry");
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Providers that are enabled and accepting requests, sorted by name
    ///
    /// Evaluated on every call; nothing is cached.
    pub fn get_available(&self) -> Vec<ProviderHandle> {
        let mut available: Vec<(String, ProviderHandle)> = self
            .providers
            .iter()
            .filter(|entry| entry.value().state().is_available())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        available.sort_by(|a, b| a.0.cmp(&b.0));
        debug!("{} of {} providers available", available.len(), self.providers.len());
        available.into_iter().map(|(_, provider)| provider).collect()
    }

    /// Available providers with their configured weight, heaviest first
    pub fn get_weighted(&self) -> Vec<(ProviderHandle, f64)> {
        let mut weighted: Vec<(ProviderHandle, f64)> = self
            .get_available()
            .into_iter()
            .map(|provider| {
                let weight = provider.state().weight();
                (provider, weight)
            })
            .collect();
        // Stable sort keeps name order among equal weights
        weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
        weighted
    }

    pub fn enable(&self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.providers.get(name) {
            Some(entry) => {
                entry.value().state().set_enabled(enabled);
                info!("{} provider: {}", if enabled { "Enabled" } else { "Disabled" }, name);
                true
            }
            None => {
                warn!("Cannot {} unknown provider: {}", if enabled { "enable" } else { "disable" }, name);
                false
            }
        }
    }

    /// Probe every provider concurrently and apply the resulting transitions
    ///
    /// A passing probe makes the provider active again, which is the only way
    /// out of `Unavailable`. A failing probe degrades a provider that was
    /// accepting requests. A probe that outlives the provider's own timeout
    /// makes it unavailable and counts as failing.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        // Collect handles first so no map guard is held across an await
        let providers: Vec<(String, ProviderHandle)> = self
            .providers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let checks = providers
            .into_iter()
            .map(|(name, provider)| async move {
                let healthy = probe(&name, &provider).await;
                (name, healthy)
            });

        let results: BTreeMap<String, bool> = join_all(checks).await.into_iter().collect();
        info!(
            "Health check complete: {}/{} providers healthy",
            results.values().filter(|healthy| **healthy).count(),
            results.len()
        );
        results
    }

    /// Probe one provider, applying the same transitions as `health_check_all`
    ///
    /// Returns `None` for an unknown name.
    pub async fn check_provider(&self, name: &str) -> Option<bool> {
        let provider = self.get(name)?;
        Some(probe(name, &provider).await)
    }

    pub fn snapshots(&self) -> Vec<ProviderSnapshot> {
        let mut snapshots: Vec<ProviderSnapshot> = self
            .providers
            .iter()
            .map(|entry| {
                let mut snapshot = entry.value().state().snapshot();
                snapshot.name = entry.key().clone();
                snapshot
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn status(&self) -> RegistryStatus {
        let providers = self.snapshots();
        let mut by_status: BTreeMap<ProviderStatus, usize> =
            ProviderStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for snapshot in &providers {
            *by_status.entry(snapshot.status).or_insert(0) += 1;
        }

        RegistryStatus {
            total: providers.len(),
            available: providers
                .iter()
                .filter(|s| s.enabled && s.status.accepts_requests())
                .count(),
            by_status,
            names: providers.iter().map(|s| s.name.clone()).collect(),
            registered_kinds: self.factory.kinds(),
            providers,
        }
    }
}

async fn probe(name: &str, provider: &ProviderHandle) -> bool {
    let state = provider.state();
    let timeout = state.config().timeout;
    match tokio::time::timeout(timeout, provider.health_check()).await {
        Ok(true) => {
            state.set_status(ProviderStatus::Active);
            true
        }
        Ok(false) => {
            if state.status().accepts_requests() {
                state.set_status(ProviderStatus::Degraded);
            }
            warn!("Health check failed for {}", name);
            false
        }
        Err(_) => {
            state.set_status(ProviderStatus::Unavailable);
            warn!("Health check for {} timed out after {:?}", name, timeout);
            false
        }
    }
}
