//! Provider registry - (provider, mode) to client lookup

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{EnsembleError, Result};
use crate::llm::anthropic::AnthropicClient;
use crate::llm::backend::BackendClient;
use crate::llm::mock::MockClient;
use crate::llm::openai::OpenAiClient;
use crate::llm::provider::ProviderClient;

/// How provider calls are served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientMode {
    /// Deterministic simulated clients
    Mock,
    /// Straight to the provider API with the user's credential
    Direct,
    /// Through a mediating backend service
    Backend,
}

impl ClientMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientMode::Mock => "mock",
            ClientMode::Direct => "direct",
            ClientMode::Backend => "backend",
        }
    }
}

impl fmt::Display for ClientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientMode {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mock" => Ok(ClientMode::Mock),
            "direct" => Ok(ClientMode::Direct),
            "backend" => Ok(ClientMode::Backend),
            other => Err(EnsembleError::Config(format!(
                "unknown client mode `{other}` (expected mock, direct or backend)"
            ))),
        }
    }
}

/// Lookup table of provider clients, built once at startup
#[derive(Default)]
pub struct ProviderRegistry {
    clients: HashMap<(String, ClientMode), Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every enabled provider from the config.
    ///
    /// Anthropic speaks its own Messages API; every other provider is
    /// assumed OpenAI-compatible. Missing keys are not an error here, the
    /// client reports them when it is first used.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let mut names: Vec<&String> = config
            .providers
            .iter()
            .filter(|(_, p)| p.enabled)
            .map(|(name, _)| name)
            .collect();
        names.sort();

        for name in names {
            let provider_config = &config.providers[name];
            let api_key = config.resolve_api_key(name);

            registry.register(name, ClientMode::Mock, Arc::new(MockClient::new(name.as_str())));

            let direct: Arc<dyn ProviderClient> = if name == "anthropic" {
                Arc::new(AnthropicClient::new(provider_config, api_key, timeout)?)
            } else {
                Arc::new(OpenAiClient::new(name, provider_config, api_key, timeout)?)
            };
            registry.register(name, ClientMode::Direct, direct);

            if let Some(url) = &config.backend_url {
                registry.register(
                    name,
                    ClientMode::Backend,
                    Arc::new(BackendClient::new(name, url, timeout)?),
                );
            }
        }

        Ok(registry)
    }

    /// Register a client. Returns false, leaving the existing client in
    /// place, when the pair is already registered.
    pub fn register(
        &mut self,
        provider: impl Into<String>,
        mode: ClientMode,
        client: Arc<dyn ProviderClient>,
    ) -> bool {
        let key = (provider.into(), mode);
        if self.clients.contains_key(&key) {
            debug!(provider = %key.0, %mode, "registry: already registered");
            return false;
        }
        self.clients.insert(key, client);
        true
    }

    pub fn get(&self, provider: &str, mode: ClientMode) -> Result<Arc<dyn ProviderClient>> {
        self.clients
            .get(&(provider.to_string(), mode))
            .cloned()
            .ok_or_else(|| EnsembleError::UnregisteredProvider {
                provider: provider.to_string(),
                mode: mode.to_string(),
            })
    }

    pub fn contains(&self, provider: &str, mode: ClientMode) -> bool {
        self.clients.contains_key(&(provider.to_string(), mode))
    }

    /// Providers registered for `mode`, sorted
    pub fn providers(&self, mode: ClientMode) -> Vec<String> {
        let mut names: Vec<String> = self
            .clients
            .keys()
            .filter(|(_, m)| *m == mode)
            .map(|(p, _)| p.clone())
            .collect();
        names.sort();
        names
    }
}
