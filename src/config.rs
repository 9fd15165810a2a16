//! Configuration management for Ensemble

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::consensus::{EloConfig, StrategyKind};
use crate::error::Result;
use crate::llm::ClientMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which client flavour serves provider calls
    pub mode: ClientMode,

    /// Base URL of the mediating backend (enables `backend` mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,

    /// Per-request timeout applied by every HTTP client
    pub request_timeout_secs: u64,

    /// LLM provider configurations
    pub providers: HashMap<String, ProviderConfig>,

    /// Ensemble run defaults
    pub ensemble: EnsembleConfig,

    /// ELO ranking settings
    pub elo: EloConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API endpoint URL
    pub endpoint: String,

    /// API key (can be env var reference like $OPENAI_API_KEY)
    pub api_key: String,

    /// Model used when a selection names only the provider
    pub default_model: String,

    /// Model used for embedding requests, if the provider offers one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,

    /// Whether this provider is enabled
    pub enabled: bool,

    /// Max tokens for responses
    pub max_tokens: Option<u32>,

    /// Temperature setting
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Provider used to embed finished responses
    pub embedding_provider: String,

    /// Model that writes the consensus answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarizer: Option<String>,

    /// Default consensus strategy
    pub strategy: StrategyKind,

    /// Whether manual responses are embedded alongside model responses
    pub manual_responses: ManualResponsePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualResponsePolicy {
    #[default]
    Exclude,
    Include,
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = HashMap::new();

        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                endpoint: "https://api.openai.com/v1".to_string(),
                api_key: "$OPENAI_API_KEY".to_string(),
                default_model: "gpt-4o-mini".to_string(),
                embedding_model: Some("text-embedding-3-small".to_string()),
                enabled: true,
                max_tokens: Some(4096),
                temperature: Some(0.7),
            },
        );

        providers.insert(
            "anthropic".to_string(),
            ProviderConfig {
                endpoint: "https://api.anthropic.com/v1".to_string(),
                api_key: "$ANTHROPIC_API_KEY".to_string(),
                default_model: "claude-3-5-sonnet-20241022".to_string(),
                embedding_model: None,
                enabled: true,
                max_tokens: Some(4096),
                temperature: Some(0.7),
            },
        );

        providers.insert(
            "google".to_string(),
            ProviderConfig {
                endpoint: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
                api_key: "$GOOGLE_API_KEY".to_string(),
                default_model: "gemini-2.0-flash".to_string(),
                embedding_model: Some("text-embedding-004".to_string()),
                enabled: true,
                max_tokens: Some(4096),
                temperature: Some(0.7),
            },
        );

        providers.insert(
            "xai".to_string(),
            ProviderConfig {
                endpoint: "https://api.x.ai/v1".to_string(),
                api_key: "$XAI_API_KEY".to_string(),
                default_model: "grok-2-latest".to_string(),
                embedding_model: None,
                enabled: false,
                max_tokens: Some(4096),
                temperature: Some(0.7),
            },
        );

        Self {
            mode: ClientMode::Mock,
            backend_url: None,
            request_timeout_secs: 120,
            providers,
            ensemble: EnsembleConfig {
                embedding_provider: "openai".to_string(),
                summarizer: Some("gpt-4o-mini".to_string()),
                strategy: StrategyKind::Standard,
                manual_responses: ManualResponsePolicy::Exclude,
            },
            elo: EloConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file or create default
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ensemble")
            .join("config.toml")
    }

    /// Resolve API key from config (handles env var references)
    pub fn resolve_api_key(&self, provider: &str) -> Option<String> {
        self.providers.get(provider).and_then(|p| {
            if let Some(var) = p.api_key.strip_prefix('$') {
                std::env::var(var).ok().filter(|v| !v.is_empty())
            } else if p.api_key.is_empty() {
                None
            } else {
                Some(p.api_key.clone())
            }
        })
    }

    /// Default model for a provider, used when a selection omits one
    pub fn default_model(&self, provider: &str) -> Option<&str> {
        self.providers
            .get(provider)
            .map(|p| p.default_model.as_str())
    }
}
