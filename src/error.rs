//! Error types for Ensemble

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No client registered for provider `{provider}` in mode `{mode}`")]
    UnregisteredProvider { provider: String, mode: String },

    #[error("No API key configured for {0}")]
    MissingApiKey(String),

    #[error("No summarizer model selected")]
    NoSummarizer,

    #[error("Need at least {needed} usable responses, have {available}")]
    NotEnoughResponses { needed: usize, available: usize },

    #[error("top-N must be between 1 and {available}, got {top_n}")]
    TopNOutOfRange { top_n: usize, available: usize },

    #[error("Cannot determine provider for model `{0}`")]
    UnresolvedProvider(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    #[error("{provider} does not support {operation}")]
    Unsupported { provider: String, operation: String },

    #[error("Embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Judge error: {0}")]
    Judge(String),

    #[error("Summarizer error: {0}")]
    Summarizer(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl EnsembleError {
    /// Configuration problems are surfaced immediately and never worth retrying.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            EnsembleError::Config(_)
                | EnsembleError::UnregisteredProvider { .. }
                | EnsembleError::MissingApiKey(_)
                | EnsembleError::NoSummarizer
                | EnsembleError::NotEnoughResponses { .. }
                | EnsembleError::TopNOutOfRange { .. }
                | EnsembleError::UnresolvedProvider(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EnsembleError>;
