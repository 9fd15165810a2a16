//! Find which provider serves a model id.
//!
//! Callers often know only a summarizer *model id*. Resolvers run in order
//! and the first hit wins:
//!
//! 1. the static model catalog
//! 2. response or selection metadata that pairs the id with a provider
//! 3. naming conventions (`gpt-` is OpenAI, `claude` is Anthropic, ...)
//!
//! No hit is an [`EnsembleError::UnresolvedProvider`]; nothing is guessed.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EnsembleError, Result};
use crate::llm::ModelCatalog;

/// Which resolver answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Catalog,
    Metadata,
    NamingConvention,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProvider {
    pub provider: String,
    pub resolved_by: ResolvedBy,
}

/// A (provider, model) pair seen on a response or selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMetadata {
    pub provider: String,
    pub model: String,
}

struct Lookup<'a> {
    model: &'a str,
    catalog: &'a ModelCatalog,
    metadata: &'a [ModelMetadata],
}

type Resolver = fn(&Lookup<'_>) -> Option<String>;

const RESOLVERS: [(ResolvedBy, Resolver); 3] = [
    (ResolvedBy::Catalog, from_catalog),
    (ResolvedBy::Metadata, from_metadata),
    (ResolvedBy::NamingConvention, from_name),
];

fn from_catalog(lookup: &Lookup<'_>) -> Option<String> {
    lookup
        .catalog
        .lookup(lookup.model)
        .map(|info| info.provider.clone())
}

fn from_metadata(lookup: &Lookup<'_>) -> Option<String> {
    lookup
        .metadata
        .iter()
        .find(|m| m.model == lookup.model && !m.provider.is_empty())
        .map(|m| m.provider.clone())
}

fn from_name(lookup: &Lookup<'_>) -> Option<String> {
    infer_provider_from_name(lookup.model).map(str::to_string)
}

/// Provider implied by a model's name, if any convention matches
pub fn infer_provider_from_name(model: &str) -> Option<&'static str> {
    let lowered = model.trim().to_ascii_lowercase();
    let id = lowered.rsplit('/').next().unwrap_or(&lowered);

    if id.starts_with("gpt-")
        || id.starts_with("text-embedding-3")
        || id.starts_with("text-embedding-ada")
        || ["o1", "o3", "o4"]
            .iter()
            .any(|p| id == *p || id.starts_with(&format!("{p}-")))
    {
        Some("openai")
    } else if id.starts_with("claude") {
        Some("anthropic")
    } else if id.starts_with("gemini") || id.starts_with("text-embedding-0") {
        Some("google")
    } else if id.starts_with("grok") {
        Some("xai")
    } else {
        None
    }
}

/// Run the resolver chain for `model`
pub fn resolve_provider(
    model: &str,
    catalog: &ModelCatalog,
    metadata: &[ModelMetadata],
) -> Result<ResolvedProvider> {
    let lookup = Lookup {
        model,
        catalog,
        metadata,
    };

    for (resolved_by, resolver) in RESOLVERS {
        if let Some(provider) = resolver(&lookup) {
            debug!(model, %provider, ?resolved_by, "resolver: provider found");
            return Ok(ResolvedProvider {
                provider,
                resolved_by,
            });
        }
    }

    Err(EnsembleError::UnresolvedProvider(model.to_string()))
}
