//! Static catalog of known models

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Chat,
    Embedding,
}

/// Metadata for one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub display_name: String,
    pub kind: ModelKind,
}

impl ModelInfo {
    pub fn chat(id: &str, provider: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            provider: provider.to_string(),
            display_name: display_name.to_string(),
            kind: ModelKind::Chat,
        }
    }

    pub fn embedding(id: &str, provider: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            provider: provider.to_string(),
            display_name: display_name.to_string(),
            kind: ModelKind::Embedding,
        }
    }
}

/// Lookup table of models by id
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelInfo>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelCatalog {
    /// Catalog with no entries
    pub fn empty() -> Self {
        Self { models: Vec::new() }
    }

    /// Models shipped with the crate
    pub fn builtin() -> Self {
        Self {
            models: vec![
                ModelInfo::chat("gpt-4o", "openai", "GPT-4o"),
                ModelInfo::chat("gpt-4o-mini", "openai", "GPT-4o mini"),
                ModelInfo::chat("o3-mini", "openai", "o3-mini"),
                ModelInfo::embedding("text-embedding-3-small", "openai", "Embedding 3 Small"),
                ModelInfo::chat("claude-3-5-sonnet-20241022", "anthropic", "Claude 3.5 Sonnet"),
                ModelInfo::chat("claude-3-5-haiku-20241022", "anthropic", "Claude 3.5 Haiku"),
                ModelInfo::chat("gemini-2.0-flash", "google", "Gemini 2.0 Flash"),
                ModelInfo::chat("gemini-1.5-pro", "google", "Gemini 1.5 Pro"),
                ModelInfo::embedding("text-embedding-004", "google", "Text Embedding 004"),
                ModelInfo::chat("grok-2-latest", "xai", "Grok 2"),
            ],
        }
    }

    /// Add or replace an entry
    pub fn with_model(mut self, info: ModelInfo) -> Self {
        self.models.retain(|m| m.id != info.id);
        self.models.push(info);
        self
    }

    pub fn lookup(&self, id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn for_provider(&self, provider: &str) -> Vec<ModelInfo> {
        self.models
            .iter()
            .filter(|m| m.provider == provider)
            .cloned()
            .collect()
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let catalog = ModelCatalog::builtin();
        let info = catalog.lookup("gpt-4o").unwrap();
        assert_eq!(info.provider, "openai");
        assert_eq!(info.kind, ModelKind::Chat);
        assert!(catalog.lookup("mystery-model").is_none());
    }

    #[test]
    fn test_with_model_replaces_existing() {
        let catalog = ModelCatalog::empty()
            .with_model(ModelInfo::chat("known-model-x", "acme", "X"))
            .with_model(ModelInfo::chat("known-model-x", "acme", "X v2"));

        assert_eq!(catalog.models().len(), 1);
        assert_eq!(catalog.lookup("known-model-x").unwrap().display_name, "X v2");
    }

    #[test]
    fn test_for_provider() {
        let catalog = ModelCatalog::builtin();
        let google = catalog.for_provider("google");
        assert!(google.iter().all(|m| m.provider == "google"));
        assert!(google.iter().any(|m| m.kind == ModelKind::Embedding));
    }
}
