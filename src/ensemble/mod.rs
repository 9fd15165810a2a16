//! Ensemble data model - selected models, live responses, manual responses
//!
//! The [`StreamingOrchestrator`] owns the response records; everything else
//! reads snapshots of them.

mod orchestrator;

pub use orchestrator::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A model the user added to the ensemble
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub id: String,
    pub provider: String,
    pub model: String,
}

impl ModelSelection {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }

    /// Display label, e.g. "openai/gpt-4o"
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Where a response record is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Streaming,
    Complete,
    Errored,
}

/// Live output of one model for the current prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub model_id: String,
    pub provider: String,
    pub model: String,
    pub content: String,
    pub is_streaming: bool,
    pub is_complete: bool,
    pub error: Option<String>,
    pub response_time_ms: Option<u64>,
    pub token_count: Option<u32>,
}

impl ResponseRecord {
    /// Fresh record in the streaming state
    pub fn streaming(selection: &ModelSelection) -> Self {
        Self {
            model_id: selection.id.clone(),
            provider: selection.provider.clone(),
            model: selection.model.clone(),
            content: String::new(),
            is_streaming: true,
            is_complete: false,
            error: None,
            response_time_ms: None,
            token_count: None,
        }
    }

    pub fn status(&self) -> ResponseStatus {
        match (self.is_complete, &self.error) {
            (false, _) => ResponseStatus::Streaming,
            (true, None) => ResponseStatus::Complete,
            (true, Some(_)) => ResponseStatus::Errored,
        }
    }

    /// Complete, error-free and non-empty
    pub fn is_usable(&self) -> bool {
        self.status() == ResponseStatus::Complete && !self.content.trim().is_empty()
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// A response typed in by the user rather than generated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualResponse {
    pub id: String,
    pub label: String,
    pub text: String,
}

impl ManualResponse {
    pub fn new(label: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.to_string(),
            text: text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_ids_are_unique() {
        let a = ModelSelection::new("openai", "gpt-4o");
        let b = ModelSelection::new("openai", "gpt-4o");
        assert_ne!(a.id, b.id);
        assert_eq!(a.label(), "openai/gpt-4o");
    }

    #[test]
    fn test_record_status_transitions() {
        let selection = ModelSelection::new("anthropic", "claude-3-5-haiku-20241022");
        let mut record = ResponseRecord::streaming(&selection);
        assert_eq!(record.status(), ResponseStatus::Streaming);
        assert!(!record.is_usable());

        record.content = "An answer".to_string();
        record.is_streaming = false;
        record.is_complete = true;
        assert_eq!(record.status(), ResponseStatus::Complete);
        assert!(record.is_usable());

        record.error = Some("boom".to_string());
        assert_eq!(record.status(), ResponseStatus::Errored);
        assert!(!record.is_usable());
    }

    #[test]
    fn test_blank_completion_is_not_usable() {
        let selection = ModelSelection::new("openai", "gpt-4o");
        let mut record = ResponseRecord::streaming(&selection);
        record.content = "   \n".to_string();
        record.is_streaming = false;
        record.is_complete = true;
        assert!(!record.is_usable());
    }
}
