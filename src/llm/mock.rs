//! Simulated provider client
//!
//! Deterministic stand-in for a real provider: generated text depends only
//! on (provider, model, prompt), embeddings only on the text. Responses,
//! failures and judge behaviour can be scripted per model for tests and
//! offline development.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EnsembleError, Result};
use crate::llm::catalog::{ModelCatalog, ModelInfo};
use crate::llm::provider::{KeyValidation, ProviderClient, ResponseStream, StreamEvent};

/// Dimension of generated embedding vectors
pub const MOCK_EMBEDDING_DIMS: usize = 64;

/// Scripted reply: receives (prompt, model)
pub type Responder = Arc<dyn Fn(&str, &str) -> Result<String> + Send + Sync>;

const FILLER: [&str; 5] = [
    "The short answer is that it depends on the constraints you care about most.",
    "Most sources agree on the fundamentals, though details vary by context.",
    "A careful reading suggests starting simple and iterating from there.",
    "There are trade-offs on both sides, and evidence leans slightly one way.",
    "In practice the conventional approach works well for the common case.",
];

#[derive(Clone)]
pub struct MockClient {
    provider: String,
    responses: HashMap<String, String>,
    failures: HashMap<String, String>,
    responders: HashMap<String, Responder>,
    embeddings: HashMap<String, Vec<f32>>,
    embedding_failures: Vec<String>,
    rejected_keys: Vec<String>,
    chunk_delay: Duration,
    embedding_delay: Duration,
    catalog: ModelCatalog,
}

impl MockClient {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            responses: HashMap::new(),
            failures: HashMap::new(),
            responders: HashMap::new(),
            embeddings: HashMap::new(),
            embedding_failures: Vec::new(),
            rejected_keys: Vec::new(),
            chunk_delay: Duration::ZERO,
            embedding_delay: Duration::ZERO,
            catalog: ModelCatalog::builtin(),
        }
    }

    /// Always answer `text` for `model`
    pub fn with_response(mut self, model: &str, text: &str) -> Self {
        self.responses.insert(model.to_string(), text.to_string());
        self
    }

    /// Fail `model` mid-stream, after its first chunk
    pub fn with_failure(mut self, model: &str, message: &str) -> Self {
        self.failures.insert(model.to_string(), message.to_string());
        self
    }

    /// Compute the reply for `model` from the prompt
    pub fn with_responder<F>(mut self, model: &str, responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        self.responders
            .insert(model.to_string(), Arc::new(responder));
        self
    }

    /// Return `vector` when asked to embed exactly `text`
    pub fn with_embedding(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.embeddings.insert(text.to_string(), vector);
        self
    }

    /// Fail embedding requests for any text containing `needle`
    pub fn with_embedding_failure(mut self, needle: &str) -> Self {
        self.embedding_failures.push(needle.to_string());
        self
    }

    pub fn with_rejected_key(mut self, key: &str) -> Self {
        self.rejected_keys.push(key.to_string());
        self
    }

    /// Pause between chunks, to make streams interleave visibly
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Latency of every embedding request
    pub fn with_embedding_delay(mut self, delay: Duration) -> Self {
        self.embedding_delay = delay;
        self
    }

    fn reply_for(&self, prompt: &str, model: &str) -> Result<String> {
        if let Some(responder) = self.responders.get(model) {
            return responder(prompt, model);
        }
        if let Some(text) = self.responses.get(model) {
            return Ok(text.clone());
        }
        Ok(self.generated_text(prompt, model))
    }

    fn generated_text(&self, prompt: &str, model: &str) -> String {
        let seed = fnv1a(format!("{}\0{}\0{}", self.provider, model, prompt).as_bytes());
        let first = FILLER[(seed % FILLER.len() as u64) as usize];
        let second = FILLER[((seed >> 8) % FILLER.len() as u64) as usize];
        let topic: String = prompt.split_whitespace().take(8).collect::<Vec<_>>().join(" ");
        format!("Regarding \"{topic}\": {first} {second}")
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn stream_response(&self, prompt: &str, model: &str) -> Result<ResponseStream> {
        let text = self.reply_for(prompt, model)?;
        let chunks: Vec<String> = text.split_inclusive(' ').map(str::to_string).collect();
        let word_count = chunks.len() as u32;

        let mut events: Vec<Result<StreamEvent>> = Vec::new();
        match self.failures.get(model) {
            Some(message) => {
                if let Some(first) = chunks.into_iter().next() {
                    events.push(Ok(StreamEvent::Delta(first)));
                }
                events.push(Err(EnsembleError::Stream(message.clone())));
            }
            None => {
                events.extend(chunks.into_iter().map(|c| Ok(StreamEvent::Delta(c))));
                events.push(Ok(StreamEvent::Usage {
                    output_tokens: word_count,
                }));
            }
        }

        let delay = self.chunk_delay;
        Ok(stream::iter(events)
            .then(move |event| async move {
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(delay).await;
                }
                event
            })
            .boxed())
    }

    async fn generate_embeddings(&self, text: &str) -> Result<Vec<f32>> {
        if self
            .embedding_failures
            .iter()
            .any(|needle| text.contains(needle.as_str()))
        {
            return Err(EnsembleError::Api {
                status: 500,
                body: "simulated embedding failure".to_string(),
            });
        }
        if let Some(vector) = self.embeddings.get(text) {
            return Ok(vector.clone());
        }
        if self.embedding_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.embedding_delay).await;
        }
        Ok(hashed_embedding(text, MOCK_EMBEDDING_DIMS))
    }

    async fn validate_api_key(&self, key: &str) -> KeyValidation {
        if key.trim().is_empty() {
            return KeyValidation::invalid("API key is empty");
        }
        if self.rejected_keys.iter().any(|k| k == key) {
            return KeyValidation::invalid("Invalid API key");
        }
        KeyValidation::valid()
    }

    async fn list_available_models(&self) -> Result<Vec<ModelInfo>> {
        let mut models = self.catalog.for_provider(&self.provider);
        for id in self.responses.keys().chain(self.responders.keys()) {
            if !models.iter().any(|m| &m.id == id) {
                models.push(ModelInfo::chat(id, &self.provider, id));
            }
        }
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }
}

/// Feature-hashed bag of words, L2-normalized.
///
/// Identical texts give identical vectors; texts sharing most words give
/// highly similar ones.
pub fn hashed_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dims];
    if dims == 0 {
        return vector;
    }

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let h = fnv1a(token.to_lowercase().as_bytes());
        let idx = (h % dims as u64) as usize;
        let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_text_is_deterministic() {
        let client = MockClient::new("openai");
        let a = client.complete("why is the sky blue", "gpt-4o").await.unwrap();
        let b = client.complete("why is the sky blue", "gpt-4o").await.unwrap();
        assert_eq!(a, b);
        assert!(a.contains("why is the sky blue"));
    }

    #[tokio::test]
    async fn test_failure_emits_partial_then_error() {
        let client = MockClient::new("openai")
            .with_response("gpt-4o", "partial answer here")
            .with_failure("gpt-4o", "rate limited");

        let events: Vec<_> = client
            .stream_response("p", "gpt-4o")
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(StreamEvent::Delta(ref t)) if t == "partial "));
        assert!(events[1].is_err());
    }

    #[test]
    fn test_hashed_embedding_properties() {
        let a = hashed_embedding("The quick brown fox", 64);
        let b = hashed_embedding("the quick brown fox", 64);
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        assert!(hashed_embedding("", 64).iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_embedding_overrides_and_failures() {
        let client = MockClient::new("openai")
            .with_embedding("fixed", vec![1.0, 0.0])
            .with_embedding_failure("poison");

        assert_eq!(client.generate_embeddings("fixed").await.unwrap(), vec![1.0, 0.0]);
        assert!(client.generate_embeddings("poison pill").await.is_err());
        assert_eq!(
            client.generate_embeddings("other").await.unwrap().len(),
            MOCK_EMBEDDING_DIMS
        );
    }

    #[tokio::test]
    async fn test_validate_api_key() {
        let client = MockClient::new("openai").with_rejected_key("sk-revoked");

        assert!(client.validate_api_key("sk-live").await.valid);
        assert!(!client.validate_api_key("  ").await.valid);
        let rejected = client.validate_api_key("sk-revoked").await;
        assert!(!rejected.valid);
        assert_eq!(rejected.error.as_deref(), Some("Invalid API key"));
    }

    #[tokio::test]
    async fn test_list_models_includes_scripted() {
        let client = MockClient::new("acme").with_response("known-model-x", "hi");
        let models = client.list_available_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].provider, "acme");
    }
}
