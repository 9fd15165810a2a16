//! Provider client contract shared by every client mode

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{EnsembleError, Result};
use crate::llm::catalog::ModelInfo;

/// One item of a streamed generation
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Newly generated text
    Delta(String),
    /// Provider-reported output token count
    Usage { output_tokens: u32 },
}

/// Stream of generation events; the first `Err` item ends the generation.
pub type ResponseStream = BoxStream<'static, Result<StreamEvent>>;

/// Outcome of an API key check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KeyValidation {
    pub fn valid() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(reason.into()),
        }
    }
}

/// Generic LLM provider client.
///
/// Simulated, direct and backend-mediated clients all implement this, so
/// the rest of the crate never knows which one it is talking to.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider identifier this client serves (e.g. "openai")
    fn provider(&self) -> &str;

    /// Open a streaming generation for `prompt` on `model`
    async fn stream_response(&self, prompt: &str, model: &str) -> Result<ResponseStream>;

    /// Embed `text` with the provider's embedding model
    async fn generate_embeddings(&self, text: &str) -> Result<Vec<f32>>;

    /// Check whether `key` is accepted by the provider
    async fn validate_api_key(&self, key: &str) -> KeyValidation;

    /// Models this provider can serve
    async fn list_available_models(&self) -> Result<Vec<ModelInfo>>;

    /// Run a generation to completion and return the full text
    async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        let mut stream = self.stream_response(prompt, model).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            if let StreamEvent::Delta(chunk) = event? {
                text.push_str(&chunk);
            }
        }
        Ok(text)
    }
}

/// Timing and usage reported with a successful generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionStats {
    pub response_time_ms: u64,
    pub token_count: Option<u32>,
}

/// Callback side of a streaming generation
pub trait StreamHandler: Send {
    fn on_chunk(&mut self, chunk: &str);
    fn on_complete(&mut self, stats: CompletionStats);
    fn on_error(&mut self, error: &EnsembleError);
}

/// Drive a generation into `handler`.
///
/// `on_chunk` fires zero or more times, then exactly one of `on_complete`
/// or `on_error`. Anything the stream yields after its first error is never
/// polled. Returns true when the generation completed.
pub async fn stream_with_handler<H>(
    client: &dyn ProviderClient,
    prompt: &str,
    model: &str,
    handler: &mut H,
) -> bool
where
    H: StreamHandler + ?Sized,
{
    let started = Instant::now();

    let mut stream = match client.stream_response(prompt, model).await {
        Ok(stream) => stream,
        Err(e) => {
            handler.on_error(&e);
            return false;
        }
    };

    let mut token_count = None;
    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Delta(text)) => {
                if !text.is_empty() {
                    handler.on_chunk(&text);
                }
            }
            Ok(StreamEvent::Usage { output_tokens }) => token_count = Some(output_tokens),
            Err(e) => {
                handler.on_error(&e);
                return false;
            }
        }
    }

    handler.on_complete(CompletionStats {
        response_time_ms: started.elapsed().as_millis() as u64,
        token_count,
    });
    true
}
