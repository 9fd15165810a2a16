//! Backend-mediated client
//!
//! Credentials live on a mediating service; this client only forwards the
//! prompt and reads newline-delimited JSON events back.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EnsembleError, Result};
use crate::llm::catalog::ModelInfo;
use crate::llm::provider::{KeyValidation, ProviderClient, ResponseStream, StreamEvent};
use crate::llm::wire::{check_status, decode_lines, line_stream};

pub struct BackendClient {
    client: Client,
    provider: String,
    base_url: String,
}

#[derive(Serialize)]
struct StreamRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BackendEvent {
    Chunk {
        text: String,
    },
    Done {
        #[serde(default, rename = "tokenCount")]
        token_count: Option<u32>,
    },
    Error {
        message: String,
    },
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    #[serde(rename = "apiKey")]
    api_key: &'a str,
}

#[derive(Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl BackendClient {
    pub fn new(provider: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            provider: provider.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, action: &str) -> String {
        format!("{}/v1/{}/{}", self.base_url, self.provider, action)
    }
}

/// Decode one NDJSON event line
fn decode_event_line(line: &str) -> Result<Vec<StreamEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }

    let event: BackendEvent = serde_json::from_str(line)
        .map_err(|e| EnsembleError::Parse(format!("{e}: {line}")))?;

    match event {
        BackendEvent::Chunk { text } if text.is_empty() => Ok(Vec::new()),
        BackendEvent::Chunk { text } => Ok(vec![StreamEvent::Delta(text)]),
        BackendEvent::Done {
            token_count: Some(output_tokens),
        } => Ok(vec![StreamEvent::Usage { output_tokens }]),
        BackendEvent::Done { token_count: None } => Ok(Vec::new()),
        BackendEvent::Error { message } => Err(EnsembleError::Stream(message)),
    }
}

#[async_trait]
impl ProviderClient for BackendClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn stream_response(&self, prompt: &str, model: &str) -> Result<ResponseStream> {
        let resp = self
            .client
            .post(self.url("stream"))
            .json(&StreamRequest { model, prompt })
            .send()
            .await?;
        let resp = check_status(resp).await?;

        Ok(decode_lines(line_stream(resp.bytes_stream()), decode_event_line))
    }

    async fn generate_embeddings(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .client
            .post(self.url("embeddings"))
            .json(&EmbeddingRequest { text })
            .send()
            .await?;
        let parsed: EmbeddingResponse = check_status(resp).await?.json().await?;
        Ok(parsed.embedding)
    }

    async fn validate_api_key(&self, key: &str) -> KeyValidation {
        if key.trim().is_empty() {
            return KeyValidation::invalid("API key is empty");
        }

        let result = self
            .client
            .post(self.url("validate"))
            .json(&ValidateRequest { api_key: key })
            .send()
            .await;

        match result {
            Ok(resp) => match check_status(resp).await {
                Ok(resp) => resp
                    .json::<KeyValidation>()
                    .await
                    .unwrap_or_else(|e| KeyValidation::invalid(format!("Malformed reply: {e}"))),
                Err(e) => KeyValidation::invalid(e.to_string()),
            },
            Err(e) => KeyValidation::invalid(format!("Could not reach backend: {e}")),
        }
    }

    async fn list_available_models(&self) -> Result<Vec<ModelInfo>> {
        let resp = self.client.get(self.url("models")).send().await?;
        let parsed: ModelsResponse = check_status(resp).await?.json().await?;
        Ok(parsed.models)
    }
}
