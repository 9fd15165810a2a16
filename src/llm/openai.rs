//! Direct client for OpenAI-compatible APIs (OpenAI, Google, xAI)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{EnsembleError, Result};
use crate::llm::catalog::{ModelCatalog, ModelInfo};
use crate::llm::provider::{KeyValidation, ProviderClient, ResponseStream, StreamEvent};
use crate::llm::wire::{check_status, decode_lines, line_stream, parse_sse_line};

pub struct OpenAiClient {
    client: Client,
    provider: String,
    base_url: String,
    api_key: Option<String>,
    embedding_model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkUsage {
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenAiClient {
    pub fn new(
        provider: &str,
        config: &ProviderConfig,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            provider: provider.to_string(),
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            embedding_model: config.embedding_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| EnsembleError::MissingApiKey(self.provider.clone()))
    }
}

/// Decode one SSE line of a chat-completions stream
fn decode_chat_line(line: &str) -> Result<Vec<StreamEvent>> {
    let Some(sse) = parse_sse_line(line) else {
        return Ok(Vec::new());
    };
    if sse.data.is_empty() || sse.data == "[DONE]" {
        return Ok(Vec::new());
    }

    let chunk: ChatChunk = serde_json::from_str(&sse.data)
        .map_err(|e| EnsembleError::Parse(format!("{e}: {}", sse.data)))?;

    if let Some(err) = chunk.error {
        return Err(EnsembleError::Stream(err.message));
    }

    let mut events: Vec<StreamEvent> = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .filter(|t| !t.is_empty())
        .map(StreamEvent::Delta)
        .collect();

    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage {
            output_tokens: usage.completion_tokens,
        });
    }

    Ok(events)
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn stream_response(&self, prompt: &str, model: &str) -> Result<ResponseStream> {
        let key = self.key()?;
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&request)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        Ok(decode_lines(line_stream(resp.bytes_stream()), decode_chat_line))
    }

    async fn generate_embeddings(&self, text: &str) -> Result<Vec<f32>> {
        let model = self
            .embedding_model
            .as_deref()
            .ok_or_else(|| EnsembleError::Unsupported {
                provider: self.provider.clone(),
                operation: "embeddings".to_string(),
            })?;
        let key = self.key()?;

        let url = format!("{}/embeddings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&EmbeddingRequest { model, input: text })
            .send()
            .await?;
        let parsed: EmbeddingResponse = check_status(resp).await?.json().await?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EnsembleError::Parse("no embedding in response".to_string()))
    }

    async fn validate_api_key(&self, key: &str) -> KeyValidation {
        if key.trim().is_empty() {
            return KeyValidation::invalid("API key is empty");
        }

        let url = format!("{}/models", self.base_url);
        match self.client.get(&url).bearer_auth(key).send().await {
            Ok(resp) if resp.status().is_success() => KeyValidation::valid(),
            Ok(resp) if matches!(resp.status().as_u16(), 401 | 403) => {
                KeyValidation::invalid("Invalid API key")
            }
            Ok(resp) => KeyValidation::invalid(format!(
                "{} rejected the key check with status {}",
                self.provider,
                resp.status().as_u16()
            )),
            Err(e) => KeyValidation::invalid(format!("Could not reach {}: {e}", self.provider)),
        }
    }

    async fn list_available_models(&self) -> Result<Vec<ModelInfo>> {
        let key = self.key()?;
        let url = format!("{}/models", self.base_url);
        let resp = self.client.get(&url).bearer_auth(key).send().await?;
        let list: ModelList = check_status(resp).await?.json().await?;

        let catalog = ModelCatalog::builtin();
        Ok(list
            .data
            .into_iter()
            .map(|entry| {
                catalog
                    .lookup(&entry.id)
                    .cloned()
                    .unwrap_or_else(|| ModelInfo::chat(&entry.id, &self.provider, &entry.id))
            })
            .collect())
    }
}
