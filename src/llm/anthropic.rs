//! Direct client for the Anthropic Messages API

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{EnsembleError, Result};
use crate::llm::catalog::ModelInfo;
use crate::llm::provider::{KeyValidation, ProviderClient, ResponseStream, StreamEvent};
use crate::llm::wire::{check_status, decode_lines, line_stream, parse_sse_line};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Streaming events; only the ones that carry text, usage or errors matter
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamPayload {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: Delta },
    #[serde(rename = "message_delta")]
    MessageDelta { usage: DeltaUsage },
    #[serde(rename = "error")]
    Error { error: ErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

impl AnthropicClient {
    pub fn new(config: &ProviderConfig, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            max_tokens: config.max_tokens.unwrap_or(4096),
            temperature: config.temperature,
        })
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| EnsembleError::MissingApiKey("anthropic".to_string()))
    }
}

/// Decode one SSE line of a Messages stream
fn decode_message_line(line: &str) -> Result<Vec<StreamEvent>> {
    let Some(sse) = parse_sse_line(line) else {
        return Ok(Vec::new());
    };
    // `event:` lines only repeat the type carried in the data payload
    if sse.data.is_empty() {
        return Ok(Vec::new());
    }

    let payload: StreamPayload = serde_json::from_str(&sse.data)
        .map_err(|e| EnsembleError::Parse(format!("{e}: {}", sse.data)))?;

    match payload {
        StreamPayload::ContentBlockDelta { delta } if !delta.text.is_empty() => {
            Ok(vec![StreamEvent::Delta(delta.text)])
        }
        StreamPayload::MessageDelta { usage } => Ok(vec![StreamEvent::Usage {
            output_tokens: usage.output_tokens,
        }]),
        StreamPayload::Error { error } => Err(EnsembleError::Stream(error.message)),
        _ => Ok(Vec::new()),
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
    }

    async fn stream_response(&self, prompt: &str, model: &str) -> Result<ResponseStream> {
        let key = self.key()?;
        let request = MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            stream: true,
            temperature: self.temperature,
        };

        let url = format!("{}/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        Ok(decode_lines(line_stream(resp.bytes_stream()), decode_message_line))
    }

    async fn generate_embeddings(&self, _text: &str) -> Result<Vec<f32>> {
        Err(EnsembleError::Unsupported {
            provider: "anthropic".to_string(),
            operation: "embeddings".to_string(),
        })
    }

    async fn validate_api_key(&self, key: &str) -> KeyValidation {
        if key.trim().is_empty() {
            return KeyValidation::invalid("API key is empty");
        }

        let url = format!("{}/models", self.base_url);
        let result = self
            .client
            .get(&url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => KeyValidation::valid(),
            Ok(resp) if matches!(resp.status().as_u16(), 401 | 403) => {
                KeyValidation::invalid("Invalid API key")
            }
            Ok(resp) => KeyValidation::invalid(format!(
                "anthropic rejected the key check with status {}",
                resp.status().as_u16()
            )),
            Err(e) => KeyValidation::invalid(format!("Could not reach anthropic: {e}")),
        }
    }

    async fn list_available_models(&self) -> Result<Vec<ModelInfo>> {
        let key = self.key()?;
        let url = format!("{}/models", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await?;
        let list: ModelList = check_status(resp).await?.json().await?;

        Ok(list
            .data
            .into_iter()
            .map(|m| {
                let name = m.display_name.unwrap_or_else(|| m.id.clone());
                ModelInfo::chat(&m.id, "anthropic", &name)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_delta() {
        let line = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        assert_eq!(
            decode_message_line(line).unwrap(),
            vec![StreamEvent::Delta("Hello".to_string())]
        );
    }

    #[test]
    fn test_decode_usage() {
        let line = r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":15}}"#;
        assert_eq!(
            decode_message_line(line).unwrap(),
            vec![StreamEvent::Usage { output_tokens: 15 }]
        );
    }

    #[test]
    fn test_decode_ignores_bookkeeping_events() {
        assert!(decode_message_line("event: message_start").unwrap().is_empty());
        assert!(decode_message_line(r#"data: {"type":"ping"}"#).unwrap().is_empty());
        assert!(decode_message_line(r#"data: {"type":"message_stop"}"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_decode_error_event() {
        let line = r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = decode_message_line(line).unwrap_err();
        assert!(matches!(err, EnsembleError::Stream(ref m) if m == "Overloaded"));
    }

    #[tokio::test]
    async fn test_embeddings_unsupported() {
        let config = ProviderConfig {
            endpoint: "https://api.anthropic.com/v1".to_string(),
            api_key: String::new(),
            default_model: "claude-3-5-haiku-20241022".to_string(),
            embedding_model: None,
            enabled: true,
            max_tokens: None,
            temperature: None,
        };
        let client = AnthropicClient::new(&config, None, Duration::from_secs(1)).unwrap();

        let err = client.generate_embeddings("text").await.unwrap_err();
        assert!(matches!(err, EnsembleError::Unsupported { .. }));
        assert!(!client.validate_api_key("").await.valid);
    }
}
