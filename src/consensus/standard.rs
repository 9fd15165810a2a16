//! Standard strategy - one summarizer call over every response

use tracing::info;

use super::prompts::summary_prompt;
use super::ConsensusInput;
use crate::error::{EnsembleError, Result};
use crate::llm::ProviderClient;

/// Ask `model` to merge `inputs` into one answer. The reply is returned as is.
pub async fn summarize(
    client: &dyn ProviderClient,
    model: &str,
    prompt: &str,
    inputs: &[ConsensusInput],
) -> Result<String> {
    info!(model, responses = inputs.len(), "consensus: summarizing");

    let text = client
        .complete(&summary_prompt(prompt, inputs), model)
        .await
        .map_err(|e| EnsembleError::Summarizer(e.to_string()))?;

    if text.trim().is_empty() {
        return Err(EnsembleError::Summarizer(format!(
            "{model} returned an empty summary"
        )));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockClient;

    fn inputs() -> Vec<ConsensusInput> {
        ["first answer", "second answer"]
            .iter()
            .enumerate()
            .map(|(i, text)| ConsensusInput {
                id: i.to_string(),
                label: format!("m{i}"),
                text: text.to_string(),
                provider: None,
                model: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_summary_is_returned_verbatim() {
        let client = MockClient::new("openai").with_response("sum", "  The merged answer.\n");
        let text = summarize(&client, "sum", "q", &inputs()).await.unwrap();
        assert_eq!(text, "  The merged answer.\n");
    }

    #[tokio::test]
    async fn test_summarizer_sees_all_answers() {
        let client = MockClient::new("openai").with_responder("sum", |prompt, _| {
            Ok(format!(
                "{} {}",
                prompt.contains("first answer"),
                prompt.contains("second answer")
            ))
        });
        let text = summarize(&client, "sum", "q", &inputs()).await.unwrap();
        assert_eq!(text, "true true");
    }

    #[tokio::test]
    async fn test_empty_summary_is_an_error() {
        let client = MockClient::new("openai").with_response("sum", "   ");
        let err = summarize(&client, "sum", "q", &inputs()).await.unwrap_err();
        assert!(matches!(err, EnsembleError::Summarizer(_)));
    }

    #[tokio::test]
    async fn test_provider_failure_is_summarizer_error() {
        let client = MockClient::new("openai").with_failure("sum", "boom");
        let err = summarize(&client, "sum", "q", &inputs()).await.unwrap_err();
        assert!(matches!(err, EnsembleError::Summarizer(ref m) if m.contains("boom")));
    }
}
