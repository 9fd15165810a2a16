//! Consensus engine - reduces N responses to one synthesized answer
//!
//! Two strategies: [`standard`] summarizes everything at once, [`elo`] ranks
//! the responses with a judge model first and summarizes only the top-N.

pub mod elo;
pub mod prompts;
pub mod resolver;
pub mod standard;

pub use elo::EloConfig;
pub use resolver::{resolve_provider, ModelMetadata, ResolvedBy, ResolvedProvider};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ensemble::{ManualResponse, ModelSelection, ResponseRecord};
use crate::error::{EnsembleError, Result};
use crate::guard::InFlight;
use crate::llm::{ClientMode, ModelCatalog, ProviderClient, ProviderRegistry};

/// Minimum number of responses a consensus needs
pub const MIN_RESPONSES: usize = 2;

/// Strategy selector as it appears in config and on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Standard,
    Elo,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Standard => "standard",
            StrategyKind::Elo => "elo",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(StrategyKind::Standard),
            "elo" => Ok(StrategyKind::Elo),
            other => Err(EnsembleError::Config(format!(
                "unknown consensus strategy `{other}` (expected standard or elo)"
            ))),
        }
    }
}

/// Strategy with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Strategy {
    Standard,
    Elo { top_n: usize },
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Standard => StrategyKind::Standard,
            Strategy::Elo { .. } => StrategyKind::Elo,
        }
    }
}

/// One response offered to the consensus, generated or manual
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusInput {
    pub id: String,
    pub label: String,
    pub text: String,
    /// Set for model responses, absent for manual ones
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl From<&ResponseRecord> for ConsensusInput {
    fn from(record: &ResponseRecord) -> Self {
        Self {
            id: record.model_id.clone(),
            label: record.label(),
            text: record.content.clone(),
            provider: Some(record.provider.clone()),
            model: Some(record.model.clone()),
        }
    }
}

impl From<&ManualResponse> for ConsensusInput {
    fn from(manual: &ManualResponse) -> Self {
        Self {
            id: manual.id.clone(),
            label: manual.label.clone(),
            text: manual.text.clone(),
            provider: None,
            model: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsensusRequest {
    pub prompt: String,
    pub inputs: Vec<ConsensusInput>,
    /// Summarizer model id
    pub summarizer: Option<String>,
    /// Judge model id for ELO; the summarizer when unset
    pub judge: Option<String>,
    pub strategy: Strategy,
    /// Extra model metadata for provider resolution
    pub selections: Vec<ModelSelection>,
}

/// A response's place in the ELO ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResponse {
    pub id: String,
    pub label: String,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub text: String,
    pub strategy: StrategyKind,
    pub summarizer_model: String,
    pub summarizer_provider: String,
    /// Full ranking, best first (ELO only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking: Option<Vec<RankedResponse>>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConsensusStatus {
    #[default]
    Idle,
    Generating,
    Success,
    Failed { reason: String },
}

#[derive(Default)]
struct EngineState {
    status: ConsensusStatus,
    result: Option<ConsensusResult>,
    cycle: u64,
}

/// Runs one consensus generation at a time and keeps the last good result
pub struct ConsensusEngine {
    registry: Arc<ProviderRegistry>,
    mode: ClientMode,
    catalog: ModelCatalog,
    elo: EloConfig,
    state: Mutex<EngineState>,
    generating: AtomicBool,
}

impl ConsensusEngine {
    pub fn new(registry: Arc<ProviderRegistry>, mode: ClientMode) -> Self {
        Self {
            registry,
            mode,
            catalog: ModelCatalog::builtin(),
            elo: EloConfig::default(),
            state: Mutex::new(EngineState::default()),
            generating: AtomicBool::new(false),
        }
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_elo(mut self, elo: EloConfig) -> Self {
        self.elo = elo;
        self
    }

    pub fn status(&self) -> ConsensusStatus {
        self.state.lock().status.clone()
    }

    pub fn result(&self) -> Option<ConsensusResult> {
        self.state.lock().result.clone()
    }

    /// Clear the result and void any generation in flight
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.cycle += 1;
        st.status = ConsensusStatus::Idle;
        st.result = None;
    }

    /// Run one generation cycle.
    ///
    /// Returns `Ok(None)` without doing anything when a cycle is already
    /// running. On failure the status records the reason and the previous
    /// result is kept. A cycle voided by [`reset`](Self::reset) returns
    /// [`EnsembleError::Cancelled`] and leaves no trace.
    pub async fn generate(&self, request: &ConsensusRequest) -> Result<Option<ConsensusResult>> {
        let Some(_guard) = InFlight::acquire(&self.generating) else {
            debug!("consensus: already generating, ignoring trigger");
            return Ok(None);
        };

        let cycle = {
            let mut st = self.state.lock();
            st.status = ConsensusStatus::Generating;
            st.cycle
        };

        let outcome = self.run_cycle(request).await;

        let mut st = self.state.lock();
        if st.cycle != cycle {
            debug!("consensus: cycle voided by reset, discarding outcome");
            return Err(EnsembleError::Cancelled);
        }

        match outcome {
            Ok(result) => {
                info!(
                    strategy = %result.strategy,
                    summarizer = %result.summarizer_model,
                    "consensus: generated"
                );
                st.status = ConsensusStatus::Success;
                st.result = Some(result.clone());
                Ok(Some(result))
            }
            Err(e) => {
                warn!(error = %e, "consensus: generation failed");
                st.status = ConsensusStatus::Failed {
                    reason: e.to_string(),
                };
                Err(e)
            }
        }
    }

    async fn run_cycle(&self, request: &ConsensusRequest) -> Result<ConsensusResult> {
        let summarizer = request
            .summarizer
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(EnsembleError::NoSummarizer)?;

        let inputs: Vec<ConsensusInput> = request
            .inputs
            .iter()
            .filter(|i| !i.text.trim().is_empty())
            .cloned()
            .collect();
        if inputs.len() < MIN_RESPONSES {
            return Err(EnsembleError::NotEnoughResponses {
                needed: MIN_RESPONSES,
                available: inputs.len(),
            });
        }
        if let Strategy::Elo { top_n } = request.strategy {
            if top_n == 0 || top_n > inputs.len() {
                return Err(EnsembleError::TopNOutOfRange {
                    top_n,
                    available: inputs.len(),
                });
            }
        }

        let metadata = metadata_for(request);
        let (summarizer_provider, summarizer_client) = self.client_for(summarizer, &metadata)?;

        let (selected, ranking) = match request.strategy {
            Strategy::Standard => (inputs, None),
            Strategy::Elo { top_n } => {
                let judge = request.judge.as_deref().unwrap_or(summarizer);
                let (_, judge_client) = self.client_for(judge, &metadata)?;
                let ranking =
                    elo::rank(judge_client.as_ref(), judge, &request.prompt, &inputs, &self.elo)
                        .await?;
                let selected = elo::select_top(&ranking, &inputs, top_n)?;
                (selected, Some(ranking))
            }
        };

        let text = standard::summarize(
            summarizer_client.as_ref(),
            summarizer,
            &request.prompt,
            &selected,
        )
        .await?;

        Ok(ConsensusResult {
            text,
            strategy: request.strategy.kind(),
            summarizer_model: summarizer.to_string(),
            summarizer_provider,
            ranking,
            generated_at: Utc::now(),
        })
    }

    fn client_for(
        &self,
        model: &str,
        metadata: &[ModelMetadata],
    ) -> Result<(String, Arc<dyn ProviderClient>)> {
        let resolved = resolve_provider(model, &self.catalog, metadata)?;
        let client = self.registry.get(&resolved.provider, self.mode)?;
        Ok((resolved.provider, client))
    }
}

fn metadata_for(request: &ConsensusRequest) -> Vec<ModelMetadata> {
    let from_inputs = request.inputs.iter().filter_map(|i| match (&i.provider, &i.model) {
        (Some(provider), Some(model)) => Some(ModelMetadata {
            provider: provider.clone(),
            model: model.clone(),
        }),
        _ => None,
    });
    let from_selections = request.selections.iter().map(|s| ModelMetadata {
        provider: s.provider.clone(),
        model: s.model.clone(),
    });
    from_inputs.chain(from_selections).collect()
}
