//! One ensemble run: selections, prompt, live responses, agreement and
//! consensus, wired together

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::analysis::{AgreementReport, Embedding, EmbeddingEngine, EmbeddingInput, SyncOutcome};
use crate::config::{Config, ManualResponsePolicy};
use crate::consensus::{
    ConsensusEngine, ConsensusInput, ConsensusRequest, ConsensusResult, ConsensusStatus, Strategy,
    StrategyKind,
};
use crate::ensemble::{
    ManualResponse, ModelSelection, ResponseRecord, ResponseUpdate, StreamingOrchestrator,
};
use crate::error::{EnsembleError, Result};
use crate::llm::{ClientMode, ModelCatalog, ProviderRegistry};

/// Serializable view of the whole session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub mode: ClientMode,
    pub prompt: Option<String>,
    pub selections: Vec<ModelSelection>,
    pub responses: Vec<ResponseRecord>,
    pub manual_responses: Vec<ManualResponse>,
    pub embeddings: Vec<Embedding>,
    pub agreement: AgreementReport,
    pub consensus_status: ConsensusStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusResult>,
}

struct SessionState {
    prompt: Option<String>,
    selections: Vec<ModelSelection>,
    manual: Vec<ManualResponse>,
    embedding_provider: String,
    summarizer: Option<String>,
    judge: Option<String>,
    manual_policy: ManualResponsePolicy,
}

pub struct EnsembleSession {
    registry: Arc<ProviderRegistry>,
    mode: ClientMode,
    default_top_n: usize,
    orchestrator: StreamingOrchestrator,
    embeddings: EmbeddingEngine,
    consensus: ConsensusEngine,
    state: Mutex<SessionState>,
}

impl EnsembleSession {
    /// Build a session whose registry comes from `config`
    pub fn new(config: &Config) -> Result<Self> {
        let registry = ProviderRegistry::from_config(config)?;
        Ok(Self::with_registry(config, registry))
    }

    /// Build a session around an existing registry
    pub fn with_registry(config: &Config, registry: ProviderRegistry) -> Self {
        let registry = Arc::new(registry);
        let mode = config.mode;

        let embeddings = EmbeddingEngine::new();
        embeddings.set_provider(&config.ensemble.embedding_provider);

        Self {
            orchestrator: StreamingOrchestrator::new(registry.clone(), mode),
            consensus: ConsensusEngine::new(registry.clone(), mode).with_elo(config.elo.clone()),
            embeddings,
            registry,
            mode,
            default_top_n: config.elo.top_n,
            state: Mutex::new(SessionState {
                prompt: None,
                selections: Vec::new(),
                manual: Vec::new(),
                embedding_provider: config.ensemble.embedding_provider.clone(),
                summarizer: config.ensemble.summarizer.clone(),
                judge: None,
                manual_policy: config.ensemble.manual_responses,
            }),
        }
    }

    /// Replace the model catalog used to resolve summarizer providers
    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.consensus = self.consensus.with_catalog(catalog);
        self
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    // -- selections -------------------------------------------------------

    pub fn add_model(&self, provider: &str, model: &str) -> ModelSelection {
        let selection = ModelSelection::new(provider, model);
        self.state.lock().selections.push(selection.clone());
        selection
    }

    /// Remove a selection and cancel its response
    pub fn remove_model(&self, model_id: &str) -> bool {
        let removed = {
            let mut st = self.state.lock();
            let before = st.selections.len();
            st.selections.retain(|s| s.id != model_id);
            before != st.selections.len()
        };
        self.orchestrator.remove(model_id);
        removed
    }

    pub fn selections(&self) -> Vec<ModelSelection> {
        self.state.lock().selections.clone()
    }

    pub fn add_manual_response(&self, label: &str, text: &str) -> ManualResponse {
        let manual = ManualResponse::new(label, text);
        self.state.lock().manual.push(manual.clone());
        manual
    }

    pub fn remove_manual_response(&self, id: &str) -> bool {
        let mut st = self.state.lock();
        let before = st.manual.len();
        st.manual.retain(|m| m.id != id);
        before != st.manual.len()
    }

    pub fn manual_responses(&self) -> Vec<ManualResponse> {
        self.state.lock().manual.clone()
    }

    pub fn set_manual_policy(&self, policy: ManualResponsePolicy) {
        self.state.lock().manual_policy = policy;
    }

    // -- streaming --------------------------------------------------------

    pub fn prompt(&self) -> Option<String> {
        self.state.lock().prompt.clone()
    }

    /// Send `prompt` to every selected model.
    ///
    /// A different prompt than last time clears all responses, embeddings
    /// and the consensus first. Resubmitting the same prompt only launches
    /// models that have no response yet.
    pub fn submit(&self, prompt: &str) -> Vec<String> {
        let selections = {
            let mut st = self.state.lock();
            if st.prompt.as_deref() != Some(prompt) {
                if st.prompt.is_some() {
                    info!("session: new prompt, clearing previous run");
                }
                self.orchestrator.reset();
                self.embeddings.reset();
                self.embeddings.set_provider(&st.embedding_provider);
                self.consensus.reset();
                st.prompt = Some(prompt.to_string());
            }
            st.selections.clone()
        };
        self.orchestrator.start(prompt, &selections)
    }

    pub async fn wait_for_responses(&self) {
        self.orchestrator.wait().await;
    }

    /// Submit and wait for every model to settle
    pub async fn run(&self, prompt: &str) -> Vec<ResponseRecord> {
        self.submit(prompt);
        self.wait_for_responses().await;
        self.responses()
    }

    pub fn retry(&self, model_id: &str) -> Result<()> {
        self.orchestrator.retry(model_id)
    }

    pub fn responses(&self) -> Vec<ResponseRecord> {
        self.orchestrator.responses()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResponseUpdate> {
        self.orchestrator.subscribe()
    }

    // -- agreement --------------------------------------------------------

    /// Change the embedding provider and re-embed every finished response
    /// with it. Vectors from the old provider are dropped at once, even
    /// when a sync is already running.
    pub async fn set_embedding_provider(&self, provider: &str) -> Result<SyncOutcome> {
        self.state.lock().embedding_provider = provider.to_string();
        self.embeddings.set_provider(provider);
        self.refresh_agreement().await
    }

    pub fn embedding_provider(&self) -> String {
        self.state.lock().embedding_provider.clone()
    }

    fn embedding_inputs(&self) -> Vec<EmbeddingInput> {
        let mut inputs: Vec<EmbeddingInput> = self
            .responses()
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| EmbeddingInput {
                id: r.model_id.clone(),
                label: r.label(),
                text: r.content.clone(),
            })
            .collect();

        let st = self.state.lock();
        if st.manual_policy == ManualResponsePolicy::Include {
            inputs.extend(st.manual.iter().map(|m| EmbeddingInput {
                id: m.id.clone(),
                label: m.label.clone(),
                text: m.text.clone(),
            }));
        }
        inputs
    }

    /// Bring embeddings and agreement numbers up to date with the
    /// finished responses.
    ///
    /// When a refresh is already running this returns
    /// [`SyncOutcome::Skipped`], and the running one collects the responses
    /// again before it finishes.
    pub async fn refresh_agreement(&self) -> Result<SyncOutcome> {
        self.embeddings
            .sync_with(&self.registry, self.mode, || {
                (self.embedding_provider(), self.embedding_inputs())
            })
            .await
    }

    pub fn agreement(&self) -> AgreementReport {
        self.embeddings.report()
    }

    pub fn embeddings(&self) -> Vec<Embedding> {
        self.embeddings.embeddings()
    }

    // -- consensus --------------------------------------------------------

    pub fn set_summarizer(&self, model: Option<&str>) {
        self.state.lock().summarizer = model.map(str::to_string);
    }

    pub fn set_judge(&self, model: Option<&str>) {
        self.state.lock().judge = model.map(str::to_string);
    }

    /// Strategy of `kind` with the configured default top-N
    pub fn strategy(&self, kind: StrategyKind) -> Strategy {
        match kind {
            StrategyKind::Standard => Strategy::Standard,
            StrategyKind::Elo => Strategy::Elo {
                top_n: self.default_top_n,
            },
        }
    }

    fn consensus_request(&self, strategy: Strategy) -> Result<ConsensusRequest> {
        let responses = self.responses();
        let st = self.state.lock();
        let prompt = st
            .prompt
            .clone()
            .ok_or_else(|| EnsembleError::Config("no prompt has been submitted".to_string()))?;

        let inputs = responses
            .iter()
            .filter(|r| r.is_usable())
            .map(ConsensusInput::from)
            .chain(st.manual.iter().map(ConsensusInput::from))
            .collect();

        Ok(ConsensusRequest {
            prompt,
            inputs,
            summarizer: st.summarizer.clone(),
            judge: st.judge.clone(),
            strategy,
            selections: st.selections.clone(),
        })
    }

    /// Run one consensus cycle over the usable and manual responses.
    ///
    /// `Ok(None)` means a cycle was already running and this call did
    /// nothing.
    pub async fn generate_consensus(&self, strategy: Strategy) -> Result<Option<ConsensusResult>> {
        let request = self.consensus_request(strategy)?;
        self.consensus.generate(&request).await
    }

    pub fn consensus_status(&self) -> ConsensusStatus {
        self.consensus.status()
    }

    pub fn consensus_result(&self) -> Option<ConsensusResult> {
        self.consensus.result()
    }

    // -- lifecycle --------------------------------------------------------

    /// Cancel everything in flight and forget the prompt and all results.
    /// Selections and manual responses are kept.
    pub fn reset(&self) {
        let mut st = self.state.lock();
        self.orchestrator.reset();
        self.embeddings.reset();
        self.embeddings.set_provider(&st.embedding_provider);
        self.consensus.reset();
        st.prompt = None;
        info!("session: reset");
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (prompt, selections, manual_responses) = {
            let st = self.state.lock();
            (st.prompt.clone(), st.selections.clone(), st.manual.clone())
        };
        SessionSnapshot {
            mode: self.mode,
            prompt,
            selections,
            responses: self.responses(),
            manual_responses,
            embeddings: self.embeddings(),
            agreement: self.agreement(),
            consensus_status: self.consensus_status(),
            consensus: self.consensus_result(),
        }
    }
}
