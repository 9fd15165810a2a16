//! Embedding engine - fetches vectors for finished responses and keeps the
//! similarity matrix in step with them

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::{
    agreement_stats, pairwise_comparisons, similarity_matrix, AgreementReport, AgreementStats,
    Embedding, SimilarityMatrix,
};
use crate::error::Result;
use crate::guard::InFlight;
use crate::llm::{ClientMode, ProviderRegistry};

/// A response offered for embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingInput {
    pub id: String,
    pub label: String,
    pub text: String,
}

/// What a call to [`EmbeddingEngine::sync`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SyncOutcome {
    /// Another sync was already running; it will run once more for this call
    Skipped,
    /// Nothing new to embed and the matrix is current
    Unchanged,
    /// Vectors were fetched and/or the matrix was rebuilt
    Updated { fetched: usize, failed: usize },
    /// Provider changed or engine reset while fetching; results thrown away
    Discarded,
}

#[derive(Debug, Clone)]
struct Failure {
    text: String,
    message: String,
}

#[derive(Default)]
struct EngineState {
    provider: Option<String>,
    embeddings: Vec<Embedding>,
    /// Text each embedding was computed from, by response id
    sources: HashMap<String, String>,
    failures: HashMap<String, Failure>,
    labels: HashMap<String, String>,
    matrix: Option<SimilarityMatrix>,
    stats: Option<AgreementStats>,
    cycle: u64,
}

impl EngineState {
    fn clear(&mut self) {
        self.embeddings.clear();
        self.sources.clear();
        self.failures.clear();
        self.matrix = None;
        self.stats = None;
        self.cycle += 1;
    }

    /// Drop embeddings and failures whose response is gone or whose text changed
    fn prune(&mut self, inputs: &[EmbeddingInput]) -> bool {
        let current: HashMap<&str, &str> = inputs
            .iter()
            .map(|i| (i.id.as_str(), i.text.as_str()))
            .collect();

        let before = self.embeddings.len();
        let sources = &self.sources;
        self.embeddings.retain(|e| {
            matches!(
                (current.get(e.response_id.as_str()), sources.get(&e.response_id)),
                (Some(now), Some(then)) if *now == then.as_str()
            )
        });
        let kept: Vec<String> = self.embeddings.iter().map(|e| e.response_id.clone()).collect();
        self.sources.retain(|id, _| kept.contains(id));

        self.failures
            .retain(|id, f| current.get(id.as_str()).is_some_and(|t| *t == f.text));

        before != self.embeddings.len()
    }

    /// Put embeddings in input order and rebuild matrix and stats
    fn rebuild(&mut self, inputs: &[EmbeddingInput]) -> Result<()> {
        let mut ordered = Vec::with_capacity(self.embeddings.len());
        for input in inputs {
            if let Some(pos) = self
                .embeddings
                .iter()
                .position(|e| e.response_id == input.id)
            {
                ordered.push(self.embeddings.swap_remove(pos));
            }
        }
        self.embeddings = ordered;

        match similarity_matrix(&self.embeddings) {
            Ok(matrix) => {
                self.stats = matrix.as_ref().and_then(agreement_stats);
                self.matrix = matrix;
                Ok(())
            }
            Err(e) => {
                self.matrix = None;
                self.stats = None;
                Err(e)
            }
        }
    }
}

/// Keeps one embedding per finished response and the agreement numbers
/// derived from them.
#[derive(Default)]
pub struct EmbeddingEngine {
    state: Mutex<EngineState>,
    in_flight: AtomicBool,
    /// Raised by a call that found a sync running
    dirty: AtomicBool,
}

impl EmbeddingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch embedding provider, discarding every vector from the old one
    pub fn set_provider(&self, provider: &str) {
        let mut st = self.state.lock();
        if st.provider.as_deref() == Some(provider) {
            return;
        }
        if let Some(old) = &st.provider {
            info!(from = %old, to = provider, "embeddings: provider changed, discarding vectors");
        }
        st.clear();
        st.provider = Some(provider.to_string());
    }

    /// Forget everything, including the provider
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.clear();
        st.provider = None;
        st.labels.clear();
    }

    /// Bring embeddings and the matrix up to date with `inputs`.
    ///
    /// Only inputs without a vector and without a recorded failure are
    /// fetched, concurrently. A failed input is not retried until its text
    /// or the provider changes.
    pub async fn sync(
        &self,
        registry: &ProviderRegistry,
        mode: ClientMode,
        provider: &str,
        inputs: &[EmbeddingInput],
    ) -> Result<SyncOutcome> {
        self.sync_with(registry, mode, || (provider.to_string(), inputs.to_vec()))
            .await
    }

    /// Like [`sync`](Self::sync), but `source` yields the provider and
    /// inputs at the start of every pass.
    ///
    /// A call that arrives while another sync is running returns
    /// [`SyncOutcome::Skipped`] and marks the engine dirty. The running call
    /// then reads `source` again and makes another pass, so the skipped
    /// trigger is applied to whatever state is current by then.
    pub async fn sync_with<F>(
        &self,
        registry: &ProviderRegistry,
        mode: ClientMode,
        source: F,
    ) -> Result<SyncOutcome>
    where
        F: Fn() -> (String, Vec<EmbeddingInput>),
    {
        let mut outcome: Option<SyncOutcome> = None;
        loop {
            let Some(guard) = InFlight::acquire(&self.in_flight) else {
                self.dirty.store(true, Ordering::Release);
                // The holder may have let go before it could see the flag
                if self.in_flight.load(Ordering::Acquire) {
                    debug!("embeddings: sync already running, queued another pass");
                    return Ok(outcome.unwrap_or(SyncOutcome::Skipped));
                }
                continue;
            };

            self.dirty.store(false, Ordering::Release);
            let (provider, inputs) = source();
            let pass = self.sync_once(registry, mode, &provider, &inputs).await;
            drop(guard);

            let pass = pass?;
            outcome = Some(match (outcome, pass) {
                (
                    Some(SyncOutcome::Updated { fetched, failed }),
                    SyncOutcome::Updated {
                        fetched: more,
                        failed: more_failed,
                    },
                ) => SyncOutcome::Updated {
                    fetched: fetched + more,
                    failed: failed + more_failed,
                },
                (Some(prev @ SyncOutcome::Updated { .. }), SyncOutcome::Unchanged) => prev,
                (_, pass) => pass,
            });

            if !self.dirty.swap(false, Ordering::AcqRel) {
                return Ok(outcome.unwrap_or(SyncOutcome::Unchanged));
            }
            debug!("embeddings: triggered again during sync, running another pass");
        }
    }

    async fn sync_once(
        &self,
        registry: &ProviderRegistry,
        mode: ClientMode,
        provider: &str,
        inputs: &[EmbeddingInput],
    ) -> Result<SyncOutcome> {
        let inputs: Vec<EmbeddingInput> = inputs
            .iter()
            .filter(|i| !i.text.trim().is_empty())
            .cloned()
            .collect();

        self.set_provider(provider);

        let (pending, cycle) = {
            let mut st = self.state.lock();
            for input in &inputs {
                st.labels.insert(input.id.clone(), input.label.clone());
            }
            let pruned = st.prune(&inputs);

            let pending: Vec<EmbeddingInput> = inputs
                .iter()
                .filter(|i| !st.sources.contains_key(&i.id) && !st.failures.contains_key(&i.id))
                .cloned()
                .collect();

            if pending.is_empty() {
                let current = st.matrix.is_some() || st.embeddings.len() < 2;
                if !pruned && current {
                    return Ok(SyncOutcome::Unchanged);
                }
                st.rebuild(&inputs)?;
                return Ok(SyncOutcome::Updated {
                    fetched: 0,
                    failed: 0,
                });
            }

            (pending, st.cycle)
        };

        let client = registry.get(provider, mode)?;
        info!(provider, count = pending.len(), "embeddings: requesting vectors");

        let results = join_all(pending.iter().map(|input| {
            let client = client.clone();
            async move { (input, client.generate_embeddings(&input.text).await) }
        }))
        .await;

        let mut st = self.state.lock();
        if st.cycle != cycle {
            debug!("embeddings: cycle superseded, discarding results");
            return Ok(SyncOutcome::Discarded);
        }

        let mut fetched = 0;
        let mut failed = 0;
        for (input, result) in results {
            match result {
                Ok(vector) => {
                    st.embeddings.push(Embedding {
                        response_id: input.id.clone(),
                        vector,
                    });
                    st.sources.insert(input.id.clone(), input.text.clone());
                    fetched += 1;
                }
                Err(e) => {
                    warn!(response = %input.label, error = %e, "embeddings: request failed");
                    st.failures.insert(
                        input.id.clone(),
                        Failure {
                            text: input.text.clone(),
                            message: e.to_string(),
                        },
                    );
                    failed += 1;
                }
            }
        }

        st.rebuild(&inputs)?;
        if let Some(stats) = &st.stats {
            info!(mean = stats.mean, median = stats.median, "embeddings: agreement updated");
        }

        Ok(SyncOutcome::Updated { fetched, failed })
    }

    pub fn provider(&self) -> Option<String> {
        self.state.lock().provider.clone()
    }

    pub fn embeddings(&self) -> Vec<Embedding> {
        self.state.lock().embeddings.clone()
    }

    pub fn matrix(&self) -> Option<SimilarityMatrix> {
        self.state.lock().matrix.clone()
    }

    pub fn stats(&self) -> Option<AgreementStats> {
        self.state.lock().stats
    }

    /// Response id to embedding error message
    pub fn failures(&self) -> HashMap<String, String> {
        self.state
            .lock()
            .failures
            .iter()
            .map(|(id, f)| (id.clone(), f.message.clone()))
            .collect()
    }

    pub fn comparisons(&self) -> Vec<super::PairwiseComparison> {
        let st = self.state.lock();
        match &st.matrix {
            Some(matrix) => pairwise_comparisons(matrix, |id| {
                st.labels.get(id).cloned().unwrap_or_else(|| id.to_string())
            }),
            None => Vec::new(),
        }
    }

    pub fn report(&self) -> AgreementReport {
        let comparisons = self.comparisons();
        let st = self.state.lock();
        AgreementReport {
            provider: st.provider.clone(),
            embedded: st.embeddings.iter().map(|e| e.response_id.clone()).collect(),
            matrix: st.matrix.clone(),
            stats: st.stats,
            comparisons,
            failures: st
                .failures
                .iter()
                .map(|(id, f)| (id.clone(), f.message.clone()))
                .collect(),
        }
    }
}
