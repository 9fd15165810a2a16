//! Streaming orchestrator - one concurrent generation per selected model

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use super::{ModelSelection, ResponseRecord};
use crate::error::{EnsembleError, Result};
use crate::llm::{
    stream_with_handler, ClientMode, CompletionStats, ProviderClient, ProviderRegistry,
    StreamHandler,
};

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Progress notification for incremental rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseUpdate {
    Started { model_id: String },
    Chunk { model_id: String, text: String },
    Completed { model_id: String },
    Failed { model_id: String, error: String },
}

struct Slot {
    record: ResponseRecord,
    selection: ModelSelection,
    prompt: String,
    generation: u64,
    abort: Option<AbortHandle>,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    order: Vec<String>,
    pending: Vec<JoinHandle<()>>,
    next_generation: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Mutate a record only if `generation` still owns it
    fn with_current<F>(&mut self, model_id: &str, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut Slot),
    {
        match self.slots.get_mut(model_id) {
            Some(slot) if slot.generation == generation && slot.record.is_streaming => {
                f(slot);
                true
            }
            _ => false,
        }
    }
}

/// Fans a prompt out to every selected model and tracks each response.
///
/// Each record is written only by the task that owns its current
/// generation; writes from superseded tasks are dropped.
pub struct StreamingOrchestrator {
    registry: Arc<ProviderRegistry>,
    mode: ClientMode,
    inner: Arc<Mutex<Inner>>,
    updates: broadcast::Sender<ResponseUpdate>,
}

impl StreamingOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, mode: ClientMode) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            registry,
            mode,
            inner: Arc::new(Mutex::new(Inner::default())),
            updates,
        }
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    /// Receive progress events for every generation started after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ResponseUpdate> {
        self.updates.subscribe()
    }

    /// Launch a generation for each selection that has no record yet.
    ///
    /// Selections already streaming or finished are skipped, so calling
    /// this again with the same selections is harmless. Must be called from
    /// within a Tokio runtime. Returns the ids that were launched.
    pub fn start(&self, prompt: &str, selections: &[ModelSelection]) -> Vec<String> {
        let mut inner = self.inner.lock();
        let mut launched = Vec::new();

        for selection in selections {
            if inner.slots.contains_key(&selection.id) {
                debug!(model = %selection.label(), "orchestrator: already has a record, skipping");
                continue;
            }
            self.launch(&mut inner, selection.clone(), prompt.to_string());
            launched.push(selection.id.clone());
        }

        launched
    }

    /// Wait until every launched generation has settled
    pub async fn wait(&self) {
        loop {
            let pending = std::mem::take(&mut self.inner.lock().pending);
            if pending.is_empty() {
                break;
            }
            for result in join_all(pending).await {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        warn!(error = %e, "orchestrator: stream task panicked");
                    }
                }
            }
        }
    }

    /// Launch and wait for completion
    pub async fn run(&self, prompt: &str, selections: &[ModelSelection]) -> Vec<ResponseRecord> {
        self.start(prompt, selections);
        self.wait().await;
        self.responses()
    }

    /// Restart one model from scratch with the prompt it was started with
    pub fn retry(&self, model_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = inner
            .slots
            .get(model_id)
            .ok_or_else(|| EnsembleError::Config(format!("no response for model id `{model_id}`")))?;

        if let Some(abort) = &slot.abort {
            abort.abort();
        }
        let selection = slot.selection.clone();
        let prompt = slot.prompt.clone();

        info!(model = %selection.label(), "orchestrator: retrying");
        self.launch(&mut inner, selection, prompt);
        Ok(())
    }

    /// Drop a model's record and cancel its generation
    pub fn remove(&self, model_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.remove(model_id) else {
            return false;
        };
        if let Some(abort) = slot.abort {
            abort.abort();
        }
        inner.order.retain(|id| id != model_id);
        true
    }

    /// Cancel everything and forget all records
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        for slot in inner.slots.values() {
            if let Some(abort) = &slot.abort {
                abort.abort();
            }
        }
        inner.slots.clear();
        inner.order.clear();
        // generations keep counting so nothing in flight can match a new record
        debug!("orchestrator: reset");
    }

    /// Snapshot of all records in launch order
    pub fn responses(&self) -> Vec<ResponseRecord> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.slots.get(id))
            .map(|slot| slot.record.clone())
            .collect()
    }

    pub fn response(&self, model_id: &str) -> Option<ResponseRecord> {
        self.inner
            .lock()
            .slots
            .get(model_id)
            .map(|slot| slot.record.clone())
    }

    /// True while any generation is still streaming
    pub fn is_busy(&self) -> bool {
        self.inner
            .lock()
            .slots
            .values()
            .any(|slot| slot.record.is_streaming)
    }

    fn launch(&self, inner: &mut Inner, selection: ModelSelection, prompt: String) {
        let generation = inner.bump();
        let model_id = selection.id.clone();

        let slot = Slot {
            record: ResponseRecord::streaming(&selection),
            selection: selection.clone(),
            prompt: prompt.clone(),
            generation,
            abort: None,
        };
        if inner.slots.insert(model_id.clone(), slot).is_none() {
            inner.order.push(model_id.clone());
        }

        let client = self.registry.get(&selection.provider, self.mode);
        let writer = RecordWriter {
            inner: Arc::clone(&self.inner),
            updates: self.updates.clone(),
            model_id: model_id.clone(),
            generation,
        };

        info!(model = %selection.label(), generation, "orchestrator: streaming");
        let _ = self.updates.send(ResponseUpdate::Started {
            model_id: model_id.clone(),
        });

        let handle = tokio::spawn(drive(client, selection.model, prompt, writer));
        if let Some(slot) = inner.slots.get_mut(&model_id) {
            slot.abort = Some(handle.abort_handle());
        }
        inner.pending.push(handle);
    }
}

async fn drive(
    client: Result<Arc<dyn ProviderClient>>,
    model: String,
    prompt: String,
    mut writer: RecordWriter,
) {
    match client {
        Ok(client) => {
            stream_with_handler(client.as_ref(), &prompt, &model, &mut writer).await;
        }
        Err(e) => writer.on_error(&e),
    }
}

/// Writes one generation's events into its record
struct RecordWriter {
    inner: Arc<Mutex<Inner>>,
    updates: broadcast::Sender<ResponseUpdate>,
    model_id: String,
    generation: u64,
}

impl StreamHandler for RecordWriter {
    fn on_chunk(&mut self, chunk: &str) {
        let applied = self
            .inner
            .lock()
            .with_current(&self.model_id, self.generation, |slot| {
                slot.record.content.push_str(chunk)
            });

        if applied {
            let _ = self.updates.send(ResponseUpdate::Chunk {
                model_id: self.model_id.clone(),
                text: chunk.to_string(),
            });
        }
    }

    fn on_complete(&mut self, stats: CompletionStats) {
        let applied = self
            .inner
            .lock()
            .with_current(&self.model_id, self.generation, |slot| {
                slot.record.is_streaming = false;
                slot.record.is_complete = true;
                slot.record.response_time_ms = Some(stats.response_time_ms);
                slot.record.token_count = stats.token_count;
                slot.abort = None;
            });

        if applied {
            info!(
                model_id = %self.model_id,
                latency_ms = stats.response_time_ms,
                tokens = ?stats.token_count,
                "orchestrator: response complete"
            );
            let _ = self.updates.send(ResponseUpdate::Completed {
                model_id: self.model_id.clone(),
            });
        } else {
            debug!(model_id = %self.model_id, "orchestrator: dropped stale completion");
        }
    }

    fn on_error(&mut self, error: &EnsembleError) {
        let message = error.to_string();
        let applied = self
            .inner
            .lock()
            .with_current(&self.model_id, self.generation, |slot| {
                slot.record.is_streaming = false;
                slot.record.is_complete = true;
                slot.record.error = Some(message.clone());
                slot.abort = None;
            });

        if applied {
            warn!(model_id = %self.model_id, error = %message, "orchestrator: response failed");
            let _ = self.updates.send(ResponseUpdate::Failed {
                model_id: self.model_id.clone(),
                error: message,
            });
        } else {
            debug!(model_id = %self.model_id, "orchestrator: dropped stale error");
        }
    }
}
