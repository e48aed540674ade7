//! The background generation worker.
//!
//! The worker task owns the loaded model. The session talks to it only
//! through [`WorkerRequest`]s and receives [`WorkerEvent`]s back on a single
//! ordered channel. Requests are handled strictly one at a time: a
//! `generate` posted while another is streaming waits until the first one
//! has sent its `done`.

use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::loader::{FallbackLoader, FallbackPolicy, LoadOutcome};
use crate::prompt::build_messages;
use crate::protocol::{WorkerEvent, WorkerRequest, ALL_FALLBACKS_FAILED};
use crate::runtime::{GenerationHandle, GenerationParams, ModelRuntime, RuntimeError};
use crate::tier::{ModelTier, TierCatalog};

/// Reply sent when `generate` arrives before a model is ready.
pub const NOT_READY_REPLY: &str =
    "The assistant is still loading. Please wait a moment and try again.";

/// Reply sent when `generate` arrives after every tier failed to load.
pub const LOAD_FAILED_REPLY: &str =
    "The assistant could not load a model. Switch tiers or restart to try again.";

/// Reply sent when the model has no usable tokenizer.
pub const NO_TOKENIZER_REPLY: &str =
    "The model's tokenizer is not available yet. Please try again shortly.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Loading,
    Ready,
    Generating,
    /// Every tier failed to load. Only a new worker can recover.
    Failed,
}

/// The worker task has exited.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("generation worker is no longer running")]
pub struct WorkerGone;

/// Everything the worker needs besides the runtime.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub catalog: TierCatalog,
    pub fallback_policy: FallbackPolicy,
    pub device: String,
    pub generation: GenerationParams,
    pub generation_timeout: Option<Duration>,
    pub system_prompt: String,
}

impl WorkerSettings {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            catalog: config.catalog.clone(),
            fallback_policy: config.fallback_policy,
            device: config.device.clone(),
            generation: config.generation.clone(),
            generation_timeout: config.generation_timeout,
            system_prompt: config.persona.system_prompt(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default())
    }
}

/// Handle to a running worker task.
///
/// Dropping the handle terminates the worker.
pub struct GenerationWorker {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    task: JoinHandle<()>,
}

impl GenerationWorker {
    /// Spawn a worker on the current tokio runtime.
    pub fn spawn(
        runtime: Arc<dyn ModelRuntime>,
        settings: WorkerSettings,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker_loop = WorkerLoop {
            runtime,
            settings,
            events: event_tx,
            state: WorkerState::Uninitialized,
            tier: None,
            handle: None,
        };
        let task = tokio::spawn(worker_loop.run(request_rx));
        debug!("Generation worker spawned");

        (
            Self {
                requests: request_tx,
                task,
            },
            event_rx,
        )
    }

    /// Queue a request for the worker.
    pub fn post(&self, request: WorkerRequest) -> Result<(), WorkerGone> {
        self.requests.send(request).map_err(|_| WorkerGone)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    #[cfg(test)]
    pub(crate) fn abort_handle(&self) -> tokio::task::AbortHandle {
        self.task.abort_handle()
    }

    /// Stop the worker immediately, dropping any loaded model and abandoning
    /// in-flight work.
    pub fn terminate(self) {
        info!("Terminating generation worker");
        drop(self);
    }
}

impl Drop for GenerationWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct WorkerLoop {
    runtime: Arc<dyn ModelRuntime>,
    settings: WorkerSettings,
    events: mpsc::UnboundedSender<WorkerEvent>,
    state: WorkerState,
    tier: Option<ModelTier>,
    handle: Option<Box<dyn GenerationHandle>>,
}

impl WorkerLoop {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<WorkerRequest>) {
        while let Some(request) = requests.recv().await {
            match request {
                WorkerRequest::Init { model_selection } => self.init(model_selection),
                WorkerRequest::Load => self.load().await,
                WorkerRequest::Generate { input } => self.generate(&input).await,
            }
        }
        debug!("Worker request channel closed, exiting");
    }

    fn emit(&self, event: WorkerEvent) {
        // The receiver only goes away when the session is shutting down.
        let _ = self.events.send(event);
    }

    fn init(&mut self, tier: ModelTier) {
        if self.state != WorkerState::Uninitialized {
            warn!(
                "Ignoring init({}) in state {:?}; recreate the worker to switch tiers",
                tier, self.state
            );
            return;
        }
        debug!("Worker initialised with {} tier", tier);
        self.tier = Some(tier);
    }

    async fn load(&mut self) {
        if self.state != WorkerState::Uninitialized {
            warn!("Ignoring load in state {:?}", self.state);
            self.emit(WorkerEvent::Error {
                error: format!(
                    "cannot load in state {:?}; terminate the worker and start a new one",
                    self.state
                ),
            });
            self.emit(WorkerEvent::Done);
            return;
        }

        let requested = self.tier.unwrap_or_else(|| {
            debug!("No tier recorded before load, using the smallest");
            ModelTier::smallest()
        });
        self.state = WorkerState::Loading;

        let loader = FallbackLoader::new(self.runtime.clone(), self.settings.catalog.clone())
            .with_policy(self.settings.fallback_policy)
            .with_device(self.settings.device.clone());
        let events = self.events.clone();
        let emit = move |event: WorkerEvent| {
            let _ = events.send(event);
        };

        match loader.load_with_fallback(requested, &emit).await {
            LoadOutcome::Loaded { tier, handle, .. } => {
                self.tier = Some(tier);
                self.handle = Some(handle);
                self.state = WorkerState::Ready;
                self.emit(WorkerEvent::load_success());
            }
            LoadOutcome::Failed {
                tier,
                attempts,
                error,
            } => {
                error!(
                    "Model load failed after {} attempt(s), last tier {}: {}",
                    attempts, tier, error
                );
                self.state = WorkerState::Failed;
                self.emit(WorkerEvent::Error {
                    error: format!("{}: {}", ALL_FALLBACKS_FAILED, error),
                });
            }
        }

        self.emit(WorkerEvent::Done);
    }

    async fn generate(&mut self, input: &str) {
        self.stream_reply(input).await;
        self.emit(WorkerEvent::Done);
    }

    /// Everything for one `generate` except the terminal `done`.
    async fn stream_reply(&mut self, input: &str) {
        let Some(handle) = self.handle.as_mut() else {
            debug!("generate received in state {:?}", self.state);
            let reply = if self.state == WorkerState::Failed {
                LOAD_FAILED_REPLY
            } else {
                NOT_READY_REPLY
            };
            let _ = self.events.send(WorkerEvent::Stream {
                response: reply.to_string(),
            });
            return;
        };

        if !handle.has_tokenizer() {
            warn!("generate received but the tokenizer is unavailable");
            let _ = self.events.send(WorkerEvent::Stream {
                response: NO_TOKENIZER_REPLY.to_string(),
            });
            return;
        }

        self.state = WorkerState::Generating;
        let messages = build_messages(&self.settings.system_prompt, input);
        let events = self.events.clone();
        let mut on_token = move |fragment: &str| {
            if !fragment.is_empty() {
                let _ = events.send(WorkerEvent::Stream {
                    response: fragment.to_string(),
                });
            }
        };

        let generation =
            AssertUnwindSafe(handle.generate(&messages, &self.settings.generation, &mut on_token))
                .catch_unwind();
        let result = match self.settings.generation_timeout {
            Some(limit) => match tokio::time::timeout(limit, generation).await {
                Ok(finished) => finished,
                Err(_) => Ok(Err(RuntimeError::new(format!(
                    "generation timed out after {:?}",
                    limit
                )))),
            },
            None => generation.await,
        };

        self.state = WorkerState::Ready;

        let error = match result {
            Ok(Ok(text)) => {
                debug!("Generated {} characters", text.len());
                return;
            }
            Ok(Err(error)) => error,
            Err(payload) => RuntimeError::new(format!(
                "generation panicked: {}",
                panic_payload_message(payload.as_ref())
            )),
        };

        error!("Generation failed: {}", error);
        self.emit(WorkerEvent::Stream {
            response: format!("Error: {}", error),
        });
    }
}

fn panic_payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
