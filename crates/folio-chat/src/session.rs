//! The chat session: one worker, one transcript, one preference store.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::device;
use crate::prefs::{PreferenceError, PreferenceStore};
use crate::protocol::{WorkerEvent, WorkerRequest};
use crate::runtime::ModelRuntime;
use crate::tier::ModelTier;
use crate::transcript::Transcript;
use crate::worker::{GenerationWorker, WorkerGone, WorkerSettings};

/// Chat session errors.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no model is loaded; start the session first")]
    NotStarted,
    #[error("model load failed: {0}")]
    LoadFailed(String),
    #[error(transparent)]
    WorkerGone(#[from] WorkerGone),
    #[error("preference error: {0}")]
    Preference(#[from] PreferenceError),
}

struct RunningWorker {
    worker: GenerationWorker,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl RunningWorker {
    /// Forward events to `on_event` until the request's `done`.
    async fn drain(
        &mut self,
        on_event: &mut dyn FnMut(&WorkerEvent),
    ) -> Result<Vec<WorkerEvent>, WorkerGone> {
        let mut seen = Vec::new();
        loop {
            let event = self.events.recv().await.ok_or(WorkerGone)?;
            on_event(&event);
            let done = event.is_done();
            seen.push(event);
            if done {
                return Ok(seen);
            }
        }
    }
}

/// A conversation with the local assistant.
pub struct ChatSession {
    runtime: Arc<dyn ModelRuntime>,
    config: ChatConfig,
    preferences: PreferenceStore,
    transcript: Transcript,
    worker: Option<RunningWorker>,
    active_tier: Option<ModelTier>,
}

impl ChatSession {
    pub fn new(runtime: Arc<dyn ModelRuntime>, config: ChatConfig) -> Self {
        let preferences = PreferenceStore::in_dir(&config.data_dir);
        Self {
            runtime,
            config,
            preferences,
            transcript: Transcript::new(),
            worker: None,
            active_tier: None,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    /// The tier to start with: the stored choice, then configuration, then
    /// what the device looks able to run.
    pub fn initial_tier(&self) -> ModelTier {
        match self.preferences.load() {
            Ok(Some(tier)) => {
                debug!("Using stored tier preference {}", tier);
                return tier;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read tier preference: {}", e),
        }

        if let Some(tier) = self.config.tier {
            return tier;
        }

        let profile = device::detect(&self.config.device_hints());
        device::select_tier(&profile, &self.config.catalog)
    }

    /// Spawn a worker and load `tier`, falling back as needed.
    ///
    /// Returns the tier that actually loaded. Every worker event is passed
    /// to `on_event`, including load progress.
    pub async fn start(
        &mut self,
        tier: ModelTier,
        mut on_event: impl FnMut(&WorkerEvent),
    ) -> Result<ModelTier, ChatError> {
        self.stop_worker();

        let settings = WorkerSettings::from_config(&self.config);
        let (worker, events) = GenerationWorker::spawn(self.runtime.clone(), settings);
        let mut running = RunningWorker { worker, events };

        running.worker.post(WorkerRequest::Init {
            model_selection: tier,
        })?;
        running.worker.post(WorkerRequest::Load)?;

        let mut loaded_tier = tier;
        let mut failure = None;
        let mut observe = |event: &WorkerEvent| {
            match event {
                WorkerEvent::FallbackModel { fallback_model, .. } => {
                    loaded_tier = *fallback_model;
                }
                WorkerEvent::Error { error } => failure = Some(error.clone()),
                _ => {}
            }
            on_event(event);
        };
        let seen = running.drain(&mut observe).await?;

        if !seen.iter().any(WorkerEvent::is_load_success) {
            running.worker.terminate();
            let reason = failure.unwrap_or_else(|| "worker finished without loading".to_string());
            return Err(ChatError::LoadFailed(reason));
        }

        info!("Chat session ready on {} tier", loaded_tier);
        self.worker = Some(running);
        self.active_tier = Some(loaded_tier);
        Ok(loaded_tier)
    }

    /// Send one user message and return the full reply.
    ///
    /// Fragments are passed to `on_chunk` in the order they are generated.
    pub async fn send(
        &mut self,
        text: &str,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<String, ChatError> {
        self.send_observed(text, |event| {
            if let WorkerEvent::Stream { response } = event {
                on_chunk(response);
            }
        })
        .await
    }

    /// Like [`send`](Self::send), but reports every raw worker event.
    pub async fn send_observed(
        &mut self,
        text: &str,
        mut on_event: impl FnMut(&WorkerEvent),
    ) -> Result<String, ChatError> {
        let tier = self.active_tier.ok_or(ChatError::NotStarted)?;
        let running = self.worker.as_mut().ok_or(ChatError::NotStarted)?;

        running.worker.post(WorkerRequest::Generate {
            input: text.to_string(),
        })?;

        let mut reply = String::new();
        let mut collect = |event: &WorkerEvent| {
            if let WorkerEvent::Stream { response } = event {
                reply.push_str(response);
            }
            on_event(event);
        };
        running.drain(&mut collect).await?;

        // Only completed turns enter the transcript.
        self.transcript.push_user(text, tier);
        self.transcript.push_assistant(reply.clone());
        Ok(reply)
    }

    /// Restart the worker on `tier` and remember the choice once it loads.
    ///
    /// If the new tier cannot be loaded the previous tier is started again
    /// and the stored preference is left untouched. The load error is still
    /// returned.
    pub async fn switch_tier(
        &mut self,
        tier: ModelTier,
        mut on_event: impl FnMut(&WorkerEvent),
    ) -> Result<ModelTier, ChatError> {
        let previous = self.active_tier;
        info!("Switching to {} tier", tier);

        match self.start(tier, &mut on_event).await {
            Ok(loaded) => {
                self.preferences.save(tier)?;
                Ok(loaded)
            }
            Err(error) => {
                if let Some(previous) = previous {
                    warn!("Could not switch to {} tier, restoring {}: {}", tier, previous, error);
                    if let Err(restore) = self.start(previous, &mut on_event).await {
                        warn!("Could not restore {} tier: {}", previous, restore);
                    }
                }
                Err(error)
            }
        }
    }

    /// Forget the stored tier choice.
    pub fn reset_preference(&self) -> Result<(), ChatError> {
        self.preferences.reset()?;
        Ok(())
    }

    pub fn clear_history(&mut self) {
        self.transcript.clear();
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// The tier currently loaded, after any fallback.
    pub fn active_tier(&self) -> Option<ModelTier> {
        self.active_tier
    }

    pub fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    /// Terminate the worker. The transcript is kept.
    pub fn shutdown(&mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        if let Some(running) = self.worker.take() {
            running.worker.terminate();
        }
        self.active_tier = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRuntime;
    use std::time::Duration;
    use tempfile::tempdir;

    fn session(runtime: ScriptedRuntime, dir: &std::path::Path) -> ChatSession {
        let config = ChatConfig::builder().data_dir(dir).build();
        ChatSession::new(Arc::new(runtime), config)
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let dir = tempdir().unwrap();
        let mut chat = session(ScriptedRuntime::new(), dir.path());
        let result = chat.send("hello", |_| {}).await;
        assert!(matches!(result, Err(ChatError::NotStarted)));
        assert!(chat.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_start_tracks_fallback_tier() {
        let dir = tempdir().unwrap();
        let runtime = ScriptedRuntime::with_load_results(vec![
            Err("Out of memory"),
            Err("Out of memory"),
            Ok(()),
        ]);
        let mut chat = session(runtime, dir.path());

        let mut fallbacks = Vec::new();
        let tier = chat
            .start(ModelTier::Large, |event| {
                if let WorkerEvent::FallbackModel { fallback_model, .. } = event {
                    fallbacks.push(*fallback_model);
                }
            })
            .await
            .unwrap();

        assert_eq!(tier, ModelTier::Small);
        assert_eq!(chat.active_tier(), Some(ModelTier::Small));
        assert_eq!(fallbacks, vec![ModelTier::Medium, ModelTier::Small]);
    }

    #[tokio::test]
    async fn test_start_reports_load_failure() {
        let dir = tempdir().unwrap();
        let runtime = ScriptedRuntime::with_load_results(vec![Err("model not found")]);
        let mut chat = session(runtime, dir.path());

        let result = chat.start(ModelTier::Medium, |_| {}).await;
        match result {
            Err(ChatError::LoadFailed(reason)) => assert!(reason.contains("model not found")),
            other => panic!("expected load failure, got {:?}", other),
        }
        assert!(!chat.is_started());
        assert_eq!(chat.active_tier(), None);
    }

    #[tokio::test]
    async fn test_send_streams_and_records_transcript() {
        let dir = tempdir().unwrap();
        let runtime = ScriptedRuntime::new().fragments(&["The ", "answer ", "is ", "42."]);
        let mut chat = session(runtime, dir.path());
        chat.start(ModelTier::Small, |_| {}).await.unwrap();

        let mut chunks = Vec::new();
        let reply = chat
            .send("What is the answer?", |chunk| chunks.push(chunk.to_string()))
            .await
            .unwrap();

        assert_eq!(reply, "The answer is 42.");
        assert_eq!(chunks, vec!["The ", "answer ", "is ", "42."]);
        assert_eq!(chat.transcript().len(), 2);
        assert_eq!(chat.transcript().last_reply(), Some("The answer is 42."));

        chat.clear_history();
        assert!(chat.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_switch_tier_persists_preference() {
        let dir = tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new());
        let config = ChatConfig::builder().data_dir(dir.path()).build();
        let mut chat = ChatSession::new(runtime.clone(), config);

        chat.start(ModelTier::Small, |_| {}).await.unwrap();
        let tier = chat.switch_tier(ModelTier::Large, |_| {}).await.unwrap();

        assert_eq!(tier, ModelTier::Large);
        assert_eq!(chat.initial_tier(), ModelTier::Large);
        let catalog = &chat.config().catalog;
        assert_eq!(
            runtime.requested_models(),
            vec![
                catalog.spec(ModelTier::Small).model_id.clone(),
                catalog.spec(ModelTier::Large).model_id.clone(),
            ]
        );

        chat.reset_preference().unwrap();
        assert_eq!(chat.preferences().load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_switch_restores_previous_tier() {
        let dir = tempdir().unwrap();
        let runtime = ScriptedRuntime::with_load_results(vec![Ok(()), Err("model not found")]);
        let mut chat = session(runtime, dir.path());
        chat.start(ModelTier::Small, |_| {}).await.unwrap();

        let result = chat.switch_tier(ModelTier::Medium, |_| {}).await;
        assert!(matches!(result, Err(ChatError::LoadFailed(_))));

        assert!(chat.is_started());
        assert_eq!(chat.active_tier(), Some(ModelTier::Small));
        assert_eq!(chat.preferences().load().unwrap(), None);
        assert_eq!(chat.send("still here", |_| {}).await.unwrap(), "still here");
    }

    #[tokio::test]
    async fn test_failed_send_leaves_transcript_unchanged() {
        let dir = tempdir().unwrap();
        let runtime = ScriptedRuntime::new().fragment_delay(Duration::from_millis(200));
        let mut chat = session(runtime, dir.path());
        chat.start(ModelTier::Small, |_| {}).await.unwrap();

        // Kill the worker task while the reply is streaming.
        let task = chat.worker.as_ref().map(|running| running.worker.abort_handle()).unwrap();
        let abort = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            task.abort();
        });

        let result = chat.send("never answered", |_| {}).await;
        abort.await.unwrap();
        assert!(matches!(result, Err(ChatError::WorkerGone(_))));
        assert!(chat.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_initial_tier_prefers_stored_choice() {
        let dir = tempdir().unwrap();
        let config = ChatConfig::builder()
            .data_dir(dir.path())
            .tier(ModelTier::Medium)
            .build();
        let chat = ChatSession::new(Arc::new(ScriptedRuntime::new()), config);
        assert_eq!(chat.initial_tier(), ModelTier::Medium);

        chat.preferences().save(ModelTier::Small).unwrap();
        assert_eq!(chat.initial_tier(), ModelTier::Small);
    }

    #[tokio::test]
    async fn test_initial_tier_uses_device_hint() {
        let dir = tempdir().unwrap();
        let config = ChatConfig::builder()
            .data_dir(dir.path())
            .device_memory_gb(0.25)
            .build();
        let chat = ChatSession::new(Arc::new(ScriptedRuntime::new()), config);
        assert_eq!(chat.initial_tier(), ModelTier::Small);
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let dir = tempdir().unwrap();
        let mut chat = session(ScriptedRuntime::new(), dir.path());
        chat.start(ModelTier::Small, |_| {}).await.unwrap();
        chat.send("hi", |_| {}).await.unwrap();

        chat.shutdown();
        assert!(!chat.is_started());
        assert_eq!(chat.transcript().len(), 2);
        assert!(matches!(
            chat.send("again", |_| {}).await,
            Err(ChatError::NotStarted)
        ));
    }
}
