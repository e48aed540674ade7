//! Scripted runtime used by unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::runtime::{
    ChatMessage, GenerationHandle, GenerationParams, LoadOptions, LoadProgress, ModelRuntime,
    Role, RuntimeError,
};

/// Runtime whose load results and generated fragments are fixed up front.
///
/// Loads succeed once the scripted results run out. With no fragments
/// configured, the handle echoes the user message word by word.
#[derive(Default)]
pub(crate) struct ScriptedRuntime {
    loads: Mutex<VecDeque<Result<(), String>>>,
    requested: Mutex<Vec<String>>,
    fragments: Vec<String>,
    generation_error: Option<String>,
    panic_on_generate: bool,
    no_tokenizer: bool,
    fragment_delay: Option<Duration>,
}

impl ScriptedRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_load_results(results: Vec<Result<(), &str>>) -> Self {
        Self {
            loads: Mutex::new(
                results
                    .into_iter()
                    .map(|r| r.map_err(|e| e.to_string()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub(crate) fn fragments(mut self, fragments: &[&str]) -> Self {
        self.fragments = fragments.iter().map(|f| f.to_string()).collect();
        self
    }

    pub(crate) fn failing_generation(mut self, message: &str) -> Self {
        self.generation_error = Some(message.to_string());
        self
    }

    pub(crate) fn panicking_generation(mut self) -> Self {
        self.panic_on_generate = true;
        self
    }

    pub(crate) fn without_tokenizer(mut self) -> Self {
        self.no_tokenizer = true;
        self
    }

    pub(crate) fn fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    pub(crate) fn requested_models(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelRuntime for ScriptedRuntime {
    async fn load(
        &self,
        model_id: &str,
        _options: &LoadOptions,
        progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<Box<dyn GenerationHandle>, RuntimeError> {
        self.requested.lock().unwrap().push(model_id.to_string());
        progress(LoadProgress::new(50.0, "fetching weights"));

        let scripted = self.loads.lock().unwrap().pop_front();
        if let Some(Err(message)) = scripted {
            return Err(RuntimeError::new(message));
        }

        progress(LoadProgress::new(100.0, "ready"));
        Ok(Box::new(ScriptedHandle {
            fragments: self.fragments.clone(),
            generation_error: self.generation_error.clone(),
            panic_on_generate: self.panic_on_generate,
            has_tokenizer: !self.no_tokenizer,
            fragment_delay: self.fragment_delay,
        }))
    }
}

struct ScriptedHandle {
    fragments: Vec<String>,
    generation_error: Option<String>,
    panic_on_generate: bool,
    has_tokenizer: bool,
    fragment_delay: Option<Duration>,
}

#[async_trait]
impl GenerationHandle for ScriptedHandle {
    fn has_tokenizer(&self) -> bool {
        self.has_tokenizer
    }

    async fn generate(
        &mut self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String, RuntimeError> {
        if self.panic_on_generate {
            panic!("scripted generation panic");
        }

        let fragments: Vec<String> = if self.fragments.is_empty() {
            messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.split_inclusive(' ').map(str::to_string).collect())
                .unwrap_or_default()
        } else {
            self.fragments.clone()
        };

        let mut output = String::new();
        for fragment in &fragments {
            if let Some(delay) = self.fragment_delay {
                tokio::time::sleep(delay).await;
            }
            on_token(fragment);
            output.push_str(fragment);
        }

        match &self.generation_error {
            Some(message) => Err(RuntimeError::new(message.clone())),
            None => Ok(output),
        }
    }
}
