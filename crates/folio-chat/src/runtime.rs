//! The contract with the external inference runtime.
//!
//! Tokenization, quantization and model execution all live behind these
//! traits. The crate only loads a model by id and dtype, then asks the
//! resulting handle to generate with a streaming callback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation, in the chat-template shape runtimes expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters passed to every generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_new_tokens: u32,
    /// `false` means greedy decoding; temperature is then ignored.
    pub do_sample: bool,
    pub top_k: u32,
    pub repetition_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_new_tokens: 128,
            // Greedy decoding keeps factual recall consistent on small models
            do_sample: false,
            top_k: 50,
            repetition_penalty: 1.2,
        }
    }
}

/// Options for a single model load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub dtype: String,
    pub device: String,
}

/// Progress reported by the runtime while a model loads.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadProgress {
    /// Percentage complete, 0.0 to 100.0.
    pub percent: f64,
    pub message: String,
}

impl LoadProgress {
    pub fn new(percent: f64, message: impl Into<String>) -> Self {
        Self {
            percent: percent.clamp(0.0, 100.0),
            message: message.into(),
        }
    }
}

/// An opaque failure reported by the runtime.
///
/// Runtimes only give us text, so classification works on the message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RuntimeError {
    message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the failure looks like the device ran out of memory.
    pub fn is_memory_pressure(&self) -> bool {
        let message = self.message.to_lowercase();
        message.contains("memory") || message.contains("allocation")
    }
}

/// Something that can load models.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Load `model_id` and return a handle ready for generation.
    async fn load(
        &self,
        model_id: &str,
        options: &LoadOptions,
        progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<Box<dyn GenerationHandle>, RuntimeError>;
}

/// A loaded model.
#[async_trait]
pub trait GenerationHandle: Send {
    /// Whether the tokenizer is available. Generation is refused without it.
    fn has_tokenizer(&self) -> bool;

    /// Generate a reply, calling `on_token` with each text fragment in order.
    ///
    /// Returns the full generated text.
    async fn generate(
        &mut self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pressure_classification() {
        assert!(RuntimeError::new("Out of Memory while creating session").is_memory_pressure());
        assert!(RuntimeError::new("failed buffer ALLOCATION").is_memory_pressure());
        assert!(!RuntimeError::new("network error: connection reset").is_memory_pressure());
    }

    #[test]
    fn test_chat_message_wire_shape() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(LoadProgress::new(140.0, "x").percent, 100.0);
        assert_eq!(LoadProgress::new(-1.0, "x").percent, 0.0);
    }
}
