//! System prompt for the portfolio assistant.

use serde::{Deserialize, Serialize};

use crate::runtime::ChatMessage;

/// Who the assistant speaks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaProfile {
    /// Name used in answers, e.g. a first name.
    pub name: String,
    /// Full name used to introduce the assistant.
    pub full_name: String,
    /// Upper bound on answer length, in sentences.
    pub max_answer_sentences: u32,
    /// Extra facts appended to the prompt, such as a profile bio.
    pub context: Option<String>,
}

impl Default for PersonaProfile {
    fn default() -> Self {
        Self {
            name: "the author".to_string(),
            full_name: "the author".to_string(),
            max_answer_sentences: 3,
            context: None,
        }
    }
}

impl PersonaProfile {
    pub fn new(name: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_name: full_name.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        let context = context.trim();
        self.context = if context.is_empty() {
            None
        } else {
            Some(context.to_string())
        };
        self
    }

    /// Build the system message.
    ///
    /// Must match the wording the fine-tuned models were trained on.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are {}'s AI assistant. Answer questions about {} using only the provided context. \
             Give informative but concise answers in 1-{} short sentences.",
            self.full_name,
            self.name,
            self.max_answer_sentences.max(1)
        );

        if let Some(context) = &self.context {
            prompt.push_str("\n\nContext:\n");
            prompt.push_str(context);
        }

        prompt
    }
}

/// Messages sent to the runtime for one user turn.
pub fn build_messages(system_prompt: &str, input: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(input.trim()),
    ]
}
