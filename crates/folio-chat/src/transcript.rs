//! In-memory chat transcript owned by the session.

use crate::runtime::ChatMessage;
use crate::tier::ModelTier;

/// A user utterance and the tier that was active when it was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub text: String,
    pub tier: ModelTier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    User(GenerationRequest),
    Assistant(String),
}

impl TranscriptEntry {
    pub fn to_message(&self) -> ChatMessage {
        match self {
            TranscriptEntry::User(request) => ChatMessage::user(request.text.clone()),
            TranscriptEntry::Assistant(reply) => ChatMessage::assistant(reply.clone()),
        }
    }
}

/// Conversation shown to the user. Lost when the process exits.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>, tier: ModelTier) {
        self.entries.push(TranscriptEntry::User(GenerationRequest {
            text: text.into(),
            tier,
        }));
    }

    pub fn push_assistant(&mut self, reply: impl Into<String>) {
        self.entries.push(TranscriptEntry::Assistant(reply.into()));
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(TranscriptEntry::to_message).collect()
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|entry| match entry {
            TranscriptEntry::Assistant(reply) => Some(reply.as_str()),
            TranscriptEntry::User(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
