//! Error types for local AI operations.

use folio_chat::RuntimeError;
use thiserror::Error;

/// Errors that can occur while talking to the local inference server.
#[derive(Debug, Error)]
pub enum LocalAIError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error response. The body is kept verbatim.
    #[error("API error: {0}")]
    Api(String),

    /// Server is not running or not reachable.
    #[error("Server not running at {0}. Start an OpenAI-compatible server or set FOLIO_LOCAL_AI_URL")]
    ServerNotRunning(String),

    /// The stream ended before the server sent `[DONE]`.
    #[error("Stream ended unexpectedly")]
    StreamInterrupted,
}

impl From<LocalAIError> for RuntimeError {
    fn from(error: LocalAIError) -> Self {
        RuntimeError::new(error.to_string())
    }
}
