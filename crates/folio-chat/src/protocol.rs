//! Messages exchanged between the session and the generation worker.
//!
//! Both directions are closed tagged unions. The serialized form matches the
//! JSON shape the chat front end posts: requests are tagged by `action`,
//! events by `status`.

use serde::{Deserialize, Serialize};

use crate::tier::ModelTier;

/// Message text of the `load` event sent once a model is ready.
pub const LOAD_SUCCESS: &str = "success";

/// Prefix of the `error` event sent when no tier could be loaded.
pub const ALL_FALLBACKS_FAILED: &str = "all fallback attempts failed";

/// Session to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum WorkerRequest {
    /// Record the tier to load. No output.
    Init {
        #[serde(rename = "modelSelection")]
        model_selection: ModelTier,
    },
    /// Load the recorded tier, falling back to smaller ones.
    Load,
    /// Generate a reply to `input`.
    Generate { input: String },
}

/// Worker to session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum WorkerEvent {
    /// A load attempt for one tier has started.
    #[serde(rename = "initiate")]
    Initiate { message: String },
    /// Load progress, or the final success when `progress` is absent.
    #[serde(rename = "load")]
    Load {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
    },
    /// The requested tier failed and a smaller one will be tried.
    #[serde(rename = "fallback-model")]
    FallbackModel {
        #[serde(rename = "fallbackModel")]
        fallback_model: ModelTier,
        message: String,
    },
    /// A generated fragment, or an informational reply.
    #[serde(rename = "stream")]
    Stream { response: String },
    #[serde(rename = "error")]
    Error { error: String },
    /// Terminal event: sent exactly once per `load` and `generate` request.
    #[serde(rename = "done")]
    Done,
}

impl WorkerEvent {
    pub fn load_success() -> Self {
        WorkerEvent::Load {
            message: LOAD_SUCCESS.to_string(),
            progress: None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, WorkerEvent::Done)
    }

    pub fn is_load_success(&self) -> bool {
        matches!(self, WorkerEvent::Load { message, progress: None } if message == LOAD_SUCCESS)
    }
}
