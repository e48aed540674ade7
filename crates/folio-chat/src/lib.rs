//! # Folio Chat
//!
//! This crate runs a small instruction-tuned model in a background worker
//! and streams its answers about a portfolio owner back to the caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  init/load/generate  ┌─────────────────┐     ┌─────────────────┐
//! │   ChatSession   │ -------------------> │ GenerationWorker│ --> │  ModelRuntime   │
//! │  (transcript,   │ <------------------- │  (owns handle)  │     │  (opaque load/  │
//! │   preferences)  │  initiate/load/...   └────────┬────────┘     │   generate)     │
//! └─────────────────┘        stream/done            │              └─────────────────┘
//!                                             ┌─────┴──────┐
//!                                             │  Fallback  │
//!                                             │   Loader   │
//!                                             └────────────┘
//! ```
//!
//! ## Tiers
//!
//! - **small** - always loadable, lowest quality
//! - **medium** - the usual choice for laptops
//! - **large** - best answers, first to fall back under memory pressure
//!
//! ## Usage
//!
//! ```ignore
//! use folio_chat::{ChatConfig, ChatSession};
//!
//! let mut session = ChatSession::new(runtime, ChatConfig::from_env());
//! let tier = session.start(session.initial_tier(), |_| {}).await?;
//! let reply = session.send("What projects are you working on?", |chunk| print!("{chunk}")).await?;
//! ```

mod config;
pub mod device;
pub mod eval;
mod loader;
pub mod paths;
mod prefs;
mod profile;
mod prompt;
mod protocol;
mod runtime;
mod session;
mod tier;
mod transcript;
mod worker;

#[cfg(test)]
mod testing;

pub use config::{ChatConfig, ChatConfigBuilder};
pub use loader::{FallbackLoader, FallbackPolicy, LoadOutcome};
pub use prefs::{PreferenceError, PreferenceStore};
pub use profile::fetch_github_bio;
pub use prompt::{build_messages, PersonaProfile};
pub use protocol::{WorkerEvent, WorkerRequest, ALL_FALLBACKS_FAILED, LOAD_SUCCESS};
pub use runtime::{
    ChatMessage, GenerationHandle, GenerationParams, LoadOptions, LoadProgress, ModelRuntime, Role,
    RuntimeError,
};
pub use session::{ChatError, ChatSession};
pub use tier::{ModelTier, ParseTierError, TierCatalog, TierSpec};
pub use transcript::{GenerationRequest, Transcript, TranscriptEntry};
pub use worker::{
    GenerationWorker, WorkerGone, WorkerSettings, WorkerState, LOAD_FAILED_REPLY, NOT_READY_REPLY,
    NO_TOKENIZER_REPLY,
};
