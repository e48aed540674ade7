//! Local inference backend for Folio.
//!
//! Talks to any OpenAI-compatible server (llama-server, Ollama and friends)
//! running on this machine and exposes it as a [`folio_chat::ModelRuntime`].

mod client;
mod error;
mod runtime;

#[cfg(test)]
mod test_server;

pub use client::LocalServerClient;
pub use error::LocalAIError;
pub use runtime::{LocalServerHandle, LocalServerRuntime};

/// Default port for the local server.
pub const DEFAULT_PORT: u16 = 11435;

/// Environment variable overriding the server URL.
pub const LOCAL_AI_URL_ENV: &str = "FOLIO_LOCAL_AI_URL";
