//! [`ModelRuntime`] backed by the local inference server.

use async_trait::async_trait;
use folio_chat::{
    ChatMessage, GenerationHandle, GenerationParams, LoadOptions, LoadProgress, ModelRuntime,
    RuntimeError,
};
use tracing::{debug, info};

use crate::client::LocalServerClient;

/// Loads models by asking the server to serve them.
///
/// The server owns the weights; "loading" here means checking it is up
/// and forcing it to bring the model into memory with a one-token request.
#[derive(Debug, Clone, Default)]
pub struct LocalServerRuntime {
    client: LocalServerClient,
}

impl LocalServerRuntime {
    pub fn new(client: LocalServerClient) -> Self {
        Self { client }
    }

    /// Runtime for `FOLIO_LOCAL_AI_URL`, or the default port.
    pub fn from_env() -> Self {
        Self::new(LocalServerClient::from_env())
    }

    pub fn client(&self) -> &LocalServerClient {
        &self.client
    }
}

#[async_trait]
impl ModelRuntime for LocalServerRuntime {
    async fn load(
        &self,
        model_id: &str,
        options: &LoadOptions,
        progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<Box<dyn GenerationHandle>, RuntimeError> {
        debug!(
            "Loading '{}' from {} (dtype {}, device {})",
            model_id,
            self.client.base_url(),
            options.dtype,
            options.device
        );

        self.client.check_health().await?;
        progress(LoadProgress::new(25.0, format!("Connected to {}", self.client.base_url())));

        self.client.warm_up(model_id).await?;
        progress(LoadProgress::new(100.0, format!("{} is ready", model_id)));
        info!("Server has '{}' loaded", model_id);

        Ok(Box::new(LocalServerHandle {
            client: self.client.clone(),
            model_id: model_id.to_string(),
        }))
    }
}

/// A model being served by the local server.
#[derive(Debug)]
pub struct LocalServerHandle {
    client: LocalServerClient,
    model_id: String,
}

impl LocalServerHandle {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl GenerationHandle for LocalServerHandle {
    fn has_tokenizer(&self) -> bool {
        // Tokenization happens server-side.
        true
    }

    async fn generate(
        &mut self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String, RuntimeError> {
        let reply = self
            .client
            .stream_chat(&self.model_id, messages, params, on_token)
            .await?;
        Ok(reply)
    }
}
