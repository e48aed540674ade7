//! HTTP client for an OpenAI-compatible inference server.

use folio_chat::{ChatMessage, GenerationParams};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::LocalAIError;
use crate::{DEFAULT_PORT, LOCAL_AI_URL_ENV};

/// Client for communicating with the local server.
#[derive(Debug, Clone)]
pub struct LocalServerClient {
    client: reqwest::Client,
    base_url: String,
}

/// OpenAI-compatible chat completion request.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_k: u32,
    repeat_penalty: f32,
    stream: bool,
}

impl<'a> ChatCompletionRequest<'a> {
    /// A streamed request. Without sampling the server decodes greedily.
    fn streaming(model: &'a str, messages: &'a [ChatMessage], params: &GenerationParams) -> Self {
        Self {
            model,
            messages,
            temperature: if params.do_sample {
                params.temperature
            } else {
                0.0
            },
            max_tokens: params.max_new_tokens,
            top_k: params.top_k,
            repeat_penalty: params.repetition_penalty,
            stream: true,
        }
    }

    /// The smallest request that makes the server load `model`.
    fn warm_up(model: &'a str, messages: &'a [ChatMessage]) -> Self {
        Self {
            model,
            messages,
            temperature: 0.0,
            max_tokens: 1,
            top_k: 1,
            repeat_penalty: 1.0,
            stream: false,
        }
    }
}

/// One `data:` payload of a streamed completion.
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// A parsed server-sent event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseLine {
    Fragment(String),
    Done,
    /// Comments, blank lines, role-only deltas.
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> Result<SseLine, LocalAIError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(SseLine::Fragment)
        .unwrap_or(SseLine::Skip))
}

/// Splits a byte stream into complete lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left once the stream closes.
    pub(crate) fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

impl LocalServerClient {
    /// Create a new client with default URL (localhost:11435).
    pub fn new() -> Self {
        Self::with_url(format!("http://127.0.0.1:{}", DEFAULT_PORT))
    }

    /// Create a new client with a custom URL.
    pub fn with_url(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a new client with a custom port on localhost.
    pub fn with_port(port: u16) -> Self {
        Self::with_url(format!("http://127.0.0.1:{}", port))
    }

    /// Use `FOLIO_LOCAL_AI_URL` when set.
    pub fn from_env() -> Self {
        match std::env::var(LOCAL_AI_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::with_url(url.trim()),
            _ => Self::new(),
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the server is running and healthy.
    ///
    /// Tries `/health`, then `/v1/models` for servers without a health route.
    pub async fn check_health(&self) -> Result<(), LocalAIError> {
        for path in ["/health", "/v1/models"] {
            let url = format!("{}{}", self.base_url, path);
            let response = self
                .client
                .get(&url)
                .timeout(Duration::from_secs(5))
                .send()
                .await
                .map_err(|e| self.connection_error(e))?;

            if response.status().is_success() {
                debug!("Server healthy at {}", url);
                return Ok(());
            }
            debug!("{} returned {}", url, response.status());
        }

        Err(LocalAIError::ServerNotRunning(self.base_url.clone()))
    }

    /// Request a single token so the server loads `model` into memory.
    pub async fn warm_up(&self, model: &str) -> Result<(), LocalAIError> {
        let messages = [ChatMessage::user("Hi")];
        let request = ChatCompletionRequest::warm_up(model, &messages);

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LocalAIError::Api(format!("{}: {}", status, text)));
        }
        Ok(())
    }

    /// Stream a chat completion, calling `on_token` for each fragment.
    ///
    /// Uses the OpenAI-compatible `/v1/chat/completions` endpoint.
    pub async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &GenerationParams,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String, LocalAIError> {
        let request = ChatCompletionRequest::streaming(model, messages, params);

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LocalAIError::Api(format!("{}: {}", status, text)));
        }

        let mut output = String::new();
        let mut lines = LineBuffer::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            for line in lines.push(&chunk?) {
                match parse_sse_line(&line)? {
                    SseLine::Fragment(fragment) => {
                        trace!("fragment: {:?}", fragment);
                        on_token(&fragment);
                        output.push_str(&fragment);
                    }
                    SseLine::Done => return Ok(output),
                    SseLine::Skip => {}
                }
            }
        }

        match lines.finish().map(|rest| parse_sse_line(&rest)).transpose()? {
            Some(SseLine::Done) => Ok(output),
            Some(SseLine::Fragment(fragment)) => {
                on_token(&fragment);
                output.push_str(&fragment);
                Err(LocalAIError::StreamInterrupted)
            }
            _ => Err(LocalAIError::StreamInterrupted),
        }
    }

    fn connection_error(&self, e: reqwest::Error) -> LocalAIError {
        if e.is_connect() || e.is_timeout() {
            LocalAIError::ServerNotRunning(self.base_url.clone())
        } else {
            LocalAIError::Http(e)
        }
    }
}

impl Default for LocalServerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{serve, Canned};
    use folio_chat::RuntimeError;

    #[test]
    fn test_default_url() {
        let client = LocalServerClient::new();
        assert_eq!(client.base_url(), "http://127.0.0.1:11435");
    }

    #[test]
    fn test_custom_url_drops_trailing_slash() {
        let client = LocalServerClient::with_url("http://192.168.1.100:8080/");
        assert_eq!(client.base_url(), "http://192.168.1.100:8080");
        assert_eq!(LocalServerClient::with_port(9000).base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_parse_sse_lines() {
        let line = r#"data: {"choices":[{"delta":{"content":"The "}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), SseLine::Fragment("The ".to_string()));
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);

        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role_only).unwrap(), SseLine::Skip);
        assert!(parse_sse_line("data: {broken").is_err());
    }

    #[test]
    fn test_line_buffer_joins_split_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: {\"cho").is_empty());
        let lines = buffer.push(b"ices\":[]}\n\ndata: [DO");
        assert_eq!(lines, vec!["data: {\"choices\":[]}\n", "\n"]);
        assert!(buffer.push(b"NE]").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some("data: [DONE]"));
    }

    #[test]
    fn test_request_is_greedy_without_sampling() {
        let messages = [ChatMessage::system("s"), ChatMessage::user("u")];
        let params = GenerationParams::default();
        let json = serde_json::to_value(ChatCompletionRequest::streaming("m", &messages, &params))
            .unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["max_tokens"], 128);
        assert_eq!(json["top_k"], 50);
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_request_keeps_temperature_when_sampling() {
        let messages = [ChatMessage::user("u")];
        let params = GenerationParams {
            do_sample: true,
            ..GenerationParams::default()
        };
        let request = ChatCompletionRequest::streaming("m", &messages, &params);
        assert!((request.temperature - 0.3).abs() < f32::EPSILON);
        assert!((request.repeat_penalty - 1.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_stream_chat_forwards_fragments_until_done() {
        let (url, server) = serve(vec![Canned::event_stream(&[
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hello "}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"there"}}]}"#,
            "data: [DONE]",
            r#"data: {"choices":[{"delta":{"content":"ignored"}}]}"#,
        ])])
        .await;
        let client = LocalServerClient::with_url(url);

        let mut fragments = Vec::new();
        let reply = client
            .stream_chat(
                "tiny/model",
                &[ChatMessage::user("hi")],
                &GenerationParams::default(),
                &mut |fragment| fragments.push(fragment.to_string()),
            )
            .await
            .unwrap();

        assert_eq!(reply, "Hello there");
        assert_eq!(fragments, vec!["Hello ", "there"]);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /v1/chat/completions"));
        assert!(requests[0].contains(r#""model":"tiny/model""#));
        assert!(requests[0].contains(r#""stream":true"#));
    }

    #[tokio::test]
    async fn test_stream_without_done_is_interrupted() {
        let (url, server) = serve(vec![Canned::event_stream(&[
            r#"data: {"choices":[{"delta":{"content":"partial"}}]}"#,
        ])])
        .await;
        let client = LocalServerClient::with_url(url);

        let mut seen = String::new();
        let result = client
            .stream_chat(
                "tiny/model",
                &[ChatMessage::user("hi")],
                &GenerationParams::default(),
                &mut |fragment| seen.push_str(fragment),
            )
            .await;

        assert!(matches!(result, Err(LocalAIError::StreamInterrupted)));
        assert_eq!(seen, "partial");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_allocation_failure_is_memory_pressure() {
        let body = r#"{"error":{"message":"failed to allocate memory buffer"}}"#;
        let (url, server) = serve(vec![
            Canned::error("500 Internal Server Error", body),
            Canned::error("500 Internal Server Error", body),
        ])
        .await;
        let client = LocalServerClient::with_url(url);

        let streamed = client
            .stream_chat(
                "large/model",
                &[ChatMessage::user("hi")],
                &GenerationParams::default(),
                &mut |_| {},
            )
            .await;
        let error = match streamed {
            Err(error @ LocalAIError::Api(_)) => error,
            other => panic!("expected an API error, got {:?}", other),
        };
        assert!(error.to_string().contains("500"));
        assert!(RuntimeError::from(error).is_memory_pressure());

        let warm_up = client.warm_up("large/model").await.unwrap_err();
        assert!(RuntimeError::from(warm_up).is_memory_pressure());

        let requests = server.await.unwrap();
        assert!(requests[1].contains(r#""max_tokens":1"#));
        assert!(requests[1].contains(r#""stream":false"#));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client = LocalServerClient::with_port(9);
        assert!(matches!(
            client.check_health().await,
            Err(LocalAIError::ServerNotRunning(_))
        ));
    }
}
