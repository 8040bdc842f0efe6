//! Chat-completion providers.
//!
//! `OpenAiChatClient` speaks the OpenAI-compatible `/chat/completions` API,
//! both whole-answer and server-sent-event streaming. A `ChatStream` owns the
//! HTTP body; dropping it stops the read.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::ChatSettings;
use crate::embeddings::OpenAiErrorResponse;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Incremental answer text.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key (set {var})")]
    MissingApiKey { var: &'static str },

    #[error("Completion contained no choices")]
    EmptyResponse,

    #[error("Malformed stream event: {0}")]
    MalformedEvent(String),

    #[error("All {attempts} attempts failed, last error: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl ChatError {
    fn is_retryable(&self) -> bool {
        match self {
            ChatError::Http(e) => !e.is_decode(),
            ChatError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Whole answer in one call.
    async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError>;

    /// Answer as incremental chunks. Errors before the first byte are
    /// returned here; later ones arrive as stream items.
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ChatError>;

    fn name(&self) -> &str;
}

/// Create the configured chat backend. The key comes from `OPENAI_API_KEY`.
pub fn create_chat_backend(settings: &ChatSettings) -> Result<Arc<dyn ChatBackend>, ChatError> {
    let config = ChatClientConfig {
        api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
        max_retries: settings.max_retries,
        retry_delay_ms: settings.retry_delay_ms,
    };
    let base_url = settings
        .base_url
        .clone()
        .unwrap_or_else(|| OPENAI_BASE_URL.to_string());
    Ok(Arc::new(OpenAiChatClient::with_base_url(config, base_url)?))
}

// ============================================================================
// OpenAI wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

// ============================================================================
// OpenAiChatClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub api_key: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    config: ChatClientConfig,
    base_url: String,
}

impl OpenAiChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self, ChatError> {
        Self::with_base_url(config, OPENAI_BASE_URL.to_string())
    }

    /// Create a client with a custom base URL (for testing / compatible servers)
    pub fn with_base_url(config: ChatClientConfig, base_url: String) -> Result<Self, ChatError> {
        if config.api_key.is_empty() {
            return Err(ChatError::MissingApiKey {
                var: "OPENAI_API_KEY",
            });
        }

        // No overall timeout: streamed answers can run long.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, ChatError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionBody {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::warn!(code = status.as_u16(), message = %message, "Chat completion API error");

            return Err(ChatError::Api {
                code: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn send_with_retries(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ChatError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let attempts = self.config.max_retries + 1;
        match RetryIf::spawn(retry_strategy, || self.send(request, stream), ChatError::is_retryable).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_retryable() => {
                tracing::error!(attempts, error = %e, "All chat retry attempts failed");
                Err(ChatError::RetryExhausted {
                    attempts,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError> {
        let response = self.send_with_retries(request, false).await?;
        let body: CompletionResponse = response.json().await?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or(ChatError::EmptyResponse)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ChatError> {
        let response = self.send_with_retries(request, true).await?;
        Ok(sse_content_stream(Box::pin(response.bytes_stream())))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// SSE decoding
// ============================================================================

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct SseState {
    body: ByteStream,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, ChatError>>,
    done: bool,
}

impl SseState {
    /// Decode every complete line in the buffer.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.handle_line(&String::from_utf8_lossy(&line));
            if self.done {
                return;
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();

        if data == "[DONE]" {
            self.done = true;
            return;
        }

        match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => {
                let content = event
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .unwrap_or_default();
                if !content.is_empty() {
                    self.pending.push_back(Ok(content));
                }
            }
            Err(e) => {
                self.pending
                    .push_back(Err(ChatError::MalformedEvent(format!("{e}: {data}"))));
                self.done = true;
            }
        }
    }
}

fn sse_content_stream(body: ByteStream) -> ChatStream {
    let state = SseState {
        body,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(ChatError::Http(e)), state));
                }
                None => {
                    // Body ended without [DONE]; flush a trailing line.
                    state.buffer.push(b'\n');
                    state.drain_lines();
                    state.done = true;
                }
            }
        }
    }))
}

// ============================================================================
// TESTS
// ============================================================================
