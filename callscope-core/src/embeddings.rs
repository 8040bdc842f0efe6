//! Batch embedding providers for Callscope.
//!
//! Provides an `EmbeddingBackend` trait with implementations for:
//! - **OpenAI**: `/v1/embeddings` (also any OpenAI-compatible server)
//! - **Gemini**: `batchEmbedContents` / `embedContent`
//!
//! Provider failures are always surfaced as `EmbeddingError`; an index build
//! must never continue with a partial set of vectors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::EmbeddingSettings;

/// Default OpenAI `text-embedding-3-small` dimensions
pub const OPENAI_DIMENSIONS: usize = 1536;

/// Default Gemini embedding dimensions
pub const GEMINI_DIMENSIONS: usize = 768;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_KEY_HEADER: &str = "x-goog-api-key";

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of documents. Returns one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a search query. Backends with task-type hints override this.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::MissingEmbedding)
    }

    /// Returns the embedding dimension (e.g., 1536 or 768).
    fn dimensions(&self) -> usize;

    /// Model identifier recorded in the persisted index manifest.
    fn model(&self) -> &str;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Embedding generation errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Invalid response: expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Missing embedding in response")]
    MissingEmbedding,

    #[error("Missing API key (set {var})")]
    MissingApiKey { var: &'static str },

    #[error("Unknown embedding backend: {0}")]
    UnknownBackend(String),

    #[error("All {attempts} attempts failed, last error: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl EmbeddingError {
    /// Transient failures worth another attempt: transport errors, rate
    /// limits and server-side errors.
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Http(e) => !e.is_decode(),
            EmbeddingError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// Task type for the Gemini embedding API
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    #[default]
    RetrievalDocument,
    RetrievalQuery,
}

// ============================================================================
// Config types
// ============================================================================

/// HTTP embedding client configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl EmbeddingConfig {
    /// Build from settings, reading the API key from `key_var`.
    pub fn from_settings(settings: &EmbeddingSettings, key_var: &str) -> Self {
        Self {
            api_key: std::env::var(key_var).unwrap_or_default(),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
        }
    }
}

/// Create the configured backend.
pub fn create_backend(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn EmbeddingBackend>, EmbeddingError> {
    match settings.backend.as_str() {
        "openai" => {
            let config = EmbeddingConfig::from_settings(settings, "OPENAI_API_KEY");
            let base_url = settings
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string());
            Ok(Arc::new(OpenAiEmbeddingClient::with_base_url(config, base_url)?))
        }
        "gemini" => {
            let config = EmbeddingConfig::from_settings(settings, "GOOGLE_API_KEY");
            let base_url = settings
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string());
            Ok(Arc::new(GeminiEmbeddingClient::with_base_url(config, base_url)?))
        }
        other => Err(EmbeddingError::UnknownBackend(other.to_string())),
    }
}

fn http_client() -> Result<Client, EmbeddingError> {
    Ok(Client::builder().timeout(Duration::from_secs(60)).build()?)
}

/// Run `attempt` with exponential backoff, retrying only transient errors.
async fn with_retries<T, F, Fut>(
    max_retries: usize,
    retry_delay_ms: u64,
    backend: &str,
    attempt: F,
) -> Result<T, EmbeddingError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, EmbeddingError>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(retry_delay_ms.max(1))
        .max_delay(Duration::from_secs(10))
        .map(jitter)
        .take(max_retries);

    match RetryIf::spawn(retry_strategy, attempt, EmbeddingError::is_retryable).await {
        Ok(v) => Ok(v),
        Err(e) if e.is_retryable() => {
            tracing::error!(
                backend,
                attempts = max_retries + 1,
                error = %e,
                "All embedding retry attempts failed"
            );
            Err(EmbeddingError::RetryExhausted {
                attempts: max_retries + 1,
                last: e.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

fn check_dimensions(vectors: &[Vec<f32>], expected: usize) -> Result<(), EmbeddingError> {
    match vectors.iter().find(|v| v.len() != expected) {
        Some(bad) => Err(EmbeddingError::InvalidDimensions {
            expected,
            actual: bad.len(),
        }),
        None => Ok(()),
    }
}

// ============================================================================
// OpenAI API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiErrorResponse {
    pub(crate) error: Option<OpenAiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiErrorDetail {
    pub(crate) message: String,
}

// ============================================================================
// OpenAiEmbeddingClient
// ============================================================================

/// OpenAI embedding client. Calls `POST {base}/embeddings` with a batch.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
    base_url: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, OPENAI_BASE_URL.to_string())
    }

    /// Create a client with a custom base URL (for testing / compatible servers)
    pub fn with_base_url(config: EmbeddingConfig, base_url: String) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey {
                var: "OPENAI_API_KEY",
            });
        }

        Ok(Self {
            client: http_client()?,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);

        // Only the v3 models accept a dimensionality override.
        let dimensions = self
            .config
            .model
            .starts_with("text-embedding-3")
            .then_some(self.config.dimensions);

        let request = OpenAiEmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
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

            tracing::warn!(code = status.as_u16(), message = %message, "OpenAI embeddings API error");

            return Err(EmbeddingError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let mut body: OpenAiEmbeddingResponse = response.json().await?;

        if body.data.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: body.data.len(),
            });
        }

        body.data.sort_by_key(|item| item.index);
        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|item| item.embedding).collect();
        check_dimensions(&vectors, self.config.dimensions)?;

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_retries(
            self.config.max_retries,
            self.config.retry_delay_ms,
            self.name(),
            || self.embed_once(texts),
        )
        .await
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    model: String,
    content: GeminiContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_type: Option<TaskType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct GeminiBatchRequest {
    requests: Vec<GeminiRequest>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    embedding: GeminiEmbedding,
}

#[derive(Debug, Deserialize)]
struct GeminiBatchResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiEmbeddingClient
// ============================================================================

/// Gemini embedding client.
#[derive(Debug, Clone)]
pub struct GeminiEmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
    base_url: String,
}

impl GeminiEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, GEMINI_BASE_URL.to_string())
    }

    pub fn with_base_url(config: EmbeddingConfig, base_url: String) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey {
                var: "GOOGLE_API_KEY",
            });
        }

        Ok(Self {
            client: http_client()?,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_for(&self, text: &str, task_type: TaskType) -> GeminiRequest {
        GeminiRequest {
            model: format!("models/{}", self.config.model),
            content: GeminiContent {
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            },
            task_type: Some(task_type),
            output_dimensionality: Some(self.config.dimensions),
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<R, EmbeddingError> {
        let url = format!("{}/models/{}:{}", self.base_url, self.config.model, method);

        let response = self
            .client
            .post(&url)
            .header(GEMINI_KEY_HEADER, &self.config.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::warn!(code, message = %message, "Gemini API error");

            return Err(EmbeddingError::Api { code, message });
        }

        Ok(response.json().await?)
    }

    async fn batch_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = GeminiBatchRequest {
            requests: texts
                .iter()
                .map(|t| self.request_for(t, TaskType::RetrievalDocument))
                .collect(),
        };

        let response: GeminiBatchResponse = self.post("batchEmbedContents", &request).await?;

        if response.embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: response.embeddings.len(),
            });
        }

        let vectors: Vec<Vec<f32>> = response.embeddings.into_iter().map(|e| e.values).collect();
        check_dimensions(&vectors, self.config.dimensions)?;
        Ok(vectors)
    }

    async fn query_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = self.request_for(text, TaskType::RetrievalQuery);
        let response: GeminiResponse = self.post("embedContent", &request).await?;
        let values = response.embedding.values;

        if values.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: values.len(),
            });
        }

        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_retries(
            self.config.max_retries,
            self.config.retry_delay_ms,
            self.name(),
            || self.batch_once(texts),
        )
        .await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        with_retries(
            self.config.max_retries,
            self.config.retry_delay_ms,
            self.name(),
            || self.query_once(text),
        )
        .await
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str, dimensions: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            api_key: api_key.to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions,
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn openai_response(vectors: &[Vec<f32>]) -> serde_json::Value {
        let data: Vec<serde_json::Value> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| serde_json::json!({"object": "embedding", "index": i, "embedding": v}))
            .collect();
        serde_json::json!({"object": "list", "data": data, "model": "text-embedding-3-small"})
    }

    #[tokio::test]
    async fn test_openai_batch_posts_inputs_and_returns_vectors_in_order() {
        let mock_server = MockServer::start().await;
        let client = OpenAiEmbeddingClient::with_base_url(test_config("sk-test", 3), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["first", "second"],
                "dimensions": 3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]
            })))
            .mount(&mock_server)
            .await;

        let vectors = client
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .expect("embed_batch failed");

        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_openai_auth_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        let client = OpenAiEmbeddingClient::with_base_url(test_config("sk-bad", 3), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client.embed_batch(&["hello".to_string()]).await;

        match result {
            Err(EmbeddingError::Api { code, message }) => {
                assert_eq!(code, 401);
                assert!(message.contains("Incorrect API key"));
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_openai_server_error_exhausts_retries() {
        let mock_server = MockServer::start().await;
        let client = OpenAiEmbeddingClient::with_base_url(test_config("sk-test", 3), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let result = client.embed_batch(&["hello".to_string()]).await;

        match result {
            Err(EmbeddingError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("upstream down"));
            }
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_openai_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = OpenAiEmbeddingClient::with_base_url(test_config("sk-test", 2), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "Rate limit reached"}
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_response(&[vec![0.5, 0.5]])))
            .mount(&mock_server)
            .await;

        let vectors = client.embed_batch(&["hello".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
    }

    #[tokio::test]
    async fn test_openai_wrong_dimensions_rejected() {
        let mock_server = MockServer::start().await;
        let client = OpenAiEmbeddingClient::with_base_url(test_config("sk-test", 4), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_response(&[vec![0.1, 0.2, 0.3]])))
            .mount(&mock_server)
            .await;

        let result = client.embed_batch(&["hello".to_string()]).await;
        match result {
            Err(EmbeddingError::InvalidDimensions { expected, actual }) => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 3);
            }
            other => panic!("Expected InvalidDimensions, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_openai_short_response_is_count_mismatch() {
        let mock_server = MockServer::start().await;
        let client = OpenAiEmbeddingClient::with_base_url(test_config("sk-test", 2), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_response(&[vec![0.1, 0.2]])))
            .mount(&mock_server)
            .await;

        let result = client
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(EmbeddingError::CountMismatch { expected: 2, actual: 1 })
        ));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_network() {
        let mock_server = MockServer::start().await;
        let client = OpenAiEmbeddingClient::with_base_url(test_config("sk-test", 2), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;

        let vectors = client.embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn test_default_embed_query_uses_batch_endpoint() {
        let mock_server = MockServer::start().await;
        let client = OpenAiEmbeddingClient::with_base_url(test_config("sk-test", 2), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_response(&[vec![0.6, 0.8]])))
            .mount(&mock_server)
            .await;

        let vector = client.embed_query("agent John Doe").await.unwrap();
        assert_eq!(vector, vec![0.6, 0.8]);
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let result = OpenAiEmbeddingClient::new(test_config("", 3));
        assert!(matches!(result, Err(EmbeddingError::MissingApiKey { .. })));

        let result = GeminiEmbeddingClient::new(test_config("", 3));
        assert!(matches!(result, Err(EmbeddingError::MissingApiKey { .. })));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let settings = EmbeddingSettings {
            backend: "word2vec".to_string(),
            ..EmbeddingSettings::default()
        };
        assert!(matches!(
            create_backend(&settings),
            Err(EmbeddingError::UnknownBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_gemini_batch_and_query_task_types() {
        let mock_server = MockServer::start().await;
        let mut config = test_config("g-key", 2);
        config.model = "gemini-embedding-001".to_string();
        let client = GeminiEmbeddingClient::with_base_url(config, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/models/gemini-embedding-001:batchEmbedContents"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [{"values": [1.0, 0.0]}, {"values": [0.0, 1.0]}]
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/models/gemini-embedding-001:embedContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": {"values": [0.7, 0.7]}
            })))
            .mount(&mock_server)
            .await;

        let vectors = client
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);

        let query = client.embed_query("who escalated?").await.unwrap();
        assert_eq!(query, vec![0.7, 0.7]);

        let requests = mock_server.received_requests().await.unwrap_or_default();
        let query_body = String::from_utf8_lossy(&requests.last().unwrap().body).to_string();
        assert!(query_body.contains("RETRIEVAL_QUERY"), "got {}", query_body);
        let batch_body = String::from_utf8_lossy(&requests[0].body).to_string();
        assert!(batch_body.contains("RETRIEVAL_DOCUMENT"), "got {}", batch_body);
    }

    #[tokio::test]
    async fn test_gemini_errors_do_not_expose_key() {
        let mut config = test_config("g-secret-key", 2);
        config.max_retries = 0;
        let client =
            GeminiEmbeddingClient::with_base_url(config, "http://127.0.0.1:1".to_string()).unwrap();

        let err = client.embed_query("anything").await.unwrap_err();
        let debug = format!("{:?}", err);
        let surfaced = crate::error::RagError::from(err).to_string();
        assert!(!surfaced.contains("g-secret-key"), "key leaked: {}", surfaced);
        assert!(!debug.contains("g-secret-key"), "key leaked: {}", debug);
    }
}
