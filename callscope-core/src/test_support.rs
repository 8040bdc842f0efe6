//! In-process embedding and chat backends for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chat::{ChatBackend, ChatError, ChatRequest, ChatStream};
use crate::embeddings::{EmbeddingBackend, EmbeddingError};
use crate::models::SummaryRecord;
use crate::store::RecordStore;

pub const MOCK_DIMENSIONS: usize = 64;

/// Hashed bag-of-words vectors: texts that share words score higher.
pub struct MockEmbedder {
    pub model: String,
    pub dimensions: usize,
    pub batch_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
    pub fail: AtomicBool,
    /// Return one vector per distinct text, like providers that deduplicate.
    pub dedup: AtomicBool,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::with_model("mock-embed", MOCK_DIMENSIONS)
    }

    pub fn with_model(model: &str, dimensions: usize) -> Self {
        Self {
            model: model.to_string(),
            dimensions,
            batch_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            dedup: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        let embedder = Self::new();
        embedder.fail.store(true, Ordering::SeqCst);
        embedder
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
            v[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        v[0] += 0.01;
        v
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Api {
                code: 401,
                message: "invalid api key".to_string(),
            });
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        let mut distinct: Vec<&String> = Vec::with_capacity(texts.len());
        for text in texts {
            if !self.dedup.load(Ordering::SeqCst) || !distinct.contains(&text) {
                distinct.push(text);
            }
        }
        Ok(distinct.into_iter().map(|t| self.vector_for(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Api {
                code: 429,
                message: "rate limited".to_string(),
            });
        }
        Ok(self.vector_for(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Answers with a fixed reply and records every request.
pub struct MockChat {
    pub reply: String,
    pub requests: Mutex<Vec<ChatRequest>>,
    pub fail: AtomicBool,
}

impl MockChat {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }

    fn record(&self, request: &ChatRequest) -> Result<(), ChatError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChatError::Api {
                code: 503,
                message: "model overloaded".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for MockChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError> {
        self.record(request)?;
        Ok(self.reply.clone())
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ChatError> {
        self.record(request)?;
        let chunks: Vec<Result<String, ChatError>> = self
            .reply
            .split_inclusive(' ')
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn record(call_id: i64, agent: &str, category: &str, summary: &str) -> SummaryRecord {
    SummaryRecord {
        call_id: Some(call_id),
        agent_name: Some(agent.to_string()),
        agent_id: Some(format!("A-{call_id}")),
        customer_name: Some(format!("Customer {call_id}")),
        issue_category: Some(category.to_string()),
        call_summary: Some(summary.to_string()),
        agent_score: Some(70.0 + call_id as f64),
        agent_rating: Some(4.0),
        resolution_status: Some("Resolved".to_string()),
        sentiment: Some("Neutral".to_string()),
        ..SummaryRecord::default()
    }
}

pub fn sample_records() -> Vec<SummaryRecord> {
    vec![
        record(1, "John Doe", "Billing", "Customer disputed a duplicate charge on the invoice"),
        record(2, "Maya Singh", "Technical Support", "Router kept dropping the internet connection"),
        record(3, "John Doe", "Cancellation", "Customer wanted to cancel the subscription plan"),
        record(4, "Liam Chen", "Billing", "Refund issued for an overcharged monthly bill"),
        record(5, "Maya Singh", "Shipping", "Package arrived late and damaged"),
    ]
}

/// A record store under `dir` seeded with `records`.
pub fn seeded_store(dir: &std::path::Path, records: Vec<SummaryRecord>) -> RecordStore {
    let store = RecordStore::new(
        dir.join("bulk_summaries.json"),
        dir.join("bulk_summary_metadata.json"),
    );
    if !records.is_empty() {
        store.append(records).expect("seed record store");
    }
    store
}
