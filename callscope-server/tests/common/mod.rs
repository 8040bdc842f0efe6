//! Shared fixtures: a session over temp files with in-process backends.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use callscope_core::{
    CallscopeConfig, ChatBackend, ChatError, ChatRequest, ChatStream, EmbeddingBackend,
    EmbeddingError, PromptSet, RagSession, RecordStore, SummaryRecord,
};

pub const DIMENSIONS: usize = 64;

/// Hashed bag-of-words embedder.
pub struct WordHashEmbedder {
    pub calls: AtomicUsize,
}

impl WordHashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIMENSIONS];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(5381u64, |h, b| h.wrapping_mul(33) ^ b as u64);
            v[(hash % DIMENSIONS as u64) as usize] += 1.0;
        }
        v[0] += 0.01;
        v
    }
}

#[async_trait]
impl EmbeddingBackend for WordHashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn model(&self) -> &str {
        "word-hash"
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Replies with a canned answer; streams it word by word.
pub struct CannedChat {
    pub reply: String,
}

#[async_trait]
impl ChatBackend for CannedChat {
    async fn complete(&self, _request: &ChatRequest) -> Result<String, ChatError> {
        Ok(self.reply.clone())
    }

    async fn stream(&self, _request: &ChatRequest) -> Result<ChatStream, ChatError> {
        let chunks: Vec<Result<String, ChatError>> = self
            .reply
            .split_inclusive(' ')
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn name(&self) -> &str {
        "canned"
    }
}

pub const REPLY: &str = "Maya Singh handled the router outage on call 2.";

pub fn record(call_id: i64, agent: &str, category: &str, summary: &str) -> SummaryRecord {
    SummaryRecord {
        call_id: Some(call_id),
        agent_name: Some(agent.to_string()),
        issue_category: Some(category.to_string()),
        call_summary: Some(summary.to_string()),
        agent_score: Some(80.0),
        agent_rating: Some(4.0),
        resolution_status: Some("Resolved".to_string()),
        ..SummaryRecord::default()
    }
}

pub fn sample_records() -> Vec<SummaryRecord> {
    vec![
        record(1, "John Doe", "Billing", "Duplicate charge on the invoice was reversed"),
        record(2, "Maya Singh", "Technical Support", "Router kept dropping the internet connection"),
        record(3, "Liam Chen", "Cancellation", "Customer cancelled the subscription plan"),
        record(4, "John Doe", "Billing", "Refund issued for an overcharged bill"),
        record(5, "Ana Lopez", "Shipping", "Package arrived late and damaged"),
    ]
}

pub fn config_in(dir: &Path, k: usize) -> CallscopeConfig {
    let mut config = CallscopeConfig::default();
    config.store.records_path = dir.join("bulk_summaries.json").to_string_lossy().into_owned();
    config.store.metadata_path = dir
        .join("bulk_summary_metadata.json")
        .to_string_lossy()
        .into_owned();
    config.index.path = dir.join("vector_store").to_string_lossy().into_owned();
    config.service.socket_path = dir.join("callscope.sock").to_string_lossy().into_owned();
    config.retrieval.k = k;
    config
}

/// A session over `dir` seeded with `records`, not yet initialized.
pub fn make_session(dir: &Path, k: usize, records: Vec<SummaryRecord>) -> Arc<RagSession> {
    make_session_with_reply(dir, k, records, REPLY)
}

pub fn make_session_with_reply(
    dir: &Path,
    k: usize,
    records: Vec<SummaryRecord>,
    reply: &str,
) -> Arc<RagSession> {
    let config = config_in(dir, k);
    if !records.is_empty() {
        RecordStore::from_config(&config.store)
            .append(records)
            .expect("seed record store");
    }
    Arc::new(RagSession::with_backends(
        config,
        Arc::new(WordHashEmbedder::new()),
        Arc::new(CannedChat {
            reply: reply.to_string(),
        }),
        PromptSet::default(),
    ))
}
