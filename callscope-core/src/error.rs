use std::path::PathBuf;

use thiserror::Error;

use crate::chat::ChatError;
use crate::embeddings::EmbeddingError;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No call summaries available to index")]
    CorpusEmpty,

    #[error("Persisted index is unusable: {0}")]
    IndexCorrupt(String),

    #[error("Embedding provider error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Chat provider error: {0}")]
    Chat(#[from] ChatError),

    #[error("Retriever not initialized; build or load the index first")]
    RetrieverUninitialized,

    #[error("Index removal incomplete: {} still exists", path.display())]
    ResidualState { path: PathBuf },

    #[error("Index at {} is locked by another writer", path.display())]
    IndexBusy { path: PathBuf },

    #[error("Record store error: {0}")]
    RecordStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RagError {
    /// Errors that mean the chat session cannot serve a request right now
    /// (as opposed to a bad request).
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RagError::RetrieverUninitialized
                | RagError::Embedding(_)
                | RagError::Chat(_)
                | RagError::Configuration(_)
        )
    }

    /// Stable machine-readable tag, used in IPC and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Configuration(_) => "configuration",
            RagError::CorpusEmpty => "corpus_empty",
            RagError::IndexCorrupt(_) => "index_corrupt",
            RagError::Embedding(_) => "embedding_provider",
            RagError::Chat(_) => "chat_provider",
            RagError::RetrieverUninitialized => "retriever_uninitialized",
            RagError::ResidualState { .. } => "residual_state",
            RagError::IndexBusy { .. } => "index_busy",
            RagError::RecordStore(_) => "record_store",
            RagError::Io(_) => "io",
            RagError::Json(_) => "json",
            RagError::Task(_) => "task",
        }
    }
}
