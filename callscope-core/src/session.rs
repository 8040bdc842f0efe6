//! `RagSession`: one index, one set of backends, one record store.
//!
//! The server holds a single `Arc<RagSession>` and passes it to handlers.

use std::sync::Arc;

use crate::chat::{create_chat_backend, ChatBackend, ChatError, ChatStream};
use crate::config::CallscopeConfig;
use crate::embeddings::{create_backend, EmbeddingBackend, EmbeddingError};
use crate::error::RagError;
use crate::fsutil::blocking;
use crate::index::{EnsureOutcome, IndexInfo, IndexManager, IndexStore};
use crate::models::{ConversationTurn, RetrievedDocument, SummaryRecord};
use crate::orchestrator::Orchestrator;
use crate::prompts::PromptSet;
use crate::retriever::Retriever;
use crate::store::RecordStore;

pub struct RagSession {
    config: CallscopeConfig,
    records: RecordStore,
    index: IndexManager,
    embedder: Arc<dyn EmbeddingBackend>,
    orchestrator: Orchestrator,
}

impl RagSession {
    /// Build a session with the configured provider backends and prompts.
    /// Fails on bad configuration or missing API keys; touches nothing on disk.
    pub fn new(config: CallscopeConfig) -> Result<Self, RagError> {
        config.validate().map_err(RagError::Configuration)?;

        let embedder = create_backend(&config.embedding).map_err(|e| match e {
            EmbeddingError::MissingApiKey { .. } | EmbeddingError::UnknownBackend(_) => {
                RagError::Configuration(e.to_string())
            }
            other => RagError::Embedding(other),
        })?;
        let chat = create_chat_backend(&config.chat).map_err(|e| match e {
            ChatError::MissingApiKey { .. } => RagError::Configuration(e.to_string()),
            other => RagError::Chat(other),
        })?;

        let prompts = config.prompts.clone();
        Ok(Self::with_backends(config, embedder, chat, prompts))
    }

    pub fn with_backends(
        config: CallscopeConfig,
        embedder: Arc<dyn EmbeddingBackend>,
        chat: Arc<dyn ChatBackend>,
        prompts: PromptSet,
    ) -> Self {
        let records = RecordStore::from_config(&config.store);
        let index = IndexManager::new(
            IndexStore::new(&config.index.path),
            records.clone(),
            config.embedding.batch_size,
        );
        let orchestrator = Orchestrator::new(chat, prompts, config.chat.clone());

        tracing::info!(
            embedding = embedder.name(),
            embedding_model = embedder.model(),
            chat_model = %config.chat.model,
            k = config.retrieval.k,
            index_path = %config.index.path,
            "RAG session created"
        );

        Self {
            config,
            records,
            index,
            embedder,
            orchestrator,
        }
    }

    pub fn config(&self) -> &CallscopeConfig {
        &self.config
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn prompts(&self) -> &PromptSet {
        self.orchestrator.prompts()
    }

    // ========================================================================
    // Index lifecycle
    // ========================================================================

    /// Load or build the index. Reports success only; see `try_initialize`.
    pub async fn initialize(&self, force_rebuild: bool) -> bool {
        self.index.ensure(self.embedder.as_ref(), force_rebuild).await
    }

    pub async fn try_initialize(&self, force_rebuild: bool) -> Result<EnsureOutcome, RagError> {
        self.index.try_ensure(self.embedder.as_ref(), force_rebuild).await
    }

    /// Discard the index and rebuild from the current records.
    pub async fn reload(&self) -> bool {
        self.initialize(true).await
    }

    pub async fn rebuild(&self) -> Result<usize, RagError> {
        self.index.rebuild(self.embedder.as_ref()).await
    }

    pub async fn info(&self) -> IndexInfo {
        self.index.info().await
    }

    pub async fn clear_index(&self) -> Result<(), RagError> {
        self.index.clear().await
    }

    /// Release the in-memory index. The persisted index stays on disk.
    pub async fn teardown(&self) {
        self.index.unload().await;
        tracing::info!("RAG session torn down");
    }

    // ========================================================================
    // Queries
    // ========================================================================

    async fn retriever(&self, k: usize) -> Result<Retriever, RagError> {
        self.index.retriever(self.embedder.clone(), k).await
    }

    /// Similarity search. `k` defaults to `retrieval.k`.
    pub async fn search(&self, query: &str, k: Option<usize>) -> Result<Vec<RetrievedDocument>, RagError> {
        let k = k.unwrap_or(self.config.retrieval.k);
        self.retriever(k).await?.query(query).await
    }

    pub async fn respond(&self, query: &str, history: &[ConversationTurn]) -> Result<String, RagError> {
        let retriever = self.retriever(self.config.retrieval.k).await?;
        self.orchestrator.respond(&retriever, query, history).await
    }

    pub async fn respond_stream(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<ChatStream, RagError> {
        let retriever = self.retriever(self.config.retrieval.k).await?;
        self.orchestrator.respond_stream(&retriever, query, history).await
    }

    async fn all_records(&self) -> Result<Vec<SummaryRecord>, RagError> {
        let store = self.records.clone();
        let records = blocking(move || store.load()).await?;
        if records.is_empty() {
            return Err(RagError::CorpusEmpty);
        }
        Ok(records)
    }

    /// Answer from every record at once, without the index.
    pub async fn respond_direct(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<String, RagError> {
        let records = self.all_records().await?;
        self.orchestrator.respond_direct(&records, query, history).await
    }

    pub async fn respond_direct_stream(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<ChatStream, RagError> {
        let records = self.all_records().await?;
        self.orchestrator.respond_direct_stream(&records, query, history).await
    }
}
