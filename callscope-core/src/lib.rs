pub mod chat;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod error;
pub mod fsutil;
pub mod index;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod retriever;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use chat::{
    create_chat_backend, ChatBackend, ChatClientConfig, ChatError, ChatMessage, ChatRequest,
    ChatRole, ChatStream, OpenAiChatClient,
};
pub use config::CallscopeConfig;
pub use embeddings::{
    create_backend, EmbeddingBackend, EmbeddingConfig, EmbeddingError, GeminiEmbeddingClient,
    OpenAiEmbeddingClient, GEMINI_DIMENSIONS, OPENAI_DIMENSIONS,
};
pub use error::RagError;
pub use index::{EnsureOutcome, IndexInfo, IndexStatus, VectorIndex};
pub use models::{
    ConversationLog, ConversationTurn, Document, DocumentMetadata, RetrievedDocument, Role,
    StoreMetadata, SummaryRecord,
};
pub use orchestrator::NO_RESULTS_MARKER;
pub use prompts::PromptSet;
pub use retriever::Retriever;
pub use session::RagSession;
pub use store::RecordStore;
