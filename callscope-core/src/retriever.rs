use std::sync::Arc;

use crate::embeddings::{EmbeddingBackend, EmbeddingError};
use crate::error::RagError;
use crate::index::VectorIndex;
use crate::models::RetrievedDocument;

/// Top-k similarity search over one index snapshot.
///
/// Holds its own `Arc` to the index, so a rebuild or clear that happens
/// while a query is in flight does not affect it.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingBackend>,
    k: usize,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn EmbeddingBackend>, k: usize) -> Self {
        Self { index, embedder, k }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// At most `k` documents, most similar first. An empty result is not an
    /// error.
    pub async fn query(&self, text: &str) -> Result<Vec<RetrievedDocument>, RagError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(text).await?;
        if vector.len() != self.index.dimensions() {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.index.dimensions(),
                actual: vector.len(),
            }
            .into());
        }

        let results = self.index.search(&vector, self.k);
        tracing::debug!(
            k = self.k,
            returned = results.len(),
            top_score = results.first().map(|r| r.score),
            "Retrieved documents"
        );
        Ok(results)
    }
}
