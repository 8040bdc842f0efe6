//! In-memory vector index with exact cosine search.
//!
//! Vectors are unit-normalised on insert, so similarity is a dot product.
//! A built `VectorIndex` is never mutated; rebuilds produce a new one.

pub mod manager;
pub mod persist;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Document, DocumentMetadata, RetrievedDocument};

pub use manager::{EnsureOutcome, IndexInfo, IndexManager, IndexStatus};
pub use persist::{IndexManifest, IndexStore, WriterLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub content: String,
    pub metadata: DocumentMetadata,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    backend: String,
    model: String,
    dimensions: usize,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Pair documents with their vectors. Vectors are normalised here.
    pub fn build(
        backend: &str,
        model: &str,
        dimensions: usize,
        documents: Vec<Document>,
        vectors: Vec<Vec<f32>>,
    ) -> Self {
        let entries = documents
            .into_iter()
            .zip(vectors)
            .map(|(doc, mut vector)| {
                normalize(&mut vector);
                IndexEntry {
                    content: doc.content,
                    metadata: doc.metadata,
                    vector,
                }
            })
            .collect();

        Self {
            backend: backend.to_string(),
            model: model.to_string(),
            dimensions,
            built_at: Utc::now(),
            entries,
        }
    }

    /// Reassemble a persisted index. Entries are trusted to be normalised.
    pub(crate) fn from_parts(manifest: &IndexManifest, entries: Vec<IndexEntry>) -> Self {
        Self {
            backend: manifest.backend.clone(),
            model: manifest.model.clone(),
            dimensions: manifest.dimensions,
            built_at: manifest.built_at,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Top `k` entries by cosine similarity, best first. Equal scores keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<RetrievedDocument> {
        if k == 0 || query.len() != self.dimensions {
            return Vec::new();
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, dot(&query, &entry.vector)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| {
                let entry = &self.entries[i];
                RetrievedDocument {
                    content: entry.content.clone(),
                    metadata: entry.metadata.clone(),
                    score,
                }
            })
            .collect()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale to unit length. Zero vectors are left as they are.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}
