//! Index lifecycle: load, build, swap, clear.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::{IndexStore, VectorIndex};
use crate::documents;
use crate::embeddings::{EmbeddingBackend, EmbeddingError};
use crate::error::RagError;
use crate::fsutil::blocking;
use crate::retriever::Retriever;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexStatus {
    Absent,
    Loading,
    Ready,
    Stale,
    Rebuilding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub status: IndexStatus,
    pub document_count: usize,
    pub record_count: usize,
    /// Whether anything exists at the index path on disk.
    pub persisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "documents", rename_all = "snake_case")]
pub enum EnsureOutcome {
    Loaded(usize),
    Built(usize),
}

impl EnsureOutcome {
    pub fn document_count(&self) -> usize {
        match self {
            EnsureOutcome::Loaded(n) | EnsureOutcome::Built(n) => *n,
        }
    }
}

const IDLE: u8 = 0;
const LOADING: u8 = 1;
const REBUILDING: u8 = 2;

/// Resets the activity marker when a load or rebuild ends, however it ends.
struct ActivityGuard<'a>(&'a AtomicU8);

impl<'a> ActivityGuard<'a> {
    fn enter(slot: &'a AtomicU8, activity: u8) -> Self {
        slot.store(activity, Ordering::SeqCst);
        Self(slot)
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.0.store(IDLE, Ordering::SeqCst);
    }
}

pub struct IndexManager {
    store: IndexStore,
    records: RecordStore,
    batch_size: usize,
    current: RwLock<Option<Arc<VectorIndex>>>,
    writer: Mutex<()>,
    activity: AtomicU8,
}

impl IndexManager {
    pub fn new(store: IndexStore, records: RecordStore, batch_size: usize) -> Self {
        Self {
            store,
            records,
            batch_size: batch_size.max(1),
            current: RwLock::new(None),
            writer: Mutex::new(()),
            activity: AtomicU8::new(IDLE),
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Make an index available, reporting only success. Failures are logged.
    pub async fn ensure(&self, embedder: &dyn EmbeddingBackend, force_rebuild: bool) -> bool {
        match self.try_ensure(embedder, force_rebuild).await {
            Ok(outcome) => {
                tracing::info!(?outcome, "Index ready");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, kind = e.kind(), "Index initialization failed");
                false
            }
        }
    }

    /// Load the persisted index when it is usable for `embedder`, otherwise
    /// build a new one.
    pub async fn try_ensure(
        &self,
        embedder: &dyn EmbeddingBackend,
        force_rebuild: bool,
    ) -> Result<EnsureOutcome, RagError> {
        let _writer = self.writer.lock().await;

        if force_rebuild {
            tracing::info!("Forced rebuild requested");
            return self.rebuild_locked(embedder).await.map(EnsureOutcome::Built);
        }

        let loaded = {
            let _activity = ActivityGuard::enter(&self.activity, LOADING);
            let store = self.store.clone();
            blocking(move || store.load()).await
        };

        match loaded {
            Ok(Some(index)) => match check_compatible(&index, embedder) {
                Ok(()) => {
                    let count = index.len();
                    *self.current.write().await = Some(Arc::new(index));
                    tracing::info!(count, path = %self.store.dir().display(), "Loaded persisted index");
                    Ok(EnsureOutcome::Loaded(count))
                }
                Err(reason) => {
                    tracing::warn!(reason = %reason, "Persisted index does not match embedding backend, rebuilding");
                    self.rebuild_locked(embedder).await.map(EnsureOutcome::Built)
                }
            },
            Ok(None) => {
                tracing::info!(path = %self.store.dir().display(), "No persisted index, building");
                self.rebuild_locked(embedder).await.map(EnsureOutcome::Built)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Persisted index unusable, rebuilding");
                self.rebuild_locked(embedder).await.map(EnsureOutcome::Built)
            }
        }
    }

    /// Re-embed every record and replace the index. Returns the document count.
    pub async fn rebuild(&self, embedder: &dyn EmbeddingBackend) -> Result<usize, RagError> {
        let _writer = self.writer.lock().await;
        self.rebuild_locked(embedder).await
    }

    async fn rebuild_locked(&self, embedder: &dyn EmbeddingBackend) -> Result<usize, RagError> {
        let _activity = ActivityGuard::enter(&self.activity, REBUILDING);
        let lock = self.store.lock()?;

        let record_store = self.records.clone();
        let records = blocking(move || record_store.load()).await?;
        if records.is_empty() {
            tracing::warn!(path = %self.records.records_path().display(), "No call summaries to index");
            return Err(RagError::CorpusEmpty);
        }

        let documents = documents::build(&records);
        let submitted = documents.len();
        tracing::info!(
            documents = submitted,
            backend = embedder.name(),
            model = embedder.model(),
            "Embedding documents"
        );

        let mut embedded_docs = Vec::with_capacity(submitted);
        let mut vectors = Vec::with_capacity(submitted);
        for (batch_no, batch) in documents.chunks(self.batch_size).enumerate() {
            let (texts, slots) = unique_texts(batch.iter().map(|d| d.content.as_str()));
            if texts.len() != batch.len() {
                tracing::warn!(
                    batch = batch_no,
                    documents = batch.len(),
                    unique = texts.len(),
                    "Duplicate documents share one embedding"
                );
            }

            let embedded = embedder.embed_batch(&texts).await?;
            if embedded.len() != texts.len() {
                tracing::warn!(
                    batch = batch_no,
                    submitted = texts.len(),
                    returned = embedded.len(),
                    "Embedding batch size mismatch"
                );
                return Err(EmbeddingError::CountMismatch {
                    expected: texts.len(),
                    actual: embedded.len(),
                }
                .into());
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != embedder.dimensions()) {
                return Err(EmbeddingError::InvalidDimensions {
                    expected: embedder.dimensions(),
                    actual: bad.len(),
                }
                .into());
            }

            for (doc, slot) in batch.iter().zip(slots) {
                embedded_docs.push(doc.clone());
                vectors.push(embedded[slot].clone());
            }
        }

        let index = VectorIndex::build(
            embedder.name(),
            embedder.model(),
            embedder.dimensions(),
            embedded_docs,
            vectors,
        );

        if index.len() != submitted {
            tracing::warn!(
                submitted,
                indexed = index.len(),
                "Indexed document count differs from submitted count"
            );
        }
        if index.is_empty() {
            return Err(RagError::IndexCorrupt("embedding produced no vectors".to_string()));
        }

        let index = Arc::new(index);
        let (store, persisted) = (self.store.clone(), index.clone());
        let _lock = blocking(move || {
            store.save(&persisted, &lock)?;
            Ok(lock)
        })
        .await?;

        let count = index.len();
        *self.current.write().await = Some(index);
        tracing::info!(count, "Index rebuilt");
        Ok(count)
    }

    /// Status and counts. Never fails.
    pub async fn info(&self) -> IndexInfo {
        let document_count = self.current.read().await.as_ref().map(|i| i.len());

        let records = self.records.clone();
        let record_count = blocking(move || records.expected_count())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Could not count records");
                0
            });

        let status = match (self.activity.load(Ordering::SeqCst), document_count) {
            (LOADING, _) => IndexStatus::Loading,
            (REBUILDING, _) => IndexStatus::Rebuilding,
            (_, None) => IndexStatus::Absent,
            (_, Some(n)) if n != record_count => IndexStatus::Stale,
            (_, Some(_)) => IndexStatus::Ready,
        };

        IndexInfo {
            status,
            document_count: document_count.unwrap_or(0),
            record_count,
            persisted: self.store.exists(),
        }
    }

    /// Drop the in-memory index and delete the persisted one.
    pub async fn clear(&self) -> Result<(), RagError> {
        let _writer = self.writer.lock().await;
        let lock = self.store.lock()?;

        *self.current.write().await = None;
        let store = self.store.clone();
        blocking(move || store.remove(&lock)).await?;

        tracing::info!(path = %self.store.dir().display(), "Index cleared");
        Ok(())
    }

    /// Drop the in-memory index only.
    pub async fn unload(&self) {
        let _writer = self.writer.lock().await;
        *self.current.write().await = None;
    }

    /// The live index, if one is loaded.
    pub async fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.current.read().await.clone()
    }

    /// A retriever over the current index.
    pub async fn retriever(
        &self,
        embedder: Arc<dyn EmbeddingBackend>,
        k: usize,
    ) -> Result<Retriever, RagError> {
        let index = self.snapshot().await.ok_or(RagError::RetrieverUninitialized)?;
        Ok(Retriever::new(index, embedder, k))
    }
}

/// Distinct texts in first-seen order, and for each input the position of
/// its text in that list.
fn unique_texts<'a>(texts: impl Iterator<Item = &'a str>) -> (Vec<String>, Vec<usize>) {
    let mut seen: HashMap<&'a str, usize> = HashMap::new();
    let mut unique = Vec::new();
    let slots = texts
        .map(|text| {
            *seen.entry(text).or_insert_with(|| {
                unique.push(text.to_string());
                unique.len() - 1
            })
        })
        .collect();
    (unique, slots)
}

fn check_compatible(index: &VectorIndex, embedder: &dyn EmbeddingBackend) -> Result<(), String> {
    if index.dimensions() != embedder.dimensions() {
        return Err(format!(
            "index has {} dimensions, backend produces {}",
            index.dimensions(),
            embedder.dimensions()
        ));
    }
    if index.model() != embedder.model() || index.backend() != embedder.name() {
        return Err(format!(
            "index built with {}/{}, backend is {}/{}",
            index.backend(),
            index.model(),
            embedder.name(),
            embedder.model()
        ));
    }
    Ok(())
}
