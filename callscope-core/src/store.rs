//! Record store: the JSON array of call summaries plus its metadata sibling.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::Utc;

use crate::config::StoreConfig;
use crate::error::RagError;
use crate::fsutil;
use crate::models::{StoreMetadata, SummaryRecord};

/// Size and mtime of the records file when it was last counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    records_path: PathBuf,
    metadata_path: PathBuf,
    counted: Arc<Mutex<Option<(FileStamp, usize)>>>,
}

impl RecordStore {
    pub fn new(records_path: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            records_path: records_path.into(),
            metadata_path: metadata_path.into(),
            counted: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.records_path, &config.metadata_path)
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    /// All records in file order. A missing file is an empty store; a file
    /// that does not parse is an error.
    pub fn load(&self) -> Result<Vec<SummaryRecord>, RagError> {
        if !self.records_path.exists() {
            tracing::debug!(path = %self.records_path.display(), "Record store file not found");
            return Ok(Vec::new());
        }

        let raw = std::fs::read(&self.records_path)?;
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&raw).map_err(|e| {
            tracing::error!(path = %self.records_path.display(), error = %e, "Record store is not valid JSON");
            RagError::RecordStore(format!("{}: {}", self.records_path.display(), e))
        })
    }

    pub fn load_metadata(&self) -> Result<Option<StoreMetadata>, RagError> {
        if !self.metadata_path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&self.metadata_path)?;
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| RagError::RecordStore(format!("{}: {}", self.metadata_path.display(), e)))
    }

    /// Records the index should contain: `total_summaries` when the metadata
    /// file exists, the array length otherwise.
    pub fn expected_count(&self) -> Result<usize, RagError> {
        match self.load_metadata() {
            Ok(Some(meta)) => Ok(meta.total_summaries),
            Ok(None) => self.count_records(),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable store metadata, counting records instead");
                self.count_records()
            }
        }
    }

    /// Length of the records array. The file is parsed again only when its
    /// size or mtime changed since the last count.
    pub fn count_records(&self) -> Result<usize, RagError> {
        let stamp = match std::fs::metadata(&self.records_path) {
            Ok(meta) => FileStamp {
                len: meta.len(),
                modified: meta.modified().ok(),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let cached = self.counted.lock().ok().and_then(|c| *c);
        if let Some((seen, count)) = cached {
            if seen == stamp {
                return Ok(count);
            }
        }

        let count = self.load()?.len();
        if let Ok(mut counted) = self.counted.lock() {
            *counted = Some((stamp, count));
        }
        Ok(count)
    }

    /// Append records, assigning `callId`s to those without one. Returns the
    /// ids of the appended records in order.
    pub fn append(&self, new_records: Vec<SummaryRecord>) -> Result<Vec<i64>, RagError> {
        let mut records = self.load()?;
        let mut last_id = self
            .load_metadata()
            .ok()
            .flatten()
            .map(|m| m.last_id)
            .unwrap_or(0)
            .max(records.iter().filter_map(|r| r.call_id).max().unwrap_or(0));

        let mut ids = Vec::with_capacity(new_records.len());
        for mut record in new_records {
            let id = match record.call_id {
                Some(id) => id,
                None => {
                    last_id += 1;
                    last_id
                }
            };
            last_id = last_id.max(id);
            record.call_id = Some(id);
            ids.push(id);
            records.push(record);
        }

        let metadata = StoreMetadata {
            last_id,
            last_updated: Utc::now(),
            total_summaries: records.len(),
        };

        fsutil::write_atomic(&self.records_path, &serde_json::to_vec_pretty(&records)?)?;
        fsutil::write_atomic(&self.metadata_path, &serde_json::to_vec_pretty(&metadata)?)?;

        tracing::info!(appended = ids.len(), total = records.len(), "Appended call summaries");
        Ok(ids)
    }

    /// Remove every record and reset the metadata counters.
    pub fn clear(&self) -> Result<(), RagError> {
        match std::fs::remove_file(&self.records_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fsutil::write_atomic(
            &self.metadata_path,
            &serde_json::to_vec_pretty(&StoreMetadata::empty())?,
        )?;
        tracing::info!(path = %self.records_path.display(), "Cleared record store");
        Ok(())
    }
}
