//! On-disk index layout.
//!
//! ```text
//! <index>/CURRENT            name of the live generation
//! <index>/gen-<id>/manifest.json
//! <index>/gen-<id>/entries.json
//! <index>.lock               advisory writer lock
//! ```
//!
//! A generation is fully written before `CURRENT` is swapped to it, so a
//! reader sees either the previous index or the new one.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::{IndexEntry, VectorIndex};
use crate::error::RagError;
use crate::fsutil;

pub const FORMAT_VERSION: u32 = 1;

const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";
const ENTRIES_FILE: &str = "entries.json";
const GENERATION_PREFIX: &str = "gen-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub backend: String,
    pub model: String,
    pub dimensions: usize,
    pub count: usize,
    pub built_at: DateTime<Utc>,
}

/// Held while a writer mutates the index directory. Released on drop.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(error = %e, "Failed to release index lock");
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
    lock_path: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let mut lock_name = dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "index".into());
        lock_name.push(".lock");
        let lock_path = dir.with_file_name(lock_name);
        Self { dir, lock_path }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Anything at the index path, valid or not.
    pub fn exists(&self) -> bool {
        self.dir.exists()
    }

    /// Take the exclusive writer lock without blocking.
    pub fn lock(&self) -> Result<WriterLock, RagError> {
        if let Some(parent) = self.lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;

        file.try_lock_exclusive().map_err(|e| {
            tracing::warn!(path = %self.lock_path.display(), error = %e, "Index lock is held");
            RagError::IndexBusy {
                path: self.dir.clone(),
            }
        })?;

        Ok(WriterLock { file })
    }

    /// Read the live generation. `Ok(None)` when nothing is persisted;
    /// `IndexCorrupt` when something is there but fails an integrity check.
    pub fn load(&self) -> Result<Option<VectorIndex>, RagError> {
        if !self.dir.exists() {
            return Ok(None);
        }

        let current_path = self.dir.join(CURRENT_FILE);
        let generation = match fs::read_to_string(&current_path) {
            Ok(name) => name.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(corrupt("missing CURRENT pointer"));
            }
            Err(e) => return Err(e.into()),
        };
        if generation.is_empty() || generation.contains(['/', '\\']) {
            return Err(corrupt(format!("invalid CURRENT pointer {generation:?}")));
        }

        let gen_dir = self.dir.join(&generation);
        let manifest: IndexManifest = read_json(&gen_dir.join(MANIFEST_FILE))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }

        let entries: Vec<IndexEntry> = read_json(&gen_dir.join(ENTRIES_FILE))?;
        if entries.is_empty() {
            return Err(corrupt("index has zero documents"));
        }
        if entries.len() != manifest.count {
            return Err(corrupt(format!(
                "manifest lists {} documents, found {}",
                manifest.count,
                entries.len()
            )));
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != manifest.dimensions) {
            return Err(corrupt(format!(
                "vector for call {} has {} dimensions, expected {}",
                bad.metadata.call_id,
                bad.vector.len(),
                manifest.dimensions
            )));
        }

        tracing::debug!(generation = %generation, count = entries.len(), "Loaded index generation");
        Ok(Some(VectorIndex::from_parts(&manifest, entries)))
    }

    /// Persist `index` as a new generation and make it live. Caller holds the
    /// writer lock.
    pub fn save(&self, index: &VectorIndex, _lock: &WriterLock) -> Result<(), RagError> {
        fs::create_dir_all(&self.dir)?;

        let generation = format!(
            "{}{}-{}",
            GENERATION_PREFIX,
            index.built_at().timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let gen_dir = self.dir.join(&generation);
        fs::create_dir(&gen_dir)?;

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            backend: index.backend().to_string(),
            model: index.model().to_string(),
            dimensions: index.dimensions(),
            count: index.len(),
            built_at: index.built_at(),
        };

        let written = (|| -> Result<(), RagError> {
            fsutil::write_atomic(&gen_dir.join(ENTRIES_FILE), &serde_json::to_vec(index.entries())?)?;
            fsutil::write_atomic(
                &gen_dir.join(MANIFEST_FILE),
                &serde_json::to_vec_pretty(&manifest)?,
            )?;
            fsutil::write_atomic(&self.dir.join(CURRENT_FILE), generation.as_bytes())?;
            Ok(())
        })();

        if let Err(e) = written {
            let _ = fs::remove_dir_all(&gen_dir);
            return Err(e);
        }

        self.prune_except(&generation);
        tracing::info!(
            path = %self.dir.display(),
            generation = %generation,
            count = manifest.count,
            "Persisted index"
        );
        Ok(())
    }

    /// Remove the index directory and confirm it is gone. Caller holds the
    /// writer lock.
    pub fn remove(&self, _lock: &WriterLock) -> Result<(), RagError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(path = %self.dir.display(), error = %e, "Index removal failed");
            }
        }

        if self.dir.exists() {
            return Err(RagError::ResidualState {
                path: self.dir.clone(),
            });
        }
        Ok(())
    }

    /// Delete superseded generations and stray temp files.
    fn prune_except(&self, live: &str) {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == live || name == CURRENT_FILE {
                continue;
            }
            let path = entry.path();
            let result = if path.is_dir() {
                if !name.starts_with(GENERATION_PREFIX) {
                    continue;
                }
                fs::remove_dir_all(&path)
            } else if name.starts_with('.') {
                fs::remove_file(&path)
            } else {
                continue;
            };
            if let Err(e) = result {
                tracing::warn!(path = %path.display(), error = %e, "Failed to prune old index data");
            }
        }
    }
}

fn corrupt(reason: impl Into<String>) -> RagError {
    RagError::IndexCorrupt(reason.into())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, RagError> {
    let raw = fs::read(path).map_err(|e| corrupt(format!("{}: {}", path.display(), e)))?;
    serde_json::from_slice(&raw).map_err(|e| corrupt(format!("{}: {}", path.display(), e)))
}
