//! Content-addressed binary cache over the embedded word packs.
//!
//! The persisted file is named after the data version
//! (`databases_v<N>.bin`) and stores the SHA-256 of the embedded source it
//! was built from. A hash mismatch at load time triggers a transparent
//! rebuild; a missing or unreadable cache degrades to raw per-pack parsing
//! rather than failing the caller.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::RwLock;

use super::{DATABASE_NAMES, WordDatabase, WordbankSnapshot};
use crate::errors::WordbankError;

pub struct WordbankCache {
    cache_dir: PathBuf,
    inner: RwLock<Option<WordbankSnapshot>>,
}

impl WordbankCache {
    /// Create a cache manager persisting under `cache_dir`.
    ///
    /// Nothing is loaded until [`load_or_build`](Self::load_or_build) or a
    /// database lookup runs.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            inner: RwLock::new(None),
        }
    }

    fn cache_path(&self, version: u32) -> PathBuf {
        self.cache_dir.join(format!("databases_v{version}.bin"))
    }

    /// Ensure a snapshot matching the embedded source is resident.
    ///
    /// Idempotent: a resident snapshot with a matching source hash is a
    /// no-op, a persisted file with a matching hash is loaded, anything else
    /// is rebuilt from the archive and persisted best-effort.
    pub fn load_or_build(&self) -> Result<(), WordbankError> {
        let current_hash = super::source_hash();
        {
            let guard = self.inner.read().expect("wordbank lock poisoned");
            if matches!(&*guard, Some(snap) if snap.source_hash == current_hash) {
                return Ok(());
            }
        }

        let mut guard = self.inner.write().expect("wordbank lock poisoned");
        // Another caller may have raced us here.
        if matches!(&*guard, Some(snap) if snap.source_hash == current_hash) {
            return Ok(());
        }

        let version = super::embedded_version()?;
        let path = self.cache_path(version);
        if path.exists() {
            match self.load_persisted(&path) {
                Ok(snap) if snap.source_hash == current_hash => {
                    tracing::debug!(version, "loaded word-pack cache from disk");
                    *guard = Some(snap);
                    return Ok(());
                }
                Ok(_) => {
                    tracing::info!(version, "word-pack cache is stale, rebuilding");
                }
                Err(e) => {
                    tracing::warn!(version, error = %e, "word-pack cache unreadable, rebuilding");
                }
            }
        }

        let snap = build_snapshot(version, current_hash);
        if let Err(e) = self.persist(&snap, &path) {
            // Slower next start, but still correct.
            tracing::warn!(error = %e, "failed to persist word-pack cache");
        }
        *guard = Some(snap);
        Ok(())
    }

    /// Fetch one database, building the snapshot on demand.
    ///
    /// A pack missing from the snapshot (its parse failed during the build)
    /// is re-parsed raw from the archive and admitted.
    pub fn get_database(&self, name: &str) -> Result<WordDatabase, WordbankError> {
        self.load_or_build()?;
        {
            let guard = self.inner.read().expect("wordbank lock poisoned");
            if let Some(db) = guard.as_ref().and_then(|s| s.databases.get(name)) {
                return Ok(db.clone());
            }
        }

        tracing::warn!(name, "pack absent from snapshot, parsing raw");
        let db = super::parse_database(name)?;
        let mut guard = self.inner.write().expect("wordbank lock poisoned");
        if let Some(snap) = guard.as_mut() {
            snap.databases.insert(name.to_string(), db.clone());
        }
        Ok(db)
    }

    /// Drop the resident snapshot and delete every persisted cache file.
    pub fn invalidate(&self) -> Result<(), WordbankError> {
        *self.inner.write().expect("wordbank lock poisoned") = None;
        if !self.cache_dir.exists() {
            return Ok(());
        }
        let entries = std::fs::read_dir(&self.cache_dir)
            .with_context(|| format!("Failed to list {}", self.cache_dir.display()))
            .map_err(WordbankError::Other)?;
        for entry in entries.filter_map(|e| e.ok()) {
            let is_cache_file = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with("databases_") && n.ends_with(".bin"));
            if is_cache_file {
                std::fs::remove_file(entry.path())
                    .with_context(|| format!("Failed to remove {}", entry.path().display()))
                    .map_err(WordbankError::Other)?;
            }
        }
        Ok(())
    }

    /// Timestamp of the resident snapshot, if any. Used by tests to tell a
    /// disk load from a rebuild.
    pub fn built_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.inner
            .read()
            .expect("wordbank lock poisoned")
            .as_ref()
            .map(|s| s.built_at)
    }

    fn load_persisted(&self, path: &PathBuf) -> Result<WordbankSnapshot, WordbankError> {
        let bytes = std::fs::read(path).map_err(|source| WordbankError::CacheReadFailed {
            path: path.clone(),
            source,
        })?;
        let (snap, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(
                |e| WordbankError::Malformed {
                    name: path.display().to_string(),
                    message: format!("cache decode failed: {e}"),
                },
            )?;
        Ok(snap)
    }

    fn persist(&self, snap: &WordbankSnapshot, path: &PathBuf) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;
        let bytes = bincode::serde::encode_to_vec(snap, bincode::config::standard())
            .context("Failed to encode word-pack cache")?;
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Parse every pack from the archive. A pack that fails to parse is logged
/// and left out; `get_database` re-parses it raw per call.
fn build_snapshot(version: u32, source_hash: String) -> WordbankSnapshot {
    let mut databases = std::collections::HashMap::new();
    for name in DATABASE_NAMES {
        match super::parse_database(name) {
            Ok(db) => {
                databases.insert((*name).to_string(), db);
            }
            Err(e) => {
                tracing::warn!(name, error = %e, "pack failed to parse during cache build");
            }
        }
    }
    WordbankSnapshot {
        version,
        built_at: chrono::Utc::now(),
        source_hash,
        databases,
    }
}
