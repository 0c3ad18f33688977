//! Series lifecycle: one JSON file per series, soft delete via a flag plus
//! an output-tree rename, and hard removal of both.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Config, ensure_within, safe_component};
use crate::errors::SeriesError;

/// A named generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    /// Unique key; doubles as the file stem and the output directory name.
    pub suffix: String,
    #[serde(default)]
    pub purpose: String,
    /// Bumped every time a context is built for this series.
    #[serde(default)]
    pub last_used: u64,
    #[serde(default)]
    pub deleted: bool,
    pub modified_at: DateTime<Utc>,
    /// Pack name → substring filters narrowing that pack's records.
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
}

impl Series {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            purpose: String::new(),
            last_used: 0,
            deleted: false,
            modified_at: Utc::now(),
            filters: BTreeMap::new(),
        }
    }
}

/// Persistence and lifecycle operations over `series/<suffix>.json`.
pub struct SeriesStore {
    config: Arc<Config>,
}

impl SeriesStore {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn path_for(&self, suffix: &str) -> Result<PathBuf, SeriesError> {
        safe_component(suffix)?;
        let path = self.config.series_dir().join(format!("{suffix}.json"));
        ensure_within(&self.config.data_root, &path)?;
        Ok(path)
    }

    pub fn load(&self, suffix: &str) -> Result<Option<Series>, SeriesError> {
        let path = self.path_for(suffix)?;
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .map_err(SeriesError::Other)?;
        let series = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))
            .map_err(SeriesError::Other)?;
        Ok(Some(series))
    }

    /// Load a series, creating and persisting a default one on first
    /// reference to a new suffix. Bumps the last-used counter either way.
    pub fn load_or_create(&self, suffix: &str) -> Result<Series, SeriesError> {
        let mut series = match self.load(suffix)? {
            Some(series) => series,
            None => Series::new(suffix),
        };
        series.last_used += 1;
        self.persist(&series)?;
        Ok(series)
    }

    /// Create a new series; the suffix must not be taken.
    pub fn create(&self, series: &Series) -> Result<(), SeriesError> {
        if self.load(&series.suffix)?.is_some() {
            return Err(SeriesError::AlreadyExists {
                suffix: series.suffix.clone(),
            });
        }
        self.persist(series)
    }

    /// Persist changed fields and refresh the modified timestamp.
    pub fn update(&self, series: &mut Series) -> Result<(), SeriesError> {
        if self.load(&series.suffix)?.is_none() {
            return Err(SeriesError::NotFound {
                suffix: series.suffix.clone(),
            });
        }
        series.modified_at = Utc::now();
        self.persist(series)
    }

    pub fn list(&self) -> Result<Vec<Series>, SeriesError> {
        let dir = self.config.series_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))
            .map_err(SeriesError::Other)?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(series) = self.load(stem)? {
                out.push(series);
            }
        }
        out.sort_by(|a, b| a.suffix.cmp(&b.suffix));
        Ok(out)
    }

    /// Hard delete: the definition file and both output trees.
    pub fn remove(&self, suffix: &str) -> Result<(), SeriesError> {
        let path = self.path_for(suffix)?;
        if !path.exists() {
            return Err(SeriesError::NotFound {
                suffix: suffix.to_string(),
            });
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))
            .map_err(SeriesError::Other)?;
        for dir in [
            self.config.output_dir(suffix),
            self.config.deleted_output_dir(suffix),
        ] {
            ensure_within(&self.config.data_root, &dir)?;
            if dir.exists() {
                std::fs::remove_dir_all(&dir)
                    .with_context(|| format!("Failed to remove {}", dir.display()))
                    .map_err(SeriesError::Other)?;
            }
        }
        Ok(())
    }

    /// Soft delete: set the flag and move the output tree aside.
    pub fn delete(&self, suffix: &str) -> Result<Series, SeriesError> {
        let mut series = self.load(suffix)?.ok_or_else(|| SeriesError::NotFound {
            suffix: suffix.to_string(),
        })?;
        series.deleted = true;
        series.modified_at = Utc::now();
        self.persist(&series)?;

        let live = self.config.output_dir(suffix);
        let parked = self.config.deleted_output_dir(suffix);
        ensure_within(&self.config.data_root, &live)?;
        ensure_within(&self.config.data_root, &parked)?;
        if live.exists() {
            std::fs::rename(&live, &parked)
                .with_context(|| format!("Failed to park {}", live.display()))
                .map_err(SeriesError::Other)?;
        }
        Ok(series)
    }

    /// Reverse a soft delete exactly: flag and output tree both restored.
    pub fn undelete(&self, suffix: &str) -> Result<Series, SeriesError> {
        let mut series = self.load(suffix)?.ok_or_else(|| SeriesError::NotFound {
            suffix: suffix.to_string(),
        })?;
        if !series.deleted {
            return Err(SeriesError::NotDeleted {
                suffix: suffix.to_string(),
            });
        }
        series.deleted = false;
        series.modified_at = Utc::now();
        self.persist(&series)?;

        let live = self.config.output_dir(suffix);
        let parked = self.config.deleted_output_dir(suffix);
        ensure_within(&self.config.data_root, &live)?;
        ensure_within(&self.config.data_root, &parked)?;
        if parked.exists() {
            std::fs::rename(&parked, &live)
                .with_context(|| format!("Failed to restore {}", parked.display()))
                .map_err(SeriesError::Other)?;
        }
        Ok(series)
    }

    fn persist(&self, series: &Series) -> Result<(), SeriesError> {
        let path = self.path_for(&series.suffix)?;
        let write = || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).context("Failed to create series directory")?;
            }
            let json =
                serde_json::to_string_pretty(series).context("Failed to serialize series")?;
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(())
        };
        write().map_err(|source| SeriesError::PersistFailed {
            suffix: series.suffix.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (SeriesStore, Arc<Config>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = Arc::new(Config::with_data_root(dir.path()));
        (SeriesStore::new(config.clone()), config, dir)
    }

    #[test]
    fn test_load_or_create_persists_default_series() {
        let (store, config, _dir) = make_store();
        let series = store.load_or_create("wild").unwrap();
        assert_eq!(series.suffix, "wild");
        assert_eq!(series.last_used, 1);
        assert!(series.filters.is_empty());
        assert!(config.series_dir().join("wild.json").exists());
    }

    #[test]
    fn test_load_or_create_bumps_last_used() {
        let (store, _config, _dir) = make_store();
        store.load_or_create("wild").unwrap();
        let again = store.load_or_create("wild").unwrap();
        assert_eq!(again.last_used, 2);
    }

    #[test]
    fn test_create_rejects_duplicate_suffix() {
        let (store, _config, _dir) = make_store();
        store.create(&Series::new("wild")).unwrap();
        let err = store.create(&Series::new("wild")).unwrap_err();
        assert!(matches!(err, SeriesError::AlreadyExists { .. }));
    }

    #[test]
    fn test_update_refreshes_modified_time() {
        let (store, _config, _dir) = make_store();
        let mut series = Series::new("wild");
        store.create(&series).unwrap();
        let before = series.modified_at;
        series.purpose = "harbour scenes".to_string();
        store.update(&mut series).unwrap();
        assert!(series.modified_at >= before);
        let loaded = store.load("wild").unwrap().unwrap();
        assert_eq!(loaded.purpose, "harbour scenes");
    }

    #[test]
    fn test_update_unknown_series_errors() {
        let (store, _config, _dir) = make_store();
        let err = store.update(&mut Series::new("ghost")).unwrap_err();
        assert!(matches!(err, SeriesError::NotFound { .. }));
    }

    #[test]
    fn test_soft_delete_parks_output_tree() {
        let (store, config, _dir) = make_store();
        store.create(&Series::new("wild")).unwrap();
        let generated = config.output_dir("wild").join("generated");
        std::fs::create_dir_all(&generated).unwrap();
        std::fs::write(generated.join("0xabc.png"), b"png").unwrap();

        let series = store.delete("wild").unwrap();
        assert!(series.deleted);
        assert!(!config.output_dir("wild").exists());
        assert!(
            config
                .deleted_output_dir("wild")
                .join("generated/0xabc.png")
                .exists()
        );
    }

    #[test]
    fn test_undelete_restores_exact_layout() {
        let (store, config, _dir) = make_store();
        store.create(&Series::new("wild")).unwrap();
        let generated = config.output_dir("wild").join("generated");
        std::fs::create_dir_all(&generated).unwrap();
        std::fs::write(generated.join("0xabc.png"), b"png").unwrap();

        store.delete("wild").unwrap();
        let series = store.undelete("wild").unwrap();
        assert!(!series.deleted);
        assert!(config.output_dir("wild").join("generated/0xabc.png").exists());
        assert!(!config.deleted_output_dir("wild").exists());
        let loaded = store.load("wild").unwrap().unwrap();
        assert!(!loaded.deleted);
    }

    #[test]
    fn test_undelete_requires_soft_deleted_state() {
        let (store, _config, _dir) = make_store();
        store.create(&Series::new("wild")).unwrap();
        let err = store.undelete("wild").unwrap_err();
        assert!(matches!(err, SeriesError::NotDeleted { .. }));
    }

    #[test]
    fn test_remove_deletes_file_and_both_trees() {
        let (store, config, _dir) = make_store();
        store.create(&Series::new("wild")).unwrap();
        std::fs::create_dir_all(config.output_dir("wild")).unwrap();
        std::fs::create_dir_all(config.deleted_output_dir("wild")).unwrap();

        store.remove("wild").unwrap();
        assert!(store.load("wild").unwrap().is_none());
        assert!(!config.output_dir("wild").exists());
        assert!(!config.deleted_output_dir("wild").exists());
    }

    #[test]
    fn test_hostile_suffix_is_rejected_before_io() {
        let (store, _config, _dir) = make_store();
        for suffix in ["../escape", "a/b", "..", ""] {
            let err = store.load(suffix).unwrap_err();
            assert!(matches!(err, SeriesError::PathEscape { .. }), "suffix {suffix:?}");
        }
    }

    #[test]
    fn test_list_returns_sorted_series() {
        let (store, _config, _dir) = make_store();
        store.create(&Series::new("zebra")).unwrap();
        store.create(&Series::new("alpha")).unwrap();
        let all = store.list().unwrap();
        let suffixes: Vec<_> = all.iter().map(|s| s.suffix.as_str()).collect();
        assert_eq!(suffixes, ["alpha", "zebra"]);
    }
}
