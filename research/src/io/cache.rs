//! Per-run cache markers enabling resume and fetch-skip.
//!
//! Entries are keyed per run id only; there is no cross-run content
//! deduplication.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::Stage;
use crate::io::persist::{read_json, write_json_atomic};

/// Cache marker for one run (`<runs_dir>/.cache/<run_id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub run_id: String,
    pub cached_at: String,
    pub last_completed_stage: Stage,
    /// Stage name → artifact path relative to the run directory.
    pub artifacts: BTreeMap<String, String>,
}

/// Store of per-run progress markers.
#[derive(Debug, Clone)]
pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    pub fn new(runs_dir: &Path) -> Self {
        Self {
            cache_dir: runs_dir.join(".cache"),
        }
    }

    fn entry_path(&self, run_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{run_id}.json"))
    }

    /// Load the cache entry for a run, if any.
    ///
    /// A corrupt entry, or one recorded for a different run id, is treated as
    /// a miss rather than an error.
    pub fn get(&self, run_id: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        match read_json::<CacheEntry>(&path) {
            Ok(entry) if entry.run_id == run_id => Ok(Some(entry)),
            Ok(entry) => {
                warn!(
                    expected = run_id,
                    found = %entry.run_id,
                    "cache entry belongs to a different run, ignoring"
                );
                Ok(None)
            }
            Err(err) => {
                warn!(path = %path.display(), "unreadable cache entry, ignoring: {err:#}");
                Ok(None)
            }
        }
    }

    /// Persist the last-completed-stage marker and the stage's artifact ref.
    pub fn put(&self, run_id: &str, stage: Stage, artifact_ref: &str, now: &str) -> Result<()> {
        let mut entry = self.get(run_id)?.unwrap_or_else(|| CacheEntry {
            run_id: run_id.to_string(),
            cached_at: now.to_string(),
            last_completed_stage: stage,
            artifacts: BTreeMap::new(),
        });
        entry.cached_at = now.to_string();
        entry.last_completed_stage = stage;
        entry
            .artifacts
            .insert(stage.as_str().to_string(), artifact_ref.to_string());

        let path = self.entry_path(run_id);
        debug!(run_id, stage = stage.as_str(), artifact_ref, "recording cache marker");
        write_json_atomic(&path, &entry)
    }

    /// Artifact reference recorded for a stage, if present.
    pub fn artifact(&self, run_id: &str, stage: Stage) -> Result<Option<String>> {
        Ok(self
            .get(run_id)?
            .and_then(|entry| entry.artifacts.get(stage.as_str()).cloned()))
    }

    /// Drop the cache entry for a run.
    pub fn delete(&self, run_id: &str) -> Result<()> {
        let path = self.entry_path(run_id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("delete cache entry {}", path.display()))?;
        }
        Ok(())
    }
}
