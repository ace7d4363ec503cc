//! Engine configuration stored in `research.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Depth;

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values; CLI flags override
/// per invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding per-run artifacts and the cache.
    pub runs_dir: PathBuf,

    /// Bound on concurrently in-flight acquisition tasks.
    pub workers: usize,

    /// Research depth recorded in plan parameters.
    pub depth: Depth,

    /// Maximum number of sources to acquire per run.
    pub budget: usize,

    /// Language tag recorded in plan parameters.
    pub lang: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from("./runs"),
            workers: 5,
            depth: Depth::Medium,
            budget: 10,
            lang: "en".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("workers must be > 0"));
        }
        if self.budget == 0 {
            return Err(anyhow!("budget must be > 0"));
        }
        if self.lang.trim().is_empty() {
            return Err(anyhow!("lang must be non-empty"));
        }
        if self.runs_dir.as_os_str().is_empty() {
            return Err(anyhow!("runs_dir must be non-empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::persist::write_text_atomic(path, &buf)
}
