//! Append-only stage-transition log (`logs/pipeline.jsonl`).
//!
//! This is the durable event record used for resume: replaying it on startup
//! yields the set of completed stages, and completed stages are never
//! re-executed. Entries are strictly appended, one JSON object per line.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::core::types::Stage;

/// Transition status recorded per stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionStatus {
    Started,
    Completed,
    Failed,
}

/// One append-only log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub timestamp: String,
    pub run_id: String,
    pub stage: Stage,
    pub status: TransitionStatus,
    pub details: Value,
}

/// Append one record to the log.
pub fn append_transition(path: &Path, record: &TransitionRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record).context("serialize transition record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open transition log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append transition log {}", path.display()))?;
    Ok(())
}

/// Replay the log and return the set of completed stages.
///
/// A trailing partial line (crash mid-append) is skipped with a warning so a
/// resumed run re-executes the interrupted stage.
pub fn completed_stages(path: &Path) -> Result<BTreeSet<Stage>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read transition log {}", path.display()))?;

    let mut completed = BTreeSet::new();
    for (lineno, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TransitionRecord>(line) {
            Ok(record) if record.status == TransitionStatus::Completed => {
                completed.insert(record.stage);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(lineno = lineno + 1, %err, "skipping unparseable transition line");
            }
        }
    }
    Ok(completed)
}

/// First stage not yet completed, in pipeline order.
pub fn resume_stage(completed: &BTreeSet<Stage>) -> Option<Stage> {
    Stage::ORDER.iter().copied().find(|stage| !completed.contains(stage))
}
