//! Run state snapshots (`<run>/run_state.json`).

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{
    Citation, ClarificationRecord, ExtractedSource, FetchedSource, ParagraphDraft, PlanParams,
    SourceRef, Stage, VerificationResult,
};
use crate::io::persist::write_json_atomic;

/// Persisted bookkeeping for one research run.
///
/// Mutated in place by each stage and flushed after every stage transition;
/// no durability is guaranteed for partial progress inside a single stage.
/// Owned exclusively by one state machine invocation per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub run_id: String,
    pub topic: String,
    /// Stage currently (or last) being executed.
    pub current_stage: Option<Stage>,
    pub failed: bool,
    pub clarification: Option<ClarificationRecord>,
    pub plan: PlanParams,
    pub harvest: Vec<SourceRef>,
    pub fetched: Vec<FetchedSource>,
    pub extracts: Vec<ExtractedSource>,
    /// Registration order; cids are never renumbered.
    pub citations: Vec<Citation>,
    pub paragraphs: Vec<ParagraphDraft>,
    pub verification: Option<VerificationResult>,
    pub created_at: String,
    pub updated_at: String,
}

impl RunState {
    pub fn new(run_id: &str, topic: &str, plan: PlanParams, created_at: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            topic: topic.to_string(),
            current_stage: None,
            failed: false,
            clarification: None,
            plan,
            harvest: Vec::new(),
            fetched: Vec::new(),
            extracts: Vec::new(),
            citations: Vec::new(),
            paragraphs: Vec::new(),
            verification: None,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
        }
    }
}

/// Load run state from disk.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("read run state {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    debug!(run_id = %state.run_id, stage = ?state.current_stage, "run state loaded");
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), run_id = %state.run_id, stage = ?state.current_stage, "writing run state");
    write_json_atomic(path, state)
}
