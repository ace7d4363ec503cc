//! Per-run directory layout under the runs root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Filesystem layout for one run, keyed by run id.
///
/// ```text
/// <runs_dir>/<run_id>/
///   clarify.json
///   run_state.json
///   drafts/paragraphs.jsonl
///   final/report.md
///   final/verification.md
///   evidence/{citations,verify,harvest,fetch,extract}.json
///   logs/{plan.json,pipeline.jsonl}
/// ```
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_dir: PathBuf,
    pub clarify_path: PathBuf,
    pub run_state_path: PathBuf,
    pub drafts_dir: PathBuf,
    pub paragraphs_path: PathBuf,
    pub final_dir: PathBuf,
    pub report_path: PathBuf,
    pub verification_md_path: PathBuf,
    pub evidence_dir: PathBuf,
    pub citations_path: PathBuf,
    pub verify_json_path: PathBuf,
    pub harvest_path: PathBuf,
    pub fetch_path: PathBuf,
    pub extract_path: PathBuf,
    pub logs_dir: PathBuf,
    pub plan_path: PathBuf,
    pub pipeline_log_path: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let run_dir = runs_dir.join(run_id);
        let drafts_dir = run_dir.join("drafts");
        let final_dir = run_dir.join("final");
        let evidence_dir = run_dir.join("evidence");
        let logs_dir = run_dir.join("logs");
        Self {
            clarify_path: run_dir.join("clarify.json"),
            run_state_path: run_dir.join("run_state.json"),
            paragraphs_path: drafts_dir.join("paragraphs.jsonl"),
            report_path: final_dir.join("report.md"),
            verification_md_path: final_dir.join("verification.md"),
            citations_path: evidence_dir.join("citations.json"),
            verify_json_path: evidence_dir.join("verify.json"),
            harvest_path: evidence_dir.join("harvest.json"),
            fetch_path: evidence_dir.join("fetch.json"),
            extract_path: evidence_dir.join("extract.json"),
            plan_path: logs_dir.join("plan.json"),
            pipeline_log_path: logs_dir.join("pipeline.jsonl"),
            run_dir,
            drafts_dir,
            final_dir,
            evidence_dir,
            logs_dir,
        }
    }

    /// Create the run directory tree.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.run_dir,
            &self.drafts_dir,
            &self.final_dir,
            &self.evidence_dir,
            &self.logs_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(())
    }
}
