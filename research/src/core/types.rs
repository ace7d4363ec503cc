//! Shared deterministic types for the pipeline core.
//!
//! These types define stable contracts between pipeline components. They
//! should not depend on external state or I/O and must remain deterministic
//! across runs.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Ordered pipeline stages. Transitions are strictly forward; resume
/// re-enters at the first incomplete stage and never loops back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Intake,
    Plan,
    Harvest,
    Fetch,
    Extract,
    Verify,
    Write,
    Audit,
    Cache,
}

impl Stage {
    /// All stages in execution order.
    pub const ORDER: [Stage; 9] = [
        Stage::Intake,
        Stage::Plan,
        Stage::Harvest,
        Stage::Fetch,
        Stage::Extract,
        Stage::Verify,
        Stage::Write,
        Stage::Audit,
        Stage::Cache,
    ];

    /// Stable lowercase name used in logs and cache entries.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Plan => "plan",
            Stage::Harvest => "harvest",
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Verify => "verify",
            Stage::Write => "write",
            Stage::Audit => "audit",
            Stage::Cache => "cache",
        }
    }
}

/// Research depth recorded in plan parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Brief,
    Medium,
    Deep,
}

impl std::str::FromStr for Depth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "brief" => Ok(Depth::Brief),
            "medium" => Ok(Depth::Medium),
            "deep" => Ok(Depth::Deep),
            other => Err(anyhow!("unknown depth '{other}' (expected brief, medium, or deep)")),
        }
    }
}

/// Plan parameters frozen by the plan stage (`logs/plan.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanParams {
    /// Bound on concurrently in-flight acquisition tasks.
    pub workers: usize,
    pub depth: Depth,
    /// Maximum number of sources to acquire for the run.
    pub budget: usize,
    pub lang: String,
    /// Harvest queries derived from the clarified topic.
    pub queries: Vec<String>,
}

/// Clarification gate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClarificationStatus {
    Pending,
    Clarified,
    Failed,
}

/// Persisted clarification record (`clarify.json`).
///
/// Invariant: `status == Clarified` implies `answers` is non-empty. A topic
/// that passes the gate as given is recorded with itself as the accepted
/// answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClarificationRecord {
    pub status: ClarificationStatus,
    pub original_topic: String,
    /// Topic after merging clarification answers.
    pub final_topic: String,
    /// At most three questions, in the order they were asked.
    pub questions: Vec<String>,
    pub answers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// One source reference discovered during harvest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub url: String,
    pub title: String,
    pub relevance: f64,
}

/// Fetched source content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchedSource {
    pub url: String,
    pub title: String,
    pub content: String,
    pub fetched_at: String,
}

/// Extraction output for one fetched source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedSource {
    pub url: String,
    pub title: String,
    pub key_points: Vec<String>,
    pub excerpt: Option<String>,
}

/// A single registered citation.
///
/// `cid` is `C` plus a 3-digit zero-padded integer, unique within a run,
/// assigned in strictly increasing registration order, never reused or
/// renumbered even across resume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub cid: String,
    pub url: String,
    pub title: String,
    pub locator: String,
    pub fetched_at: String,
    pub quote_hash: Option<String>,
    pub local_path: Option<String>,
}

/// Draft paragraph with its supporting citations
/// (`drafts/paragraphs.jsonl`, one object per line).
///
/// Invariant: `cite_ids` is non-empty and every id resolves to a registered
/// [`Citation`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParagraphDraft {
    pub text: String,
    pub cite_ids: Vec<String>,
}

/// Structural verification detail (`evidence/verify.json`).
///
/// `passed` is the conjunction of `report_passed`,
/// `paragraphs_jsonl_cite_ids_passed`, and `paragraph_end_citation_passed`;
/// the three checks are independently falsifiable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationResult {
    pub verified_claims_count: usize,
    pub single_source_claims_count: usize,
    pub conflicts_count: usize,
    pub total_paragraphs: usize,
    pub paragraph_without_citation_count: usize,
    pub paragraph_end_citation_passed: bool,
    pub paragraphs_jsonl_cite_ids_passed: bool,
    pub report_passed: bool,
    pub citations_found: usize,
    pub passed: bool,
}
