//! Report rendering (`final/report.md`) and the verification summary.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::{ParagraphDraft, VerificationResult};

/// Embedded report template. One paragraph per draft, each line ending with
/// its citation markers so the audit stage's end-of-paragraph check can hold.
const REPORT_TEMPLATE: &str = include_str!("../../templates/report.md.j2");

/// Render the final report from the drafted paragraphs.
pub fn render_report(topic: &str, paragraphs: &[ParagraphDraft]) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("report", REPORT_TEMPLATE)
        .context("parse report template")?;
    let template = env.get_template("report").context("load report template")?;
    let rendered = template
        .render(context! {
            topic => topic,
            paragraphs => paragraphs,
        })
        .context("render report")?;
    Ok(rendered)
}

/// Render the human-readable verification summary (`final/verification.md`).
pub fn render_verification_summary(result: &VerificationResult) -> String {
    let mut buf = String::from("# Verification Report\n\n");
    buf.push_str(&format!(
        "- paragraph_without_citation_count: {}\n",
        result.paragraph_without_citation_count
    ));
    buf.push_str(&format!("- total_paragraphs: {}\n", result.total_paragraphs));
    buf.push_str(&format!("- citations_found: {}\n", result.citations_found));
    buf.push_str(&format!(
        "- verified_claims_count: {}\n",
        result.verified_claims_count
    ));
    buf.push_str(&format!(
        "- single_source_claims_count: {}\n",
        result.single_source_claims_count
    ));
    buf.push_str(&format!("- conflicts_count: {}\n", result.conflicts_count));
    buf.push_str(&format!(
        "- paragraph_end_citation_passed: {}\n",
        result.paragraph_end_citation_passed
    ));
    buf.push_str(&format!(
        "- paragraphs_jsonl_cite_ids_passed: {}\n",
        result.paragraphs_jsonl_cite_ids_passed
    ));
    buf.push_str(&format!("- report_passed: {}\n", result.report_passed));
    buf.push_str(&format!("- passed: {}\n", result.passed));
    buf
}
