//! Typed stores for per-stage run artifacts.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::types::{Citation, ParagraphDraft};
use crate::io::persist::{read_json, write_json_atomic, write_text_atomic};

/// Write the citation list (`evidence/citations.json`), registration order.
pub fn write_citations(path: &Path, citations: &[Citation]) -> Result<()> {
    write_json_atomic(path, &citations)
}

/// Read the citation list back in registration order.
pub fn read_citations(path: &Path) -> Result<Vec<Citation>> {
    read_json(path)
}

/// Write paragraph drafts as JSONL (`drafts/paragraphs.jsonl`), one object
/// per line.
pub fn write_paragraphs(path: &Path, paragraphs: &[ParagraphDraft]) -> Result<()> {
    let mut buf = String::new();
    for paragraph in paragraphs {
        let line = serde_json::to_string(paragraph).context("serialize paragraph draft")?;
        buf.push_str(&line);
        buf.push('\n');
    }
    write_text_atomic(path, &buf)
}

/// Read paragraph drafts from JSONL.
pub fn read_paragraphs(path: &Path) -> Result<Vec<ParagraphDraft>> {
    let contents = read_paragraphs_text(path)?;
    let mut paragraphs = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let paragraph: ParagraphDraft = serde_json::from_str(line)
            .with_context(|| format!("parse paragraph draft {}:{}", path.display(), lineno + 1))?;
        paragraphs.push(paragraph);
    }
    Ok(paragraphs)
}

/// Raw JSONL text, for the verifier's line-level checks.
pub fn read_paragraphs_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read paragraph drafts {}", path.display()))
}
