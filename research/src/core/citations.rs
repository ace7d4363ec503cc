//! Citation-id bookkeeping.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::core::types::Citation;

/// Hex chars kept from an excerpt hash.
const QUOTE_HASH_LEN: usize = 16;

/// Metadata for a source being registered.
#[derive(Debug, Clone, Default)]
pub struct SourceMeta {
    pub url: String,
    pub title: String,
    pub locator: String,
    pub fetched_at: String,
    pub excerpt: Option<String>,
    pub local_path: Option<String>,
}

/// Allocates stable per-run citation identifiers in registration order.
///
/// Identifiers are `C` plus a 3-digit zero-padded integer, strictly
/// increasing, never reused or renumbered. Resumed runs continue the counter
/// from the highest existing id.
#[derive(Debug, Clone, Default)]
pub struct CitationManager {
    citations: Vec<Citation>,
    index: BTreeMap<String, usize>,
    counter: u32,
}

impl CitationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a manager from previously registered citations, continuing
    /// the cid counter from max-existing + 1.
    pub fn from_existing(citations: Vec<Citation>) -> Self {
        let mut counter = 0;
        let mut index = BTreeMap::new();
        for (position, citation) in citations.iter().enumerate() {
            if let Some(num) = parse_cid(&citation.cid) {
                counter = counter.max(num);
            }
            index.insert(citation.cid.clone(), position);
        }
        Self {
            citations,
            index,
            counter,
        }
    }

    /// Register a source and allocate the next citation id.
    pub fn register(&mut self, meta: SourceMeta) -> &Citation {
        self.counter += 1;
        let cid = format!("C{:03}", self.counter);
        let quote_hash = meta.excerpt.as_deref().map(quote_hash);
        let citation = Citation {
            cid: cid.clone(),
            url: meta.url,
            title: meta.title,
            locator: meta.locator,
            fetched_at: meta.fetched_at,
            quote_hash,
            local_path: meta.local_path,
        };
        self.index.insert(cid, self.citations.len());
        self.citations.push(citation);
        let last = self.citations.len() - 1;
        &self.citations[last]
    }

    /// Look up a citation by id.
    pub fn lookup(&self, cid: &str) -> Option<&Citation> {
        self.index.get(cid).map(|&position| &self.citations[position])
    }

    /// All citations in registration order.
    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn into_citations(self) -> Vec<Citation> {
        self.citations
    }

    pub fn len(&self) -> usize {
        self.citations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

/// First 16 hex chars of the sha-256 of an excerpt.
pub fn quote_hash(excerpt: &str) -> String {
    let digest = Sha256::digest(excerpt.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(QUOTE_HASH_LEN);
    encoded
}

/// Parse `C` + exactly three digits into its numeric value.
fn parse_cid(cid: &str) -> Option<u32> {
    let digits = cid.strip_prefix('C')?;
    if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
