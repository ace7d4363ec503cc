//! Source-acquisition capabilities.
//!
//! The [`SearchProvider`] and [`SourceFetcher`] traits decouple the pipeline
//! from the discovery/retrieval backend. The deterministic stubs below stand
//! in for network implementations, which plug in without any change to the
//! state machine; tests use scripted providers that count calls.

use anyhow::Result;

use crate::core::types::{FetchedSource, SourceRef};
use crate::io::{now_rfc3339, slugify};

/// Parameters for one discovery query.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Maximum sources to return for this query.
    pub limit: usize,
    pub lang: String,
}

/// Parameters for one content retrieval.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub title: String,
}

/// Discovers candidate sources for a query.
pub trait SearchProvider: Sync {
    fn search(&self, request: &SearchRequest) -> Result<Vec<SourceRef>>;
}

/// Retrieves the content behind a discovered source.
///
/// Timeouts are this capability's responsibility; they surface as a per-item
/// error to the pool rather than a stage-level timeout.
pub trait SourceFetcher: Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchedSource>;
}

/// Deterministic discovery stub: the same query and limit always yield the
/// same source list.
#[derive(Debug, Clone, Default)]
pub struct StubSearchProvider;

impl SearchProvider for StubSearchProvider {
    fn search(&self, request: &SearchRequest) -> Result<Vec<SourceRef>> {
        let slug = slugify(&request.query, 20);
        let slug = if slug.is_empty() { "topic".to_string() } else { slug };
        Ok((0..request.limit)
            .map(|position| SourceRef {
                url: format!("https://example.com/{slug}/{position}"),
                title: format!("Source {position}"),
                relevance: 0.9 - position as f64 * 0.1,
            })
            .collect())
    }
}

/// Deterministic retrieval stub producing fixed content per source.
#[derive(Debug, Clone, Default)]
pub struct StubSourceFetcher;

impl SourceFetcher for StubSourceFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchedSource> {
        Ok(FetchedSource {
            url: request.url.clone(),
            title: request.title.clone(),
            content: format!("Reference material for {}.", request.title),
            fetched_at: now_rfc3339(),
        })
    }
}
