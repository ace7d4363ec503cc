//! Test-only scripted capabilities for exercising the state machine.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};

use crate::core::types::{FetchedSource, SourceRef};
use crate::io::acquire::{FetchRequest, SearchProvider, SearchRequest, SourceFetcher};
use crate::io::answers::AnswerSource;

/// Fixed timestamp so scripted artifacts are byte-stable across runs.
pub const FIXED_TIMESTAMP: &str = "2024-01-01T00:00:00+00:00";

/// Deterministic search provider returning `limit` numbered sources and
/// counting invocations.
#[derive(Debug, Default)]
pub struct CountingSearch {
    pub calls: AtomicUsize,
}

impl CountingSearch {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SearchProvider for CountingSearch {
    fn search(&self, request: &SearchRequest) -> Result<Vec<SourceRef>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..request.limit)
            .map(|position| SourceRef {
                url: format!("https://example.test/source/{position}"),
                title: format!("Fixture source {position}"),
                relevance: 1.0 - position as f64 * 0.05,
            })
            .collect())
    }
}

/// Fetcher that counts calls and fails for urls containing a configured
/// fragment.
#[derive(Debug, Default)]
pub struct CountingFetcher {
    pub calls: AtomicUsize,
    pub fail_containing: Option<String>,
}

impl CountingFetcher {
    pub fn failing_on(fragment: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_containing: Some(fragment.to_string()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SourceFetcher for CountingFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchedSource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fragment) = &self.fail_containing {
            if request.url.contains(fragment.as_str()) {
                return Err(anyhow!("scripted fetch failure for {}", request.url));
            }
        }
        Ok(FetchedSource {
            url: request.url.clone(),
            title: request.title.clone(),
            content: format!("Fixture content for {}.", request.title),
            fetched_at: FIXED_TIMESTAMP.to_string(),
        })
    }
}

/// Scripted clarification answers returned verbatim on every round.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAnswers {
    pub answers: Vec<String>,
}

impl ScriptedAnswers {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl AnswerSource for ScriptedAnswers {
    fn ask(&self, _questions: &[String]) -> Result<Vec<String>> {
        Ok(self.answers.clone())
    }
}
