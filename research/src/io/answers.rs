//! Interactive clarification answers.

use anyhow::{Context, Result};

/// Source of answers to clarification questions (interactive mode).
///
/// Absent in non-interactive mode, where the machine suspends with a
/// clarification-required outcome instead of blocking.
pub trait AnswerSource {
    /// Present the questions and return the answers, at most one per
    /// question. Blank answers are dropped by the caller.
    fn ask(&self, questions: &[String]) -> Result<Vec<String>>;
}

/// Reads one answer per question from stdin.
#[derive(Debug, Clone, Default)]
pub struct StdinAnswerSource;

impl AnswerSource for StdinAnswerSource {
    fn ask(&self, questions: &[String]) -> Result<Vec<String>> {
        let stdin = std::io::stdin();
        let mut answers = Vec::new();
        for question in questions {
            eprintln!("{question}");
            let mut line = String::new();
            let read = stdin
                .read_line(&mut line)
                .context("read clarification answer")?;
            if read == 0 {
                break;
            }
            let answer = line.trim();
            if !answer.is_empty() {
                answers.push(answer.to_string());
            }
        }
        Ok(answers)
    }
}
