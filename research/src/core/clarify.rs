//! Clarification gate rejecting under-specified topics.

/// Terms that make a topic ambiguous when present as a whole token.
const AMBIGUOUS_TERMS: [&str; 9] = [
    "it",
    "this",
    "that",
    "they",
    "them",
    "something",
    "anything",
    "what",
    "how",
];

/// Abbreviations too short to research without expansion.
const SHORT_ABBREVIATIONS: [&str; 15] = [
    "ai", "ml", "dl", "llm", "nlp", "cv", "ag", "ar", "vr", "mr", "web", "app", "db", "os", "api",
];

/// Minimum topic length (chars) considered specific enough.
const MIN_TOPIC_LEN: usize = 20;
/// Maximum number of clarification questions per round.
const MAX_QUESTIONS: usize = 3;

/// Gate deciding whether a topic is specific enough to proceed.
///
/// Deterministic: the same topic always yields the same decision and the same
/// question list.
#[derive(Debug, Clone, Default)]
pub struct Clarifier;

impl Clarifier {
    /// True if the topic is too short, contains an ambiguous term as a whole
    /// token (case-insensitive), or equals/contains a known short
    /// abbreviation.
    pub fn needs_clarification(&self, topic: &str) -> bool {
        let trimmed = topic.trim();
        if trimmed.chars().count() < MIN_TOPIC_LEN {
            return true;
        }

        let lower = trimmed.to_lowercase();
        if SHORT_ABBREVIATIONS.contains(&lower.as_str()) {
            return true;
        }

        let tokens: Vec<&str> = lower.split_whitespace().collect();
        tokens
            .iter()
            .any(|token| AMBIGUOUS_TERMS.contains(token) || SHORT_ABBREVIATIONS.contains(token))
    }

    /// Generate at most three clarification questions for a topic.
    ///
    /// Selection is driven by which gate rules fired; no randomness.
    pub fn generate_questions(&self, topic: &str) -> Vec<String> {
        let trimmed = topic.trim();
        let mut questions = Vec::new();

        if trimmed.chars().count() < 5 {
            questions.push("What specific topic would you like to research?".to_string());
            questions.push("What aspect or angle are you interested in?".to_string());
            questions.push("What is the purpose of this research?".to_string());
            questions.truncate(MAX_QUESTIONS);
            return questions;
        }

        if trimmed.chars().count() < MIN_TOPIC_LEN {
            questions.push(format!(
                "Could you provide more context about '{trimmed}'? \
                 What specifically would you like to learn?"
            ));
        }

        let lower = trimmed.to_lowercase();
        let tokens: Vec<&str> = lower.split_whitespace().collect();

        if tokens.iter().any(|token| AMBIGUOUS_TERMS.contains(token)) {
            questions.push(
                "Your topic seems vague. Could you be more specific about what you mean?"
                    .to_string(),
            );
        }

        if let Some(abbreviation) = tokens
            .iter()
            .copied()
            .find(|token| SHORT_ABBREVIATIONS.contains(token))
        {
            questions.push(format!(
                "'{abbreviation}' can stand for several things. Which meaning do you intend?"
            ));
        }

        if questions.len() < MAX_QUESTIONS {
            questions.push(
                "What depth of research do you need? (brief overview / comprehensive analysis)"
                    .to_string(),
            );
        }

        questions.truncate(MAX_QUESTIONS);
        questions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_topics_need_clarification() {
        let clarifier = Clarifier;
        for topic in ["", "ai", "rust async", "a nineteen char st"] {
            assert!(
                clarifier.needs_clarification(topic),
                "expected clarification for '{topic}'"
            );
        }
    }

    #[test]
    fn ambiguous_terms_trigger_regardless_of_length() {
        let clarifier = Clarifier;
        let topic = "explain how this compares to that across European energy markets";
        assert!(topic.chars().count() >= MIN_TOPIC_LEN);
        assert!(clarifier.needs_clarification(topic));
    }

    #[test]
    fn ambiguous_match_is_whole_token_only() {
        let clarifier = Clarifier;
        // "anythingarian" contains "anything" as a substring but not a token.
        let topic = "history of anythingarian movements in Victorian Britain";
        assert!(!clarifier.needs_clarification(topic));
    }

    #[test]
    fn abbreviation_tokens_trigger() {
        let clarifier = Clarifier;
        assert!(clarifier.needs_clarification("llm"));
        assert!(clarifier.needs_clarification("regulatory outlook for llm deployments overseas"));
    }

    #[test]
    fn specific_topic_passes() {
        let clarifier = Clarifier;
        assert!(!clarifier.needs_clarification("quantum computing applications"));
    }

    #[test]
    fn questions_are_deterministic_and_capped() {
        let clarifier = Clarifier;
        let first = clarifier.generate_questions("ml");
        let second = clarifier.generate_questions("ml");
        assert_eq!(first, second);
        assert!(!first.is_empty());
        assert!(first.len() <= MAX_QUESTIONS);
    }

    #[test]
    fn near_empty_topic_gets_generic_questions() {
        let clarifier = Clarifier;
        let questions = clarifier.generate_questions("");
        assert_eq!(questions.len(), 3);
        assert!(questions[0].contains("What specific topic"));
    }

    #[test]
    fn abbreviation_question_names_the_token() {
        let clarifier = Clarifier;
        let questions = clarifier.generate_questions("nlp benchmarks");
        assert!(questions.iter().any(|q| q.contains("'nlp'")));
    }
}
