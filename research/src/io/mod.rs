//! I/O modules for run persistence and external capabilities.

pub mod acquire;
pub mod answers;
pub mod artifact;
pub mod cache;
pub mod config;
pub mod layout;
pub mod persist;
pub mod report;
pub mod run_state;
pub mod transition_log;

/// Current time as an RFC 3339 timestamp.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Reduce text to a filesystem-safe lowercase slug of at most `max_len`
/// input characters (alphanumerics, `_`, and `-` survive).
pub fn slugify(text: &str, max_len: usize) -> String {
    text.chars()
        .take(max_len)
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_strips_unsafe_chars() {
        assert_eq!(slugify("Quantum computing: 2024!", 30), "quantumcomputing2024");
        assert_eq!(slugify("", 10), "");
    }

    #[test]
    fn slugify_limits_input_length() {
        let slug = slugify("abcdefghijklmnopqrstuvwxyz", 20);
        assert_eq!(slug, "abcdefghijklmnopqrst");
    }
}
