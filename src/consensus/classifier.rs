//! Approval classification over raw backend responses.
//!
//! The default derives approval from affirmative language in free text.
//! That signal is deliberately pluggable: a structured-output parser can
//! replace the pattern matcher without touching the consensus engine.

use regex::Regex;

/// Derives a boolean approval signal from one backend's response text.
pub trait ResponseClassifier: Send + Sync {
    fn approves(&self, response: &str) -> bool;
}

/// Case-insensitive affirmative-language matcher.
const APPROVAL_PATTERN: &str = r"(?i)approve|lgtm|looks good";

pub struct AffirmativePatterns {
    pattern: Regex,
}

impl AffirmativePatterns {
    pub fn new() -> Self {
        Self {
            // Static pattern, compiles unconditionally.
            pattern: Regex::new(APPROVAL_PATTERN).expect("static approval pattern"),
        }
    }
}

impl Default for AffirmativePatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseClassifier for AffirmativePatterns {
    fn approves(&self, response: &str) -> bool {
        self.pattern.is_match(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_affirmative_language_case_insensitively() {
        let classifier = AffirmativePatterns::new();
        assert!(classifier.approves("LGTM, ship it"));
        assert!(classifier.approves("I would APPROVE this change."));
        assert!(classifier.approves("Overall this looks good to me"));
    }

    #[test]
    fn rejects_non_affirmative_text() {
        let classifier = AffirmativePatterns::new();
        assert!(!classifier.approves("REQUEST_CHANGES: the migration is unsafe"));
        assert!(!classifier.approves(""));
    }
}
