//! Forbidden-word matching and masking.

use super::policy::FilterPolicy;
use super::{Severity, Violation, ViolationKind};

/// Result of the word-list pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WordCheck {
    pub(crate) filtered_body: String,
    /// One entry per distinct matched rule.
    pub(crate) violations: Vec<Violation>,
}

/// Match every rule against `body`, masking low and medium matches.
pub(crate) fn check_words(policy: &FilterPolicy, body: &str) -> WordCheck {
    let mut filtered_body = body.to_owned();
    let mut violations = Vec::new();
    for word in policy.words() {
        if !word.matcher.is_match(&filtered_body) {
            continue;
        }
        violations.push(Violation {
            kind: ViolationKind::ProhibitedWord,
            severity: word.rule.severity,
            detail: word.rule.pattern.clone(),
        });
        if word.rule.severity < Severity::High {
            filtered_body = word
                .matcher
                .replace_all(&filtered_body, |caps: &regex::Captures<'_>| {
                    match &word.rule.replacement {
                        Some(replacement) => replacement.clone(),
                        None => mask(caps.get(0).map_or("", |m| m.as_str())),
                    }
                })
                .into_owned();
        }
    }
    WordCheck {
        filtered_body,
        violations,
    }
}

fn mask(matched: &str) -> String {
    matched
        .chars()
        .map(|ch| if ch.is_whitespace() { ch } else { '*' })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("well DAMN it", "well darn it")]
    #[case("you idiot", "you *****")]
    #[case("just shut up", "just **** **")]
    fn low_and_medium_matches_are_replaced(#[case] body: &str, #[case] expected: &str) {
        let check = check_words(&FilterPolicy::default(), body);
        assert_eq!(check.filtered_body, expected);
        assert_eq!(check.violations.len(), 1);
    }

    #[rstest]
    fn high_severity_matches_are_left_for_blocking() {
        let check = check_words(&FilterPolicy::default(), "go die");
        assert_eq!(check.filtered_body, "go die");
        assert_eq!(check.violations[0].severity, Severity::High);
    }

    #[rstest]
    fn clean_text_passes_untouched() {
        let check = check_words(&FilterPolicy::default(), "hello there");
        assert!(check.violations.is_empty());
        assert_eq!(check.filtered_body, "hello there");
    }
}
