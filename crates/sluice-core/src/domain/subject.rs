//! Subject names and wildcard matching.
//!
//! Subjects are `.`-separated tokens. In a pattern, `*` matches exactly one
//! token and `>` (only as the last token) matches one or more tokens.

/// Is `subject` a well-formed subject or subject pattern?
pub fn is_valid_pattern(subject: &str) -> bool {
    if subject.is_empty() {
        return false;
    }
    let tokens: Vec<&str> = subject.split('.').collect();
    let last = tokens.len() - 1;
    tokens.iter().enumerate().all(|(i, token)| {
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return false;
        }
        match *token {
            ">" => i == last,
            "*" => true,
            t => !t.contains('*') && !t.contains('>'),
        }
    })
}

/// Is `subject` a concrete subject (no wildcards) that a message can be published to?
pub fn is_valid_literal(subject: &str) -> bool {
    is_valid_pattern(subject) && subject.split('.').all(|t| t != "*" && t != ">")
}

/// Does the concrete `subject` match `pattern`?
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Is an entity name (stream or consumer) usable as a subject token?
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>' | '/' | '\\'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::exact("some.subject", "some.subject", true)]
    #[case::different("some.subject", "some.other", false)]
    #[case::star("some.*", "some.subject", true)]
    #[case::star_too_deep("some.*", "some.subject.deep", false)]
    #[case::tail("some.>", "some.subject.deep", true)]
    #[case::tail_needs_a_token("some.>", "some", false)]
    #[case::shorter_pattern("some", "some.subject", false)]
    #[case::star_middle("a.*.c", "a.b.c", true)]
    fn wildcard_matching(#[case] pattern: &str, #[case] subject: &str, #[case] expected: bool) {
        assert_eq!(matches(pattern, subject), expected);
    }

    #[rstest]
    #[case::plain("some.subject", true)]
    #[case::empty("", false)]
    #[case::empty_token("some..subject", false)]
    #[case::tail_not_last("some.>.x", false)]
    #[case::partial_star("so*me", false)]
    #[case::space("some subject", false)]
    fn pattern_validation(#[case] subject: &str, #[case] expected: bool) {
        assert_eq!(is_valid_pattern(subject), expected);
    }

    #[test]
    fn literals_reject_wildcards() {
        assert!(is_valid_literal("some.subject"));
        assert!(!is_valid_literal("some.*"));
        assert!(!is_valid_literal("some.>"));
    }

    #[test]
    fn names_reject_separators() {
        assert!(is_valid_name("STREAM_NAME"));
        assert!(is_valid_name("queue-consumer"));
        assert!(!is_valid_name("bad.name"));
        assert!(!is_valid_name("bad name"));
        assert!(!is_valid_name(""));
    }
}
