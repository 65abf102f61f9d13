//! Conventional Commit message linting.

use crate::config::commit::{KNOWN_ACRONYMS, MAX_SUBJECT_LEN, TYPES};

/// A single lint finding against a commit message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CommitIssue {
    pub code: &'static str,
    pub message: String,
}

/// Parse and lint a commit message header against Conventional Commits. Returns every
/// issue found; an empty vec means the header is well formed.
#[must_use]
pub fn lint_commit_message(message: &str) -> Vec<CommitIssue> {
    let mut issues = Vec::new();
    let header = message.lines().next().unwrap_or("");

    if header.chars().count() > MAX_SUBJECT_LEN {
        issues.push(CommitIssue {
            code: "subject-too-long",
            message: format!("subject line is {} characters, limit is {MAX_SUBJECT_LEN}", header.chars().count()),
        });
    }
    if header.ends_with('.') {
        issues.push(CommitIssue { code: "trailing-period", message: "subject should not end with a period".into() });
    }

    let description = match header.split_once(':') {
        Some((type_and_scope, description)) => {
            let (raw_type, _scope) = match type_and_scope.split_once('(') {
                Some((t, rest)) => (t.trim_end_matches('!'), rest),
                None => (type_and_scope.trim_end_matches('!'), ""),
            };

            if raw_type != raw_type.to_lowercase() {
                issues.push(CommitIssue { code: "type-case", message: format!("commit type '{raw_type}' should be lowercase") });
            }
            if !TYPES.contains(&raw_type.to_lowercase().as_str()) {
                issues.push(CommitIssue {
                    code: "unknown-type",
                    message: format!("commit type '{raw_type}' is not one of the recognized types"),
                });
            }
            description
        }
        None => {
            issues.push(CommitIssue {
                code: "missing-type",
                message: "subject must start with `type(scope): description`".into(),
            });
            header
        }
    };

    let description = description.trim();
    if description.is_empty() {
        issues.push(CommitIssue { code: "empty-description", message: "description must not be empty".into() });
    } else if let Some(first_word) = description.split_whitespace().next() {
        let starts_uppercase = first_word.chars().next().is_some_and(char::is_uppercase);
        let is_known_acronym = KNOWN_ACRONYMS.iter().any(|acro| first_word.starts_with(acro));
        if starts_uppercase && !is_known_acronym {
            issues.push(CommitIssue {
                code: "description-case",
                message: "first word of the description should be lowercase".into(),
            });
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_message_has_no_issues() {
        assert!(lint_commit_message("fix(parser): handle empty input").is_empty());
    }

    #[test]
    fn flags_trailing_period_and_uppercase_start() {
        let issues = lint_commit_message("Fix bug.");
        assert!(issues.iter().any(|i| i.code == "trailing-period"));
        assert!(issues.iter().any(|i| i.code == "missing-type"));
        assert!(issues.iter().any(|i| i.code == "description-case"));
    }

    #[test]
    fn known_acronym_is_allowed_to_start_uppercase() {
        assert!(lint_commit_message("feat(api): API now returns 429 on throttle").is_empty());
    }

    #[test]
    fn subject_at_exactly_72_chars_passes_length_check() {
        let subject = format!("fix({}): ok", "x".repeat(59));
        assert_eq!(subject.chars().count(), 72);
        assert!(!lint_commit_message(&subject).iter().any(|i| i.code == "subject-too-long"));
    }

    #[test]
    fn subject_at_73_chars_flags_length() {
        let subject = format!("fix({}): ok", "x".repeat(60));
        assert_eq!(subject.chars().count(), 73);
        assert!(lint_commit_message(&subject).iter().any(|i| i.code == "subject-too-long"));
    }
}
