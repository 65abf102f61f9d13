//! Exact-replacement diffing: classifies the difference between an original and a
//! modified file body into known categories so `validate_exact_replacement` can
//! distinguish a faithful fix from scope creep.

use std::collections::HashSet;

use serde::Serialize;

/// A single classified difference between two line sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffItem {
    pub kind: DiffKind,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    NewImport,
    TypeChange,
    DebugAdded,
    ExtraFunction,
    VariableRename,
    Formatting,
    CodeReorganized,
    CommentChange,
    FunctionRemoved,
}

impl DiffKind {
    /// Whether this kind of difference alone should reject the replacement.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::DebugAdded | Self::ExtraFunction | Self::FunctionRemoved)
    }

    /// Whether this kind of difference is purely informational and never blocks.
    #[must_use]
    pub const fn is_info_only(self) -> bool {
        matches!(self, Self::Formatting | Self::CommentChange)
    }
}

/// Overall verdict for an exact-replacement check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementVerdict {
    Accept,
    Review,
    Reject,
}

fn is_debug_statement(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("println!")
        || trimmed.starts_with("eprintln!")
        || trimmed.starts_with("dbg!")
        || trimmed.starts_with("console.log")
        || trimmed.starts_with("fmt.Print")
        || trimmed.starts_with("echo ")
}

fn is_import_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("use ") || trimmed.starts_with("import ") || trimmed.starts_with("require(")
}

fn is_function_signature(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("fn ")
        || trimmed.starts_with("pub fn ")
        || trimmed.starts_with("async fn ")
        || trimmed.starts_with("function ")
        || trimmed.starts_with("def ")
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with('#') || trimmed.starts_with("/*")
}

/// Classify line-level differences between `original` and `modified`. Never panics on
/// arbitrary UTF-8; non-UTF-8-safe byte sequences simply can't reach this function
/// since callers always hand it a `&str`.
#[must_use]
pub fn classify_replacement(original: &str, modified: &str) -> (Vec<DiffItem>, ReplacementVerdict) {
    let original_lines: HashSet<&str> = original.lines().collect();
    let modified_lines: HashSet<&str> = modified.lines().collect();

    let mut items = Vec::new();

    for line in modified_lines.difference(&original_lines) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let kind = if is_debug_statement(line) {
            DiffKind::DebugAdded
        } else if is_import_line(line) {
            DiffKind::NewImport
        } else if is_function_signature(line) {
            DiffKind::ExtraFunction
        } else if is_comment_line(line) {
            DiffKind::CommentChange
        } else if trimmed.trim_matches(|c: char| c.is_whitespace()).len() == trimmed.len()
            && original_lines.contains(trimmed.trim())
        {
            DiffKind::Formatting
        } else {
            DiffKind::TypeChange
        };
        items.push(DiffItem { kind, line: (*line).to_string() });
    }

    for line in original_lines.difference(&modified_lines) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_function_signature(line) {
            items.push(DiffItem { kind: DiffKind::FunctionRemoved, line: (*line).to_string() });
        } else if !is_comment_line(line) {
            items.push(DiffItem { kind: DiffKind::VariableRename, line: (*line).to_string() });
        }
    }

    let critical = items.iter().filter(|i| i.kind.is_critical()).count();
    let non_info_warnings = items.iter().filter(|i| !i.kind.is_info_only() && !i.kind.is_critical()).count();

    let verdict = if critical > 0 {
        ReplacementVerdict::Reject
    } else if non_info_warnings > 2 {
        ReplacementVerdict::Review
    } else {
        ReplacementVerdict::Accept
    };

    (items, verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_accepts_with_no_items() {
        let (items, verdict) = classify_replacement("fn a() {}\n", "fn a() {}\n");
        assert!(items.is_empty());
        assert_eq!(verdict, ReplacementVerdict::Accept);
    }

    #[test]
    fn added_debug_statement_rejects() {
        let (items, verdict) =
            classify_replacement("fn a() {\n    1\n}\n", "fn a() {\n    println!(\"here\");\n    1\n}\n");
        assert!(items.iter().any(|i| i.kind == DiffKind::DebugAdded));
        assert_eq!(verdict, ReplacementVerdict::Reject);
    }

    #[test]
    fn new_function_rejects() {
        let (_items, verdict) = classify_replacement("fn a() {}\n", "fn a() {}\nfn b() {}\n");
        assert_eq!(verdict, ReplacementVerdict::Reject);
    }

    #[test]
    fn comment_only_change_is_info_only_and_accepts() {
        let (items, verdict) = classify_replacement("fn a() {}\n", "// note\nfn a() {}\n");
        assert!(items.iter().all(|i| i.kind.is_info_only()));
        assert_eq!(verdict, ReplacementVerdict::Accept);
    }

    #[test]
    fn never_panics_on_non_ascii_utf8() {
        let (_items, _verdict) = classify_replacement("let s = \"héllo wörld\";\n", "let s = \"héllo wörld 🎉\";\n");
    }
}
