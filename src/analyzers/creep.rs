//! Feature-creep detection: flags diffs that grew well past what a stated change
//! description would justify.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

#[derive(Debug, Clone, Serialize)]
pub struct CreepReport {
    pub creep_detected: bool,
    pub violations: Vec<String>,
    pub diff_summary: String,
    pub total_changes: TotalChanges,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TotalChanges {
    pub additions: u32,
    pub deletions: u32,
}

static NEW_FUNCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\+\s*(pub\s+)?(async\s+)?fn\s+\w+").expect("static pattern"));
static NEW_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\+\s*(pub\s+)?(struct|class|impl|interface)\s+\w+").expect("static pattern"));
static NEW_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\+\s*(use|import)\s+").expect("static pattern"));
static NEW_ENDPOINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?mi)^\+.*(\.route\(|@(Get|Post|Put|Delete)Mapping|app\.(get|post|put|delete)\()"#).expect("static pattern"));
static THIRD_PARTY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^\+\s*(use|import)\s+[a-z0-9_]+::"#).expect("static pattern"));
static REFACTOR_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(refactor|improve|cleanup|reorganiz)").expect("static pattern"));

fn count_additions_deletions(diff: &str) -> (u32, u32) {
    let mut additions = 0u32;
    let mut deletions = 0u32;
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('+') {
            if !stripped.trim().is_empty() || !line.trim().is_empty() {
                additions += 1;
            }
        } else if line.starts_with('-') {
            deletions += 1;
        }
    }
    (additions, deletions)
}

/// Evaluate a unified diff plus the author's stated change description for signs that
/// the change grew past its description. Pure function; never touches storage.
#[must_use]
pub fn detect_feature_creep(git_diff: &str, change_description: &str, is_new_file: bool) -> CreepReport {
    let (additions, deletions) = count_additions_deletions(git_diff);
    let new_functions = NEW_FUNCTION.find_iter(git_diff).count();
    let new_classes = NEW_CLASS.find_iter(git_diff).count();
    let new_imports = NEW_IMPORT.find_iter(git_diff).count();
    let third_party_imports = THIRD_PARTY_IMPORT.find_iter(git_diff).count();
    let new_endpoints = NEW_ENDPOINT.find_iter(git_diff).count();
    let mentions_refactor = REFACTOR_MARKER.is_match(change_description);

    let mut violations = Vec::new();

    if is_new_file && additions > 50 {
        violations.push(format!("new file adds {additions} lines, expected a focused addition"));
    }
    if new_functions > 1 {
        violations.push(format!("{new_functions} new functions added in one change"));
    }
    if new_classes > 1 {
        violations.push(format!("{new_classes} new types/classes added in one change"));
    }
    if new_endpoints > 0 {
        violations.push(format!("{new_endpoints} new endpoint(s) added; endpoints need their own review"));
    }
    if additions > 100 {
        violations.push(format!("{additions} additions exceeds the single-change guideline"));
    }
    if mentions_refactor && new_functions == 0 {
        violations.push("description mentions refactoring but no structural change is evident".into());
    }
    if REFACTOR_MARKER.is_match(change_description) && change_description.to_lowercase().contains("improve") {
        violations.push("vague 'improvement' framing without a concrete scope".into());
    }
    if new_imports > 3 {
        violations.push(format!("{new_imports} new imports ({third_party_imports} third-party) in one change"));
    }

    let creep_detected = !violations.is_empty();
    let recommendation = if creep_detected {
        "Split this change into focused commits that each match their own stated description.".to_string()
    } else {
        "No feature creep detected; the change matches its stated scope.".to_string()
    };

    CreepReport {
        creep_detected,
        violations,
        diff_summary: format!("+{additions}/-{deletions} lines, {new_functions} new fn(s), {new_classes} new type(s)"),
        total_changes: TotalChanges { additions, deletions },
        recommendation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_focused_diff_has_no_creep() {
        let diff = "+    let x = 1;\n-    let x = 0;\n";
        let report = detect_feature_creep(diff, "fix off-by-one", false);
        assert!(!report.creep_detected);
    }

    #[test]
    fn new_endpoint_is_flagged() {
        let diff = "+app.post(\"/admin/reset\", handler);\n";
        let report = detect_feature_creep(diff, "fix bug", false);
        assert!(report.creep_detected);
    }

    #[test]
    fn large_new_file_is_flagged() {
        let diff = (0..60).map(|i| format!("+line {i}\n")).collect::<String>();
        let report = detect_feature_creep(&diff, "add module", true);
        assert!(report.creep_detected);
    }
}
