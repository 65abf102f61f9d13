//! File-edit validation tools: `validate_file_edit`, `validate_scope`,
//! `validate_exact_replacement`, `detect_feature_creep`.

use std::path::{Component, Path};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{opt_bool, opt_str, require_str, McpTool, ToolContext};
use crate::analyzers::{classify_replacement, detect_feature_creep, ReplacementVerdict};
use crate::error::ToolResult;

fn violations_json(violations: &[crate::validation::Violation]) -> Value {
    json!(violations
        .iter()
        .map(|v| json!({ "rule_id": v.rule_id, "name": v.rule_name, "severity": v.severity, "message": v.message }))
        .collect::<Vec<_>>())
}

pub struct ValidateFileEdit;

#[async_trait]
impl McpTool for ValidateFileEdit {
    fn name(&self) -> &'static str {
        "validate_file_edit"
    }

    fn description(&self) -> &'static str {
        "Check a proposed file edit's path and content against the prevention rule catalog."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" },
                "old_string": { "type": "string" },
                "new_string": { "type": "string" },
            },
            "required": ["file_path", "new_string"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let file_path = require_str(&input, "file_path")?;
        let new_string = require_str(&input, "new_string")?;

        let mut violations = ctx.validation.validate(new_string, &["file_edit", "content", "edit", "security"]).await;
        violations.extend(ctx.validation.validate(file_path, &["file_path", "path"]).await);

        ctx.metrics.violations_emitted(violations.len() as u64);
        Ok(json!({ "valid": violations.is_empty(), "violations": violations_json(&violations) }).to_string())
    }
}

pub struct ValidateScope;

#[async_trait]
impl McpTool for ValidateScope {
    fn name(&self) -> &'static str {
        "validate_scope"
    }

    fn description(&self) -> &'static str {
        "Check whether a file path falls within an authorized scope prefix."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "file_path": { "type": "string" }, "authorized_scope": { "type": "string" } },
            "required": ["file_path"],
        })
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let file_path = require_str(&input, "file_path")?;
        let scope = opt_str(&input, "authorized_scope");

        let valid = if scope.is_empty() { true } else { path_is_within_scope(file_path, scope) };

        Ok(json!({ "valid": valid, "file_path": clean_components_string(file_path), "authorized_scope": scope }).to_string())
    }
}

/// Path-segment-boundary scope check: `clean(scope)` must be a component-wise prefix
/// of `clean(file_path)`. A raw-string prefix (`/app/src` matching `/app/src2/...`)
/// would be wrong here — component comparison is what makes the boundary real.
fn path_is_within_scope(file_path: &str, scope: &str) -> bool {
    let file_components = clean_components(file_path);
    let scope_components = clean_components(scope);
    if scope_components.len() > file_components.len() {
        return false;
    }
    file_components.iter().zip(scope_components.iter()).all(|(a, b)| a == b)
}

/// Lexically clean a path into its normal-form component list: `.` is dropped and
/// `..` pops the previous component (never escaping above the root), mirroring what
/// `Path::components()` plus manual `..` resolution gives you, since `Path` itself
/// does not collapse `..` lexically.
fn clean_components(path: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir | Component::Prefix(_) => {}
            Component::RootDir => {}
        }
    }
    out
}

fn clean_components_string(path: &str) -> String {
    format!("/{}", clean_components(path).join("/"))
}

pub struct ValidateExactReplacement;

#[async_trait]
impl McpTool for ValidateExactReplacement {
    fn name(&self) -> &'static str {
        "validate_exact_replacement"
    }

    fn description(&self) -> &'static str {
        "Classify the difference between original and modified file content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "original_content": { "type": "string" }, "modified_content": { "type": "string" } },
            "required": ["original_content", "modified_content"],
        })
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let original = require_str(&input, "original_content")?;
        let modified = require_str(&input, "modified_content")?;
        let (items, verdict) = classify_replacement(original, modified);
        let accepted = verdict == ReplacementVerdict::Accept;
        Ok(json!({ "accepted": accepted, "verdict": verdict, "diff_items": items }).to_string())
    }
}

pub struct DetectFeatureCreep;

#[async_trait]
impl McpTool for DetectFeatureCreep {
    fn name(&self) -> &'static str {
        "detect_feature_creep"
    }

    fn description(&self) -> &'static str {
        "Flag diffs that add more than the stated change description calls for."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "git_diff": { "type": "string" },
                "change_description": { "type": "string" },
                "is_new_file": { "type": "boolean" },
                "file_path": { "type": "string" },
            },
            "required": ["git_diff"],
        })
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let git_diff = require_str(&input, "git_diff")?;
        let change_description = opt_str(&input, "change_description");
        let is_new_file = opt_bool(&input, "is_new_file");
        let report = detect_feature_creep(git_diff, change_description, is_new_file);
        Ok(serde_json::to_string(&report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GatewayMetrics;
    use crate::session::SessionManager;
    use crate::storage::Storage;
    use crate::validation::ValidationEngine;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_ctx() -> ToolContext {
        let storage = Arc::new(Storage::in_memory());
        let validation = Arc::new(ValidationEngine::new(storage.rules.clone(), Duration::from_secs(60)));
        let sessions = Arc::new(SessionManager::new(Duration::from_secs(60), 100));
        ToolContext::new(storage, validation, sessions, Arc::new(GatewayMetrics::new()))
    }

    #[test]
    fn scope_rejects_sibling_directory_with_shared_prefix() {
        assert!(!path_is_within_scope("/app/src2/lib.rs", "/app/src"));
        assert!(path_is_within_scope("/app/src/lib.rs", "/app/src"));
    }

    #[test]
    fn scope_resolves_parent_dir_traversal() {
        assert!(!path_is_within_scope("/app/src/../../etc/passwd", "/app/src"));
    }

    #[tokio::test]
    async fn validate_scope_empty_scope_is_unrestricted() {
        let ctx = test_ctx();
        let result = ValidateScope.execute(&ctx, json!({"file_path": "/anything", "authorized_scope": ""})).await.unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["valid"], json!(true));
    }

    #[tokio::test]
    async fn validate_scope_rejects_traversal_out_of_scope() {
        let ctx = test_ctx();
        let result = ValidateScope
            .execute(&ctx, json!({"file_path": "/app/src/../../etc/passwd", "authorized_scope": "/app/src"}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["valid"], json!(false));
    }

    #[tokio::test]
    async fn validate_exact_replacement_flags_debug_statement() {
        let ctx = test_ctx();
        let result = ValidateExactReplacement
            .execute(&ctx, json!({"original_content": "fn f() {}\n", "modified_content": "fn f() {\nprintln!(\"x\");\n}\n"}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["verdict"], json!("reject"));
    }

    #[tokio::test]
    async fn detect_feature_creep_flags_new_endpoint() {
        let ctx = test_ctx();
        let diff = "+app.get(\"/new-endpoint\", handler)\n";
        let result = DetectFeatureCreep
            .execute(&ctx, json!({"git_diff": diff, "change_description": "fix a typo", "is_new_file": false}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["creep_detected"], json!(true));
    }
}
