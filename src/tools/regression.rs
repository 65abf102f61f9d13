//! Regression-prevention tools: `prevent_regression`, `check_test_prod_separation`,
//! `pre_work_check`, `validate_production_first`, `verify_fixes_intact`.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{opt_str, require_str, require_str_array, McpTool, ToolContext};
use crate::error::ToolResult;
use crate::models::{CodeType, FixStatus, FixType, FixVerification};

pub struct PreventRegression;

#[async_trait]
impl McpTool for PreventRegression {
    fn name(&self) -> &'static str {
        "prevent_regression"
    }

    fn description(&self) -> &'static str {
        "Check whether a change touches files with known, previously-failed behavior."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_paths": { "type": "array", "items": { "type": "string" } },
                "code_content": { "type": "string" },
            },
            "required": ["file_paths"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let file_paths = require_str_array(&input, "file_paths")?;
        let code_content = opt_str(&input, "code_content");

        let candidates = ctx.storage.failures.list_active_for_paths(&file_paths).await?;
        let matches: Vec<_> = candidates
            .into_iter()
            .filter(|f| match (&f.regression_pattern, code_content.is_empty()) {
                (Some(pattern), false) if !pattern.is_empty() => {
                    Regex::new(pattern).map(|re| re.is_match(code_content)).unwrap_or(false)
                }
                _ => true,
            })
            .map(|f| json!({ "id": f.id, "category": f.category, "severity": f.severity, "error_message": f.error_message, "root_cause": f.root_cause }))
            .collect();

        Ok(json!({ "matches": matches, "checked": file_paths.len() }).to_string())
    }
}

static PROD_FORBIDDEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)test_db|test_database|:5433|:5434|testMode\s*=\s*true").expect("static pattern"));
static TEST_FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)prod_db|production_database|https?://api\.production\.|AKIA[0-9A-Z]{16}|production.*secret")
        .expect("static pattern")
});

pub struct CheckTestProdSeparation;

#[async_trait]
impl McpTool for CheckTestProdSeparation {
    fn name(&self) -> &'static str {
        "check_test_prod_separation"
    }

    fn description(&self) -> &'static str {
        "Check a file for cross-environment references between test and production."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "file_path": { "type": "string" }, "environment": { "type": "string" } },
            "required": ["file_path", "environment"],
        })
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let file_path = require_str(&input, "file_path")?;
        let environment = require_str(&input, "environment")?;
        let content = tokio::fs::read_to_string(file_path).await.unwrap_or_default();

        let violations: Vec<&str> = match environment {
            "prod" => PROD_FORBIDDEN.find_iter(&content).map(|m| m.as_str()).collect(),
            "test" => TEST_FORBIDDEN.find_iter(&content).map(|m| m.as_str()).collect(),
            other => {
                return Ok(json!({ "valid": false, "violations": [format!("unknown environment: {other}")] }).to_string())
            }
        };

        Ok(json!({ "valid": violations.is_empty(), "violations": violations }).to_string())
    }
}

pub struct PreWorkCheck;

#[async_trait]
impl McpTool for PreWorkCheck {
    fn name(&self) -> &'static str {
        "pre_work_check"
    }

    fn description(&self) -> &'static str {
        "Check a set of files about to be touched against the failure registry."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "affected_files": { "type": "array", "items": { "type": "string" } } },
            "required": ["affected_files"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let affected_files = require_str_array(&input, "affected_files")?;
        let matches = ctx.storage.failures.list_active_for_paths(&affected_files).await?;
        let passed = matches.is_empty();
        Ok(json!({
            "passed": passed,
            "matches": matches.iter().map(|f| json!({"id": f.id, "error_message": f.error_message})).collect::<Vec<_>>(),
        })
        .to_string())
    }
}

pub struct ValidateProductionFirst;

#[async_trait]
impl McpTool for ValidateProductionFirst {
    fn name(&self) -> &'static str {
        "validate_production_first"
    }

    fn description(&self) -> &'static str {
        "Require a production file to be touched before test or infrastructure files in a session."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_token": { "type": "string" },
                "file_path": { "type": "string" },
                "code_type": { "type": "string" },
            },
            "required": ["session_token", "file_path", "code_type"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let file_path = require_str(&input, "file_path")?;
        let code_type_str = require_str(&input, "code_type")?;

        let code_type = match code_type_str {
            "production" => CodeType::Production,
            "test" => CodeType::Test,
            "infrastructure" => CodeType::Infrastructure,
            other => return Err(crate::error::ToolError::validation("code_type", format!("unknown code_type: {other}"))),
        };

        let had_production_before = ctx.storage.production_code.has_production(session_token).await?;
        ctx.storage.production_code.record(session_token, file_path, code_type).await?;

        let valid = match code_type {
            CodeType::Production => true,
            CodeType::Test | CodeType::Infrastructure => had_production_before,
        };

        Ok(json!({
            "valid": valid,
            "code_type": code_type_str,
            "message": if valid { "ok".to_string() } else { "production code must be touched before test or infrastructure code in this session".to_string() },
        })
        .to_string())
    }
}

pub struct VerifyFixesIntact;

#[async_trait]
impl McpTool for VerifyFixesIntact {
    fn name(&self) -> &'static str {
        "verify_fixes_intact"
    }

    fn description(&self) -> &'static str {
        "Check that previously verified fixes for a file are still present."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_token": { "type": "string" },
                "file_path": { "type": "string" },
                "current_content": { "type": "string" },
            },
            "required": ["session_token", "file_path", "current_content"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let file_path = require_str(&input, "file_path")?;
        let current_content = require_str(&input, "current_content")?;

        let candidates = ctx.storage.failures.list_active_for_paths(&[file_path.to_string()]).await?;
        let mut fixes = Vec::new();
        let mut all_intact = true;

        for failure in &candidates {
            let existing = ctx.storage.fix_verifications.get(session_token, &failure.id).await?;
            let fix_type = if failure.regression_pattern.is_some() { FixType::Regex } else { FixType::CodeChange };

            let still_present = match &failure.regression_pattern {
                Some(pattern) if !pattern.is_empty() => {
                    Regex::new(pattern).map(|re| re.is_match(current_content)).unwrap_or(true)
                }
                _ => true,
            };
            let status = if still_present { FixStatus::Confirmed } else { FixStatus::Removed };
            if !still_present {
                all_intact = false;
            }

            let record = FixVerification {
                session_id: session_token.to_string(),
                failure_id: failure.id.clone(),
                file_path: file_path.to_string(),
                fix_type: existing.as_ref().map_or(fix_type, |e| e.fix_type),
                fix_content_hash: format!("{:x}", md5_like_hash(current_content)),
                status,
            };
            ctx.storage.fix_verifications.upsert(record.clone()).await?;
            fixes.push(json!({ "failure_id": record.failure_id, "fix_type": record.fix_type, "status": record.status }));
        }

        Ok(json!({
            "all_fixes_intact": all_intact,
            "verify_summary": format!("{} fix(es) checked for {file_path}", fixes.len()),
            "fixes": fixes,
            "recommendation": if all_intact { "no action needed" } else { "a previously fixed issue appears to have regressed" },
        })
        .to_string())
    }
}

/// A cheap, non-cryptographic content fingerprint used only to detect whether a fix's
/// surrounding content changed between checks, not for any security purpose.
fn md5_like_hash(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GatewayMetrics;
    use crate::models::{Failure, FailureStatus, Severity};
    use crate::session::SessionManager;
    use crate::storage::memory::InMemoryBackend;
    use crate::storage::Storage;
    use crate::validation::ValidationEngine;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_ctx_with_backend() -> (ToolContext, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        let storage = Arc::new(Storage {
            rules: backend.clone(),
            failures: backend.clone(),
            projects: backend.clone(),
            attempts: backend.clone(),
            halts: backend.clone(),
            uncertainty: backend.clone(),
            production_code: backend.clone(),
            fix_verifications: backend.clone(),
            file_reads: backend.clone(),
            audit_log: backend.clone(),
        });
        let validation = Arc::new(ValidationEngine::new(storage.rules.clone(), Duration::from_secs(60)));
        let sessions = Arc::new(SessionManager::new(Duration::from_secs(60), 100));
        (ToolContext::new(storage, validation, sessions, Arc::new(GatewayMetrics::new())), backend)
    }

    #[tokio::test]
    async fn prevent_regression_finds_failures_touching_path() {
        let (ctx, backend) = test_ctx_with_backend();
        backend.put_failure(Failure {
            id: "F1".into(),
            category: "regression".into(),
            severity: Severity::Error,
            error_message: "off by one".into(),
            root_cause: "loop bound".into(),
            regression_pattern: None,
            affected_files: vec!["src/parser.rs".into()],
            status: FailureStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        let result = PreventRegression.execute(&ctx, json!({"file_paths": ["src/parser.rs"]})).await.unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["matches"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn check_test_prod_separation_rejects_unknown_environment() {
        let (ctx, _backend) = test_ctx_with_backend();
        let result = CheckTestProdSeparation
            .execute(&ctx, json!({"file_path": "/tmp/does-not-exist", "environment": "staging"}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["valid"], json!(false));
    }

    #[tokio::test]
    async fn validate_production_first_rejects_test_before_production() {
        let (ctx, _backend) = test_ctx_with_backend();
        let result = ValidateProductionFirst
            .execute(&ctx, json!({"session_token": "sess_1", "file_path": "tests/a.rs", "code_type": "test"}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["valid"], json!(false));
    }

    #[tokio::test]
    async fn validate_production_first_accepts_test_after_production() {
        let (ctx, _backend) = test_ctx_with_backend();
        ValidateProductionFirst
            .execute(&ctx, json!({"session_token": "sess_2", "file_path": "src/lib.rs", "code_type": "production"}))
            .await
            .unwrap();
        let result = ValidateProductionFirst
            .execute(&ctx, json!({"session_token": "sess_2", "file_path": "tests/a.rs", "code_type": "test"}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["valid"], json!(true));
    }
}
