//! Command and git-operation validation tools: `validate_bash`,
//! `validate_git_operation`, `validate_push`, `validate_commit`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{opt_bool, opt_str, require_str, McpTool, ToolContext};
use crate::analyzers::lint_commit_message;
use crate::config::protected_branches;
use crate::error::ToolResult;
use crate::models::Severity;
use crate::validation::Violation;

fn violations_json(violations: &[Violation]) -> Value {
    json!(violations
        .iter()
        .map(|v| json!({ "rule_id": v.rule_id, "name": v.rule_name, "severity": v.severity, "message": v.message }))
        .collect::<Vec<_>>())
}

pub struct ValidateBash;

#[async_trait]
impl McpTool for ValidateBash {
    fn name(&self) -> &'static str {
        "validate_bash"
    }

    fn description(&self) -> &'static str {
        "Check a shell command against the prevention rule catalog before it runs."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "command": { "type": "string" } }, "required": ["command"] })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let command = require_str(&input, "command")?;
        let violations = ctx.validation.validate(command, &["bash", "command"]).await;
        let rules_evaluated = ctx.validation.cached_rule_count().await;
        ctx.metrics.violations_emitted(violations.len() as u64);
        Ok(json!({
            "valid": violations.is_empty(),
            "violations": violations_json(&violations),
            "meta": { "rules_evaluated": rules_evaluated, "command_analyzed": command },
        })
        .to_string())
    }
}

pub struct ValidateGitOperation;

#[async_trait]
impl McpTool for ValidateGitOperation {
    fn name(&self) -> &'static str {
        "validate_git_operation"
    }

    fn description(&self) -> &'static str {
        "Check a git command against the prevention rule catalog, flagging force operations."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" }, "is_force": { "type": "boolean" } },
            "required": ["command"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let command = require_str(&input, "command")?;
        let is_force = opt_bool(&input, "is_force");
        let mut violations = ctx.validation.validate(command, &["git", "git_operation"]).await;
        if is_force {
            violations.push(Violation {
                rule_id: "PREVENT-FORCE-001".to_string(),
                rule_name: "force git operation".to_string(),
                severity: Severity::Error,
                message: "Use --force-with-lease instead of an unconditional force".to_string(),
            });
        }
        ctx.metrics.violations_emitted(violations.len() as u64);
        Ok(json!({ "valid": violations.is_empty(), "violations": violations_json(&violations) }).to_string())
    }
}

pub struct ValidatePush;

#[async_trait]
impl McpTool for ValidatePush {
    fn name(&self) -> &'static str {
        "validate_push"
    }

    fn description(&self) -> &'static str {
        "Decide whether a push to a branch is allowed, warned, or rejected."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "branch": { "type": "string" },
                "is_force": { "type": "boolean" },
                "has_unpushed_commits": { "type": "boolean" },
            },
            "required": ["branch"],
        })
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let branch = opt_str(&input, "branch");
        let is_force = opt_bool(&input, "is_force");

        let mut issues = Vec::new();
        let mut can_push = true;
        let mut valid = true;

        if branch.is_empty() {
            valid = false;
            can_push = false;
            issues.push("branch name must not be empty".to_string());
        } else if branch.contains(' ') {
            valid = false;
            can_push = false;
            issues.push("branch name must not contain spaces".to_string());
        }

        let is_protected = !branch.is_empty()
            && protected_branches::NAMES.iter().any(|p| branch == *p || branch.starts_with(&format!("{p}/")));

        if is_protected {
            issues.push(format!("'{branch}' is a protected branch"));
            if is_force {
                valid = false;
                can_push = false;
            }
        }

        if is_force && !issues.iter().any(|i| i.contains("protected")) {
            issues.push("force push discards remote history".to_string());
        }
        if is_force {
            valid = false;
            can_push = false;
        }

        Ok(json!({ "valid": valid, "can_push": can_push, "issues": issues }).to_string())
    }
}

pub struct ValidateCommit;

#[async_trait]
impl McpTool for ValidateCommit {
    fn name(&self) -> &'static str {
        "validate_commit"
    }

    fn description(&self) -> &'static str {
        "Lint a commit message against Conventional Commits."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "message": { "type": "string" } }, "required": ["message"] })
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let message = require_str(&input, "message")?;
        let issues = lint_commit_message(message);
        Ok(json!({ "valid": issues.is_empty(), "issues": issues }).to_string())
    }
}
