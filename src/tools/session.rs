//! Session bootstrap and file-read bookkeeping tools: `init_session`, `get_context`,
//! `record_file_read`, `verify_file_read`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{require_str, McpTool, ToolContext};
use crate::config::defaults::INIT_SESSION_SUBQUERY_TIMEOUT;
use crate::error::{ToolError, ToolResult};
use crate::session::AgentKind;

pub struct InitSession;

#[async_trait]
impl McpTool for InitSession {
    fn name(&self) -> &'static str {
        "init_session"
    }

    fn description(&self) -> &'static str {
        "Start a guardrail session for a project and return its active rule context."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_slug": { "type": "string" },
                "agent_type": { "type": "string" },
                "client_version": { "type": "string" },
            },
            "required": ["project_slug"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let project_slug = require_str(&input, "project_slug")?;
        let agent_kind = AgentKind::parse(super::opt_str(&input, "agent_type"));
        let client_version = input.get("client_version").and_then(Value::as_str).map(str::to_string);

        let session = ctx.sessions.create_detached(Some(project_slug.to_string()), agent_kind, client_version).await;
        ctx.metrics.session_created();
        ctx.audit
            .emit(crate::models::AuditEvent::new(
                "session-created",
                Some(session.id.clone()),
                json!({ "project_slug": project_slug, "agent_type": agent_kind }),
            ))
            .await;

        let project_context = tokio::time::timeout(INIT_SESSION_SUBQUERY_TIMEOUT, ctx.storage.projects.get(project_slug))
            .await
            .ok()
            .and_then(Result::ok)
            .flatten();

        let active_rules_count = tokio::time::timeout(INIT_SESSION_SUBQUERY_TIMEOUT, ctx.storage.rules.count_enabled())
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or(0);

        let context_markdown = project_context
            .map(|p| p.context_markdown)
            .unwrap_or_else(|| "No project-specific guardrail context configured.".to_string());

        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(ctx.sessions.idle_ttl()).unwrap_or(chrono::Duration::hours(1));

        Ok(json!({
            "session_token": session.id,
            "expires_at": expires_at,
            "project_context": context_markdown,
            "active_rules_count": active_rules_count,
            "capabilities": ["bash_validation", "git_validation", "edit_validation"],
        })
        .to_string())
    }
}

pub struct GetContext;

#[async_trait]
impl McpTool for GetContext {
    fn name(&self) -> &'static str {
        "get_context"
    }

    fn description(&self) -> &'static str {
        "Return the project-specific guardrail briefing for a session."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "session_token": { "type": "string" } }, "required": ["session_token"] })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let session = ctx.sessions.lookup(session_token).await.ok_or_else(|| ToolError::UnknownSession(session_token.to_string()))?;

        let context_markdown = match &session.project_slug {
            Some(slug) => ctx
                .storage
                .projects
                .get(slug)
                .await?
                .map(|p| p.context_markdown)
                .unwrap_or_else(|| "No project-specific guardrail context configured.".to_string()),
            None => "No project bound to this session.".to_string(),
        };

        Ok(json!({ "project_context": context_markdown }).to_string())
    }
}

pub struct RecordFileRead;

#[async_trait]
impl McpTool for RecordFileRead {
    fn name(&self) -> &'static str {
        "record_file_read"
    }

    fn description(&self) -> &'static str {
        "Record that a file was read in this session, for later verification."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "session_token": { "type": "string" }, "file_path": { "type": "string" } },
            "required": ["session_token", "file_path"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let file_path = require_str(&input, "file_path")?;
        ctx.storage.file_reads.record(session_token, file_path).await?;
        Ok(json!({ "recorded": true, "file_path": file_path }).to_string())
    }
}

pub struct VerifyFileRead;

#[async_trait]
impl McpTool for VerifyFileRead {
    fn name(&self) -> &'static str {
        "verify_file_read"
    }

    fn description(&self) -> &'static str {
        "Check whether a file was read in this session, and when."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "session_token": { "type": "string" }, "file_path": { "type": "string" } },
            "required": ["session_token", "file_path"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let file_path = require_str(&input, "file_path")?;
        let read_at = ctx.storage.file_reads.get(session_token, file_path).await?;
        Ok(json!({ "was_read": read_at.is_some(), "read_at": read_at }).to_string())
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

    #[tokio::test]
    async fn init_session_returns_a_usable_session_token() {
        let ctx = test_ctx();
        let result = InitSession.execute(&ctx, json!({"project_slug": "demo"})).await.unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert!(value["session_token"].as_str().unwrap().starts_with("sess_"));
        assert!(value["active_rules_count"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn record_then_verify_file_read_round_trips() {
        let ctx = test_ctx();
        let init = InitSession.execute(&ctx, json!({"project_slug": "demo"})).await.unwrap();
        let token = serde_json::from_str::<Value>(&init).unwrap()["session_token"].as_str().unwrap().to_string();

        RecordFileRead.execute(&ctx, json!({"session_token": token, "file_path": "src/lib.rs"})).await.unwrap();
        let verify = VerifyFileRead.execute(&ctx, json!({"session_token": token, "file_path": "src/lib.rs"})).await.unwrap();
        let value: Value = serde_json::from_str(&verify).unwrap();
        assert_eq!(value["was_read"], json!(true));
    }

    #[tokio::test]
    async fn get_context_rejects_unknown_session() {
        let ctx = test_ctx();
        let result = GetContext.execute(&ctx, json!({"session_token": "sess_does_not_exist"})).await;
        assert!(matches!(result, Err(ToolError::UnknownSession(_))));
    }
}
