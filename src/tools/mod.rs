//! The `McpTool` trait, shared execution context, and tool registry.
//!
//! One unit struct per tool, `async_trait` for the shared `execute` signature, and a
//! flat `register_all_tools()` the transport layer iterates for `tools/list` and looks
//! up by name for `tools/call`.

pub mod commands;
pub mod edits;
pub mod guardrails;
pub mod regression;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::Config;
use crate::error::ToolResult;
use crate::metrics::GatewayMetrics;
use crate::session::SessionManager;
use crate::storage::Storage;
use crate::validation::ValidationEngine;

/// Shared state every tool executes against: storage, the validation engine, the
/// session registry, process metrics, the audit sink, and configuration. Cloned
/// cheaply (every field is an `Arc`, and `Config` is small and itself cheap to clone).
#[derive(Clone)]
pub struct ToolContext {
    pub storage: Arc<Storage>,
    pub validation: Arc<ValidationEngine>,
    pub sessions: Arc<SessionManager>,
    pub metrics: Arc<GatewayMetrics>,
    pub audit: Arc<dyn AuditSink>,
    pub config: Config,
}

impl ToolContext {
    /// Build a context for tests and other in-memory callers that don't need a
    /// persistent audit sink or non-default configuration.
    #[must_use]
    pub fn new(
        storage: Arc<Storage>,
        validation: Arc<ValidationEngine>,
        sessions: Arc<SessionManager>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self { storage, validation, sessions, metrics, audit: Arc::new(TracingAuditSink), config: Config::for_testing() }
    }

    /// Build a context with an explicit audit sink and configuration (production
    /// deployments).
    #[must_use]
    pub fn with_audit(
        storage: Arc<Storage>,
        validation: Arc<ValidationEngine>,
        sessions: Arc<SessionManager>,
        metrics: Arc<GatewayMetrics>,
        audit: Arc<dyn AuditSink>,
        config: Config,
    ) -> Self {
        Self { storage, validation, sessions, metrics, audit, config }
    }

    /// Emit an audit event for a tool invocation, truncating the argument payload so a
    /// large diff or command string doesn't blow up the audit log.
    pub async fn audit_tool_call(&self, session_id: Option<&str>, tool_name: &str, arguments: &Value, is_error: bool) {
        let truncated = truncate_for_audit(arguments);
        self.audit
            .emit(crate::models::AuditEvent::new(
                "tool-invoked",
                session_id.map(str::to_string),
                serde_json::json!({ "tool": tool_name, "arguments": truncated, "is_error": is_error }),
            ))
            .await;
    }
}

/// Cap the serialized size of an audit payload; anything longer is replaced with a
/// marker rather than dropped silently.
fn truncate_for_audit(value: &Value) -> Value {
    const MAX_LEN: usize = 4096;
    let rendered = value.to_string();
    if rendered.len() <= MAX_LEN {
        value.clone()
    } else {
        serde_json::json!({ "truncated": true, "original_len": rendered.len() })
    }
}

/// Uniform shape every MCP tool implements: a name, a description, a JSON Schema for
/// its arguments, and an async `execute` that takes a dynamic JSON argument map and
/// returns a formatted text result.
#[async_trait]
pub trait McpTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String>;
}

/// Build the full, fixed tool catalog the protocol layer advertises via `tools/list`.
#[must_use]
pub fn register_all_tools() -> Vec<Box<dyn McpTool>> {
    vec![
        Box::new(session::InitSession),
        Box::new(session::GetContext),
        Box::new(session::RecordFileRead),
        Box::new(session::VerifyFileRead),
        Box::new(commands::ValidateBash),
        Box::new(commands::ValidateGitOperation),
        Box::new(commands::ValidatePush),
        Box::new(commands::ValidateCommit),
        Box::new(edits::ValidateFileEdit),
        Box::new(edits::ValidateScope),
        Box::new(edits::ValidateExactReplacement),
        Box::new(edits::DetectFeatureCreep),
        Box::new(regression::PreventRegression),
        Box::new(regression::CheckTestProdSeparation),
        Box::new(regression::PreWorkCheck),
        Box::new(regression::ValidateProductionFirst),
        Box::new(regression::VerifyFixesIntact),
        Box::new(guardrails::RecordAttempt),
        Box::new(guardrails::ValidateThreeStrikes),
        Box::new(guardrails::ResetAttempts),
        Box::new(guardrails::CheckHaltConditions),
        Box::new(guardrails::RecordHalt),
        Box::new(guardrails::AcknowledgeHalt),
        Box::new(guardrails::CheckUncertainty),
    ]
}

/// Pull a required string field out of a dynamic JSON argument map.
pub(crate) fn require_str<'a>(input: &'a Value, field: &str) -> ToolResult<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| crate::error::ToolError::validation(field, "must be a non-empty string"))
}

/// Pull an optional string field, defaulting to `""`.
pub(crate) fn opt_str<'a>(input: &'a Value, field: &str) -> &'a str {
    input.get(field).and_then(Value::as_str).unwrap_or_default()
}

/// Pull an optional bool field, defaulting to `false`.
pub(crate) fn opt_bool(input: &Value, field: &str) -> bool {
    input.get(field).and_then(Value::as_bool).unwrap_or(false)
}

/// Pull a required string array field.
pub(crate) fn require_str_array(input: &Value, field: &str) -> ToolResult<Vec<String>> {
    input
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .ok_or_else(|| crate::error::ToolError::validation(field, "must be an array of strings"))
}

/// Narrow a numeric argument that may have arrived as a JSON float (every MCP client
/// marshals numbers through JSON) into a bounds-checked `i64`.
pub(crate) fn coerce_int(input: &Value, field: &str, default: i64) -> i64 {
    match input.get(field) {
        None => default,
        Some(v) => v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)).unwrap_or(default),
    }
}
