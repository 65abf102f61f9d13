//! JSON-RPC 2.0 envelope types and method dispatch for the SSE transport's message
//! endpoint: `initialize`, `tools/list`, `tools/call`, `resources/list`, and
//! `resources/read`.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ToolError;
use crate::tools::{McpTool, ToolContext};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    const VERSION: &'static str = "2.0";

    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: Cow::Borrowed(Self::VERSION), result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
            id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A resource listed/read via `resources/list` and `resources/read`, identified by a
/// synthetic `guardrail://` URI.
#[derive(Debug, Clone)]
pub struct GuardrailResource {
    pub uri: &'static str,
    pub name: &'static str,
    pub mime_type: &'static str,
}

pub const RESOURCES: &[GuardrailResource] = &[
    GuardrailResource { uri: "guardrail://quick-reference", name: "Quick reference", mime_type: "application/json" },
    GuardrailResource { uri: "guardrail://rules/active", name: "Active prevention rules", mime_type: "application/json" },
    GuardrailResource { uri: "guardrail://docs/agent-guardrails", name: "Agent guardrails", mime_type: "text/markdown" },
    GuardrailResource { uri: "guardrail://docs/four-laws", name: "The four laws", mime_type: "text/markdown" },
    GuardrailResource { uri: "guardrail://docs/halt-conditions", name: "Halt conditions", mime_type: "text/markdown" },
    GuardrailResource { uri: "guardrail://docs/workflows", name: "Workflows", mime_type: "text/markdown" },
    GuardrailResource { uri: "guardrail://docs/standards", name: "Standards", mime_type: "text/markdown" },
    GuardrailResource { uri: "guardrail://docs/pre-work-checklist", name: "Pre-work checklist", mime_type: "text/markdown" },
];

/// Dispatch one JSON-RPC request to the right handler. `session_id` is `None` for
/// methods that don't require a bound session (`initialize`, `tools/list`,
/// `resources/*`); tool calls that need a session are rejected fail-closed by the tool
/// itself via [`crate::error::ToolError::UnknownSession`].
pub async fn handle_request(
    req: &JsonRpcRequest,
    tools: &[Box<dyn McpTool>],
    ctx: &ToolContext,
) -> JsonRpcResponse {
    if req.jsonrpc != JSONRPC_VERSION {
        return JsonRpcResponse::error(
            req.id.clone(),
            -32600,
            format!("Invalid Request: jsonrpc must be \"{JSONRPC_VERSION}\""),
        );
    }
    match req.method.as_str() {
        "initialize" => handle_initialize(req.id.clone(), &req.params),
        "notifications/initialized" | "initialized" => JsonRpcResponse::success(req.id.clone(), json!({})),
        "tools/list" => handle_tools_list(req.id.clone(), tools),
        "tools/call" => handle_tools_call(req.id.clone(), &req.params, tools, ctx).await,
        "resources/list" => handle_resources_list(req.id.clone()),
        "resources/read" => handle_resources_read(req.id.clone(), &req.params, ctx).await,
        "ping" => JsonRpcResponse::success(req.id.clone(), json!({})),
        _ => JsonRpcResponse::error(req.id.clone(), -32601, format!("Method not found: {}", req.method)),
    }
}

fn handle_initialize(id: Option<Value>, params: &Value) -> JsonRpcResponse {
    let protocol_version = params.get("protocolVersion").and_then(|v| v.as_str()).unwrap_or(PROTOCOL_VERSION);
    tracing::info!(protocol_version, "initialize");
    JsonRpcResponse::success(
        id,
        json!({
            "protocolVersion": protocol_version,
            "capabilities": { "tools": {}, "resources": {} },
            "serverInfo": { "name": "guardrail-gateway", "version": env!("CARGO_PKG_VERSION") }
        }),
    )
}

fn handle_tools_list(id: Option<Value>, tools: &[Box<dyn McpTool>]) -> JsonRpcResponse {
    let tool_list: Vec<McpToolInfo> = tools
        .iter()
        .map(|t| McpToolInfo { name: t.name().to_string(), description: t.description().to_string(), input_schema: t.input_schema() })
        .collect();
    JsonRpcResponse::success(id, json!({ "tools": tool_list }))
}

fn handle_resources_list(id: Option<Value>) -> JsonRpcResponse {
    let resources: Vec<Value> = RESOURCES
        .iter()
        .map(|r| json!({ "uri": r.uri, "name": r.name, "mimeType": r.mime_type }))
        .collect();
    JsonRpcResponse::success(id, json!({ "resources": resources }))
}

async fn handle_resources_read(id: Option<Value>, params: &Value, ctx: &ToolContext) -> JsonRpcResponse {
    let Some(uri) = params.get("uri").and_then(|v| v.as_str()) else {
        return JsonRpcResponse::error(id, -32602, "Missing 'uri' parameter");
    };
    match crate::resources::read(uri, ctx).await {
        Some((mime_type, text)) => JsonRpcResponse::success(
            id,
            json!({ "contents": [{ "uri": uri, "mimeType": mime_type, "text": text }] }),
        ),
        None => JsonRpcResponse::error(id, -32602, format!("Unknown resource: {uri}")),
    }
}

async fn handle_tools_call(
    id: Option<Value>,
    params: &Value,
    tools: &[Box<dyn McpTool>],
    ctx: &ToolContext,
) -> JsonRpcResponse {
    let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
        return JsonRpcResponse::error(id, -32602, "Missing 'name' parameter");
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let Some(tool) = tools.iter().find(|t| t.name() == tool_name) else {
        return JsonRpcResponse::error(id, -32602, format!("Tool not found: {tool_name}"));
    };

    tracing::info!(tool = %tool_name, "executing tool");
    let session_id = arguments.get("session_token").and_then(Value::as_str).map(str::to_string);

    match tool.execute(ctx, arguments.clone()).await {
        Ok(result) => {
            ctx.metrics.tool_invoked(tool_name, false);
            ctx.audit_tool_call(session_id.as_deref(), tool_name, &arguments, false).await;
            JsonRpcResponse::success(id, json!({ "content": [{ "type": "text", "text": result }], "isError": false }))
        }
        Err(e) => {
            tracing::warn!(tool = %tool_name, error = %e, "tool reported an error result");
            ctx.metrics.tool_invoked(tool_name, true);
            ctx.audit_tool_call(session_id.as_deref(), tool_name, &arguments, true).await;
            // Session errors surface as a protocol-level JSON-RPC error rather than an
            // `isError` tool result, since the caller needs to re-`init_session` before
            // any tool call on this session can succeed.
            if matches!(e, ToolError::UnknownSession(_)) {
                JsonRpcResponse::error(id, e.rpc_code(), e.to_user_message())
            } else {
                JsonRpcResponse::success(
                    id,
                    json!({ "content": [{ "type": "text", "text": e.to_user_message() }], "isError": true }),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_omits_error_field() {
        let response = JsonRpcResponse::success(Some(json!(1)), json!({"ok": true}));
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("error").is_none());
    }

    #[test]
    fn error_response_omits_result_field() {
        let response = JsonRpcResponse::error(Some(json!(1)), -32600, "bad request");
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn rejects_request_with_wrong_jsonrpc_version() {
        let req = JsonRpcRequest { jsonrpc: "1.0".to_string(), method: "ping".to_string(), params: json!({}), id: Some(json!(1)) };
        let ctx = test_ctx();
        let response = handle_request(&req, &[], &ctx).await;
        assert_eq!(response.error.as_ref().map(|e| e.code), Some(-32600));
    }

    fn test_ctx() -> ToolContext {
        use crate::metrics::GatewayMetrics;
        use crate::session::SessionManager;
        use crate::storage::Storage;
        use crate::validation::ValidationEngine;
        use std::sync::Arc;
        use std::time::Duration;

        let storage = Arc::new(Storage::in_memory());
        let validation = Arc::new(ValidationEngine::new(storage.rules.clone(), Duration::from_secs(60)));
        let sessions = Arc::new(SessionManager::new(Duration::from_secs(60), 100));
        ToolContext::new(storage, validation, sessions, Arc::new(GatewayMetrics::new()))
    }
}
