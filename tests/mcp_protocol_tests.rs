//! End-to-end tests for JSON-RPC method dispatch over the in-process protocol layer.
//!
//! These exercise `protocol::handle_request` directly, without opening a socket —
//! `transport.rs` is covered separately by the tests that need an actual HTTP server.

use std::sync::Arc;
use std::time::Duration;

use guardrail_gateway::metrics::GatewayMetrics;
use guardrail_gateway::protocol::{handle_request, JsonRpcRequest};
use guardrail_gateway::session::SessionManager;
use guardrail_gateway::storage::Storage;
use guardrail_gateway::tools::{register_all_tools, McpTool, ToolContext};
use guardrail_gateway::validation::ValidationEngine;
use serde_json::{json, Value};

fn test_ctx() -> ToolContext {
    let storage = Arc::new(Storage::in_memory());
    let validation = Arc::new(ValidationEngine::new(storage.rules.clone(), Duration::from_secs(60)));
    let sessions = Arc::new(SessionManager::new(Duration::from_secs(60), 100));
    ToolContext::new(storage, validation, sessions, Arc::new(GatewayMetrics::new()))
}

fn request(method: &str, params: Value) -> JsonRpcRequest {
    serde_json::from_value(json!({ "jsonrpc": "2.0", "method": method, "id": 1, "params": params })).unwrap()
}

async fn dispatch(req: &JsonRpcRequest, tools: &[Box<dyn McpTool>], ctx: &ToolContext) -> Value {
    serde_json::to_value(handle_request(req, tools, ctx).await).unwrap()
}

// =============================================================================
// initialize / tools/list / resources/list
// =============================================================================

#[tokio::test]
async fn initialize_reports_server_info_and_capabilities() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let response = dispatch(&request("initialize", json!({"protocolVersion": "2024-11-05"})), &tools, &ctx).await;
    assert_eq!(response["result"]["serverInfo"]["name"], json!("guardrail-gateway"));
    assert!(response["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn tools_list_advertises_every_registered_tool() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let response = dispatch(&request("tools/list", json!({})), &tools, &ctx).await;
    let listed = response["result"]["tools"].as_array().unwrap();
    assert_eq!(listed.len(), tools.len());
    assert!(listed.iter().any(|t| t["name"] == json!("init_session")));
}

#[tokio::test]
async fn resources_list_includes_the_quick_reference_and_every_doc() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let response = dispatch(&request("resources/list", json!({})), &tools, &ctx).await;
    let resources = response["result"]["resources"].as_array().unwrap();
    assert!(resources.iter().any(|r| r["uri"] == json!("guardrail://quick-reference")));
    assert!(resources.iter().any(|r| r["uri"] == json!("guardrail://docs/four-laws")));
}

#[tokio::test]
async fn resources_read_returns_markdown_for_a_known_doc() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let response =
        dispatch(&request("resources/read", json!({"uri": "guardrail://docs/four-laws"})), &tools, &ctx).await;
    let contents = &response["result"]["contents"][0];
    assert_eq!(contents["mimeType"], json!("text/markdown"));
    assert!(contents["text"].as_str().unwrap().len() > 0);
}

#[tokio::test]
async fn resources_read_rejects_an_unknown_uri() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let response = dispatch(&request("resources/read", json!({"uri": "guardrail://nope"})), &tools, &ctx).await;
    assert_eq!(response["error"]["code"], json!(-32602));
}

// =============================================================================
// tools/call
// =============================================================================

#[tokio::test]
async fn tools_call_round_trips_init_session_through_the_envelope() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let response = dispatch(
        &request("tools/call", json!({"name": "init_session", "arguments": {"project_slug": "demo"}})),
        &tools,
        &ctx,
    )
    .await;
    assert_eq!(response["result"]["isError"], json!(false));
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    let body: Value = serde_json::from_str(text).unwrap();
    assert!(body["session_token"].as_str().unwrap().starts_with("sess_"));
}

#[tokio::test]
async fn tools_call_surfaces_validation_errors_as_tool_results_not_protocol_errors() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let response =
        dispatch(&request("tools/call", json!({"name": "init_session", "arguments": {}})), &tools, &ctx).await;
    // Missing a required field is a tool-level error, reported inside the JSON-RPC result.
    assert!(response["error"].is_null());
    assert_eq!(response["result"]["isError"], json!(true));
}

#[tokio::test]
async fn tools_call_rejects_an_unknown_tool_name() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let response =
        dispatch(&request("tools/call", json!({"name": "not_a_real_tool", "arguments": {}})), &tools, &ctx).await;
    assert_eq!(response["error"]["code"], json!(-32602));
}

#[tokio::test]
async fn unknown_method_returns_method_not_found() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let response = dispatch(&request("not/a/method", json!({})), &tools, &ctx).await;
    assert_eq!(response["error"]["code"], json!(-32601));
}

#[tokio::test]
async fn ping_and_initialized_notifications_succeed_with_an_empty_result() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let ping = dispatch(&request("ping", json!({})), &tools, &ctx).await;
    assert_eq!(ping["result"], json!({}));
    let initialized = dispatch(&request("notifications/initialized", json!({})), &tools, &ctx).await;
    assert_eq!(initialized["result"], json!({}));
}

// =============================================================================
// Multi-tool workflows
// =============================================================================

#[tokio::test]
async fn a_session_can_validate_a_dangerous_command_after_init() {
    let ctx = test_ctx();
    let tools = register_all_tools();
    let init = dispatch(
        &request("tools/call", json!({"name": "init_session", "arguments": {"project_slug": "demo"}})),
        &tools,
        &ctx,
    )
    .await;
    let token = {
        let text = init["result"]["content"][0]["text"].as_str().unwrap();
        serde_json::from_str::<Value>(text).unwrap()["session_token"].as_str().unwrap().to_string()
    };

    let validate = dispatch(
        &request(
            "tools/call",
            json!({"name": "validate_bash", "arguments": {"session_token": token, "command": "rm -rf /"}}),
        ),
        &tools,
        &ctx,
    )
    .await;
    let text = validate["result"]["content"][0]["text"].as_str().unwrap();
    let body: Value = serde_json::from_str(text).unwrap();
    assert_eq!(body["valid"], json!(false));
}
