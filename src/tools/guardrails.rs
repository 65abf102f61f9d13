//! Stateful guardrail bookkeeping tools: the three-strikes counter
//! (`record_attempt`, `validate_three_strikes`, `reset_attempts`), halt management
//! (`check_halt_conditions`, `record_halt`, `acknowledge_halt`), and uncertainty
//! escalation (`check_uncertainty`).

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{coerce_int, opt_bool, opt_str, require_str, McpTool, ToolContext};
use crate::error::ToolResult;
use crate::models::{HaltEvent, HaltResolution, MAX_ATTEMPTS, Severity, UncertaintyLevel, UncertaintyRecord};

pub struct RecordAttempt;

#[async_trait]
impl McpTool for RecordAttempt {
    fn name(&self) -> &'static str {
        "record_attempt"
    }

    fn description(&self) -> &'static str {
        "Record a failed attempt at a task, advancing the three-strikes counter."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_token": { "type": "string" },
                "task_id": { "type": "string" },
                "error_message": { "type": "string" },
                "error_category": { "type": "string" },
            },
            "required": ["session_token", "task_id", "error_message"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let task_id = require_str(&input, "task_id")?;
        let error_message = require_str(&input, "error_message")?;
        let error_category = opt_str(&input, "error_category");

        let attempt = ctx.storage.attempts.record(session_token, task_id, error_message, error_category).await?;
        let strikes_remaining = MAX_ATTEMPTS.saturating_sub(attempt.attempt_number);
        let should_halt = attempt.attempt_number >= MAX_ATTEMPTS;

        Ok(json!({
            "attempt_number": attempt.attempt_number,
            "strikes_remaining": strikes_remaining,
            "should_halt": should_halt,
            "max_attempts": MAX_ATTEMPTS,
        })
        .to_string())
    }
}

pub struct ValidateThreeStrikes;

#[async_trait]
impl McpTool for ValidateThreeStrikes {
    fn name(&self) -> &'static str {
        "validate_three_strikes"
    }

    fn description(&self) -> &'static str {
        "Read the three-strikes counter for a task without advancing it."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "session_token": { "type": "string" }, "task_id": { "type": "string" } },
            "required": ["session_token", "task_id"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let task_id = require_str(&input, "task_id")?;

        let attempts_count = ctx.storage.attempts.count_pending(session_token, task_id).await?;
        let halt = attempts_count >= MAX_ATTEMPTS;
        let strikes_remaining = MAX_ATTEMPTS.saturating_sub(attempts_count);

        Ok(json!({
            "halt": halt,
            "attempts_count": attempts_count,
            "max_attempts": MAX_ATTEMPTS,
            "should_escalate": halt,
            "strikes_remaining": strikes_remaining,
            "message": if halt {
                "three strikes reached; stop and ask for guidance instead of trying a fourth time".to_string()
            } else {
                format!("{strikes_remaining} attempt(s) remaining before a halt is required")
            },
        })
        .to_string())
    }
}

pub struct ResetAttempts;

#[async_trait]
impl McpTool for ResetAttempts {
    fn name(&self) -> &'static str {
        "reset_attempts"
    }

    fn description(&self) -> &'static str {
        "Mark all pending attempts for a task resolved after a successful fix."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "session_token": { "type": "string" }, "task_id": { "type": "string" } },
            "required": ["session_token", "task_id"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let task_id = require_str(&input, "task_id")?;
        ctx.storage.attempts.resolve_all(session_token, task_id).await?;
        Ok(json!({ "reset": true, "attempts_count": 0 }).to_string())
    }
}

pub struct CheckHaltConditions;

#[async_trait]
impl McpTool for CheckHaltConditions {
    fn name(&self) -> &'static str {
        "check_halt_conditions"
    }

    fn description(&self) -> &'static str {
        "Aggregate every source of halt pressure for a session into one verdict."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_token": { "type": "string" },
                "task_id": { "type": "string" },
                "should_halt": { "type": "boolean" },
                "error_rate": { "type": "number" },
            },
            "required": ["session_token"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let task_id = opt_str(&input, "task_id");
        let context_should_halt = opt_bool(&input, "should_halt");
        let error_rate = input.get("error_rate").and_then(Value::as_f64);

        let mut reasons = Vec::new();

        if !task_id.is_empty() {
            let attempts_count = ctx.storage.attempts.count_pending(session_token, task_id).await?;
            if attempts_count >= MAX_ATTEMPTS {
                reasons.push("three-strikes limit reached".to_string());
            }
        }

        let pending_critical = ctx.storage.halts.list_pending_critical(session_token).await?;
        let pending_critical_count = pending_critical.len();
        // Corrected reading: a positive count of pending critical halts must halt, not
        // the inverse — a `< 0` count can never be true and would make this dead code.
        if pending_critical_count > 0 {
            reasons.push(format!("{pending_critical_count} pending critical halt event(s)"));
        }

        if context_should_halt {
            reasons.push("caller-supplied should_halt flag is set".to_string());
        }

        // Corrected reading: `error_rate` above the threshold is unhealthy, not below it.
        if let Some(rate) = error_rate {
            if rate > 0.5 {
                reasons.push(format!("error rate {rate:.2} exceeds the 0.5 threshold"));
            }
        }

        Ok(json!({ "should_halt": !reasons.is_empty(), "reasons": reasons, "pending_critical_count": pending_critical_count }).to_string())
    }
}

pub struct RecordHalt;

#[async_trait]
impl McpTool for RecordHalt {
    fn name(&self) -> &'static str {
        "record_halt"
    }

    fn description(&self) -> &'static str {
        "Persist a halt event for a session."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_token": { "type": "string" },
                "halt_type": { "type": "string" },
                "severity": { "type": "string" },
                "description": { "type": "string" },
                "context": { "type": "object" },
            },
            "required": ["session_token", "halt_type", "description"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let halt_type = require_str(&input, "halt_type")?;
        let description = require_str(&input, "description")?;
        let severity = match opt_str(&input, "severity") {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "warning" => Severity::Warning,
            _ => Severity::Error,
        };
        let context = input.get("context").cloned().unwrap_or_else(|| json!({}));

        let event = HaltEvent {
            id: Uuid::new_v4().to_string(),
            session_id: session_token.to_string(),
            halt_type: halt_type.to_string(),
            severity,
            description: description.to_string(),
            context,
            resolution: HaltResolution::Pending,
            created_at: chrono::Utc::now(),
        };
        ctx.metrics.halt_recorded();
        let recorded = ctx.storage.halts.record(event).await?;
        Ok(json!({ "halt_id": recorded.id, "resolution": recorded.resolution }).to_string())
    }
}

pub struct AcknowledgeHalt;

#[async_trait]
impl McpTool for AcknowledgeHalt {
    fn name(&self) -> &'static str {
        "acknowledge_halt"
    }

    fn description(&self) -> &'static str {
        "Transition a halt event to acknowledged by its identifier."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "halt_id": { "type": "string" } }, "required": ["halt_id"] })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let halt_id_raw = require_str(&input, "halt_id")?;
        // Parsed as a standard UUID text representation, not decoded as binary.
        let halt_id = Uuid::parse_str(halt_id_raw)
            .map_err(|_| crate::error::ToolError::validation("halt_id", "must be a valid UUID"))?;

        let acknowledged = ctx.storage.halts.acknowledge(&halt_id.to_string()).await?;
        match acknowledged {
            Some(event) => Ok(json!({ "acknowledged": true, "halt_id": event.id, "resolution": event.resolution }).to_string()),
            None => Ok(json!({ "acknowledged": false, "halt_id": halt_id.to_string() }).to_string()),
        }
    }
}

pub struct CheckUncertainty;

#[async_trait]
impl McpTool for CheckUncertainty {
    fn name(&self) -> &'static str {
        "check_uncertainty"
    }

    fn description(&self) -> &'static str {
        "Classify self-reported uncertainty and decide whether it must be escalated."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_token": { "type": "string" },
                "current_task": { "type": "string" },
                "self_assessment": { "type": "string" },
                "context_data": { "type": "object" },
            },
            "required": ["session_token", "current_task", "self_assessment"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<String> {
        let session_token = require_str(&input, "session_token")?;
        let current_task = require_str(&input, "current_task")?;
        let self_assessment = require_str(&input, "self_assessment")?;
        let context_data = input.get("context_data").cloned().unwrap_or_else(|| json!({}));

        let error_count = coerce_int(&context_data, "error_count", 0);
        let duration_minutes = coerce_int(&context_data, "duration_minutes", 0);

        let level = classify_uncertainty(self_assessment, error_count, duration_minutes);

        let recent = ctx.storage.uncertainty.recent(session_token, 1).await?;
        let consecutive_high_or_worse =
            level.is_high_or_worse() && recent.first().is_some_and(|r| r.level.is_high_or_worse());

        let escalation_required =
            matches!(level, UncertaintyLevel::Critical | UncertaintyLevel::Blocked) || consecutive_high_or_worse;

        let record = UncertaintyRecord {
            session_id: session_token.to_string(),
            level,
            decision: current_task.to_string(),
            context: context_data,
            escalation_required,
            created_at: chrono::Utc::now(),
        };
        ctx.storage.uncertainty.record(record).await?;

        let guide_action = if escalation_required {
            "stop and ask a human before proceeding"
        } else if level >= UncertaintyLevel::Medium {
            "proceed cautiously and document assumptions"
        } else {
            "proceed"
        };

        Ok(json!({ "level": level, "escalation_required": escalation_required, "guide_action": guide_action }).to_string())
    }
}

fn classify_uncertainty(self_assessment: &str, error_count: i64, duration_minutes: i64) -> UncertaintyLevel {
    let text = self_assessment.to_lowercase();

    const CRITICAL_WORDS: &[&str] =
        &["blocked", "stuck", "cannot", "impossible", "emergency", "error", "fail"];
    const HIGH_WORDS: &[&str] = &["major", "complex", "unsure", "difficult", "risky", "uncertain"];
    const INVESTIGATING_WORDS: &[&str] = &["research", "explore", "investigating", "looking into"];
    const MEDIUM_WORDS: &[&str] = &["moderate", "somewhat", "partial"];
    const LOW_WORDS: &[&str] = &["minor", "small", "confident", "straightforward"];

    if CRITICAL_WORDS.iter().any(|w| text.contains(w)) || error_count >= 5 || duration_minutes >= 120 {
        return UncertaintyLevel::Critical;
    }
    if HIGH_WORDS.iter().filter(|w| text.contains(**w)).count() >= 2 || error_count >= 3 {
        return UncertaintyLevel::High;
    }
    if INVESTIGATING_WORDS.iter().any(|w| text.contains(w)) {
        return UncertaintyLevel::Investigating;
    }
    if MEDIUM_WORDS.iter().any(|w| text.contains(w)) || duration_minutes >= 30 {
        return UncertaintyLevel::Medium;
    }
    if LOW_WORDS.iter().any(|w| text.contains(w)) {
        return UncertaintyLevel::Low;
    }
    UncertaintyLevel::Resolved
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
    async fn three_strikes_halts_after_three_attempts() {
        let ctx = test_ctx();
        for _ in 0..3 {
            RecordAttempt
                .execute(&ctx, json!({"session_token": "s1", "task_id": "t1", "error_message": "boom"}))
                .await
                .unwrap();
        }
        let result = ValidateThreeStrikes.execute(&ctx, json!({"session_token": "s1", "task_id": "t1"})).await.unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["halt"], json!(true));
    }

    #[tokio::test]
    async fn reset_attempts_returns_to_zero() {
        let ctx = test_ctx();
        RecordAttempt.execute(&ctx, json!({"session_token": "s2", "task_id": "t2", "error_message": "boom"})).await.unwrap();
        ResetAttempts.execute(&ctx, json!({"session_token": "s2", "task_id": "t2"})).await.unwrap();
        let result = ValidateThreeStrikes.execute(&ctx, json!({"session_token": "s2", "task_id": "t2"})).await.unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["attempts_count"], json!(0));
    }

    #[tokio::test]
    async fn check_halt_conditions_fires_on_positive_pending_critical_count() {
        let ctx = test_ctx();
        RecordHalt
            .execute(&ctx, json!({"session_token": "s3", "halt_type": "manual", "severity": "critical", "description": "stuck"}))
            .await
            .unwrap();
        let result = CheckHaltConditions.execute(&ctx, json!({"session_token": "s3"})).await.unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["should_halt"], json!(true));
        assert_eq!(value["pending_critical_count"], json!(1));
    }

    #[tokio::test]
    async fn check_halt_conditions_fires_on_high_error_rate() {
        let ctx = test_ctx();
        let result = CheckHaltConditions.execute(&ctx, json!({"session_token": "s4", "error_rate": 0.9})).await.unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["should_halt"], json!(true));
    }

    #[tokio::test]
    async fn check_halt_conditions_stays_quiet_under_threshold() {
        let ctx = test_ctx();
        let result = CheckHaltConditions.execute(&ctx, json!({"session_token": "s5", "error_rate": 0.1})).await.unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["should_halt"], json!(false));
    }

    #[tokio::test]
    async fn acknowledge_halt_rejects_non_uuid_text() {
        let ctx = test_ctx();
        let result = AcknowledgeHalt.execute(&ctx, json!({"halt_id": "not-a-uuid"})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn acknowledge_halt_parses_standard_uuid_text() {
        let ctx = test_ctx();
        let recorded = RecordHalt
            .execute(&ctx, json!({"session_token": "s6", "halt_type": "manual", "description": "stuck"}))
            .await
            .unwrap();
        let halt_id = serde_json::from_str::<Value>(&recorded).unwrap()["halt_id"].as_str().unwrap().to_string();
        let result = AcknowledgeHalt.execute(&ctx, json!({"halt_id": halt_id})).await.unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["acknowledged"], json!(true));
    }

    #[tokio::test]
    async fn check_uncertainty_escalates_on_critical_keyword() {
        let ctx = test_ctx();
        let result = CheckUncertainty
            .execute(&ctx, json!({"session_token": "s7", "current_task": "fix bug", "self_assessment": "I am completely stuck"}))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["escalation_required"], json!(true));
    }
}
