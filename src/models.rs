//! Core data model for the guardrail gateway.
//!
//! These types are the persisted shape of everything the validation engine and the
//! stateful guardrail tools reason about. Storage ports read and write them directly;
//! tool handlers never embed SQL themselves (see [`crate::storage`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a matched prevention rule or a recorded halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Warning,
    Medium,
    High,
    Error,
    Critical,
}

/// A compiled-on-demand regex rule evaluated by the validation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreventionRule {
    pub id: String,
    pub name: String,
    pub category: String,
    pub severity: Severity,
    pub pattern: String,
    pub message: String,
    pub enabled: bool,
}

/// Status of a [`Failure`] entry in the failure registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStatus {
    Active,
    Resolved,
    Deprecated,
}

/// An append-only registry entry describing a known past failure and how to detect
/// its regression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub id: String,
    pub category: String,
    pub severity: Severity,
    pub error_message: String,
    pub root_cause: String,
    pub regression_pattern: Option<String>,
    pub affected_files: Vec<String>,
    pub status: FailureStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Failure {
    #[must_use]
    pub fn touches(&self, path: &str) -> bool {
        self.affected_files.iter().any(|f| f == path)
    }
}

/// A project's guardrail context: which rules apply and the free-form briefing text
/// handed back by `get_context`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub slug: String,
    pub name: String,
    pub context_markdown: String,
    pub enabled_rule_ids: Vec<String>,
}

/// Status of a single [`TaskAttempt`] in the three-strikes counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    Pending,
    Resolved,
}

/// One attempt at fixing `task_id` within `session_id`. Ordinals are dense starting
/// at 1; more than three pending attempts MUST trigger a halt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub session_id: String,
    pub task_id: String,
    pub attempt_number: u32,
    pub error_message: String,
    pub error_category: String,
    pub state: AttemptState,
    pub created_at: DateTime<Utc>,
}

/// The maximum number of pending attempts before a halt is mandatory.
pub const MAX_ATTEMPTS: u32 = 3;

/// Resolution state of a [`HaltEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaltResolution {
    Pending,
    Acknowledged,
    Resolved,
    Unresolved,
}

/// A persisted demand that the agent stop and check in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltEvent {
    pub id: String,
    pub session_id: String,
    pub halt_type: String,
    pub severity: Severity,
    pub description: String,
    pub context: serde_json::Value,
    pub resolution: HaltResolution,
    pub created_at: DateTime<Utc>,
}

/// Ordered uncertainty level, from fully resolved to fully blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UncertaintyLevel {
    Resolved,
    Low,
    Investigating,
    Medium,
    High,
    Critical,
    Blocked,
}

impl UncertaintyLevel {
    #[must_use]
    pub const fn is_high_or_worse(self) -> bool {
        matches!(self, Self::High | Self::Critical | Self::Blocked)
    }
}

/// A single uncertainty self-assessment recorded for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncertaintyRecord {
    pub session_id: String,
    pub level: UncertaintyLevel,
    pub decision: String,
    pub context: serde_json::Value,
    pub escalation_required: bool,
    pub created_at: DateTime<Utc>,
}

/// Classification of a file recorded via `validate_production_first`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeType {
    Production,
    Test,
    Infrastructure,
}

/// A (session, file) pair recording which files have been touched and how they were
/// classified, used to enforce production-before-test ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionCode {
    pub session_id: String,
    pub file_path: String,
    pub code_type: CodeType,
    pub verified: bool,
}

/// The kind of fix a [`FixVerification`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixType {
    Regex,
    CodeChange,
    Config,
}

/// Status of a [`FixVerification`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStatus {
    Pending,
    Confirmed,
    Modified,
    Removed,
}

/// Tracks whether a previously applied fix for `failure_id` is still intact in
/// `file_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixVerification {
    pub session_id: String,
    pub failure_id: String,
    pub file_path: String,
    pub fix_type: FixType,
    pub fix_content_hash: String,
    pub status: FixStatus,
}

/// A (session, file) pair recording that a file's content was read and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRead {
    pub session_id: String,
    pub file_path: String,
    pub read_at: DateTime<Utc>,
}

/// A single audit log entry. Payload is scrubbed of PII by the audit sink before it
/// is persisted, never at the call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: String,
    pub session_id: Option<String>,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(kind: impl Into<String>, session_id: Option<String>, payload: serde_json::Value) -> Self {
        Self { kind: kind.into(), session_id, payload, at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncertainty_ordering_is_monotonic() {
        assert!(UncertaintyLevel::Resolved < UncertaintyLevel::Low);
        assert!(UncertaintyLevel::High < UncertaintyLevel::Critical);
        assert!(UncertaintyLevel::Critical < UncertaintyLevel::Blocked);
        assert!(UncertaintyLevel::High.is_high_or_worse());
        assert!(!UncertaintyLevel::Medium.is_high_or_worse());
    }

    #[test]
    fn failure_touches_checks_affected_files() {
        let failure = Failure {
            id: "F1".into(),
            category: "regression".into(),
            severity: Severity::Error,
            error_message: "panic on empty input".into(),
            root_cause: "unchecked slice index".into(),
            regression_pattern: None,
            affected_files: vec!["src/parser.rs".into()],
            status: FailureStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(failure.touches("src/parser.rs"));
        assert!(!failure.touches("src/other.rs"));
    }
}
