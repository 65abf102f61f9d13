//! SQL-backed storage, selected whenever `DATABASE_URL` is configured.
//!
//! Uses `sqlx::Any` so the same query set runs against either the sqlite pool used in
//! small/local deployments or the postgres pool used in production, following the
//! named-bind / `ON CONFLICT DO UPDATE` / transaction idioms of the pack's sqlx query
//! modules. Every state-machine row (`task_attempts`, `halt_events`) is written inside
//! a transaction that re-reads the row it is about to mutate, giving the same
//! serialization guarantee as `SELECT ... FOR UPDATE` on backends that support it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};

use super::{
    AttemptStore, AuditLogStore, FailureStore, FileReadStore, FixVerificationStore, HaltStore, ProductionCodeStore,
    ProjectStore, RuleStore, UncertaintyStore,
};
use crate::error::{StorageError, StorageResult};
use crate::models::{
    AttemptState, AuditEvent, CodeType, Failure, FailureStatus, FixStatus, FixType, FixVerification, HaltEvent,
    HaltResolution, PreventionRule, Project, Severity, TaskAttempt, UncertaintyLevel, UncertaintyRecord,
};

pub struct SqlBackend {
    pool: AnyPool,
}

impl SqlBackend {
    /// Connect and verify every required table is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::RelationMissing`] if any required table is absent, or
    /// [`StorageError::Backend`] if the connection itself fails.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(10).connect(database_url).await?;
        let backend = Self { pool };
        backend.check_required_tables().await?;
        Ok(backend)
    }

    async fn check_required_tables(&self) -> StorageResult<()> {
        for table in REQUIRED_TABLES {
            let probe = format!("SELECT 1 FROM {table} WHERE 1 = 0");
            sqlx::query(&probe)
                .fetch_optional(&self.pool)
                .await
                .map_err(|_| StorageError::relation_missing(*table))?;
        }
        Ok(())
    }
}

/// Every table the readiness probe and startup check require to exist.
pub const REQUIRED_TABLES: &[&str] = &[
    "prevention_rules",
    "failure_registry",
    "file_reads",
    "task_attempts",
    "uncertainty_tracking",
    "production_code_tracking",
    "halt_events",
    "fix_verifications",
    "projects",
    "audit_log",
];

/// `sqlx::Any` only natively encodes/decodes a small common type set (bool, integers,
/// floats, strings, bytes) — no `chrono` support regardless of the `chrono` feature,
/// which only wires up the per-backend (sqlite/postgres) drivers. Every timestamp
/// column is therefore stored and read as an RFC 3339 string, which also sorts
/// correctly under a plain `ORDER BY` since it's a UTC, zero-padded representation.
fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn decode_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).map_err(|e| StorageError::Backend(sqlx::Error::Decode(Box::new(e))))
}

fn severity_from_str(s: &str) -> Severity {
    match s {
        "info" => Severity::Info,
        "low" => Severity::Low,
        "warning" => Severity::Warning,
        "medium" => Severity::Medium,
        "high" => Severity::High,
        "critical" => Severity::Critical,
        _ => Severity::Error,
    }
}

fn severity_to_str(s: Severity) -> &'static str {
    match s {
        Severity::Info => "info",
        Severity::Low => "low",
        Severity::Warning => "warning",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Error => "error",
        Severity::Critical => "critical",
    }
}

#[async_trait]
impl RuleStore for SqlBackend {
    async fn list_enabled(&self) -> StorageResult<Vec<PreventionRule>> {
        let rows = sqlx::query(
            "SELECT id, name, category, severity, pattern, message, enabled \
             FROM prevention_rules WHERE enabled = true",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PreventionRule {
                id: row.get("id"),
                name: row.get("name"),
                category: row.get("category"),
                severity: severity_from_str(row.get::<String, _>("severity").as_str()),
                pattern: row.get("pattern"),
                message: row.get("message"),
                enabled: row.get("enabled"),
            })
            .collect())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<PreventionRule>> {
        let row = sqlx::query(
            "SELECT id, name, category, severity, pattern, message, enabled FROM prevention_rules WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| PreventionRule {
            id: row.get("id"),
            name: row.get("name"),
            category: row.get("category"),
            severity: severity_from_str(row.get::<String, _>("severity").as_str()),
            pattern: row.get("pattern"),
            message: row.get("message"),
            enabled: row.get("enabled"),
        }))
    }

    async fn count_enabled(&self) -> StorageResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM prevention_rules WHERE enabled = true")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }
}

#[async_trait]
impl FailureStore for SqlBackend {
    async fn list_active_for_paths(&self, paths: &[String]) -> StorageResult<Vec<Failure>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        // `affected_files` is stored as a JSON array of text; `sqlx::Any` has no portable
        // way to query inside that array (sqlite's `json_each` expects the opposite shape
        // postgres's does), so the overlap check happens in Rust after a plain fetch.
        let rows = sqlx::query(
            "SELECT id, category, severity, error_message, root_cause, regression_pattern, \
             affected_files, status, created_at, updated_at FROM failure_registry WHERE status = 'active'",
        )
        .fetch_all(&self.pool)
        .await?;

        let failures = rows
            .into_iter()
            .map(|row| {
                let affected_files_json: String = row.get("affected_files");
                let affected_files: Vec<String> = serde_json::from_str(&affected_files_json)?;
                Ok(Failure {
                    id: row.get("id"),
                    category: row.get("category"),
                    severity: severity_from_str(row.get::<String, _>("severity").as_str()),
                    error_message: row.get("error_message"),
                    root_cause: row.get("root_cause"),
                    regression_pattern: row.get("regression_pattern"),
                    affected_files,
                    status: FailureStatus::Active,
                    created_at: decode_timestamp(&row.get::<String, _>("created_at"))?,
                    updated_at: decode_timestamp(&row.get::<String, _>("updated_at"))?,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(failures.into_iter().filter(|f| f.affected_files.iter().any(|file| paths.contains(file))).collect())
    }
}

#[async_trait]
impl ProjectStore for SqlBackend {
    async fn get(&self, slug: &str) -> StorageResult<Option<Project>> {
        let row = sqlx::query("SELECT slug, name, context_markdown, enabled_rule_ids FROM projects WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let ids_json: String = row.get("enabled_rule_ids");
                Ok(Some(Project {
                    slug: row.get("slug"),
                    name: row.get("name"),
                    context_markdown: row.get("context_markdown"),
                    enabled_rule_ids: serde_json::from_str(&ids_json)?,
                }))
            }
        }
    }
}

#[async_trait]
impl AttemptStore for SqlBackend {
    async fn record(
        &self,
        session_id: &str,
        task_id: &str,
        error_message: &str,
        error_category: &str,
    ) -> StorageResult<TaskAttempt> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM task_attempts WHERE session_id = ? AND task_id = ?",
        )
        .bind(session_id)
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;
        let next_ordinal: i64 = row.get::<i64, _>("n") + 1;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO task_attempts (session_id, task_id, attempt_number, error_message, error_category, state, created_at) \
             VALUES (?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(session_id)
        .bind(task_id)
        .bind(next_ordinal)
        .bind(error_message)
        .bind(error_category)
        .bind(encode_timestamp(now))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(TaskAttempt {
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
            attempt_number: next_ordinal as u32,
            error_message: error_message.to_string(),
            error_category: error_category.to_string(),
            state: AttemptState::Pending,
            created_at: now,
        })
    }

    async fn count_pending(&self, session_id: &str, task_id: &str) -> StorageResult<u32> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM task_attempts WHERE session_id = ? AND task_id = ? AND state = 'pending'",
        )
        .bind(session_id)
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u32)
    }

    async fn resolve_all(&self, session_id: &str, task_id: &str) -> StorageResult<()> {
        sqlx::query("UPDATE task_attempts SET state = 'resolved' WHERE session_id = ? AND task_id = ? AND state = 'pending'")
            .bind(session_id)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HaltStore for SqlBackend {
    async fn record(&self, event: HaltEvent) -> StorageResult<HaltEvent> {
        sqlx::query(
            "INSERT INTO halt_events (id, session_id, halt_type, severity, description, context, resolution, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET resolution = excluded.resolution",
        )
        .bind(&event.id)
        .bind(&event.session_id)
        .bind(&event.halt_type)
        .bind(severity_to_str(event.severity))
        .bind(&event.description)
        .bind(event.context.to_string())
        .bind(resolution_to_str(event.resolution))
        .bind(encode_timestamp(event.created_at))
        .execute(&self.pool)
        .await?;
        Ok(event)
    }

    async fn list_pending_critical(&self, session_id: &str) -> StorageResult<Vec<HaltEvent>> {
        let rows = sqlx::query(
            "SELECT id, session_id, halt_type, severity, description, context, resolution, created_at \
             FROM halt_events WHERE session_id = ? AND resolution = 'pending' AND severity = 'critical'",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let context_json: String = row.get("context");
                Ok(HaltEvent {
                    id: row.get("id"),
                    session_id: row.get("session_id"),
                    halt_type: row.get("halt_type"),
                    severity: severity_from_str(row.get::<String, _>("severity").as_str()),
                    description: row.get("description"),
                    context: serde_json::from_str(&context_json)?,
                    resolution: HaltResolution::Pending,
                    created_at: decode_timestamp(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }

    async fn acknowledge(&self, id: &str) -> StorageResult<Option<HaltEvent>> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            "SELECT id, session_id, halt_type, severity, description, context, resolution, created_at \
             FROM halt_events WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = existing else {
            tx.commit().await?;
            return Ok(None);
        };
        sqlx::query("UPDATE halt_events SET resolution = 'acknowledged' WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let context_json: String = row.get("context");
        Ok(Some(HaltEvent {
            id: row.get("id"),
            session_id: row.get("session_id"),
            halt_type: row.get("halt_type"),
            severity: severity_from_str(row.get::<String, _>("severity").as_str()),
            description: row.get("description"),
            context: serde_json::from_str(&context_json)?,
            resolution: HaltResolution::Acknowledged,
            created_at: decode_timestamp(&row.get::<String, _>("created_at"))?,
        }))
    }
}

fn resolution_to_str(r: HaltResolution) -> &'static str {
    match r {
        HaltResolution::Pending => "pending",
        HaltResolution::Acknowledged => "acknowledged",
        HaltResolution::Resolved => "resolved",
        HaltResolution::Unresolved => "unresolved",
    }
}

#[async_trait]
impl UncertaintyStore for SqlBackend {
    async fn record(&self, record: UncertaintyRecord) -> StorageResult<UncertaintyRecord> {
        sqlx::query(
            "INSERT INTO uncertainty_tracking (session_id, level, decision, context, escalation_required, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.session_id)
        .bind(uncertainty_to_str(record.level))
        .bind(&record.decision)
        .bind(record.context.to_string())
        .bind(record.escalation_required)
        .bind(encode_timestamp(record.created_at))
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn recent(&self, session_id: &str, n: usize) -> StorageResult<Vec<UncertaintyRecord>> {
        let rows = sqlx::query(
            "SELECT session_id, level, decision, context, escalation_required, created_at \
             FROM uncertainty_tracking WHERE session_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let context_json: String = row.get("context");
                Ok(UncertaintyRecord {
                    session_id: row.get("session_id"),
                    level: uncertainty_from_str(row.get::<String, _>("level").as_str()),
                    decision: row.get("decision"),
                    context: serde_json::from_str(&context_json)?,
                    escalation_required: row.get("escalation_required"),
                    created_at: decode_timestamp(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }
}

fn uncertainty_to_str(l: UncertaintyLevel) -> &'static str {
    match l {
        UncertaintyLevel::Resolved => "resolved",
        UncertaintyLevel::Low => "low",
        UncertaintyLevel::Investigating => "investigating",
        UncertaintyLevel::Medium => "medium",
        UncertaintyLevel::High => "high",
        UncertaintyLevel::Critical => "critical",
        UncertaintyLevel::Blocked => "blocked",
    }
}

fn uncertainty_from_str(s: &str) -> UncertaintyLevel {
    match s {
        "low" => UncertaintyLevel::Low,
        "investigating" => UncertaintyLevel::Investigating,
        "medium" => UncertaintyLevel::Medium,
        "high" => UncertaintyLevel::High,
        "critical" => UncertaintyLevel::Critical,
        "blocked" => UncertaintyLevel::Blocked,
        _ => UncertaintyLevel::Resolved,
    }
}

#[async_trait]
impl ProductionCodeStore for SqlBackend {
    async fn record(&self, session_id: &str, file_path: &str, code_type: CodeType) -> StorageResult<()> {
        let type_str = match code_type {
            CodeType::Production => "production",
            CodeType::Test => "test",
            CodeType::Infrastructure => "infrastructure",
        };
        sqlx::query(
            "INSERT INTO production_code_tracking (session_id, file_path, code_type, verified) \
             VALUES (?, ?, ?, false) \
             ON CONFLICT (session_id, file_path) DO UPDATE SET code_type = excluded.code_type",
        )
        .bind(session_id)
        .bind(file_path)
        .bind(type_str)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_production(&self, session_id: &str) -> StorageResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM production_code_tracking WHERE session_id = ? AND code_type = 'production'",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }
}

#[async_trait]
impl FixVerificationStore for SqlBackend {
    async fn get(&self, session_id: &str, failure_id: &str) -> StorageResult<Option<FixVerification>> {
        let row = sqlx::query(
            "SELECT session_id, failure_id, file_path, fix_type, fix_content_hash, status \
             FROM fix_verifications WHERE session_id = ? AND failure_id = ?",
        )
        .bind(session_id)
        .bind(failure_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| FixVerification {
            session_id: row.get("session_id"),
            failure_id: row.get("failure_id"),
            file_path: row.get("file_path"),
            fix_type: fix_type_from_str(row.get::<String, _>("fix_type").as_str()),
            fix_content_hash: row.get("fix_content_hash"),
            status: fix_status_from_str(row.get::<String, _>("status").as_str()),
        }))
    }

    async fn upsert(&self, record: FixVerification) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO fix_verifications (session_id, failure_id, file_path, fix_type, fix_content_hash, status) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (session_id, failure_id) DO UPDATE SET \
               file_path = excluded.file_path, fix_content_hash = excluded.fix_content_hash, status = excluded.status",
        )
        .bind(&record.session_id)
        .bind(&record.failure_id)
        .bind(&record.file_path)
        .bind(fix_type_to_str(record.fix_type))
        .bind(&record.fix_content_hash)
        .bind(fix_status_to_str(record.status))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn fix_type_to_str(t: FixType) -> &'static str {
    match t {
        FixType::Regex => "regex",
        FixType::CodeChange => "code_change",
        FixType::Config => "config",
    }
}

fn fix_type_from_str(s: &str) -> FixType {
    match s {
        "code_change" => FixType::CodeChange,
        "config" => FixType::Config,
        _ => FixType::Regex,
    }
}

fn fix_status_to_str(s: FixStatus) -> &'static str {
    match s {
        FixStatus::Pending => "pending",
        FixStatus::Confirmed => "confirmed",
        FixStatus::Modified => "modified",
        FixStatus::Removed => "removed",
    }
}

fn fix_status_from_str(s: &str) -> FixStatus {
    match s {
        "confirmed" => FixStatus::Confirmed,
        "modified" => FixStatus::Modified,
        "removed" => FixStatus::Removed,
        _ => FixStatus::Pending,
    }
}

#[async_trait]
impl FileReadStore for SqlBackend {
    async fn record(&self, session_id: &str, file_path: &str) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO file_reads (session_id, file_path, read_at) VALUES (?, ?, ?) \
             ON CONFLICT (session_id, file_path) DO UPDATE SET read_at = excluded.read_at",
        )
        .bind(session_id)
        .bind(file_path)
        .bind(encode_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str, file_path: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT read_at FROM file_reads WHERE session_id = ? AND file_path = ?")
            .bind(session_id)
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_timestamp(&row.get::<String, _>("read_at"))).transpose()
    }
}

#[async_trait]
impl AuditLogStore for SqlBackend {
    async fn append(&self, event: AuditEvent) -> StorageResult<()> {
        sqlx::query("INSERT INTO audit_log (kind, session_id, payload, at) VALUES (?, ?, ?, ?)")
            .bind(&event.kind)
            .bind(&event.session_id)
            .bind(event.payload.to_string())
            .bind(encode_timestamp(event.at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
