//! Storage ports: abstract contracts to everything the dispatcher persists.
//!
//! No tool handler embeds SQL; every handler goes through one of these traits. Two
//! implementations exist: [`memory`] (the default, used whenever no `DATABASE_URL` is
//! configured and in every test) and [`sql`] (sqlx-backed, for production deployments).

pub mod memory;
pub mod sql;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{
    AuditEvent, Failure, FixVerification, HaltEvent, PreventionRule, Project, TaskAttempt, UncertaintyRecord,
};

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_enabled(&self) -> StorageResult<Vec<PreventionRule>>;
    async fn get(&self, id: &str) -> StorageResult<Option<PreventionRule>>;
    async fn count_enabled(&self) -> StorageResult<usize>;
}

#[async_trait]
pub trait FailureStore: Send + Sync {
    async fn list_active_for_paths(&self, paths: &[String]) -> StorageResult<Vec<Failure>>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, slug: &str) -> StorageResult<Option<Project>>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn record(
        &self,
        session_id: &str,
        task_id: &str,
        error_message: &str,
        error_category: &str,
    ) -> StorageResult<TaskAttempt>;
    async fn count_pending(&self, session_id: &str, task_id: &str) -> StorageResult<u32>;
    async fn resolve_all(&self, session_id: &str, task_id: &str) -> StorageResult<()>;
}

#[async_trait]
pub trait HaltStore: Send + Sync {
    async fn record(&self, event: HaltEvent) -> StorageResult<HaltEvent>;
    async fn list_pending_critical(&self, session_id: &str) -> StorageResult<Vec<HaltEvent>>;
    async fn acknowledge(&self, id: &str) -> StorageResult<Option<HaltEvent>>;
}

#[async_trait]
pub trait UncertaintyStore: Send + Sync {
    async fn record(&self, record: UncertaintyRecord) -> StorageResult<UncertaintyRecord>;
    async fn recent(&self, session_id: &str, n: usize) -> StorageResult<Vec<UncertaintyRecord>>;
}

#[async_trait]
pub trait ProductionCodeStore: Send + Sync {
    async fn record(&self, session_id: &str, file_path: &str, code_type: crate::models::CodeType) -> StorageResult<()>;
    async fn has_production(&self, session_id: &str) -> StorageResult<bool>;
}

#[async_trait]
pub trait FixVerificationStore: Send + Sync {
    async fn get(&self, session_id: &str, failure_id: &str) -> StorageResult<Option<FixVerification>>;
    async fn upsert(&self, record: FixVerification) -> StorageResult<()>;
}

#[async_trait]
pub trait FileReadStore: Send + Sync {
    async fn record(&self, session_id: &str, file_path: &str) -> StorageResult<()>;
    async fn get(&self, session_id: &str, file_path: &str) -> StorageResult<Option<chrono::DateTime<chrono::Utc>>>;
}

#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append(&self, event: AuditEvent) -> StorageResult<()>;
}

/// Aggregates one instance of every port. Constructed once at startup and threaded
/// through the dispatcher via `Arc<ToolContext>`.
pub struct Storage {
    pub rules: std::sync::Arc<dyn RuleStore>,
    pub failures: std::sync::Arc<dyn FailureStore>,
    pub projects: std::sync::Arc<dyn ProjectStore>,
    pub attempts: std::sync::Arc<dyn AttemptStore>,
    pub halts: std::sync::Arc<dyn HaltStore>,
    pub uncertainty: std::sync::Arc<dyn UncertaintyStore>,
    pub production_code: std::sync::Arc<dyn ProductionCodeStore>,
    pub fix_verifications: std::sync::Arc<dyn FixVerificationStore>,
    pub file_reads: std::sync::Arc<dyn FileReadStore>,
    pub audit_log: std::sync::Arc<dyn AuditLogStore>,
}

impl Storage {
    /// Build an all-in-memory storage façade, used whenever no database is configured
    /// and throughout the test suite.
    #[must_use]
    pub fn in_memory() -> Self {
        let backend = std::sync::Arc::new(memory::InMemoryBackend::new());
        Self {
            rules: backend.clone(),
            failures: backend.clone(),
            projects: backend.clone(),
            attempts: backend.clone(),
            halts: backend.clone(),
            uncertainty: backend.clone(),
            production_code: backend.clone(),
            fix_verifications: backend.clone(),
            file_reads: backend.clone(),
            audit_log: backend,
        }
    }

    /// Build a storage façade backed by a SQL pool (sqlite or postgres, selected by the
    /// connection string scheme).
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let backend = std::sync::Arc::new(sql::SqlBackend::connect(database_url).await?);
        Ok(Self {
            rules: backend.clone(),
            failures: backend.clone(),
            projects: backend.clone(),
            attempts: backend.clone(),
            halts: backend.clone(),
            uncertainty: backend.clone(),
            production_code: backend.clone(),
            fix_verifications: backend.clone(),
            file_reads: backend.clone(),
            audit_log: backend,
        })
    }
}
