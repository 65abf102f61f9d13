//! In-memory storage backend.
//!
//! The default: used whenever `DATABASE_URL` is unset and throughout the test suite, so
//! the gateway always works without any external dependency configured.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use super::{
    AttemptStore, AuditLogStore, FailureStore, FileReadStore, FixVerificationStore, HaltStore, ProductionCodeStore,
    ProjectStore, RuleStore, UncertaintyStore,
};
use crate::error::StorageResult;
use crate::models::{
    AttemptState, AuditEvent, CodeType, Failure, FixVerification, HaltEvent, HaltResolution, PreventionRule, Project,
    TaskAttempt, UncertaintyRecord,
};

/// One struct backing every port; each field is its own lock so unrelated tools never
/// contend with each other.
#[derive(Default)]
pub struct InMemoryBackend {
    rules: RwLock<HashMap<String, PreventionRule>>,
    failures: RwLock<Vec<Failure>>,
    projects: RwLock<HashMap<String, Project>>,
    attempts: RwLock<Vec<TaskAttempt>>,
    halts: RwLock<HashMap<String, HaltEvent>>,
    uncertainty: RwLock<Vec<UncertaintyRecord>>,
    production_code: RwLock<HashMap<(String, String), CodeType>>,
    fix_verifications: RwLock<HashMap<(String, String), FixVerification>>,
    file_reads: RwLock<HashMap<(String, String), chrono::DateTime<Utc>>>,
    audit_log: RwLock<Vec<AuditEvent>>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let mut backend = Self::default();
        backend.seed_default_rules();
        backend
    }

    fn seed_default_rules(&mut self) {
        let rules = self.rules.get_mut().expect("fresh lock");
        for rule in default_prevention_rules() {
            rules.insert(rule.id.clone(), rule);
        }
    }

    /// Test/seeding helper: insert or replace a project.
    pub fn put_project(&self, project: Project) {
        self.projects.write().expect("lock poisoned").insert(project.slug.clone(), project);
    }

    /// Test/seeding helper: insert or replace a failure.
    pub fn put_failure(&self, failure: Failure) {
        self.failures.write().expect("lock poisoned").push(failure);
    }
}

/// The built-in rule catalog shipped when no external rule source is configured.
#[must_use]
pub fn default_prevention_rules() -> Vec<PreventionRule> {
    use crate::models::Severity;
    vec![
        PreventionRule {
            id: "PREVENT-001".into(),
            name: "rm -rf on root-adjacent paths".into(),
            category: "bash".into(),
            severity: Severity::Critical,
            pattern: r"rm\s+-rf\s+(/|~|\$HOME|\.\.)".into(),
            message: "Refusing a recursive delete rooted at a dangerous path".into(),
            enabled: true,
        },
        PreventionRule {
            id: "PREVENT-002".into(),
            name: "force-push to any branch".into(),
            category: "git".into(),
            severity: Severity::Error,
            pattern: r"git\s+push\s+.*(--force|-f)\b".into(),
            message: "Force pushes can discard remote history; use --force-with-lease".into(),
            enabled: true,
        },
        PreventionRule {
            id: "PREVENT-003".into(),
            name: "curl-pipe-shell".into(),
            category: "bash".into(),
            severity: Severity::Error,
            pattern: r"curl[^|]*\|\s*(sudo\s+)?(sh|bash)\b".into(),
            message: "Piping a remote script directly into a shell is unreviewable".into(),
            enabled: true,
        },
        PreventionRule {
            id: "PREVENT-004".into(),
            name: "hardcoded AWS credential".into(),
            category: "security".into(),
            severity: Severity::Critical,
            pattern: r"AKIA[0-9A-Z]{16}".into(),
            message: "Hardcoded AWS access key detected".into(),
            enabled: true,
        },
        PreventionRule {
            id: "PREVENT-005".into(),
            name: "chmod 777".into(),
            category: "bash".into(),
            severity: Severity::Warning,
            pattern: r"chmod\s+(-R\s+)?777\b".into(),
            message: "World-writable permissions are rarely intended".into(),
            enabled: true,
        },
        PreventionRule {
            id: "PREVENT-006".into(),
            name: "disabled TLS verification".into(),
            category: "security".into(),
            severity: Severity::Error,
            pattern: r"(?i)(verify\s*=\s*false|NODE_TLS_REJECT_UNAUTHORIZED\s*=\s*.?0|--insecure\b|-k\s+https)".into(),
            message: "Disabling TLS verification in code or commands is unsafe".into(),
            enabled: true,
        },
        PreventionRule {
            id: "PREVENT-007".into(),
            name: "drop table/database".into(),
            category: "general".into(),
            severity: Severity::Critical,
            pattern: r"(?i)drop\s+(table|database)\s+\S+".into(),
            message: "Destructive schema operation requires explicit human sign-off".into(),
            enabled: true,
        },
    ]
}

#[async_trait]
impl RuleStore for InMemoryBackend {
    async fn list_enabled(&self) -> StorageResult<Vec<PreventionRule>> {
        Ok(self.rules.read().expect("lock poisoned").values().filter(|r| r.enabled).cloned().collect())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<PreventionRule>> {
        Ok(self.rules.read().expect("lock poisoned").get(id).cloned())
    }

    async fn count_enabled(&self) -> StorageResult<usize> {
        Ok(self.rules.read().expect("lock poisoned").values().filter(|r| r.enabled).count())
    }
}

#[async_trait]
impl FailureStore for InMemoryBackend {
    async fn list_active_for_paths(&self, paths: &[String]) -> StorageResult<Vec<Failure>> {
        Ok(self
            .failures
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|f| f.status == crate::models::FailureStatus::Active && paths.iter().any(|p| f.touches(p)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProjectStore for InMemoryBackend {
    async fn get(&self, slug: &str) -> StorageResult<Option<Project>> {
        Ok(self.projects.read().expect("lock poisoned").get(slug).cloned())
    }
}

#[async_trait]
impl AttemptStore for InMemoryBackend {
    async fn record(
        &self,
        session_id: &str,
        task_id: &str,
        error_message: &str,
        error_category: &str,
    ) -> StorageResult<TaskAttempt> {
        let mut attempts = self.attempts.write().expect("lock poisoned");
        let next_ordinal = attempts
            .iter()
            .filter(|a| a.session_id == session_id && a.task_id == task_id)
            .count() as u32
            + 1;
        let attempt = TaskAttempt {
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
            attempt_number: next_ordinal,
            error_message: error_message.to_string(),
            error_category: error_category.to_string(),
            state: AttemptState::Pending,
            created_at: Utc::now(),
        };
        attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn count_pending(&self, session_id: &str, task_id: &str) -> StorageResult<u32> {
        Ok(self
            .attempts
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|a| a.session_id == session_id && a.task_id == task_id && a.state == AttemptState::Pending)
            .count() as u32)
    }

    async fn resolve_all(&self, session_id: &str, task_id: &str) -> StorageResult<()> {
        for attempt in self.attempts.write().expect("lock poisoned").iter_mut() {
            if attempt.session_id == session_id && attempt.task_id == task_id {
                attempt.state = AttemptState::Resolved;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HaltStore for InMemoryBackend {
    async fn record(&self, event: HaltEvent) -> StorageResult<HaltEvent> {
        self.halts.write().expect("lock poisoned").insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn list_pending_critical(&self, session_id: &str) -> StorageResult<Vec<HaltEvent>> {
        Ok(self
            .halts
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|h| {
                h.session_id == session_id
                    && h.resolution == HaltResolution::Pending
                    && h.severity == crate::models::Severity::Critical
            })
            .cloned()
            .collect())
    }

    async fn acknowledge(&self, id: &str) -> StorageResult<Option<HaltEvent>> {
        let mut halts = self.halts.write().expect("lock poisoned");
        if let Some(event) = halts.get_mut(id) {
            event.resolution = HaltResolution::Acknowledged;
            Ok(Some(event.clone()))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl UncertaintyStore for InMemoryBackend {
    async fn record(&self, record: UncertaintyRecord) -> StorageResult<UncertaintyRecord> {
        self.uncertainty.write().expect("lock poisoned").push(record.clone());
        Ok(record)
    }

    async fn recent(&self, session_id: &str, n: usize) -> StorageResult<Vec<UncertaintyRecord>> {
        let records = self.uncertainty.read().expect("lock poisoned");
        Ok(records.iter().rev().filter(|r| r.session_id == session_id).take(n).cloned().collect())
    }
}

#[async_trait]
impl ProductionCodeStore for InMemoryBackend {
    async fn record(&self, session_id: &str, file_path: &str, code_type: CodeType) -> StorageResult<()> {
        self.production_code
            .write()
            .expect("lock poisoned")
            .insert((session_id.to_string(), file_path.to_string()), code_type);
        Ok(())
    }

    async fn has_production(&self, session_id: &str) -> StorageResult<bool> {
        Ok(self
            .production_code
            .read()
            .expect("lock poisoned")
            .iter()
            .any(|((sid, _), code_type)| sid == session_id && *code_type == CodeType::Production))
    }
}

#[async_trait]
impl FixVerificationStore for InMemoryBackend {
    async fn get(&self, session_id: &str, failure_id: &str) -> StorageResult<Option<FixVerification>> {
        Ok(self
            .fix_verifications
            .read()
            .expect("lock poisoned")
            .get(&(session_id.to_string(), failure_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, record: FixVerification) -> StorageResult<()> {
        self.fix_verifications
            .write()
            .expect("lock poisoned")
            .insert((record.session_id.clone(), record.failure_id.clone()), record);
        Ok(())
    }
}

#[async_trait]
impl FileReadStore for InMemoryBackend {
    async fn record(&self, session_id: &str, file_path: &str) -> StorageResult<()> {
        self.file_reads
            .write()
            .expect("lock poisoned")
            .insert((session_id.to_string(), file_path.to_string()), Utc::now());
        Ok(())
    }

    async fn get(&self, session_id: &str, file_path: &str) -> StorageResult<Option<chrono::DateTime<Utc>>> {
        Ok(self
            .file_reads
            .read()
            .expect("lock poisoned")
            .get(&(session_id.to_string(), file_path.to_string()))
            .copied())
    }
}

#[async_trait]
impl AuditLogStore for InMemoryBackend {
    async fn append(&self, event: AuditEvent) -> StorageResult<()> {
        self.audit_log.write().expect("lock poisoned").push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attempt_ordinals_are_dense_per_task() {
        let backend = InMemoryBackend::new();
        let a1 = AttemptStore::record(&backend, "s1", "t1", "boom", "panic").await.unwrap();
        let a2 = AttemptStore::record(&backend, "s1", "t1", "boom again", "panic").await.unwrap();
        assert_eq!(a1.attempt_number, 1);
        assert_eq!(a2.attempt_number, 2);
        assert_eq!(backend.count_pending("s1", "t1").await.unwrap(), 2);
        backend.resolve_all("s1", "t1").await.unwrap();
        assert_eq!(backend.count_pending("s1", "t1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn production_first_flag_is_session_scoped() {
        let backend = InMemoryBackend::new();
        assert!(!backend.has_production("s1").await.unwrap());
        ProductionCodeStore::record(&backend, "s1", "main.rs", CodeType::Production).await.unwrap();
        assert!(backend.has_production("s1").await.unwrap());
        assert!(!backend.has_production("s2").await.unwrap());
    }

    #[tokio::test]
    async fn default_rules_are_all_enabled() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.count_enabled().await.unwrap(), default_prevention_rules().len());
    }
}
