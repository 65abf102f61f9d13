//! Configuration for the guardrail gateway.

use std::time::Duration;

/// Transport and timing constants.
pub mod defaults {
    use std::time::Duration;

    /// Per-request timeout for tool calls.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// How long a session may sit idle before the sweeper reclaims it.
    pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

    /// How often the session sweeper scans for idle sessions.
    pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

    /// TTL for the validation engine's compiled rule cache.
    pub const RULE_CACHE_TTL: Duration = Duration::from_secs(60);

    /// Interval between SSE keep-alive comments.
    pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(30);

    /// Maximum accepted size of a POST body to the message endpoint.
    pub const MAX_BODY_BYTES: usize = 1024 * 1024;

    /// Capacity of a session's bounded response queue.
    pub const SESSION_QUEUE_CAPACITY: usize = 100;

    /// How long a response enqueue will wait before declaring the session busy.
    pub const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

    /// Deadline for any single external call made while handling `init_session`.
    pub const INIT_SESSION_SUBQUERY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Consecutive high-or-worse uncertainty records before mandatory escalation.
    pub const UNCERTAINTY_ESCALATION_STREAK: usize = 2;
}

/// Commit message types recognized by `validate_commit` (Conventional Commits).
pub mod commit {
    pub const TYPES: &[&str] =
        &["feat", "fix", "docs", "style", "refactor", "perf", "test", "chore", "build", "ci", "revert"];

    /// Acronyms allowed to start a commit description despite being uppercase.
    pub const KNOWN_ACRONYMS: &[&str] =
        &["API", "URL", "HTTP", "JSON", "XML", "SQL", "CSS", "HTML", "AWS", "GCP", "UI", "UX"];

    pub const MAX_SUBJECT_LEN: usize = 72;
}

/// Branches that always warrant a warning (or rejection, if combined with a force
/// push) when pushed to directly.
pub mod protected_branches {
    pub const NAMES: &[&str] = &["main", "master", "production", "release"];
}

/// Server configuration, constructed once at startup and threaded through the
/// dispatcher and transport layer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_address: String,

    /// Tightens CORS (exact-origin match instead of localhost-wildcard) and other
    /// production-only checks.
    pub production_mode: bool,

    /// Per-request timeout for tool calls.
    pub request_timeout: Duration,

    /// How long a session may sit idle before being reclaimed.
    pub session_idle_ttl: Duration,

    /// How often the sweeper scans for idle sessions.
    pub session_sweep_interval: Duration,

    /// TTL for the validation engine's rule cache.
    pub rule_cache_ttl: Duration,

    /// Maximum accepted POST body size, in bytes.
    pub max_body_bytes: usize,

    /// Filesystem root that `guardrail://docs/*` resources are read from.
    pub docs_root: String,

    /// Database connection string. `None` means run entirely in-memory.
    pub database_url: Option<String>,

    /// Where audit events are written.
    pub audit_sink: AuditSinkKind,

    /// Base URL used when announcing the message endpoint to SSE clients.
    pub base_url: String,
}

/// Which [`crate::audit::AuditSink`] implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSinkKind {
    /// Structured `tracing` events only.
    Tracing,
    /// Persisted to the `audit_log` table via the active storage backend.
    Storage,
}

impl Config {
    /// Create a configuration for local/testing use: in-memory storage, permissive
    /// CORS, short timeouts so tests don't hang.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            production_mode: false,
            request_timeout: Duration::from_secs(5),
            session_idle_ttl: Duration::from_secs(2),
            session_sweep_interval: Duration::from_millis(50),
            rule_cache_ttl: Duration::from_millis(50),
            max_body_bytes: defaults::MAX_BODY_BYTES,
            docs_root: "docs".to_string(),
            database_url: None,
            audit_sink: AuditSinkKind::Tracing,
            base_url: "http://127.0.0.1:0".to_string(),
        }
    }

    /// Build configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_address = std::env::var("GUARDRAIL_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8787".to_string());
        let production_mode = std::env::var("GUARDRAIL_PRODUCTION")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let docs_root = std::env::var("GUARDRAIL_DOCS_ROOT").unwrap_or_else(|_| "docs".to_string());
        let database_url = std::env::var("DATABASE_URL").ok();
        let base_url = std::env::var("GUARDRAIL_BASE_URL").unwrap_or_else(|_| format!("http://{bind_address}"));
        let audit_sink = match std::env::var("GUARDRAIL_AUDIT_SINK").as_deref() {
            Ok("storage") => AuditSinkKind::Storage,
            _ => AuditSinkKind::Tracing,
        };

        Ok(Self {
            bind_address,
            production_mode,
            request_timeout: defaults::REQUEST_TIMEOUT,
            session_idle_ttl: defaults::SESSION_IDLE_TTL,
            session_sweep_interval: defaults::SESSION_SWEEP_INTERVAL,
            rule_cache_ttl: defaults::RULE_CACHE_TTL,
            max_body_bytes: defaults::MAX_BODY_BYTES,
            docs_root,
            database_url,
            audit_sink,
            base_url,
        })
    }

    #[must_use]
    pub const fn has_database(&self) -> bool {
        self.database_url.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_testing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_is_in_memory() {
        let config = Config::default();
        assert!(!config.has_database());
        assert!(!config.production_mode);
    }

    #[test]
    fn test_commit_types_cover_conventional_commits() {
        assert!(commit::TYPES.contains(&"feat"));
        assert!(commit::TYPES.contains(&"chore"));
    }

    #[test]
    fn test_protected_branches() {
        assert!(protected_branches::NAMES.contains(&"main"));
    }
}
