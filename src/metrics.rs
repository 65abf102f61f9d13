//! Process-wide counters.
//!
//! Not persisted; reset on restart. Tracks per-tool invocation/error counts plus the
//! session/violation/halt totals the readiness and version endpoints surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Counters for a single tool.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ToolCounters {
    pub invocations: u64,
    pub errors: u64,
}

/// Gateway-wide metrics snapshot.
#[derive(Default)]
pub struct GatewayMetrics {
    sessions_created: AtomicU64,
    sessions_active: AtomicU64,
    violations_emitted: AtomicU64,
    halts_recorded: AtomicU64,
    per_tool: RwLock<HashMap<String, ToolCounters>>,
}

impl GatewayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_ended(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn violations_emitted(&self, count: u64) {
        self.violations_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn halt_recorded(&self) {
        self.halts_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tool_invoked(&self, tool: &str, is_error: bool) {
        let mut guard = self.per_tool.write().expect("metrics lock poisoned");
        let entry = guard.entry(tool.to_string()).or_default();
        entry.invocations += 1;
        if is_error {
            entry.errors += 1;
        }
    }

    #[must_use]
    pub fn active_sessions(&self) -> u64 {
        self.sessions_active.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            violations_emitted: self.violations_emitted.load(Ordering::Relaxed),
            halts_recorded: self.halts_recorded.load(Ordering::Relaxed),
            per_tool: self.per_tool.read().expect("metrics lock poisoned").clone(),
        }
    }
}

/// A point-in-time copy of [`GatewayMetrics`], serializable for diagnostics.
#[derive(Debug, serde::Serialize)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub sessions_active: u64,
    pub violations_emitted: u64,
    pub halts_recorded: u64,
    pub per_tool: HashMap<String, ToolCounters>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_invoked_tracks_errors_separately() {
        let metrics = GatewayMetrics::new();
        metrics.tool_invoked("validate_bash", false);
        metrics.tool_invoked("validate_bash", true);
        let snapshot = metrics.snapshot();
        let counters = snapshot.per_tool.get("validate_bash").expect("present");
        assert_eq!(counters.invocations, 2);
        assert_eq!(counters.errors, 1);
    }

    #[test]
    fn session_lifecycle_counts() {
        let metrics = GatewayMetrics::new();
        metrics.session_created();
        metrics.session_created();
        metrics.session_ended();
        assert_eq!(metrics.active_sessions(), 1);
    }
}
