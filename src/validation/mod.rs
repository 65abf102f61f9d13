//! The validation engine: a TTL-refreshed, copy-on-write cache of compiled
//! [`PreventionRule`] patterns, matched by category.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use regex::Regex;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::models::{PreventionRule, Severity};
use crate::storage::RuleStore;

/// A single rule match, returned to the caller as part of a tool result.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
}

struct CompiledRule {
    rule: PreventionRule,
    pattern: Regex,
}

/// Engine state, swapped atomically on refresh so concurrent readers never observe a
/// half-built rule set.
struct RuleSet {
    compiled: Vec<CompiledRule>,
    loaded_at: Instant,
}

impl RuleSet {
    fn empty() -> Self {
        Self { compiled: Vec::new(), loaded_at: Instant::now() - Duration::from_secs(3600) }
    }
}

/// Evaluates inputs against the active prevention rule set. Safe for concurrent
/// readers; refreshing the rule set is a single atomic pointer swap, never a
/// read-modify-write visible to other readers.
pub struct ValidationEngine {
    store: Arc<dyn RuleStore>,
    ttl: Duration,
    state: ArcSwap<RuleSet>,
    refresh_lock: Mutex<()>,
}

impl ValidationEngine {
    #[must_use]
    pub fn new(store: Arc<dyn RuleStore>, ttl: Duration) -> Self {
        Self { store, ttl, state: ArcSwap::from_pointee(RuleSet::empty()), refresh_lock: Mutex::new(()) }
    }

    async fn ensure_fresh(&self) {
        if self.state.load().loaded_at.elapsed() < self.ttl {
            return;
        }
        // Only one refresh in flight at a time; everyone else keeps reading the stale
        // (but still valid) snapshot until it completes.
        let _guard = self.refresh_lock.lock().await;
        if self.state.load().loaded_at.elapsed() < self.ttl {
            return;
        }
        let rules = match self.store.list_enabled().await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(error = %e, "failed to refresh prevention rules, keeping stale cache");
                return;
            }
        };
        let compiled = rules
            .into_iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(pattern) => Some(CompiledRule { rule, pattern }),
                Err(e) => {
                    tracing::warn!(rule_id = %rule.id, error = %e, "skipping rule with invalid pattern");
                    None
                }
            })
            .collect();
        self.state.store(Arc::new(RuleSet { compiled, loaded_at: Instant::now() }));
    }

    /// Evaluate `input` against every enabled, compiled rule whose category intersects
    /// `categories`. Returns every match, in rule-catalog order.
    pub async fn validate(&self, input: &str, categories: &[&str]) -> Vec<Violation> {
        self.ensure_fresh().await;
        let state = self.state.load();
        state
            .compiled
            .iter()
            .filter(|c| categories.iter().any(|cat| *cat == c.rule.category))
            .filter(|c| c.pattern.is_match(input))
            .map(|c| Violation {
                rule_id: c.rule.id.clone(),
                rule_name: c.rule.name.clone(),
                severity: c.rule.severity,
                message: c.rule.message.clone(),
            })
            .collect()
    }

    /// Number of rules currently cached (for `meta.rules_evaluated` reporting).
    pub async fn cached_rule_count(&self) -> usize {
        self.ensure_fresh().await;
        self.state.load().compiled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryBackend;

    #[tokio::test]
    async fn force_push_matches_git_category() {
        let backend = Arc::new(InMemoryBackend::new());
        let engine = ValidationEngine::new(backend, Duration::from_secs(60));
        let violations = engine.validate("git push --force origin main", &["git", "git_operation"]).await;
        assert!(violations.iter().any(|v| v.rule_id == "PREVENT-002"));
    }

    #[tokio::test]
    async fn category_filter_excludes_unrelated_rules() {
        let backend = Arc::new(InMemoryBackend::new());
        let engine = ValidationEngine::new(backend, Duration::from_secs(60));
        let violations = engine.validate("git push --force origin main", &["docker"]).await;
        assert!(violations.is_empty());
    }

    #[tokio::test]
    async fn cache_refreshes_after_ttl_expires() {
        let backend = Arc::new(InMemoryBackend::new());
        let engine = ValidationEngine::new(backend, Duration::from_millis(5));
        assert!(engine.cached_rule_count().await > 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Still consistent after a forced refresh.
        assert!(engine.cached_rule_count().await > 0);
    }
}
