//! Synthetic `guardrail://` resources exposed via `resources/read`.

use crate::tools::ToolContext;

const FOUR_LAWS: &str = "# The four laws\n\n\
1. Never touch production without a production-classified file first in this session.\n\
2. Three failed attempts at the same task is a halt, not a fourth attempt.\n\
3. Uncertainty above 'investigating' must be raised, not guessed through.\n\
4. A force push is never silent; it is always a warning or a rejection.\n";

const HALT_CONDITIONS: &str = "# Halt conditions\n\n\
- Three unresolved attempts at the same task.\n\
- Any pending critical halt event for the session.\n\
- Uncertainty at 'critical' or 'blocked'.\n\
- Two consecutive uncertainty records at 'high' or worse.\n";

const WORKFLOWS: &str = "# Workflows\n\n\
Call `init_session` first. Validate every bash command and git operation before \
running it. Record file reads you rely on. Record attempts on failure so the \
three-strikes counter can do its job.\n";

const STANDARDS: &str = "# Standards\n\n\
Commits follow Conventional Commits. Pushes to protected branches are warned; \
force pushes to them are rejected outright.\n";

const PRE_WORK_CHECKLIST: &str = "# Pre-work checklist\n\n\
- [ ] Session initialized\n- [ ] Affected files checked against the failure registry\n\
- [ ] Production code classified before touching tests or infra\n";

const AGENT_GUARDRAILS: &str = "# Agent guardrails\n\n\
This project is gated by a guardrail gateway. Every mutating action should be \
validated through its tools before being executed.\n";

/// Read a `guardrail://` resource by URI. Returns `(mime_type, text)`.
///
/// Markdown docs prefer an on-disk override under `ctx.config.docs_root` (so a
/// deployment can customize its guardrail briefing without a rebuild) and fall back to
/// the embedded copy when no such file exists.
pub async fn read(uri: &str, ctx: &ToolContext) -> Option<(&'static str, String)> {
    match uri {
        "guardrail://quick-reference" => Some(("application/json", quick_reference(ctx).await)),
        "guardrail://rules/active" => Some(("application/json", active_rules(ctx).await)),
        "guardrail://docs/agent-guardrails" => Some(("text/markdown", doc("agent-guardrails", AGENT_GUARDRAILS, ctx).await)),
        "guardrail://docs/four-laws" => Some(("text/markdown", doc("four-laws", FOUR_LAWS, ctx).await)),
        "guardrail://docs/halt-conditions" => Some(("text/markdown", doc("halt-conditions", HALT_CONDITIONS, ctx).await)),
        "guardrail://docs/workflows" => Some(("text/markdown", doc("workflows", WORKFLOWS, ctx).await)),
        "guardrail://docs/standards" => Some(("text/markdown", doc("standards", STANDARDS, ctx).await)),
        "guardrail://docs/pre-work-checklist" => {
            Some(("text/markdown", doc("pre-work-checklist", PRE_WORK_CHECKLIST, ctx).await))
        }
        _ => None,
    }
}

async fn doc(slug: &str, embedded: &'static str, ctx: &ToolContext) -> String {
    let path = std::path::Path::new(&ctx.config.docs_root).join(format!("{slug}.md"));
    tokio::fs::read_to_string(&path).await.unwrap_or_else(|_| embedded.to_string())
}

async fn quick_reference(ctx: &ToolContext) -> String {
    let rule_count = ctx.validation.cached_rule_count().await;
    serde_json::json!({
        "forbidden": ["rm -rf on root-adjacent paths", "force push to protected branches", "curl | sh"],
        "required_checks": ["validate_bash", "validate_git_operation", "validate_commit"],
        "active_rules_count": rule_count,
    })
    .to_string()
}

async fn active_rules(ctx: &ToolContext) -> String {
    let rules = ctx.storage.rules.list_enabled().await.unwrap_or_default();
    serde_json::to_string(&rules).unwrap_or_else(|_| "[]".to_string())
}
