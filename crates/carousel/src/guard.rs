//! Guard evaluation contract.
//!
//! Guard expressions are opaque to the engine; any expression language can be
//! plugged in behind [`GuardEvaluator`]. The engine only interprets the
//! rendered output via [`is_truthy`] and applies a fail-closed policy: an
//! evaluator error rejects the transition, it never propagates as a crash.

use async_trait::async_trait;

/// Runtime context handed to the evaluator alongside the expression.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub entity_id: &'a str,
    pub current_state: &'a str,
    pub trigger: &'a str,
}

/// Renders a guard expression to a textual value.
///
/// Implementations wrap whatever templating or expression engine the host
/// provides. The returned string is classified by [`is_truthy`]; an `Err`
/// counts as a rejection (fail-closed), with the error attached to the
/// failure event as diagnostic data.
#[async_trait]
pub trait GuardEvaluator: Send + Sync {
    async fn evaluate(&self, expr: &str, ctx: GuardContext<'_>) -> anyhow::Result<String>;
}

/// Recognized "true-ish" renderings: `1`, `true`, `yes`, `on` after trimming
/// and lowercasing. Everything else is falsy.
pub fn is_truthy(rendered: &str) -> bool {
    matches!(
        rendered.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Evaluator that treats the expression as its own rendered value.
///
/// Useful as a default and in tests: a guard of `"true"` passes, anything
/// else rejects. No templating is involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralEvaluator;

#[async_trait]
impl GuardEvaluator for LiteralEvaluator {
    async fn evaluate(&self, expr: &str, _ctx: GuardContext<'_>) -> anyhow::Result<String> {
        Ok(expr.to_string())
    }
}
