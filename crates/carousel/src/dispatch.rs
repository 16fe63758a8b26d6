//! Action dispatch contract.
//!
//! Actions are opaque payloads executed by the host after a transition has
//! committed. Dispatch is fire-and-forget relative to the state change: a
//! failed action never rolls the transition back, it only surfaces in the
//! per-action [`ActionStatus`] attached to the follow-up
//! [`FsmEvent::ActionsSettled`](crate::FsmEvent::ActionsSettled) record.

use async_trait::async_trait;
use serde::Serialize;

use crate::model::ActionDef;

/// Submits one action for execution on behalf of an instance.
///
/// Implementations wrap the host's service-call mechanism. Errors are
/// reported back for telemetry and must not panic.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, entity_id: &str, action: &ActionDef) -> anyhow::Result<()>;
}

/// Outcome of dispatching one action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionStatus {
    pub service: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionStatus {
    pub fn ok(action: &ActionDef) -> Self {
        Self {
            service: action.service.clone(),
            ok: true,
            error: None,
        }
    }

    pub fn failed(action: &ActionDef, error: impl ToString) -> Self {
        Self {
            service: action.service.clone(),
            ok: false,
            error: Some(error.to_string()),
        }
    }
}

/// Dispatcher that accepts every action without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDispatcher;

#[async_trait]
impl ActionDispatcher for NoOpDispatcher {
    async fn dispatch(&self, _entity_id: &str, _action: &ActionDef) -> anyhow::Result<()> {
        Ok(())
    }
}
