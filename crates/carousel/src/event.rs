//! Typed lifecycle events and the broadcast bus that carries them.
//!
//! Every trigger attempt produces a small sequence of [`FsmEvent`] records:
//! `TransitionStarted` before the state mutates, then either
//! `TransitionSucceeded` or `TransitionFailed`. Action outcomes resolve
//! asynchronously and arrive as a follow-up `ActionsSettled` record tied to
//! the attempt by `transition_id`.
//!
//! Delivery is at-most-once and in-memory: slow subscribers may lag and miss
//! events, and nothing is replayed. Consumers needing durability must record
//! events themselves.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dispatch::ActionStatus;

/// Why a trigger attempt produced no transition.
///
/// Distinguished for telemetry; both surface as the same
/// [`FsmEvent::TransitionFailed`] event and leave the instance untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No declared transition matched `(current_state, trigger)`.
    NoMatchingTransition,
    /// Candidates existed but every guard rejected or errored.
    GuardRejected,
}

/// Lifecycle record emitted by the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FsmEvent {
    /// A transition was chosen and is about to commit.
    TransitionStarted {
        entity_id: String,
        transition_id: Uuid,
        trigger: String,
        from: String,
    },
    /// The state change committed. `forced` marks administrative moves
    /// (`set_state`/`reset`) that bypassed the matcher and guards.
    TransitionSucceeded {
        entity_id: String,
        transition_id: Uuid,
        trigger: String,
        from: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        guard_value: Option<String>,
        forced: bool,
    },
    /// The attempt was rejected; the instance's state is untouched.
    TransitionFailed {
        entity_id: String,
        transition_id: Uuid,
        trigger: String,
        from: String,
        reason: FailureReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        guard_value: Option<String>,
    },
    /// All action dispatch outcomes for a committed transition resolved.
    ActionsSettled {
        entity_id: String,
        transition_id: Uuid,
        statuses: Vec<ActionStatus>,
    },
}

impl FsmEvent {
    pub fn entity_id(&self) -> &str {
        match self {
            Self::TransitionStarted { entity_id, .. }
            | Self::TransitionSucceeded { entity_id, .. }
            | Self::TransitionFailed { entity_id, .. }
            | Self::ActionsSettled { entity_id, .. } => entity_id,
        }
    }
}

const DEFAULT_BUS_CAPACITY: usize = 256;

/// Broadcast channel for [`FsmEvent`] records.
///
/// Cheap to clone; emitting with no subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FsmEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn emit(&self, event: FsmEvent) {
        // Send only fails when nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FsmEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
