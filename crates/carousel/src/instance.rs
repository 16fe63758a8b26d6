//! Live, mutable runtime state of one machine.
//!
//! An [`FsmInstance`] owns the only mutable fields in the system: the current
//! state, the timer epoch/handle, and a bounded buffer of recent transitions.
//! All of them are guarded by the engine's per-instance lock; nothing else
//! mutates them.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::model::{FsmModel, StateDef, TransitionDef};

/// How many recent transitions each instance retains.
pub const RECENT_CAPACITY: usize = 10;

/// One entry in the recent-transition buffer.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub transition_id: Uuid,
    pub trigger: String,
    pub from: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
    /// True for administrative moves that bypassed the matcher.
    pub forced: bool,
}

/// Fixed-capacity FIFO of [`TransitionRecord`]s; oldest entries are evicted
/// first once full.
#[derive(Debug)]
pub struct RecentTransitions {
    records: VecDeque<TransitionRecord>,
    capacity: usize,
}

impl RecentTransitions {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: TransitionRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in oldest-first order.
    pub fn to_vec(&self) -> Vec<TransitionRecord> {
        self.records.iter().cloned().collect()
    }
}

/// Read-only view of an instance's observable attributes.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub entity_id: String,
    pub current_state: String,
    pub current_state_description: String,
    pub available_states: Vec<String>,
    pub available_triggers: Vec<String>,
    pub available_transitions: Vec<TransitionDef>,
    pub recent_transitions: Vec<TransitionRecord>,
}

/// One live automaton.
pub(crate) struct FsmInstance {
    entity_id: String,
    model: Arc<FsmModel>,
    current_state: String,
    /// Bumped on every timer arm or cancel; a fired timer carrying a stale
    /// epoch is dropped without effect.
    timer_epoch: u64,
    timer_task: Option<JoinHandle<()>>,
    recent: RecentTransitions,
}

impl FsmInstance {
    pub fn new(entity_id: String, model: Arc<FsmModel>, recent_capacity: usize) -> Self {
        let current_state = model.initial().to_string();
        Self {
            entity_id,
            model,
            current_state,
            timer_epoch: 0,
            timer_task: None,
            recent: RecentTransitions::new(recent_capacity),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn model(&self) -> &Arc<FsmModel> {
        &self.model
    }

    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    pub fn set_current_state(&mut self, state: String) {
        debug_assert!(self.model.has_state(&state));
        self.current_state = state;
    }

    pub fn timer_epoch(&self) -> u64 {
        self.timer_epoch
    }

    /// Disarm any outstanding timer. Bumping the epoch is what guarantees a
    /// concurrently-firing timer is dropped; aborting the task is cleanup.
    pub fn cancel_timer(&mut self) {
        self.timer_epoch += 1;
        if let Some(task) = self.timer_task.take() {
            task.abort();
            tracing::debug!(entity_id = %self.entity_id, "timeout canceled");
        }
    }

    /// Reserve the epoch for a new timer. The caller spawns the sleep task
    /// with the returned epoch and hands its handle back via [`Self::set_timer_task`].
    pub fn arm_epoch(&mut self) -> u64 {
        self.timer_epoch += 1;
        self.timer_epoch
    }

    pub fn set_timer_task(&mut self, task: JoinHandle<()>) {
        self.timer_task = Some(task);
    }

    /// Forget the task handle after its timer fired; the epoch stays valid.
    pub fn take_timer_task(&mut self) -> Option<JoinHandle<()>> {
        self.timer_task.take()
    }

    pub fn push_record(&mut self, record: TransitionRecord) {
        self.recent.push(record);
    }

    pub fn recent(&self) -> &RecentTransitions {
        &self.recent
    }

    /// Swap in a rebuilt model. Returns `true` when the current state was not
    /// valid under the new model and the instance fell back to its initial
    /// state.
    pub fn swap_model(&mut self, model: Arc<FsmModel>) -> bool {
        let fell_back = !model.has_state(&self.current_state);
        if fell_back {
            self.current_state = model.initial().to_string();
        }
        self.model = model;
        fell_back
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        let description = self
            .model
            .state(&self.current_state)
            .map(|s: &StateDef| s.description.clone())
            .unwrap_or_default();
        InstanceSnapshot {
            entity_id: self.entity_id.clone(),
            current_state: self.current_state.clone(),
            current_state_description: description,
            available_states: self.model.states().iter().map(|s| s.name.clone()).collect(),
            available_triggers: self.model.available_triggers(&self.current_state),
            available_transitions: self.model.transitions().to_vec(),
            recent_transitions: self.recent.to_vec(),
        }
    }
}
