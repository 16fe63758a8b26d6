//! Trigger intake, transition commit, timer scheduling and reload.
//!
//! The engine owns a registry of instances and drives the per-request
//! pipeline: intake → match → guard check → state commit → timer
//! (re)scheduling → action dispatch → event emission.
//!
//! Each instance sits behind a fair `tokio::sync::Mutex`, so trigger
//! processing for one instance is serialized in arrival order while distinct
//! instances proceed concurrently. Match, guard evaluation and the state
//! commit all happen under that lock; only action dispatch runs afterwards in
//! a detached task, so a slow action never blocks the next trigger.
//!
//! Timers are one-shot `tokio::time::sleep` tasks that re-enter the trigger
//! pipeline with the synthetic [`TIMEOUT_TRIGGER`]. Every arm or cancel bumps
//! the instance's epoch; a fired timer re-checks its arm-time epoch under the
//! instance lock and is dropped when stale, closing the race between firing
//! and cancellation.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dispatch::{ActionDispatcher, ActionStatus, NoOpDispatcher};
use crate::error::EngineError;
use crate::event::{EventBus, FailureReason, FsmEvent};
use crate::guard::{is_truthy, GuardContext, GuardEvaluator, LiteralEvaluator};
use crate::instance::{FsmInstance, InstanceSnapshot, TransitionRecord, RECENT_CAPACITY};
use crate::matcher;
use crate::model::{
    ActionDef, FsmModel, ModelConfig, TimeoutDef, TransitionDef, ValidationError, TIMEOUT_TRIGGER,
};

/// Result of one trigger attempt.
///
/// Rejections are ordinary outcomes, observable as
/// [`FsmEvent::TransitionFailed`]; only an unaddressable instance is an
/// [`EngineError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Applied { from: String, to: String },
    NoMatch,
    GuardRejected,
}

/// Outcome of a [`Engine::reload`] pass.
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    /// Definitions that failed validation, per §7: each is rejected on its
    /// own; valid definitions in the same batch still activate, and an
    /// existing instance whose replacement was rejected keeps its old model.
    pub rejected: Vec<(String, ValidationError)>,
}

struct EngineInner {
    instances: DashMap<String, Arc<Mutex<FsmInstance>>>,
    guard: Arc<dyn GuardEvaluator>,
    dispatcher: Arc<dyn ActionDispatcher>,
    bus: EventBus,
    recent_capacity: usize,
}

/// The FSM runtime engine. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Configures and builds an [`Engine`].
///
/// ```
/// use carousel_core::{Engine, LiteralEvaluator, NoOpDispatcher};
///
/// let engine = Engine::builder()
///     .guard_evaluator(LiteralEvaluator)
///     .dispatcher(NoOpDispatcher)
///     .build();
/// ```
pub struct EngineBuilder {
    guard: Arc<dyn GuardEvaluator>,
    dispatcher: Arc<dyn ActionDispatcher>,
    bus: EventBus,
    recent_capacity: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            guard: Arc::new(LiteralEvaluator),
            dispatcher: Arc::new(NoOpDispatcher),
            bus: EventBus::new(),
            recent_capacity: RECENT_CAPACITY,
        }
    }

    pub fn guard_evaluator(mut self, guard: impl GuardEvaluator + 'static) -> Self {
        self.guard = Arc::new(guard);
        self
    }

    pub fn dispatcher(mut self, dispatcher: impl ActionDispatcher + 'static) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn recent_capacity(mut self, capacity: usize) -> Self {
        self.recent_capacity = capacity;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                instances: DashMap::new(),
                guard: self.guard,
                dispatcher: self.dispatcher,
                bus: self.bus,
                recent_capacity: self.recent_capacity,
            }),
        }
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Subscribe to the engine's lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FsmEvent> {
        self.inner.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Registered instance ids, in no particular order.
    pub fn instance_ids(&self) -> Vec<String> {
        self.inner.instances.iter().map(|e| e.key().clone()).collect()
    }

    /// Fire a named trigger at an instance and run the full pipeline.
    pub async fn trigger(
        &self,
        entity_id: &str,
        trigger: &str,
    ) -> Result<TriggerOutcome, EngineError> {
        let cell = self
            .instance(entity_id)
            .ok_or_else(|| EngineError::UnknownInstance(entity_id.to_string()))?;
        let mut inst = cell.lock().await;
        Ok(self.process_trigger(&mut inst, trigger).await)
    }

    /// Force the current state, bypassing matcher and guards.
    ///
    /// Cancels any pending timer and runs no actions; emits a
    /// [`FsmEvent::TransitionSucceeded`] with `forced: true`.
    pub async fn set_state(&self, entity_id: &str, state: &str) -> Result<(), EngineError> {
        let cell = self
            .instance(entity_id)
            .ok_or_else(|| EngineError::UnknownInstance(entity_id.to_string()))?;
        let mut inst = cell.lock().await;
        if !inst.model().has_state(state) {
            return Err(EngineError::UnknownState {
                entity_id: entity_id.to_string(),
                state: state.to_string(),
            });
        }
        self.apply_forced(&mut inst, state.to_string());
        Ok(())
    }

    /// Equivalent to [`Engine::set_state`] with the model's initial state.
    pub async fn reset(&self, entity_id: &str) -> Result<(), EngineError> {
        let cell = self
            .instance(entity_id)
            .ok_or_else(|| EngineError::UnknownInstance(entity_id.to_string()))?;
        let mut inst = cell.lock().await;
        let initial = inst.model().initial().to_string();
        self.apply_forced(&mut inst, initial);
        Ok(())
    }

    /// Read-only view of an instance's observable attributes.
    pub async fn snapshot(&self, entity_id: &str) -> Result<InstanceSnapshot, EngineError> {
        let cell = self
            .instance(entity_id)
            .ok_or_else(|| EngineError::UnknownInstance(entity_id.to_string()))?;
        let inst = cell.lock().await;
        Ok(inst.snapshot())
    }

    /// Apply a full configuration delivery: build every model first, then
    /// swap the registry in one pass.
    ///
    /// Instances absent from `configs` are removed (their timers canceled).
    /// Existing instances get the rebuilt model; if their current state is no
    /// longer declared they fall back to the new initial state with a
    /// warning. Definitions that fail validation are rejected individually
    /// and, for existing instances, leave the previous model in place.
    pub async fn reload(
        &self,
        configs: impl IntoIterator<Item = (String, ModelConfig)>,
    ) -> ReloadReport {
        let mut report = ReloadReport::default();
        let mut built: Vec<(String, Arc<FsmModel>)> = Vec::new();
        let mut delivered: HashSet<String> = HashSet::new();

        for (entity_id, config) in configs {
            delivered.insert(entity_id.clone());
            match FsmModel::build(config) {
                Ok(model) => built.push((entity_id, Arc::new(model))),
                Err(err) => {
                    tracing::error!(entity_id = %entity_id, error = %err, "definition rejected");
                    report.rejected.push((entity_id, err));
                }
            }
        }

        // Remove instances no longer mentioned at all. Ids with a rejected
        // definition stay registered under their old model.
        let existing: Vec<String> = self.instance_ids();
        for entity_id in existing {
            if !delivered.contains(&entity_id) {
                if let Some((_, cell)) = self.inner.instances.remove(&entity_id) {
                    let mut inst = cell.lock().await;
                    inst.cancel_timer();
                    tracing::info!(entity_id = %entity_id, "instance removed");
                    report.removed.push(entity_id);
                }
            }
        }

        for (entity_id, model) in built {
            let cell = self.instance(&entity_id);
            match cell {
                Some(cell) => {
                    let mut inst = cell.lock().await;
                    inst.cancel_timer();
                    let old_state = inst.current_state().to_string();
                    let fell_back = inst.swap_model(model);
                    if fell_back {
                        tracing::warn!(
                            entity_id = %entity_id,
                            old_state = %old_state,
                            initial = %inst.current_state(),
                            "current state not in new model; falling back to initial"
                        );
                    }
                    report.updated.push(entity_id);
                }
                None => {
                    let inst = FsmInstance::new(
                        entity_id.clone(),
                        model,
                        self.inner.recent_capacity,
                    );
                    self.inner
                        .instances
                        .insert(entity_id.clone(), Arc::new(Mutex::new(inst)));
                    report.added.push(entity_id);
                }
            }
        }

        tracing::info!(
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            rejected = report.rejected.len(),
            "reload complete"
        );
        report
    }

    fn instance(&self, entity_id: &str) -> Option<Arc<Mutex<FsmInstance>>> {
        self.inner.instances.get(entity_id).map(|e| e.value().clone())
    }

    /// The §4.5 pipeline, run under the instance lock.
    async fn process_trigger(&self, inst: &mut FsmInstance, trigger: &str) -> TriggerOutcome {
        let transition_id = Uuid::new_v4();
        let entity_id = inst.entity_id().to_string();
        let from = inst.current_state().to_string();
        let model = Arc::clone(inst.model());

        let candidates = matcher::candidates(&model, &from, trigger);
        if candidates.is_empty() {
            tracing::debug!(entity_id = %entity_id, trigger, state = %from, "no matching transition");
            self.inner.bus.emit(FsmEvent::TransitionFailed {
                entity_id,
                transition_id,
                trigger: trigger.to_string(),
                from,
                reason: FailureReason::NoMatchingTransition,
                guard_value: None,
            });
            return TriggerOutcome::NoMatch;
        }

        // First candidate whose guard passes wins; an absent guard always
        // passes, an evaluator error rejects that candidate (fail-closed).
        // `guard_value` belongs to the chosen candidate only; rejections are
        // tracked separately so they never leak into the success event.
        let mut chosen: Option<&TransitionDef> = None;
        let mut guard_value: Option<String> = None;
        let mut last_rejection: Option<String> = None;
        for candidate in candidates {
            match &candidate.guard {
                None => {
                    chosen = Some(candidate);
                    break;
                }
                Some(expr) => {
                    let ctx = GuardContext {
                        entity_id: &entity_id,
                        current_state: &from,
                        trigger,
                    };
                    match self.inner.guard.evaluate(expr, ctx).await {
                        Ok(rendered) => {
                            let passed = is_truthy(&rendered);
                            tracing::debug!(
                                entity_id = %entity_id,
                                guard = %expr,
                                rendered = %rendered,
                                passed,
                                "guard evaluated"
                            );
                            if passed {
                                guard_value = Some(rendered);
                                chosen = Some(candidate);
                                break;
                            }
                            last_rejection = Some(rendered);
                        }
                        Err(err) => {
                            tracing::warn!(
                                entity_id = %entity_id,
                                guard = %expr,
                                error = %err,
                                "guard evaluation failed; treating as rejection"
                            );
                            last_rejection = Some(format!("error: {err}"));
                        }
                    }
                }
            }
        }

        let Some(chosen) = chosen else {
            self.inner.bus.emit(FsmEvent::TransitionFailed {
                entity_id,
                transition_id,
                trigger: trigger.to_string(),
                from,
                reason: FailureReason::GuardRejected,
                guard_value: last_rejection,
            });
            return TriggerOutcome::GuardRejected;
        };

        self.inner.bus.emit(FsmEvent::TransitionStarted {
            entity_id: entity_id.clone(),
            transition_id,
            trigger: trigger.to_string(),
            from: from.clone(),
        });

        // Commit. The state change lands before any action is dispatched, so
        // concurrent observers (including racing guards) see the new state.
        let to = chosen.dest.clone();
        inst.set_current_state(to.clone());
        inst.push_record(TransitionRecord {
            transition_id,
            trigger: trigger.to_string(),
            from: from.clone(),
            to: to.clone(),
            timestamp: chrono::Utc::now(),
            forced: false,
        });
        inst.cancel_timer();
        if let Some(timeout) = &chosen.timeout {
            self.arm_timer(inst, timeout);
        }

        self.inner.bus.emit(FsmEvent::TransitionSucceeded {
            entity_id: entity_id.clone(),
            transition_id,
            trigger: trigger.to_string(),
            from: from.clone(),
            to: to.clone(),
            guard_value,
            forced: false,
        });
        tracing::debug!(entity_id = %entity_id, %from, %to, trigger, "transition committed");

        if !chosen.actions.is_empty() {
            self.dispatch_actions(entity_id, transition_id, chosen.actions.clone());
        }

        TriggerOutcome::Applied { from, to }
    }

    /// Run actions in declared order off the instance lock, then publish the
    /// collected outcomes as a follow-up diagnostic event.
    fn dispatch_actions(&self, entity_id: String, transition_id: Uuid, actions: Vec<ActionDef>) {
        let dispatcher = Arc::clone(&self.inner.dispatcher);
        let bus = self.inner.bus.clone();
        tokio::spawn(async move {
            let mut statuses = Vec::with_capacity(actions.len());
            for action in &actions {
                match dispatcher.dispatch(&entity_id, action).await {
                    Ok(()) => statuses.push(ActionStatus::ok(action)),
                    Err(err) => {
                        tracing::error!(
                            entity_id = %entity_id,
                            service = %action.service,
                            error = %err,
                            "action dispatch failed"
                        );
                        statuses.push(ActionStatus::failed(action, err));
                    }
                }
            }
            bus.emit(FsmEvent::ActionsSettled {
                entity_id,
                transition_id,
                statuses,
            });
        });
    }

    fn apply_forced(&self, inst: &mut FsmInstance, state: String) {
        let transition_id = Uuid::new_v4();
        let entity_id = inst.entity_id().to_string();
        let from = inst.current_state().to_string();
        inst.set_current_state(state.clone());
        inst.cancel_timer();
        inst.push_record(TransitionRecord {
            transition_id,
            trigger: "set_state".to_string(),
            from: from.clone(),
            to: state.clone(),
            timestamp: chrono::Utc::now(),
            forced: true,
        });
        self.inner.bus.emit(FsmEvent::TransitionSucceeded {
            entity_id: entity_id.clone(),
            transition_id,
            trigger: "set_state".to_string(),
            from,
            to: state,
            guard_value: None,
            forced: true,
        });
        tracing::debug!(entity_id = %entity_id, "state forced");
    }

    fn arm_timer(&self, inst: &mut FsmInstance, timeout: &TimeoutDef) {
        let epoch = inst.arm_epoch();
        let entity_id = inst.entity_id().to_string();
        let fallback_dest = timeout.dest.clone();
        // The deadline is fixed here, under the instance lock; computing it
        // inside the task would measure from its first poll instead.
        let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(timeout.seconds);
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                let engine = Engine { inner };
                engine.deliver_timeout(&entity_id, epoch, &fallback_dest).await;
            }
        });
        inst.set_timer_task(task);
        tracing::debug!(
            entity_id = %inst.entity_id(),
            seconds = timeout.seconds,
            epoch,
            "timeout armed"
        );
    }

    /// Entry point for fired timers. Joins the same per-instance queue as
    /// external triggers; stale epochs are dropped here, under the lock.
    async fn deliver_timeout(&self, entity_id: &str, epoch: u64, fallback_dest: &str) {
        let Some(cell) = self.instance(entity_id) else {
            return; // instance removed since arming
        };
        let mut inst = cell.lock().await;
        if inst.timer_epoch() != epoch {
            tracing::debug!(
                entity_id = %entity_id,
                armed_epoch = epoch,
                current_epoch = inst.timer_epoch(),
                "stale timeout dropped"
            );
            return;
        }
        drop(inst.take_timer_task());

        let declared = !matcher::candidates(inst.model(), inst.current_state(), TIMEOUT_TRIGGER)
            .is_empty();
        if declared {
            let _ = self.process_trigger(&mut inst, TIMEOUT_TRIGGER).await;
        } else if inst.model().has_state(fallback_dest) {
            // No declared row for the synthetic trigger: implicit, action-less
            // move to the armed destination. Never arms a further timeout.
            let transition_id = Uuid::new_v4();
            let from = inst.current_state().to_string();
            self.inner.bus.emit(FsmEvent::TransitionStarted {
                entity_id: entity_id.to_string(),
                transition_id,
                trigger: TIMEOUT_TRIGGER.to_string(),
                from: from.clone(),
            });
            inst.set_current_state(fallback_dest.to_string());
            inst.cancel_timer();
            inst.push_record(TransitionRecord {
                transition_id,
                trigger: TIMEOUT_TRIGGER.to_string(),
                from: from.clone(),
                to: fallback_dest.to_string(),
                timestamp: chrono::Utc::now(),
                forced: false,
            });
            self.inner.bus.emit(FsmEvent::TransitionSucceeded {
                entity_id: entity_id.to_string(),
                transition_id,
                trigger: TIMEOUT_TRIGGER.to_string(),
                from,
                to: fallback_dest.to_string(),
                guard_value: None,
                forced: false,
            });
        } else {
            tracing::warn!(
                entity_id = %entity_id,
                dest = %fallback_dest,
                "timeout destination no longer declared; dropping"
            );
        }
    }
}
