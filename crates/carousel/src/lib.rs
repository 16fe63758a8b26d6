//! # Carousel
//!
//! A declarative finite-state machine runtime where triggers decide, guards
//! gate, and timers drive.
//!
//! ## Core Concepts
//!
//! An operator declares machines as data — states, ordered transition rules,
//! an initial state — and drives them at runtime by firing named triggers:
//! - [`FsmModel`] = the validated, immutable definition shared by instances
//! - [`Engine`] = the runtime that matches triggers to transitions and
//!   commits state changes
//!
//! The key principle: **declaration order is the tie-break**. The first
//! declared transition that matches the fired trigger and passes its guard
//! wins; wildcard-source rows compete in the same ordered scan.
//!
//! ## Architecture
//!
//! ```text
//! Caller / fired timer
//!     │
//!     ▼ trigger(entity_id, name)
//! Engine ── registry: entity_id → FsmInstance (per-instance FIFO lock)
//!     │
//!     ├─► Matcher: ordered candidate scan over the FsmModel
//!     │
//!     ├─► GuardEvaluator.evaluate() ─► truthy? (errors fail closed)
//!     │
//!     ├─► commit: current_state, recent-transition buffer, timer epoch
//!     │        │
//!     │        └─► arm timeout ─► sleep ─► inject "timeout" trigger
//!     │
//!     ├─► ActionDispatcher.dispatch() (detached, in declared order)
//!     │
//!     └─► EventBus: started / succeeded / failed / actions_settled
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Models are immutable** - redefinition is a build-and-swap via reload
//! 2. **First match wins** - candidate selection is a linear scan, never a
//!    map lookup keyed by trigger
//! 3. **Guards fail closed** - an evaluator error rejects the transition
//! 4. **Commit before dispatch** - a dispatch failure never rolls back state
//! 5. **Stale timers are dropped** - every arm/cancel bumps an epoch checked
//!    under the instance lock when the timer fires
//!
//! ## Guarantees
//!
//! - **Per-instance FIFO**: triggers for one instance apply in arrival order
//! - **At-most-once events**: slow subscribers may lag and miss events
//! - **Containment**: no guard, action or timer failure can corrupt another
//!   instance or take the engine down
//!
//! ## Example
//!
//! ```
//! use carousel_core::{Engine, ModelConfig};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let config: ModelConfig = serde_json::from_value(serde_json::json!({
//!     "initial": "off",
//!     "states": [{"name": "off"}, {"name": "on"}],
//!     "transitions": [
//!         {"trigger": "motion", "source": "*", "dest": "on"},
//!         {"trigger": "quiet", "source": "on", "dest": "off"},
//!     ],
//! })).unwrap();
//!
//! let engine = Engine::builder().build();
//! engine.reload([("lamp".to_string(), config)]).await;
//!
//! engine.trigger("lamp", "motion").await.unwrap();
//! let snapshot = engine.snapshot("lamp").await.unwrap();
//! assert_eq!(snapshot.current_state, "on");
//! # }
//! ```

// Core modules
mod dispatch;
mod engine;
mod error;
mod event;
mod guard;
mod instance;
mod matcher;
mod model;


// Stress tests (test-only)
#[cfg(test)]
mod stress_tests;

// Re-export model types
pub use model::{
    ActionDef, FsmModel, ModelConfig, StateDef, TimeoutDef, TransitionDef, ValidationError,
    TIMEOUT_TRIGGER, WILDCARD,
};

// Re-export guard types
pub use guard::{is_truthy, GuardContext, GuardEvaluator, LiteralEvaluator};

// Re-export dispatch types
pub use dispatch::{ActionDispatcher, ActionStatus, NoOpDispatcher};

// Re-export event types
pub use event::{EventBus, FailureReason, FsmEvent};

// Re-export instance types
pub use instance::{InstanceSnapshot, RecentTransitions, TransitionRecord, RECENT_CAPACITY};

// Re-export error types
pub use error::EngineError;

// Re-export engine types (primary entry point)
pub use engine::{Engine, EngineBuilder, ReloadReport, TriggerOutcome};

// Re-export commonly used external types
pub use async_trait::async_trait;
