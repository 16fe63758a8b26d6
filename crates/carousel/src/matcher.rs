//! Transition candidate selection.
//!
//! Matching is an ordered linear scan over the model's declared transitions.
//! Declaration order is the tie-break: a concrete-source row declared before
//! a wildcard row for the same trigger takes precedence when both match.

use smallvec::SmallVec;

use crate::model::{FsmModel, TransitionDef, WILDCARD};

/// Transitions that structurally match `(current_state, trigger)`, in
/// declaration order. Guards are not consulted here; the engine evaluates
/// them lazily and picks the first candidate whose guard passes.
pub fn candidates<'a>(
    model: &'a FsmModel,
    current_state: &str,
    trigger: &str,
) -> SmallVec<[&'a TransitionDef; 4]> {
    model
        .transitions()
        .iter()
        .filter(|t| t.trigger == trigger && (t.source == current_state || t.source == WILDCARD))
        .collect()
}
