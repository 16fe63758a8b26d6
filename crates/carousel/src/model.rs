//! Validated, immutable FSM definitions.
//!
//! A [`ModelConfig`] is the raw, serde-shaped data an external loader hands
//! the engine. [`FsmModel::build`] validates it into an [`FsmModel`] that is
//! shared read-only across every instance created from it. Redefining a
//! machine means building a new model and swapping it in via
//! [`Engine::reload`](crate::Engine::reload); a built model is never mutated.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source marker matching any current state.
pub const WILDCARD: &str = "*";

/// The synthetic trigger delivered when an armed timeout elapses.
pub const TIMEOUT_TRIGGER: &str = "timeout";

/// One declared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Delayed automatic transition attached to a [`TransitionDef`].
///
/// Once the owning transition's `dest` is entered, a one-shot timer is armed
/// for `seconds`; on firing it injects [`TIMEOUT_TRIGGER`] into the normal
/// trigger pipeline. `dest` is the fallback destination applied when the
/// model declares no transition for the synthetic trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutDef {
    pub seconds: f64,
    pub dest: String,
}

/// Opaque unit of work forwarded verbatim to the
/// [`ActionDispatcher`](crate::ActionDispatcher) after a transition commits.
///
/// The engine never interprets `data`; it only preserves declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDef {
    pub service: String,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// One declared transition rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDef {
    pub trigger: String,
    /// A declared state name, or [`WILDCARD`] for "any state".
    pub source: String,
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

/// Raw machine definition as delivered by the configuration loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub initial: String,
    pub states: Vec<StateDef>,
    pub transitions: Vec<TransitionDef>,
}

/// Reasons a [`ModelConfig`] fails validation.
///
/// A failed build rejects that one definition; other definitions in the same
/// reload still activate.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("state name must be non-empty")]
    EmptyStateName,

    #[error("duplicate state '{0}'")]
    DuplicateState(String),

    #[error("no states declared")]
    NoStates,

    #[error("initial state '{0}' is not declared")]
    UnknownInitial(String),

    #[error("transition #{index} has an empty trigger")]
    EmptyTrigger { index: usize },

    // Field is `src`: thiserror reserves the name `source` for an error cause.
    #[error("transition #{index} ('{trigger}') has unknown source '{src}'")]
    UnknownSource {
        index: usize,
        trigger: String,
        src: String,
    },

    #[error("transition #{index} ('{trigger}') has unknown dest '{dest}'")]
    UnknownDest {
        index: usize,
        trigger: String,
        dest: String,
    },

    #[error("transition #{index} ('{trigger}') has unknown timeout dest '{dest}'")]
    UnknownTimeoutDest {
        index: usize,
        trigger: String,
        dest: String,
    },

    #[error("transition #{index} ('{trigger}') has non-positive timeout of {seconds}s")]
    NonPositiveTimeout {
        index: usize,
        trigger: String,
        seconds: f64,
    },

    #[error("transition #{index} ('{trigger}') has unrepresentable timeout of {seconds}s")]
    UnrepresentableTimeout {
        index: usize,
        trigger: String,
        seconds: f64,
    },
}

/// Upper bound on a timeout delay; anything longer is a config mistake and
/// would stress platform clock arithmetic for no practical gain.
const MAX_TIMEOUT_SECONDS: f64 = 3_153_600_000.0; // 100 years

/// Validated, immutable FSM definition.
///
/// Transition order is semantically load-bearing: the first declared row that
/// matches a `(state, trigger)` pair and passes its guard wins. Candidate
/// selection is therefore always a linear scan over `transitions`, never a
/// lookup keyed by trigger name.
#[derive(Debug)]
pub struct FsmModel {
    initial: String,
    states: Vec<StateDef>,
    transitions: Vec<TransitionDef>,
    state_names: HashSet<String>,
}

impl FsmModel {
    /// Validate a raw config into an immutable model.
    pub fn build(config: ModelConfig) -> Result<Self, ValidationError> {
        let ModelConfig {
            initial,
            states,
            transitions,
        } = config;

        if states.is_empty() {
            return Err(ValidationError::NoStates);
        }

        let mut state_names = HashSet::with_capacity(states.len());
        for state in &states {
            if state.name.is_empty() {
                return Err(ValidationError::EmptyStateName);
            }
            if !state_names.insert(state.name.clone()) {
                return Err(ValidationError::DuplicateState(state.name.clone()));
            }
        }

        if !state_names.contains(&initial) {
            return Err(ValidationError::UnknownInitial(initial));
        }

        let mut seen_pairs = HashSet::new();
        for (index, t) in transitions.iter().enumerate() {
            if t.trigger.is_empty() {
                return Err(ValidationError::EmptyTrigger { index });
            }
            if t.source != WILDCARD && !state_names.contains(&t.source) {
                return Err(ValidationError::UnknownSource {
                    index,
                    trigger: t.trigger.clone(),
                    src: t.source.clone(),
                });
            }
            if !state_names.contains(&t.dest) {
                return Err(ValidationError::UnknownDest {
                    index,
                    trigger: t.trigger.clone(),
                    dest: t.dest.clone(),
                });
            }
            if let Some(timeout) = &t.timeout {
                if !state_names.contains(&timeout.dest) {
                    return Err(ValidationError::UnknownTimeoutDest {
                        index,
                        trigger: t.trigger.clone(),
                        dest: timeout.dest.clone(),
                    });
                }
                if timeout.seconds <= 0.0 {
                    return Err(ValidationError::NonPositiveTimeout {
                        index,
                        trigger: t.trigger.clone(),
                        seconds: timeout.seconds,
                    });
                }
                // NaN passes the comparison above; catch it here along with
                // delays too large to ever convert or schedule.
                let representable = timeout.seconds <= MAX_TIMEOUT_SECONDS
                    && Duration::try_from_secs_f64(timeout.seconds).is_ok();
                if !representable {
                    return Err(ValidationError::UnrepresentableTimeout {
                        index,
                        trigger: t.trigger.clone(),
                        seconds: timeout.seconds,
                    });
                }
            }
            // Legal, but only the first row can ever win.
            if !seen_pairs.insert((t.source.clone(), t.trigger.clone())) {
                tracing::warn!(
                    source = %t.source,
                    trigger = %t.trigger,
                    "duplicate transition for (source, trigger); later rows are shadowed"
                );
            }
        }

        Ok(Self {
            initial,
            states,
            transitions,
            state_names,
        })
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    pub fn states(&self) -> &[StateDef] {
        &self.states
    }

    /// Declared transitions, in declaration order.
    pub fn transitions(&self) -> &[TransitionDef] {
        &self.transitions
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.state_names.contains(name)
    }

    pub fn state(&self, name: &str) -> Option<&StateDef> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Trigger names that can fire from `state`, wildcard rows included.
    /// Sorted and deduplicated.
    pub fn available_triggers(&self, state: &str) -> Vec<String> {
        let mut triggers: Vec<String> = self
            .transitions
            .iter()
            .filter(|t| t.source == state || t.source == WILDCARD)
            .map(|t| t.trigger.clone())
            .collect();
        triggers.sort();
        triggers.dedup();
        triggers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ModelConfig {
        serde_json::from_value(serde_json::json!({
            "initial": "off",
            "states": [
                {"name": "off"},
                {"name": "on", "description": "lamp is lit"},
                {"name": "dimmed"},
            ],
            "transitions": [
                {"trigger": "motion", "source": "*", "dest": "on"},
                {
                    "trigger": "no_motion",
                    "source": "on",
                    "dest": "dimmed",
                    "timeout": {"seconds": 2.0, "dest": "off"},
                },
                {"trigger": "timeout", "source": "dimmed", "dest": "off"},
            ],
        }))
        .unwrap()
    }

    #[test]
    fn builds_valid_config() {
        let model = FsmModel::build(config()).unwrap();
        assert_eq!(model.initial(), "off");
        assert_eq!(model.states().len(), 3);
        assert_eq!(model.transitions().len(), 3);
        assert!(model.has_state("dimmed"));
        assert!(!model.has_state("*"));
        assert_eq!(model.state("on").unwrap().description, "lamp is lit");
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg = config();
        assert_eq!(cfg.states[0].description, "");
        assert!(cfg.transitions[0].guard.is_none());
        assert!(cfg.transitions[0].actions.is_empty());
    }

    #[test]
    fn action_data_defaults_to_empty_object() {
        let action: ActionDef =
            serde_json::from_value(serde_json::json!({"service": "light.turn_on"})).unwrap();
        assert!(action.data.as_object().unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_initial() {
        let mut cfg = config();
        cfg.initial = "nowhere".into();
        assert!(matches!(
            FsmModel::build(cfg),
            Err(ValidationError::UnknownInitial(s)) if s == "nowhere"
        ));
    }

    #[test]
    fn rejects_duplicate_state() {
        let mut cfg = config();
        cfg.states.push(StateDef {
            name: "on".into(),
            description: String::new(),
        });
        assert!(matches!(
            FsmModel::build(cfg),
            Err(ValidationError::DuplicateState(s)) if s == "on"
        ));
    }

    #[test]
    fn rejects_empty_state_name() {
        let mut cfg = config();
        cfg.states.push(StateDef {
            name: String::new(),
            description: String::new(),
        });
        assert!(matches!(
            FsmModel::build(cfg),
            Err(ValidationError::EmptyStateName)
        ));
    }

    #[test]
    fn rejects_unknown_dest() {
        let mut cfg = config();
        cfg.transitions[0].dest = "limbo".into();
        assert!(matches!(
            FsmModel::build(cfg),
            Err(ValidationError::UnknownDest { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_unknown_source() {
        let mut cfg = config();
        cfg.transitions[2].source = "limbo".into();
        let err = FsmModel::build(cfg).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownSource { index: 2, .. }));
        assert!(err.to_string().contains("unknown source 'limbo'"));
    }

    #[test]
    fn wildcard_source_is_not_a_state() {
        // Wildcard passes source validation without being declared.
        let model = FsmModel::build(config()).unwrap();
        assert_eq!(model.transitions()[0].source, WILDCARD);
    }

    #[test]
    fn rejects_unknown_timeout_dest() {
        let mut cfg = config();
        cfg.transitions[1].timeout = Some(TimeoutDef {
            seconds: 2.0,
            dest: "limbo".into(),
        });
        assert!(matches!(
            FsmModel::build(cfg),
            Err(ValidationError::UnknownTimeoutDest { index: 1, .. })
        ));
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let mut cfg = config();
        cfg.transitions[1].timeout = Some(TimeoutDef {
            seconds: 0.0,
            dest: "off".into(),
        });
        assert!(matches!(
            FsmModel::build(cfg),
            Err(ValidationError::NonPositiveTimeout { .. })
        ));
    }

    #[test]
    fn rejects_nan_timeout() {
        let mut cfg = config();
        cfg.transitions[1].timeout = Some(TimeoutDef {
            seconds: f64::NAN,
            dest: "off".into(),
        });
        assert!(matches!(
            FsmModel::build(cfg),
            Err(ValidationError::UnrepresentableTimeout { index: 1, .. })
        ));
    }

    #[test]
    fn rejects_timeout_too_large_for_a_duration() {
        let mut cfg = config();
        cfg.transitions[1].timeout = Some(TimeoutDef {
            seconds: 1e300,
            dest: "off".into(),
        });
        assert!(matches!(
            FsmModel::build(cfg),
            Err(ValidationError::UnrepresentableTimeout { .. })
        ));
    }

    #[test]
    fn rejects_empty_trigger() {
        let mut cfg = config();
        cfg.transitions[0].trigger = String::new();
        assert!(matches!(
            FsmModel::build(cfg),
            Err(ValidationError::EmptyTrigger { index: 0 })
        ));
    }

    #[test]
    fn available_triggers_include_wildcard_rows() {
        let model = FsmModel::build(config()).unwrap();
        assert_eq!(model.available_triggers("on"), vec!["motion", "no_motion"]);
        assert_eq!(model.available_triggers("dimmed"), vec!["motion", "timeout"]);
        assert_eq!(model.available_triggers("off"), vec!["motion"]);
    }

    #[test]
    fn available_triggers_are_deduplicated() {
        let mut cfg = config();
        cfg.transitions.push(TransitionDef {
            trigger: "motion".into(),
            source: "off".into(),
            dest: "on".into(),
            guard: None,
            timeout: None,
            actions: Vec::new(),
        });
        let model = FsmModel::build(cfg).unwrap();
        assert_eq!(model.available_triggers("off"), vec!["motion"]);
    }
}
