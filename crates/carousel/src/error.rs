//! Engine-level error taxonomy.
//!
//! Everything here is contained: no variant ever terminates the process or
//! touches another instance's state. Model build failures live in
//! [`ValidationError`](crate::ValidationError); rejected trigger attempts are
//! normal [`TriggerOutcome`](crate::TriggerOutcome) values, not errors.

use thiserror::Error;

/// Failures of administrative operations addressed to a specific instance.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown instance '{0}'")]
    UnknownInstance(String),

    #[error("state '{state}' is not declared for instance '{entity_id}'")]
    UnknownState { entity_id: String, state: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = EngineError::UnknownInstance("lamp".into());
        assert_eq!(err.to_string(), "unknown instance 'lamp'");

        let err = EngineError::UnknownState {
            entity_id: "lamp".into(),
            state: "limbo".into(),
        };
        assert!(err.to_string().contains("limbo"));
        assert!(err.to_string().contains("lamp"));
    }
}
