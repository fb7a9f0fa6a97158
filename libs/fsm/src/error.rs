//! State Machine Error Types

use thiserror::Error;

/// State violations; always programmer errors, never retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Machine '{machine}': unknown state {state}")]
    UnknownState { machine: String, state: String },

    #[error("Machine '{machine}': invalid transition from {from} to {to}")]
    InvalidTransition {
        machine: String,
        from: String,
        to: String,
    },

    #[error("Machine '{machine}': transition table references undeclared state {state}")]
    InvalidGraph { machine: String, state: String },
}

/// Result type alias for state machine operations
pub type Result<T> = std::result::Result<T, StateError>;
