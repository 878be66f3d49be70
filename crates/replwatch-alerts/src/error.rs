//! Error types for the alert engine.

use thiserror::Error;
use uuid::Uuid;

use replwatch_state::{AlertStatus, StateError};

pub type AlertResult<T> = Result<T, AlertError>;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("alert {id} is {status:?} and cannot be {action}")]
    InvalidTransition {
        id: Uuid,
        status: AlertStatus,
        action: &'static str,
    },
}
