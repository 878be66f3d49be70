//! Error types for discovery and stream management.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use replwatch_pg::ConnectionError;
use replwatch_state::StateError;

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("stream {0} is monitor-only and cannot be changed")]
    NotManageable(Uuid),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot reach {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: ConnectionError,
    },

    #[error("query on {endpoint} failed: {message}")]
    Query { endpoint: String, message: String },

    #[error(transparent)]
    Setup(#[from] ReplicationSetupError),
}

/// Stage of stream creation that failed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    CreatePublication,
    ResolveConnection,
    CreateSubscription,
    Persist,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetupStep::CreatePublication => "create publication",
            SetupStep::ResolveConnection => "resolve publisher connection",
            SetupStep::CreateSubscription => "create subscription",
            SetupStep::Persist => "persist stream",
        };
        f.write_str(s)
    }
}

/// What the cleanup after a failed setup did.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RollbackReport {
    /// Cleanup statements that succeeded.
    pub completed: Vec<String>,
    /// Cleanup steps that failed, with their cause.
    pub failed: Vec<String>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for RollbackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.completed.is_empty() && self.failed.is_empty() {
            return f.write_str("nothing to roll back");
        }
        let mut parts = Vec::new();
        if !self.completed.is_empty() {
            parts.push(format!("done: {}", self.completed.join(", ")));
        }
        if !self.failed.is_empty() {
            parts.push(format!("failed: {}", self.failed.join(", ")));
        }
        f.write_str(&parts.join("; "))
    }
}

/// Logical stream creation failed part way; whatever it created was
/// cleaned up as far as possible.
#[derive(Debug, Clone, Error, Serialize)]
#[error("replication setup failed at {step}: {cause} (rollback {rollback})")]
pub struct ReplicationSetupError {
    pub step: SetupStep,
    pub cause: String,
    pub rollback: RollbackReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_error_names_step_cause_and_rollback() {
        let err = ReplicationSetupError {
            step: SetupStep::CreateSubscription,
            cause: "could not connect to the publisher".into(),
            rollback: RollbackReport {
                completed: vec!["dropped publication orders_pub".into()],
                failed: vec![],
            },
        };
        let text = err.to_string();
        assert!(text.contains("create subscription"));
        assert!(text.contains("could not connect"));
        assert!(text.contains("dropped publication orders_pub"));
        assert!(err.rollback.is_clean());
    }

    #[test]
    fn empty_rollback_reads_naturally() {
        assert_eq!(RollbackReport::default().to_string(), "nothing to roll back");
    }
}
