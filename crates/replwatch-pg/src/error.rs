//! Error types for connection management.

use std::time::Duration;

use thiserror::Error;

/// A credential reference could not be resolved. Never retried.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    #[error("no credentials found for reference '{0}'")]
    NotFound(String),

    #[error("credentials for '{reference}' are malformed: {reason}")]
    Malformed { reference: String, reason: String },

    #[error("credential provider unavailable: {0}")]
    Unavailable(String),
}

/// Failure to obtain a working connection to an endpoint.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("endpoint {endpoint} unreachable: {cause}")]
    Unreachable { endpoint: String, cause: String },

    #[error("timed out connecting to {endpoint} after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("endpoint {endpoint} rejected the connection: {cause}")]
    Rejected { endpoint: String, cause: String },

    #[error("giving up on {endpoint} after {attempts} attempts: {cause}")]
    Exhausted {
        endpoint: String,
        attempts: usize,
        cause: String,
    },
}

impl ConnectionError {
    /// Network-level failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionError::Unreachable { .. } | ConnectionError::Timeout { .. }
        )
    }

    /// Authentication/authorization failures suggest rotated credentials.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ConnectionError::Rejected { .. })
    }
}

/// A statement failed on an established session.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
    /// Five-character SQLSTATE when the server reported one.
    pub sqlstate: Option<String>,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sqlstate: None,
        }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        let sqlstate = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());
        Self {
            message: err.to_string(),
            sqlstate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let unreachable = ConnectionError::Unreachable {
            endpoint: "db1".into(),
            cause: "connection refused".into(),
        };
        let timeout = ConnectionError::Timeout {
            endpoint: "db1".into(),
            timeout: Duration::from_secs(1),
        };
        let rejected = ConnectionError::Rejected {
            endpoint: "db1".into(),
            cause: "password authentication failed".into(),
        };
        let credential = ConnectionError::from(CredentialError::NotFound("x".into()));

        assert!(unreachable.is_transient());
        assert!(timeout.is_transient());
        assert!(!rejected.is_transient());
        assert!(rejected.is_rejection());
        assert!(!credential.is_transient());
    }

    #[test]
    fn credential_error_message_names_reference() {
        let err = ConnectionError::from(CredentialError::NotFound("prod/orders".into()));
        assert!(err.to_string().contains("prod/orders"));
    }
}
