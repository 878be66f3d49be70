//! Error types for lag sampling.

use thiserror::Error;
use uuid::Uuid;

use replwatch_pg::ConnectionError;
use replwatch_state::{StateError, Timestamp};

pub type MetricsResult<T> = Result<T, MetricsError>;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("cannot reach {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: ConnectionError,
    },

    #[error("query on {endpoint} failed: {message}")]
    Query { endpoint: String, message: String },

    /// The stream's replication channel is not visible on its servers.
    #[error("stream {stream_id} not observed: {reason}")]
    NotObserved { stream_id: Uuid, reason: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("sample for stream {stream_id} at {at} is not after the latest at {latest}")]
    OutOfOrder {
        stream_id: Uuid,
        at: Timestamp,
        latest: Timestamp,
    },

    #[error("sampling stream {stream_id} timed out after {secs}s")]
    Timeout { stream_id: Uuid, secs: u64 },
}
