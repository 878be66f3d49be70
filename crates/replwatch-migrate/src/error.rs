//! Error types for migration execution.

use thiserror::Error;
use uuid::Uuid;

use replwatch_state::{MigrationStatus, StateError};

pub type MigrateResult<T> = Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("invalid migration: {0}")]
    Validation(String),

    #[error("database {database} ({database_id}) is locked by migration {execution_id}")]
    Conflict {
        database: String,
        database_id: Uuid,
        execution_id: Uuid,
    },

    #[error("migration {0} not found")]
    NotFound(Uuid),

    #[error("migration {id} is already {status:?}")]
    Finished { id: Uuid, status: MigrationStatus },
}
