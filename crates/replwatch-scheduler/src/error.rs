//! Error type for background cycles.

use thiserror::Error;

use replwatch_alerts::AlertError;
use replwatch_discovery::DiscoveryError;
use replwatch_metrics::MetricsError;
use replwatch_migrate::MigrationError;
use replwatch_state::StateError;

pub type CycleResult<T> = Result<T, CycleError>;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("state store: {0}")]
    State(#[from] StateError),

    #[error("discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("sampling: {0}")]
    Metrics(#[from] MetricsError),

    #[error("alerting: {0}")]
    Alerts(#[from] AlertError),

    #[error("migrations: {0}")]
    Migrations(#[from] MigrationError),
}
