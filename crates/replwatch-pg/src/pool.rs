//! Per-endpoint connection pools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use replwatch_state::DatabaseEndpoint;

use crate::catalog::Session;
use crate::credentials::Credentials;
use crate::error::ConnectionError;

/// Pool sizing and lifetime, applied to every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Idle connections older than this are closed.
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub acquire_timeout_secs: u64,
    pub application_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1800,
            acquire_timeout_secs: 10,
            application_name: "replwatch".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
}

/// A pool of sessions to one endpoint.
#[async_trait]
pub trait SessionPool: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn Session>, ConnectionError>;

    fn stats(&self) -> PoolStats;

    /// Close every connection; later acquires fail.
    async fn close(&self);
}

/// Builds a pool for an endpoint from resolved credentials.
///
/// Building must not connect; connection errors surface on acquire.
pub trait PoolFactory: Send + Sync {
    fn build(
        &self,
        endpoint: &DatabaseEndpoint,
        credentials: &Credentials,
        config: &PoolConfig,
    ) -> Result<Arc<dyn SessionPool>, ConnectionError>;
}
