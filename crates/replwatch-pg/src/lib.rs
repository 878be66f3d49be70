//! replwatch-pg — connection management for monitored PostgreSQL endpoints.
//!
//! Resolves credentials lazily through a [`CredentialProvider`], keeps one
//! pool per endpoint, retries transient connection failures with
//! exponential backoff, and tracks per-endpoint health.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager
//!   ├── CredentialCache (TTL) ── CredentialProvider
//!   ├── pools: endpoint id → Arc<dyn SessionPool>  (built by a PoolFactory)
//!   ├── health: endpoint id → HealthTracker
//!   └── acquire() → PooledSession (Box<dyn Session>, returned to pool on drop)
//! ```
//!
//! [`Session`] is the catalog and DDL surface the engines use. The sqlx
//! implementation lives in [`postgres`]; the `test-utils` feature adds an
//! in-process fake cluster.

pub mod catalog;
pub mod conninfo;
pub mod credentials;
pub mod ddl;
pub mod error;
pub mod health;
pub mod manager;
pub mod pool;
pub mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use catalog::{
    LongRunningQuery, PublicationInfo, Session, SlotRetention, StandbyStatus, SubscriptionInfo,
    WalSenderInfo,
};
pub use credentials::{
    CredentialProvider, Credentials, EnvCredentialProvider, StaticCredentialProvider,
};
pub use error::{ConnectionError, CredentialError, QueryError};
pub use health::{EndpointHealth, HealthState};
pub use manager::{ConnectionConfig, ConnectionManager, HealthReport, PooledSession, RetryConfig};
pub use pool::{PoolConfig, PoolFactory, PoolStats, SessionPool};
