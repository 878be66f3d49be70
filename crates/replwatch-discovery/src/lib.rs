//! replwatch-discovery — replication topology discovery.
//!
//! Scans every configured endpoint concurrently, correlates publications,
//! subscriptions, WAL senders and standby state into directed
//! [`ReplicationStream`](replwatch_state::ReplicationStream)s, and merges
//! them into the store in one batch per scan.
//!
//! # Architecture
//!
//! ```text
//! DiscoveryEngine::discover()
//!   ├── per endpoint (join_all, timeout): acquire → EndpointSnapshot
//!   ├── correlate(endpoints, snapshots)  → observed streams + role conflicts
//!   ├── plan_merge(stored, observed)     → upserts / inactive / removed
//!   └── StateStore::apply(WriteBatch)    → topology + ScanSummary
//! ```
//!
//! Logical streams can also be created and deleted here; physical streams
//! are monitor-only.

pub mod correlate;
pub mod engine;
pub mod error;
pub mod merge;
pub mod setup;
pub mod topology;

#[cfg(test)]
mod testutil;

pub use correlate::{Correlation, EndpointSnapshot, ObservedStream, correlate};
pub use engine::{DiscoveryConfig, DiscoveryEngine, DiscoveryReport, EndpointFailure};
pub use error::{
    DiscoveryError, DiscoveryResult, ReplicationSetupError, RollbackReport, SetupStep,
};
pub use setup::{
    CreateStreamRequest, StreamRemoval, StreamType, StreamValidation, ValidationCheck,
};
pub use topology::{TopologyEdge, TopologyGraph, TopologyNode, TopologySummary, build_topology};
