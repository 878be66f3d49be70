//! replwatch-metrics — replication lag sampling and exposition.
//!
//! Computes byte and time lag for logical and physical streams from catalog
//! snapshots, persists samples with a TTL, writes the latest lag back onto
//! each stream record, and renders Prometheus text.

pub mod error;
pub mod lag;
pub mod prometheus;
pub mod sampler;

pub use error::{MetricsError, MetricsResult};
pub use lag::{LagFigures, logical_lag, physical_lag};
pub use prometheus::render_prometheus;
pub use sampler::{LagSampler, SamplingConfig, SamplingReport};
