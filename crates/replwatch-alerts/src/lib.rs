//! replwatch-alerts — threshold evaluation and alert lifecycle.
//!
//! # Architecture
//!
//! ```text
//! AlertEngine::run_cycle()
//!   ├── MetricCollector::collect()
//!   │     ├── connectivity + latency   (ConnectionManager health records)
//!   │     ├── lag                      (latest ReplicationMetricSample per stream)
//!   │     └── sessions + slots         (per endpoint, concurrent, timeout)
//!   └── evaluate()
//!         ├── enabled thresholds × matching observations → breaches per (type, target)
//!         ├── breach + open alert → refresh last_seen (escalate on severity change)
//!         ├── breach + no alert   → create, notify
//!         └── open alert, measured, no breach → auto-resolve
//! ```
//!
//! Every transition is a single `StateStore::update`, so administrator
//! actions and cycles interleave safely.

pub mod collector;
pub mod engine;
pub mod error;
pub mod health;
pub mod notify;
pub mod thresholds;

pub use collector::{AlertsConfig, Collection, MetricCollector, Observation};
pub use engine::{AlertEngine, EvaluationReport};
pub use error::{AlertError, AlertResult};
pub use health::{OverallStatus, SystemHealth};
pub use notify::{AlertNotifier, LogNotifier};
pub use thresholds::{ThresholdSpec, default_thresholds};
