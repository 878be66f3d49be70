//! replwatch-scheduler — application context and background cycles.
//!
//! ```text
//! AppContext (built once, shared as Arc)
//!   ├── StateStore, ConnectionManager
//!   ├── DiscoveryEngine, LagSampler, AlertEngine, MigrationExecutor
//!   └── prepare(): seed thresholds, fail interrupted migrations
//!
//! start(ctx, SchedulerConfig) → SchedulerHandle
//!   ├── discovery     every discovery_interval_secs
//!   ├── sampling      sample_all, then AlertEngine::run_cycle
//!   ├── maintenance   ConnectionManager::maintain
//!   └── purge         StateStore::purge_expired
//! ```

pub mod context;
pub mod cycles;
pub mod error;

pub use context::{AppContext, EngineConfig};
pub use cycles::{
    SchedulerConfig, SchedulerHandle, run_discovery_cycle, run_maintenance_cycle,
    run_purge_cycle, run_sampling_cycle, start,
};
pub use error::{CycleError, CycleResult};
