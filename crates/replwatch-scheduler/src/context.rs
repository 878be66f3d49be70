//! Application context — every component, built once at startup.
//!
//! API handlers and background cycles receive an `Arc<AppContext>`; there
//! are no globals.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use replwatch_alerts::{AlertEngine, AlertNotifier, AlertsConfig, LogNotifier};
use replwatch_discovery::{DiscoveryConfig, DiscoveryEngine};
use replwatch_metrics::{LagSampler, SamplingConfig};
use replwatch_migrate::{MigrationExecutor, MigrationsConfig};
use replwatch_pg::ConnectionManager;
use replwatch_state::StateStore;

use crate::error::CycleResult;

/// Configuration of the engines built on top of the store and the
/// connection manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub discovery: DiscoveryConfig,
    pub sampling: SamplingConfig,
    pub alerts: AlertsConfig,
    pub migrations: MigrationsConfig,
}

pub struct AppContext {
    pub store: StateStore,
    pub connections: Arc<ConnectionManager>,
    pub discovery: DiscoveryEngine,
    pub sampler: LagSampler,
    pub alerts: AlertEngine,
    pub migrations: Arc<MigrationExecutor>,
    pub config: EngineConfig,
}

impl AppContext {
    pub fn new(store: StateStore, connections: Arc<ConnectionManager>, config: EngineConfig) -> Self {
        Self::with_notifier(store, connections, config, Arc::new(LogNotifier))
    }

    pub fn with_notifier(
        store: StateStore,
        connections: Arc<ConnectionManager>,
        config: EngineConfig,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        let discovery =
            DiscoveryEngine::new(store.clone(), connections.clone(), config.discovery.clone());
        let sampler = LagSampler::new(store.clone(), connections.clone(), config.sampling.clone());
        let alerts = AlertEngine::with_notifier(
            store.clone(),
            connections.clone(),
            config.alerts.clone(),
            notifier,
        );
        let migrations = Arc::new(MigrationExecutor::new(
            store.clone(),
            connections.clone(),
            config.migrations.clone(),
        ));
        Self {
            store,
            connections,
            discovery,
            sampler,
            alerts,
            migrations,
            config,
        }
    }

    /// One-time startup work: default thresholds, interrupted migrations.
    pub fn prepare(&self) -> CycleResult<()> {
        if self.config.alerts.seed_default_thresholds {
            let seeded = self.alerts.seed_default_thresholds()?;
            if seeded > 0 {
                info!(seeded, "default alert thresholds installed");
            }
        }
        let recovered = self.migrations.recover_interrupted()?;
        if recovered > 0 {
            warn!(recovered, "migrations interrupted by the previous shutdown marked failed");
        }
        Ok(())
    }
}
