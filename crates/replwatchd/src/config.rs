//! `replwatch.toml` — daemon configuration.
//!
//! Every section is optional; missing fields take the defaults defined next
//! to the component that uses them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::info;

use replwatch_alerts::AlertsConfig;
use replwatch_discovery::DiscoveryConfig;
use replwatch_metrics::SamplingConfig;
use replwatch_migrate::MigrationsConfig;
use replwatch_pg::{ConnectionConfig, Credentials};
use replwatch_scheduler::{EngineConfig, SchedulerConfig};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/replwatch"),
        }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("replwatch.redb")
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplwatchConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub connections: ConnectionConfig,
    pub discovery: DiscoveryConfig,
    pub sampling: SamplingConfig,
    pub alerts: AlertsConfig,
    pub migrations: MigrationsConfig,
    pub scheduler: SchedulerConfig,
    /// Inline secrets by reference, for local development. When empty,
    /// references are resolved from the environment.
    pub credentials: HashMap<String, Credentials>,
}

impl ReplwatchConfig {
    /// Read `path`, or fall back to defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: ReplwatchConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let intervals = [
            ("discovery_interval_secs", self.scheduler.discovery_interval_secs),
            ("sampling_interval_secs", self.scheduler.sampling_interval_secs),
            ("maintenance_interval_secs", self.scheduler.maintenance_interval_secs),
            ("purge_interval_secs", self.scheduler.purge_interval_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                bail!("scheduler.{name} must be at least 1");
            }
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            discovery: self.discovery.clone(),
            sampling: self.sampling.clone(),
            alerts: self.alerts.clone(),
            migrations: self.migrations.clone(),
        }
    }
}
