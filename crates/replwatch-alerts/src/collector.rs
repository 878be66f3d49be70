//! Gathers the observations one alert cycle evaluates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use replwatch_pg::{ConnectionManager, HealthState};
use replwatch_state::{
    AlertTarget, DatabaseEndpoint, LagBasis, MetricName, ReplicationMetricSample,
    ReplicationStream, StateStore, StreamStatus,
};

use crate::error::AlertResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    /// Queries running longer than this count as long-running.
    pub long_running_query_secs: u64,
    /// Bound on probing one endpoint for query and slot metrics.
    pub endpoint_timeout_secs: u64,
    /// WAL a database may retain for slots before the ratio reaches 1.0.
    pub wal_retention_limit_bytes: u64,
    /// Install the default thresholds at startup when none exist.
    pub seed_default_thresholds: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            long_running_query_secs: 30,
            endpoint_timeout_secs: 10,
            wal_retention_limit_bytes: 1 << 30,
            seed_default_thresholds: true,
        }
    }
}

/// One metric value for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric: MetricName,
    pub target: AlertTarget,
    pub value: f64,
    /// Human-readable name of the target, for alert text.
    pub subject: String,
}

/// Everything one cycle saw.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub observations: Vec<Observation>,
    /// Targets that currently exist, observed or not.
    pub targets: HashSet<AlertTarget>,
}

impl Collection {
    pub fn push(&mut self, metric: MetricName, target: AlertTarget, value: f64, subject: &str) {
        self.observations.push(Observation {
            metric,
            target,
            value,
            subject: subject.to_string(),
        });
    }
}

pub struct MetricCollector {
    store: StateStore,
    connections: Arc<ConnectionManager>,
    config: AlertsConfig,
}

impl MetricCollector {
    pub fn new(store: StateStore, connections: Arc<ConnectionManager>, config: AlertsConfig) -> Self {
        Self {
            store,
            connections,
            config,
        }
    }

    pub async fn collect(&self) -> AlertResult<Collection> {
        let endpoints: Vec<DatabaseEndpoint> = self.store.list()?;
        let streams: Vec<ReplicationStream> = self.store.list()?;
        let health = self.connections.health_snapshot().await;
        let mut collection = Collection::default();

        // Connectivity, from recorded health only.
        let mut probe = Vec::new();
        for endpoint in &endpoints {
            let target = AlertTarget::Database(endpoint.id);
            collection.targets.insert(target);
            match health.get(&endpoint.id) {
                Some(h) if h.status == HealthState::Healthy => {
                    collection.push(MetricName::DatabaseConnectionFailed, target, 0.0, &endpoint.name);
                    if let Some(latency) = h.latency_ms {
                        collection.push(
                            MetricName::DatabaseResponseTimeMs,
                            target,
                            latency as f64,
                            &endpoint.name,
                        );
                    }
                    probe.push(endpoint);
                }
                Some(h) if h.status == HealthState::Unhealthy => {
                    collection.push(MetricName::DatabaseConnectionFailed, target, 1.0, &endpoint.name);
                }
                _ => probe.push(endpoint),
            }
        }

        // Lag, from the latest sample of every stream still being sampled.
        // An errored stream's last sample is stale.
        for stream in &streams {
            let target = AlertTarget::Stream(stream.id);
            collection.targets.insert(target);
            if matches!(stream.status, StreamStatus::Inactive | StreamStatus::Error) {
                continue;
            }
            let latest: Option<ReplicationMetricSample> = self
                .store
                .last_with_prefix(&ReplicationMetricSample::stream_prefix(stream.id))?;
            let Some(sample) = latest else {
                continue;
            };
            let subject = stream_subject(&endpoints, stream);
            if sample.lag_seconds_basis != LagBasis::Unavailable {
                collection.push(
                    MetricName::ReplicationLagSeconds,
                    target,
                    sample.lag_seconds,
                    &subject,
                );
            }
            collection.push(
                MetricName::ReplicationLagBytes,
                target,
                sample.lag_bytes as f64,
                &subject,
            );
        }

        // Sessions and slots, probed concurrently.
        let timeout = Duration::from_secs(self.config.endpoint_timeout_secs);
        let probed = join_all(probe.into_iter().map(|endpoint| async move {
            let result = tokio::time::timeout(timeout, self.probe(endpoint)).await;
            (endpoint, result)
        }))
        .await;
        for (endpoint, result) in probed {
            match result {
                Ok(Ok(observations)) => collection.observations.extend(observations),
                Ok(Err(error)) => {
                    warn!(endpoint_id = %endpoint.id, %error, "metric probe failed");
                }
                Err(_) => {
                    warn!(endpoint_id = %endpoint.id, ?timeout, "metric probe timed out");
                }
            }
        }

        debug!(
            observations = collection.observations.len(),
            targets = collection.targets.len(),
            "alert metrics collected"
        );
        Ok(collection)
    }

    async fn probe(&self, endpoint: &DatabaseEndpoint) -> Result<Vec<Observation>, String> {
        let mut session = self
            .connections
            .acquire(endpoint)
            .await
            .map_err(|e| e.to_string())?;
        let target = AlertTarget::Database(endpoint.id);
        let mut out = Collection::default();

        let queries = session
            .long_running_queries(Duration::from_secs(self.config.long_running_query_secs))
            .await
            .map_err(|e| e.to_string())?;
        let longest = queries
            .iter()
            .map(|q| q.duration_secs)
            .fold(0.0_f64, f64::max);
        out.push(
            MetricName::LongRunningQueryCount,
            target,
            queries.len() as f64,
            &endpoint.name,
        );
        out.push(
            MetricName::LongRunningQueryMaxDuration,
            target,
            longest,
            &endpoint.name,
        );

        let slots = session.slot_retention().await.map_err(|e| e.to_string())?;
        let retained = slots.iter().map(|s| s.retained_bytes.max(0)).sum::<i64>();
        let limit = self.config.wal_retention_limit_bytes.max(1) as f64;
        out.push(
            MetricName::WalRetentionRatio,
            target,
            retained as f64 / limit,
            &endpoint.name,
        );

        Ok(out.observations)
    }
}

fn stream_subject(endpoints: &[DatabaseEndpoint], stream: &ReplicationStream) -> String {
    let name = |id: Uuid| {
        endpoints
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.clone())
            .or_else(|| {
                stream
                    .external_target
                    .as_ref()
                    .map(|t| t.application_name.clone())
            })
            .unwrap_or_else(|| id.to_string())
    };
    format!(
        "{} stream {} -> {}",
        stream.kind.label(),
        name(stream.source_id),
        name(stream.target_id)
    )
}
