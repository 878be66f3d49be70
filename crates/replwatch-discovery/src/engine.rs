//! DiscoveryEngine — scans every endpoint and publishes the topology.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use replwatch_pg::{ConnectionManager, PooledSession, QueryError, Session};
use replwatch_state::{
    DatabaseEndpoint, ReplicationMetricSample, ReplicationStream, RoleInconsistency,
    ScanSummary, StateStore, WriteBatch,
};

use crate::correlate::{EndpointSnapshot, correlate};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::merge::plan_merge;
use crate::topology::{TopologyGraph, build_topology};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Bound on all catalog queries against one endpoint in a scan.
    pub endpoint_timeout_secs: u64,
    /// Consecutive misses tolerated before a stream is deleted.
    pub max_missed_scans: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoint_timeout_secs: 15,
            max_missed_scans: 3,
        }
    }
}

/// An endpoint that did not contribute to a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointFailure {
    pub endpoint_id: Uuid,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryReport {
    pub topology: TopologyGraph,
    /// Connection failed; connectivity alert candidates.
    pub unreachable: Vec<EndpointFailure>,
    /// Connected, but catalog queries failed.
    pub failed: Vec<EndpointFailure>,
    pub inconsistencies: Vec<RoleInconsistency>,
    pub streams_created: usize,
    pub streams_refreshed: usize,
    pub streams_marked_inactive: usize,
    pub streams_removed: usize,
    pub duration_ms: u64,
}

enum ScanOutcome {
    Reported(Box<EndpointSnapshot>),
    Unreachable(String),
    Failed(String),
}

pub struct DiscoveryEngine {
    pub(crate) store: StateStore,
    pub(crate) connections: Arc<ConnectionManager>,
    config: DiscoveryConfig,
    /// Serializes scans with each other, with endpoint removal and with
    /// stream creation and deletion.
    pub(crate) scan_lock: Mutex<()>,
}

impl DiscoveryEngine {
    pub fn new(
        store: StateStore,
        connections: Arc<ConnectionManager>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            connections,
            config,
            scan_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Scan every configured endpoint and merge what they report.
    ///
    /// All endpoints are queried concurrently. Nothing is written until every
    /// query has finished or timed out; the merge is one write batch.
    pub async fn discover(&self) -> DiscoveryResult<DiscoveryReport> {
        let _scan = self.scan_lock.lock().await;
        let started = Instant::now();
        let endpoints: Vec<DatabaseEndpoint> = self.store.list()?;
        let timeout = Duration::from_secs(self.config.endpoint_timeout_secs);

        let outcomes = join_all(endpoints.iter().map(|endpoint| async move {
            let outcome = match tokio::time::timeout(timeout, self.scan_endpoint(endpoint)).await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(endpoint_id = %endpoint.id, ?timeout, "endpoint scan timed out");
                    ScanOutcome::Unreachable(format!("no response within {timeout:?}"))
                }
            };
            (endpoint, outcome)
        }))
        .await;

        let mut snapshots = Vec::new();
        let mut unreachable = Vec::new();
        let mut failed = Vec::new();
        for (endpoint, outcome) in outcomes {
            let failure = |error: String| EndpointFailure {
                endpoint_id: endpoint.id,
                name: endpoint.name.clone(),
                error,
            };
            match outcome {
                ScanOutcome::Reported(snapshot) => snapshots.push(*snapshot),
                ScanOutcome::Unreachable(error) => unreachable.push(failure(error)),
                ScanOutcome::Failed(error) => failed.push(failure(error)),
            }
        }

        let now = Utc::now();
        let correlation = correlate(&endpoints, &snapshots, now);
        let scanned: HashSet<Uuid> = snapshots.iter().map(|s| s.endpoint_id).collect();
        let existing: Vec<ReplicationStream> = self.store.list()?;
        let plan = plan_merge(
            existing,
            &correlation.streams,
            &scanned,
            now,
            self.config.max_missed_scans,
        );

        for inconsistency in &correlation.inconsistencies {
            warn!(
                endpoint_id = %inconsistency.endpoint_id,
                configured = %inconsistency.configured,
                observed = %inconsistency.observed,
                "configured role contradicts replication state"
            );
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let summary = ScanSummary {
            finished_at: now,
            duration_ms,
            endpoints_scanned: snapshots.len(),
            unreachable: unreachable.iter().map(|f| f.endpoint_id).collect(),
            failed: failed.iter().map(|f| f.endpoint_id).collect(),
            streams_observed: correlation.streams.len(),
            inconsistencies: correlation.inconsistencies.clone(),
        };

        let mut batch = WriteBatch::new();
        for stream in &plan.upserts {
            batch.put(stream)?;
        }
        for id in &plan.removed {
            batch.delete::<ReplicationStream>(&id.to_string());
        }
        batch.put(&summary)?;
        self.store.apply(batch)?;

        for id in &plan.removed {
            self.store
                .delete_prefix::<ReplicationMetricSample>(&ReplicationMetricSample::stream_prefix(
                    *id,
                ))?;
        }

        info!(
            endpoints = endpoints.len(),
            scanned = snapshots.len(),
            unreachable = unreachable.len(),
            failed = failed.len(),
            created = plan.created,
            inactive = plan.marked_inactive,
            removed = plan.removed.len(),
            duration_ms,
            "discovery scan complete"
        );

        let streams: Vec<ReplicationStream> = self.store.list()?;
        Ok(DiscoveryReport {
            topology: build_topology(&endpoints, &streams),
            unreachable,
            failed,
            inconsistencies: correlation.inconsistencies,
            streams_created: plan.created,
            streams_refreshed: plan.refreshed,
            streams_marked_inactive: plan.marked_inactive,
            streams_removed: plan.removed.len(),
            duration_ms,
        })
    }

    /// Current topology from the store, without scanning.
    pub fn topology(&self) -> DiscoveryResult<TopologyGraph> {
        let endpoints: Vec<DatabaseEndpoint> = self.store.list()?;
        let streams: Vec<ReplicationStream> = self.store.list()?;
        Ok(build_topology(&endpoints, &streams))
    }

    /// Summary of the most recent scan, if any ran.
    pub fn last_scan(&self) -> DiscoveryResult<Option<ScanSummary>> {
        Ok(self.store.get(ScanSummary::KEY)?)
    }

    /// Delete an endpoint together with every stream it takes part in.
    /// Returns the number of streams removed.
    pub async fn remove_endpoint(&self, endpoint_id: Uuid) -> DiscoveryResult<usize> {
        let _scan = self.scan_lock.lock().await;
        self.endpoint(endpoint_id)?;
        let streams: Vec<ReplicationStream> = self
            .store
            .list::<ReplicationStream>()?
            .into_iter()
            .filter(|s| s.source_id == endpoint_id || s.target_id == endpoint_id)
            .collect();

        let mut batch = WriteBatch::new();
        batch.delete::<DatabaseEndpoint>(&endpoint_id.to_string());
        for stream in &streams {
            batch.delete::<ReplicationStream>(&stream.id.to_string());
        }
        self.store.apply(batch)?;
        for stream in &streams {
            self.store
                .delete_prefix::<ReplicationMetricSample>(&ReplicationMetricSample::stream_prefix(
                    stream.id,
                ))?;
        }
        self.connections.remove_endpoint(endpoint_id).await;
        info!(%endpoint_id, streams = streams.len(), "endpoint removed");
        Ok(streams.len())
    }

    pub(crate) fn endpoint(&self, id: Uuid) -> DiscoveryResult<DatabaseEndpoint> {
        self.store
            .get(&id.to_string())?
            .ok_or(DiscoveryError::NotFound {
                kind: "database",
                id,
            })
    }

    pub(crate) async fn connect(
        &self,
        endpoint: &DatabaseEndpoint,
    ) -> DiscoveryResult<PooledSession> {
        self.connections
            .acquire(endpoint)
            .await
            .map_err(|source| DiscoveryError::Connection {
                endpoint: endpoint.name.clone(),
                source,
            })
    }

    async fn scan_endpoint(&self, endpoint: &DatabaseEndpoint) -> ScanOutcome {
        let mut session = match self.connections.acquire(endpoint).await {
            Ok(session) => session,
            Err(e) => {
                warn!(endpoint_id = %endpoint.id, error = %e, "endpoint unreachable, skipped");
                return ScanOutcome::Unreachable(e.to_string());
            }
        };
        match read_snapshot(&mut *session, endpoint.id).await {
            Ok(snapshot) => {
                debug!(
                    endpoint_id = %endpoint.id,
                    publications = snapshot.publications.len(),
                    subscriptions = snapshot.subscriptions.len(),
                    senders = snapshot.wal_senders.len(),
                    "endpoint scanned"
                );
                ScanOutcome::Reported(Box::new(snapshot))
            }
            Err(e) => {
                warn!(endpoint_id = %endpoint.id, error = %e, "catalog query failed, endpoint skipped");
                ScanOutcome::Failed(e.to_string())
            }
        }
    }
}

async fn read_snapshot(
    session: &mut dyn Session,
    endpoint_id: Uuid,
) -> Result<EndpointSnapshot, QueryError> {
    Ok(EndpointSnapshot {
        endpoint_id,
        server_version: session.server_version().await?,
        current_lsn: session.current_wal_lsn().await.ok(),
        publications: session.publications().await?,
        subscriptions: session.subscriptions().await?,
        wal_senders: session.wal_senders().await?,
        standby: session.standby_status().await?,
    })
}
