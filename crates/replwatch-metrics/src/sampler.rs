//! LagSampler — observes every stream's lag and persists the samples.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use replwatch_pg::{ConnectionManager, PooledSession, SubscriptionInfo, WalSenderInfo};
use replwatch_state::{
    DatabaseEndpoint, ReplicationMetricSample, ReplicationStream, StateStore, StreamKind,
    StreamStatus,
};

use crate::error::{MetricsError, MetricsResult};
use crate::lag::{LagFigures, logical_lag, physical_lag};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// Bound on observing a single stream.
    pub stream_timeout_secs: u64,
    /// Retention of persisted samples.
    pub sample_ttl_secs: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            stream_timeout_secs: 10,
            sample_ttl_secs: 86_400,
        }
    }
}

/// Outcome of one sampling cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SamplingReport {
    pub sampled: usize,
    /// Stream id and error for every stream that could not be sampled.
    pub failed: Vec<(Uuid, String)>,
    /// Inactive streams, not sampled.
    pub skipped: usize,
}

struct Observation {
    figures: LagFigures,
    status: StreamStatus,
}

pub struct LagSampler {
    store: StateStore,
    connections: Arc<ConnectionManager>,
    config: SamplingConfig,
}

impl LagSampler {
    pub fn new(
        store: StateStore,
        connections: Arc<ConnectionManager>,
        config: SamplingConfig,
    ) -> Self {
        Self {
            store,
            connections,
            config,
        }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Observe one stream now, persist the sample and write the lag back
    /// onto the stream record.
    pub async fn sample(&self, stream: &ReplicationStream) -> MetricsResult<ReplicationMetricSample> {
        let observation = match &stream.kind {
            StreamKind::Logical { subscription, .. } => {
                self.observe_logical(stream, subscription).await?
            }
            StreamKind::Physical {
                application_name,
                client_addr,
                ..
            } => {
                self.observe_physical(stream, application_name, client_addr.as_deref())
                    .await?
            }
        };
        let sample = observation.figures.into_sample(stream.id, Utc::now());
        self.record(&sample, observation.status)?;
        Ok(sample)
    }

    /// Persist a sample and apply it to its stream.
    ///
    /// Samples of one stream must arrive in strictly increasing time order,
    /// at millisecond resolution.
    pub fn record(
        &self,
        sample: &ReplicationMetricSample,
        status: StreamStatus,
    ) -> MetricsResult<()> {
        let refused = self.store.append_with_ttl(
            sample,
            &ReplicationMetricSample::stream_prefix(sample.stream_id),
            Duration::from_secs(self.config.sample_ttl_secs),
        )?;
        if let Some(latest) = refused {
            return Err(MetricsError::OutOfOrder {
                stream_id: sample.stream_id,
                at: sample.timestamp,
                latest: latest.timestamp,
            });
        }

        let updated = self
            .store
            .update::<ReplicationStream, _>(&sample.stream_id.to_string(), |stream| {
                stream.lag_bytes = Some(sample.lag_bytes);
                stream.lag_seconds = Some(sample.lag_seconds);
                stream.status = status;
                stream.error_message = None;
                if status == StreamStatus::Active {
                    stream.last_sync_at = Some(sample.timestamp);
                }
                stream.updated_at = sample.timestamp;
                true
            })?;
        if updated.is_none() {
            // Removed by a concurrent scan; the sample expires on its own.
            debug!(stream_id = %sample.stream_id, "sampled stream no longer stored");
        }
        Ok(())
    }

    /// Sample every stream that is not inactive, concurrently.
    ///
    /// Per-stream failures are recorded on the stream and reported; they do
    /// not fail the cycle.
    pub async fn sample_all(&self) -> MetricsResult<SamplingReport> {
        let streams: Vec<ReplicationStream> = self.store.list()?;
        let timeout = Duration::from_secs(self.config.stream_timeout_secs);
        let (inactive, due): (Vec<_>, Vec<_>) = streams
            .into_iter()
            .partition(|s| s.status == StreamStatus::Inactive);

        let outcomes = join_all(due.iter().map(|stream| async move {
            let outcome = match tokio::time::timeout(timeout, self.sample(stream)).await {
                Ok(result) => result,
                Err(_) => Err(MetricsError::Timeout {
                    stream_id: stream.id,
                    secs: timeout.as_secs(),
                }),
            };
            (stream.id, outcome)
        }))
        .await;

        let mut report = SamplingReport {
            skipped: inactive.len(),
            ..SamplingReport::default()
        };
        for (stream_id, outcome) in outcomes {
            match outcome {
                Ok(_) => report.sampled += 1,
                Err(e) => {
                    warn!(%stream_id, error = %e, "lag sampling failed");
                    self.mark_failed(stream_id, &e.to_string())?;
                    report.failed.push((stream_id, e.to_string()));
                }
            }
        }

        info!(
            sampled = report.sampled,
            failed = report.failed.len(),
            skipped = report.skipped,
            "lag sampling complete"
        );
        Ok(report)
    }

    /// Most recent sample of a stream.
    pub fn latest(&self, stream_id: Uuid) -> MetricsResult<Option<ReplicationMetricSample>> {
        Ok(self
            .store
            .last_with_prefix(&ReplicationMetricSample::stream_prefix(stream_id))?)
    }

    /// Up to `limit` most recent samples, oldest first.
    pub fn history(
        &self,
        stream_id: Uuid,
        limit: usize,
    ) -> MetricsResult<Vec<ReplicationMetricSample>> {
        Ok(self
            .store
            .list_prefix(&ReplicationMetricSample::stream_prefix(stream_id), limit)?)
    }

    fn mark_failed(&self, stream_id: Uuid, error: &str) -> MetricsResult<()> {
        let now = Utc::now();
        self.store
            .update::<ReplicationStream, _>(&stream_id.to_string(), |stream| {
                stream.status = StreamStatus::Error;
                stream.error_message = Some(error.to_string());
                stream.updated_at = now;
                true
            })?;
        Ok(())
    }

    // ── Observation ────────────────────────────────────────────────

    async fn observe_logical(
        &self,
        stream: &ReplicationStream,
        subscription: &str,
    ) -> MetricsResult<Observation> {
        let source = self.endpoint(stream.source_id)?;
        let target = self.endpoint(stream.target_id)?;

        let publisher_lsn = {
            let mut session = self.connect(&source).await?;
            session
                .current_wal_lsn()
                .await
                .map_err(|e| query_error(&source, e))?
        };

        let info: SubscriptionInfo = {
            let mut session = self.connect(&target).await?;
            session
                .subscriptions()
                .await
                .map_err(|e| query_error(&target, e))?
                .into_iter()
                .find(|s| s.name == subscription)
                .ok_or_else(|| MetricsError::NotObserved {
                    stream_id: stream.id,
                    reason: format!("subscription {subscription} missing on {}", target.name),
                })?
        };

        let status = if !info.enabled {
            StreamStatus::Inactive
        } else if info.is_backfilling() {
            StreamStatus::Syncing
        } else {
            StreamStatus::Active
        };
        Ok(Observation {
            figures: logical_lag(publisher_lsn, &info, Utc::now()),
            status,
        })
    }

    async fn observe_physical(
        &self,
        stream: &ReplicationStream,
        application_name: &str,
        client_addr: Option<&str>,
    ) -> MetricsResult<Observation> {
        let source = self.endpoint(stream.source_id)?;
        let senders = {
            let mut session = self.connect(&source).await?;
            session
                .wal_senders()
                .await
                .map_err(|e| query_error(&source, e))?
        };

        let sender: WalSenderInfo = senders
            .into_iter()
            .filter(|s| !s.is_logical())
            .find(|s| s.application_name == application_name && s.client_addr.as_deref() == client_addr)
            .ok_or_else(|| MetricsError::NotObserved {
                stream_id: stream.id,
                reason: format!("no WAL sender for {application_name} on {}", source.name),
            })?;

        let previous = self.latest(stream.id)?;
        let status = match sender.state.as_str() {
            "streaming" => StreamStatus::Active,
            "startup" | "catchup" | "backup" => StreamStatus::Syncing,
            _ => StreamStatus::Inactive,
        };
        Ok(Observation {
            figures: physical_lag(&sender, previous.as_ref(), Utc::now()),
            status,
        })
    }

    fn endpoint(&self, id: Uuid) -> MetricsResult<DatabaseEndpoint> {
        self.store
            .get(&id.to_string())?
            .ok_or(MetricsError::NotFound {
                kind: "database",
                id,
            })
    }

    async fn connect(&self, endpoint: &DatabaseEndpoint) -> MetricsResult<PooledSession> {
        self.connections
            .acquire(endpoint)
            .await
            .map_err(|source| MetricsError::Connection {
                endpoint: endpoint.name.clone(),
                source,
            })
    }
}

fn query_error(endpoint: &DatabaseEndpoint, e: replwatch_pg::QueryError) -> MetricsError {
    MetricsError::Query {
        endpoint: endpoint.name.clone(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use replwatch_pg::testing::{FakeCluster, FakeDatabase};
    use replwatch_state::{DatabaseRole, EndpointSpec, LagBasis, Lsn};

    struct Fixture {
        store: StateStore,
        cluster: FakeCluster,
        sampler: LagSampler,
    }

    fn fixture() -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = FakeCluster::new();
        let sampler = LagSampler::new(store.clone(), cluster.manager(), SamplingConfig::default());
        Fixture {
            store,
            cluster,
            sampler,
        }
    }

    fn endpoint(store: &StateStore, name: &str, host: &str, role: DatabaseRole) -> DatabaseEndpoint {
        let endpoint = DatabaseEndpoint::create(EndpointSpec {
            name: name.into(),
            host: host.into(),
            port: 5432,
            database: "app".into(),
            role,
            environment: "test".into(),
            cloud_provider: "aws".into(),
            credential_ref: format!("secret/{name}"),
            use_iam_auth: false,
        })
        .unwrap();
        store.put(&endpoint).unwrap();
        endpoint
    }

    fn stream(store: &StateStore, source: Uuid, target: Uuid, kind: StreamKind) -> ReplicationStream {
        let now = Utc::now();
        let stream = ReplicationStream {
            id: Uuid::new_v4(),
            source_id: source,
            target_id: target,
            manageable: kind.is_logical(),
            kind,
            status: StreamStatus::Active,
            lag_bytes: None,
            lag_seconds: None,
            last_sync_at: None,
            error_message: None,
            external_target: None,
            missed_scans: 0,
            created_at: now,
            updated_at: now,
            last_seen_at: now,
        };
        store.put(&stream).unwrap();
        stream
    }

    fn lsn(s: &str) -> Lsn {
        s.parse().unwrap()
    }

    fn physical_setup(f: &Fixture, sent: &str, flush: &str) -> ReplicationStream {
        let primary = endpoint(&f.store, "primary", "10.0.0.1", DatabaseRole::Primary);
        let replica = endpoint(&f.store, "replica", "10.0.0.2", DatabaseRole::Replica);
        let mut sender = FakeDatabase::wal_sender(4242, "walreceiver", "10.0.0.2");
        sender.sent_lsn = Some(lsn(sent));
        sender.flush_lsn = Some(lsn(flush));
        f.cluster
            .add(primary.id, FakeDatabase::primary().with_wal_sender(sender));
        f.cluster
            .add(replica.id, FakeDatabase::standby("10.0.0.1", 5432));
        stream(
            &f.store,
            primary.id,
            replica.id,
            StreamKind::Physical {
                application_name: "walreceiver".into(),
                slot_name: None,
                sender_pid: Some(4242),
                client_addr: Some("10.0.0.2".into()),
            },
        )
    }

    #[tokio::test]
    async fn physical_sample_is_persisted_and_applied() {
        let f = fixture();
        let s = physical_setup(&f, "0/3000800", "0/3000000");

        let sample = f.sampler.sample(&s).await.unwrap();
        assert_eq!(sample.lag_bytes, 0x800);
        assert_eq!(sample.lag_seconds_basis, LagBasis::Unavailable);

        let stored: ReplicationStream = f.store.require(&s.id.to_string()).unwrap();
        assert_eq!(stored.lag_bytes, Some(0x800));
        assert_eq!(stored.status, StreamStatus::Active);
        assert_eq!(f.sampler.latest(s.id).unwrap(), Some(sample));
    }

    #[tokio::test]
    async fn logical_sample_reads_both_sides() {
        let f = fixture();
        let source = endpoint(&f.store, "orders", "10.0.1.1", DatabaseRole::Primary);
        let target = endpoint(&f.store, "analytics", "10.0.1.2", DatabaseRole::Replica);
        let mut sub = FakeDatabase::subscription(
            "stream1",
            "host=10.0.1.1 port=5432 dbname=app",
            "pub1",
        );
        sub.latest_end_lsn = Some(lsn("0/3000000"));
        sub.latest_end_time = Some(Utc::now() - ChronoDuration::seconds(30));
        sub.synced_tables = 2;
        sub.total_tables = 2;
        f.cluster.add(
            source.id,
            FakeDatabase::primary()
                .with_lsn("0/3000400")
                .with_publication("pub1"),
        );
        f.cluster
            .add(target.id, FakeDatabase::primary().with_subscription(sub));
        let s = stream(
            &f.store,
            source.id,
            target.id,
            StreamKind::Logical {
                publication: "pub1".into(),
                subscription: "stream1".into(),
            },
        );

        let sample = f.sampler.sample(&s).await.unwrap();
        assert_eq!(sample.lag_bytes, 0x400);
        assert!(sample.lag_seconds >= 30.0);
        assert_eq!(sample.backfill_progress, Some(100.0));
    }

    #[tokio::test]
    async fn out_of_order_sample_is_rejected() {
        let f = fixture();
        let s = physical_setup(&f, "0/3000000", "0/3000000");
        let first = f.sampler.sample(&s).await.unwrap();

        let mut stale = first.clone();
        stale.timestamp = first.timestamp - ChronoDuration::seconds(5);
        let err = f
            .sampler
            .record(&stale, StreamStatus::Active)
            .unwrap_err();
        assert!(matches!(err, MetricsError::OutOfOrder { .. }));
        assert_eq!(f.sampler.history(s.id, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_records_of_one_instant_keep_one_sample() {
        let f = fixture();
        let s = physical_setup(&f, "0/3000000", "0/3000000");
        let mut sample = f.sampler.sample(&s).await.unwrap();
        sample.timestamp = sample.timestamp + ChronoDuration::seconds(1);

        let outcomes: Vec<MetricsResult<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| f.sampler.record(&sample, StreamStatus::Active)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .filter_map(|o| o.as_ref().err())
                .all(|e| matches!(e, MetricsError::OutOfOrder { .. }))
        );
        assert_eq!(f.sampler.history(s.id, 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sample_all_records_failures_and_skips_inactive() {
        let f = fixture();
        let healthy = physical_setup(&f, "0/3000000", "0/3000000");

        let lost = endpoint(&f.store, "lost", "10.9.9.9", DatabaseRole::Primary);
        f.cluster.add(lost.id, FakeDatabase::primary().unreachable());
        let broken = stream(
            &f.store,
            lost.id,
            healthy.target_id,
            StreamKind::Logical {
                publication: "p".into(),
                subscription: "s".into(),
            },
        );
        let mut idle = stream(
            &f.store,
            healthy.source_id,
            lost.id,
            StreamKind::Logical {
                publication: "p".into(),
                subscription: "idle".into(),
            },
        );
        idle.status = StreamStatus::Inactive;
        f.store.put(&idle).unwrap();

        let report = f.sampler.sample_all().await.unwrap();
        assert_eq!(report.sampled, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken.id);

        let stored: ReplicationStream = f.store.require(&broken.id.to_string()).unwrap();
        assert_eq!(stored.status, StreamStatus::Error);
        assert!(stored.error_message.is_some());
    }

    #[tokio::test]
    async fn missing_sender_is_not_observed() {
        let f = fixture();
        let s = physical_setup(&f, "0/3000000", "0/3000000");
        f.cluster.with(s.source_id, |db| db.wal_senders.clear());
        let err = f.sampler.sample(&s).await.unwrap_err();
        assert!(matches!(err, MetricsError::NotObserved { .. }));
    }
}
