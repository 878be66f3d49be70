//! AlertEngine — threshold evaluation and the alert lifecycle.
//!
//! One alert per (type, target) is open at a time. A cycle creates alerts
//! for new breaches, refreshes the last-seen time of continuing ones and
//! resolves those whose condition cleared. Administrators acknowledge and
//! resolve through the same store read-modify-write.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use replwatch_pg::{ConnectionManager, HealthState};
use replwatch_state::{
    Alert, AlertStatus, AlertTarget, AlertThreshold, AlertType, DatabaseEndpoint,
    ReplicationStream, ScanSummary, StateStore, StreamStatus, Timestamp,
};

use crate::collector::{AlertsConfig, Collection, MetricCollector, Observation};
use crate::error::{AlertError, AlertResult};
use crate::health::{HealthCounts, SystemHealth, summarize};
use crate::notify::{AlertNotifier, LogNotifier};
use crate::thresholds::{ThresholdSpec, default_thresholds};

const AUTO_RESOLVED: &str = "Automatically resolved: condition cleared";
const TARGET_REMOVED: &str = "Automatically resolved: target no longer exists";

type AlertKey = (AlertType, AlertTarget);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationReport {
    pub created: usize,
    pub refreshed: usize,
    /// Open alerts whose breaching threshold changed severity.
    pub escalated: usize,
    pub resolved: usize,
}

struct Breach<'a> {
    threshold: &'a AlertThreshold,
    observation: &'a Observation,
}

impl Breach<'_> {
    fn title(&self) -> String {
        format!("{}: {}", self.threshold.name, self.observation.subject)
    }

    fn message(&self) -> String {
        format!(
            "{} is {} on {}, {} threshold {}",
            self.threshold.metric,
            self.observation.value,
            self.observation.subject,
            self.threshold.comparison.describe(),
            self.threshold.value
        )
    }
}

#[derive(PartialEq)]
enum Refresh {
    Unchanged,
    Changed,
    Closed,
}

pub struct AlertEngine {
    store: StateStore,
    connections: Arc<ConnectionManager>,
    collector: MetricCollector,
    notifier: Arc<dyn AlertNotifier>,
    started: Instant,
    cycle_lock: Mutex<()>,
}

impl AlertEngine {
    pub fn new(store: StateStore, connections: Arc<ConnectionManager>, config: AlertsConfig) -> Self {
        Self::with_notifier(store, connections, config, Arc::new(LogNotifier))
    }

    pub fn with_notifier(
        store: StateStore,
        connections: Arc<ConnectionManager>,
        config: AlertsConfig,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        let collector = MetricCollector::new(store.clone(), connections.clone(), config);
        Self {
            store,
            connections,
            collector,
            notifier,
            started: Instant::now(),
            cycle_lock: Mutex::new(()),
        }
    }

    /// Collect and evaluate once.
    pub async fn run_cycle(&self) -> AlertResult<EvaluationReport> {
        let _cycle = self.cycle_lock.lock().await;
        let cycle_started = Utc::now();
        let collection = self.collector.collect().await?;
        self.evaluate(&collection, cycle_started)
    }

    /// Apply one cycle's observations to the stored alerts.
    ///
    /// An acknowledgment made at or after `cycle_started` and after the
    /// alert was last seen firing keeps the alert open for this cycle.
    pub fn evaluate(
        &self,
        collection: &Collection,
        cycle_started: Timestamp,
    ) -> AlertResult<EvaluationReport> {
        let now = Utc::now();
        let thresholds: Vec<AlertThreshold> = self
            .store
            .list::<AlertThreshold>()?
            .into_iter()
            .filter(|t| t.enabled)
            .collect();

        let mut evaluated: HashSet<AlertKey> = HashSet::new();
        let mut breaches: HashMap<AlertKey, Breach<'_>> = HashMap::new();
        for threshold in &thresholds {
            let matching = collection
                .observations
                .iter()
                .filter(|o| o.metric == threshold.metric && threshold.applies_to(&o.target));
            for observation in matching {
                let key = (threshold.alert_type, observation.target);
                evaluated.insert(key);
                if !threshold.breached_by(observation.value) {
                    continue;
                }
                let breach = Breach {
                    threshold,
                    observation,
                };
                match breaches.entry(key) {
                    Entry::Occupied(mut current) => {
                        if threshold.severity > current.get().threshold.severity {
                            current.insert(breach);
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(breach);
                    }
                }
            }
        }

        let mut open: HashMap<AlertKey, Alert> = HashMap::new();
        for alert in self.store.list::<Alert>()? {
            if alert.is_open() {
                open.entry((alert.alert_type, alert.target)).or_insert(alert);
            }
        }

        let mut report = EvaluationReport::default();
        for (key, breach) in &breaches {
            let refresh = match open.remove(key) {
                Some(existing) => self.refresh(existing.id, breach, now)?,
                None => Refresh::Closed,
            };
            match refresh {
                Refresh::Unchanged => report.refreshed += 1,
                Refresh::Changed => {
                    report.refreshed += 1;
                    report.escalated += 1;
                }
                Refresh::Closed => {
                    let alert = self.raise(*key, breach, now)?;
                    self.notifier.notify(&alert);
                    report.created += 1;
                }
            }
        }

        for (key, alert) in open {
            let note = if key.1 != AlertTarget::System && !collection.targets.contains(&key.1) {
                TARGET_REMOVED
            } else if evaluated.contains(&key) {
                AUTO_RESOLVED
            } else {
                // Not measured this cycle; the condition is unknown.
                continue;
            };
            if self.auto_resolve(alert.id, cycle_started, note, now)? {
                report.resolved += 1;
            }
        }

        if report != EvaluationReport::default() {
            info!(
                created = report.created,
                escalated = report.escalated,
                resolved = report.resolved,
                refreshed = report.refreshed,
                "alert cycle applied"
            );
        } else {
            debug!("alert cycle: nothing to apply");
        }
        Ok(report)
    }

    fn raise(&self, key: AlertKey, breach: &Breach<'_>, now: Timestamp) -> AlertResult<Alert> {
        let alert = Alert {
            id: Uuid::new_v4(),
            threshold_id: Some(breach.threshold.id),
            alert_type: key.0,
            severity: breach.threshold.severity,
            target: key.1,
            title: breach.title(),
            message: breach.message(),
            metric: Some(breach.threshold.metric),
            metric_value: Some(breach.observation.value),
            threshold_value: Some(breach.threshold.value),
            status: AlertStatus::Active,
            triggered_at: now,
            last_seen_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        };
        self.store.put(&alert)?;
        Ok(alert)
    }

    fn refresh(&self, id: Uuid, breach: &Breach<'_>, now: Timestamp) -> AlertResult<Refresh> {
        let mut outcome = Refresh::Closed;
        let updated = self.store.update::<Alert, _>(&id.to_string(), |alert| {
            if !alert.is_open() {
                return false;
            }
            alert.last_seen_at = now;
            alert.metric_value = Some(breach.observation.value);
            outcome = Refresh::Unchanged;
            if alert.threshold_id != Some(breach.threshold.id) {
                alert.threshold_id = Some(breach.threshold.id);
                alert.severity = breach.threshold.severity;
                alert.metric = Some(breach.threshold.metric);
                alert.threshold_value = Some(breach.threshold.value);
                alert.title = breach.title();
                alert.message = breach.message();
                outcome = Refresh::Changed;
            }
            true
        })?;
        if outcome == Refresh::Changed {
            if let Some(alert) = updated {
                self.notifier.notify(&alert);
            }
        }
        Ok(outcome)
    }

    fn auto_resolve(
        &self,
        id: Uuid,
        cycle_started: Timestamp,
        note: &str,
        now: Timestamp,
    ) -> AlertResult<bool> {
        let mut resolved = false;
        self.store.update::<Alert, _>(&id.to_string(), |alert| {
            if !alert.is_open() {
                return false;
            }
            let acknowledged_this_cycle = alert
                .acknowledged_at
                .is_some_and(|at| at >= cycle_started && at > alert.last_seen_at);
            if acknowledged_this_cycle {
                debug!(alert_id = %alert.id, "acknowledged during this cycle, not resolving");
                return false;
            }
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(now);
            alert.resolved_by = Some("system".to_string());
            alert.resolution_notes = Some(note.to_string());
            resolved = true;
            true
        })?;
        if resolved {
            info!(alert_id = %id, note, "alert resolved");
        }
        Ok(resolved)
    }

    // ── Administrator actions ──────────────────────────────────────

    pub fn acknowledge(&self, id: Uuid, user: &str) -> AlertResult<Alert> {
        let mut rejected = None;
        let now = Utc::now();
        let updated = self.store.update::<Alert, _>(&id.to_string(), |alert| {
            if alert.status == AlertStatus::Resolved {
                rejected = Some(alert.status);
                return false;
            }
            alert.status = AlertStatus::Acknowledged;
            alert.acknowledged_at = Some(now);
            alert.acknowledged_by = Some(user.to_string());
            true
        })?;
        let alert = updated.ok_or(AlertError::NotFound { kind: "alert", id })?;
        if let Some(status) = rejected {
            return Err(AlertError::InvalidTransition {
                id,
                status,
                action: "acknowledged",
            });
        }
        info!(alert_id = %id, user, "alert acknowledged");
        Ok(alert)
    }

    pub fn resolve(&self, id: Uuid, user: &str, notes: Option<String>) -> AlertResult<Alert> {
        let mut rejected = None;
        let now = Utc::now();
        let updated = self.store.update::<Alert, _>(&id.to_string(), |alert| {
            if alert.status == AlertStatus::Resolved {
                rejected = Some(alert.status);
                return false;
            }
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(now);
            alert.resolved_by = Some(user.to_string());
            alert.resolution_notes = notes;
            true
        })?;
        let alert = updated.ok_or(AlertError::NotFound { kind: "alert", id })?;
        if let Some(status) = rejected {
            return Err(AlertError::InvalidTransition {
                id,
                status,
                action: "resolved",
            });
        }
        info!(alert_id = %id, user, "alert resolved");
        Ok(alert)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Newest first, optionally filtered by status.
    pub fn alerts(&self, status: Option<AlertStatus>, limit: usize) -> AlertResult<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .store
            .list::<Alert>()?
            .into_iter()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .collect();
        alerts.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        alerts.truncate(limit);
        Ok(alerts)
    }

    pub fn alert(&self, id: Uuid) -> AlertResult<Alert> {
        self.store
            .get(&id.to_string())?
            .ok_or(AlertError::NotFound { kind: "alert", id })
    }

    pub async fn system_health(&self) -> AlertResult<SystemHealth> {
        let alerts: Vec<Alert> = self.store.list()?;
        let endpoints: Vec<DatabaseEndpoint> = self.store.list()?;
        let streams: Vec<ReplicationStream> = self.store.list()?;
        let health = self.connections.health_snapshot().await;
        let last_scan: Option<ScanSummary> = self.store.get(ScanSummary::KEY)?;

        let counts = HealthCounts {
            total_databases: endpoints.len(),
            healthy_databases: endpoints
                .iter()
                .filter(|e| {
                    health
                        .get(&e.id)
                        .is_some_and(|h| h.status == HealthState::Healthy)
                })
                .count(),
            total_streams: streams.len(),
            healthy_streams: streams
                .iter()
                .filter(|s| s.status == StreamStatus::Active)
                .count(),
            last_check: last_scan.map(|s| s.finished_at),
            uptime_seconds: self.started.elapsed().as_secs(),
        };
        Ok(summarize(&alerts, counts))
    }

    // ── Thresholds ─────────────────────────────────────────────────

    /// Install the default thresholds if none exist. Returns how many were
    /// created.
    pub fn seed_default_thresholds(&self) -> AlertResult<usize> {
        if !self.store.list::<AlertThreshold>()?.is_empty() {
            return Ok(0);
        }
        let defaults = default_thresholds();
        let count = defaults.len();
        for spec in defaults {
            self.store.put(&spec.into_threshold()?)?;
        }
        info!(count, "default alert thresholds installed");
        Ok(count)
    }

    pub fn thresholds(&self) -> AlertResult<Vec<AlertThreshold>> {
        let mut thresholds: Vec<AlertThreshold> = self.store.list()?;
        thresholds.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(thresholds)
    }

    pub fn threshold(&self, id: Uuid) -> AlertResult<AlertThreshold> {
        self.store
            .get(&id.to_string())?
            .ok_or(AlertError::NotFound {
                kind: "threshold",
                id,
            })
    }

    pub fn create_threshold(&self, spec: ThresholdSpec) -> AlertResult<AlertThreshold> {
        let threshold = spec.into_threshold()?;
        self.store.put(&threshold)?;
        info!(threshold_id = %threshold.id, name = %threshold.name, "threshold created");
        Ok(threshold)
    }

    pub fn update_threshold(&self, id: Uuid, spec: ThresholdSpec) -> AlertResult<AlertThreshold> {
        spec.validate()?;
        let mut invalid = None;
        let updated = self
            .store
            .update::<AlertThreshold, _>(&id.to_string(), |threshold| {
                match spec.apply_to(threshold) {
                    Ok(()) => true,
                    Err(e) => {
                        invalid = Some(e);
                        false
                    }
                }
            })?;
        if let Some(e) = invalid {
            return Err(e);
        }
        let threshold = updated.ok_or(AlertError::NotFound {
            kind: "threshold",
            id,
        })?;
        info!(threshold_id = %id, "threshold updated");
        Ok(threshold)
    }

    pub fn delete_threshold(&self, id: Uuid) -> AlertResult<()> {
        if !self.store.delete::<AlertThreshold>(&id.to_string())? {
            return Err(AlertError::NotFound {
                kind: "threshold",
                id,
            });
        }
        info!(threshold_id = %id, "threshold deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use chrono::Duration as ChronoDuration;
    use replwatch_pg::testing::{FakeCluster, FakeDatabase};
    use replwatch_state::{
        Comparison, DatabaseRole, EndpointSpec, LagBasis, MetricName, ReplicationMetricSample,
        Severity, StreamKind,
    };

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<Alert>>);

    impl AlertNotifier for Recorder {
        fn notify(&self, alert: &Alert) {
            self.0.lock().unwrap().push(alert.clone());
        }
    }

    struct Fixture {
        store: StateStore,
        cluster: FakeCluster,
        connections: Arc<ConnectionManager>,
        recorder: Arc<Recorder>,
        engine: AlertEngine,
    }

    fn fixture() -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = FakeCluster::new();
        let connections = cluster.manager();
        let recorder = Arc::new(Recorder::default());
        let engine = AlertEngine::with_notifier(
            store.clone(),
            connections.clone(),
            AlertsConfig::default(),
            recorder.clone(),
        );
        Fixture {
            store,
            cluster,
            connections,
            recorder,
            engine,
        }
    }

    fn lag_threshold(value: f64, severity: Severity) -> ThresholdSpec {
        ThresholdSpec {
            name: format!("lag {severity:?}"),
            description: None,
            alert_type: AlertType::ReplicationLag,
            severity,
            metric: MetricName::ReplicationLagSeconds,
            comparison: Comparison::Gt,
            value,
            scope: None,
            enabled: true,
        }
    }

    fn endpoint(store: &StateStore, name: &str, role: DatabaseRole) -> DatabaseEndpoint {
        let endpoint = DatabaseEndpoint::create(EndpointSpec {
            name: name.into(),
            host: format!("{name}.internal"),
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

    /// A primary and replica with one physical stream between them.
    fn stream(f: &Fixture) -> ReplicationStream {
        let primary = endpoint(&f.store, "primary", DatabaseRole::Primary);
        let replica = endpoint(&f.store, "replica", DatabaseRole::Replica);
        f.cluster.add(primary.id, FakeDatabase::primary());
        f.cluster.add(replica.id, FakeDatabase::standby("primary.internal", 5432));
        let now = Utc::now();
        let stream = ReplicationStream {
            id: Uuid::new_v4(),
            source_id: primary.id,
            target_id: replica.id,
            kind: StreamKind::Physical {
                application_name: "walreceiver".into(),
                slot_name: None,
                sender_pid: Some(1),
                client_addr: None,
            },
            status: StreamStatus::Active,
            lag_bytes: None,
            lag_seconds: None,
            last_sync_at: None,
            error_message: None,
            manageable: false,
            external_target: None,
            missed_scans: 0,
            created_at: now,
            updated_at: now,
            last_seen_at: now,
        };
        f.store.put(&stream).unwrap();
        stream
    }

    fn sample_lag(f: &Fixture, stream_id: Uuid, seconds: f64) {
        let sample = ReplicationMetricSample {
            stream_id,
            timestamp: Utc::now(),
            lag_bytes: 1024,
            lag_seconds: seconds,
            lag_seconds_basis: LagBasis::Reported,
            wal_position: None,
            synced_tables: None,
            total_tables: None,
            backfill_progress: None,
        };
        f.store.put(&sample).unwrap();
        // Keys are millisecond-resolution.
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    fn open_alerts(f: &Fixture) -> Vec<Alert> {
        f.store
            .list::<Alert>()
            .unwrap()
            .into_iter()
            .filter(Alert::is_open)
            .collect()
    }

    #[tokio::test]
    async fn lag_breach_raises_then_auto_resolves() {
        let f = fixture();
        f.engine.create_threshold(lag_threshold(30.0, Severity::Warning)).unwrap();
        let s = stream(&f);

        sample_lag(&f, s.id, 45.0);
        let report = f.engine.run_cycle().await.unwrap();
        assert_eq!(report.created, 1);
        let alerts = open_alerts(&f);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Active);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].target, AlertTarget::Stream(s.id));
        assert_eq!(f.recorder.0.lock().unwrap().len(), 1);

        sample_lag(&f, s.id, 10.0);
        let report = f.engine.run_cycle().await.unwrap();
        assert_eq!(report.resolved, 1);
        let alert = f.engine.alert(alerts[0].id).unwrap();
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert!(alert.resolved_at.is_some());
        assert_eq!(alert.resolution_notes.as_deref(), Some(AUTO_RESOLVED));
    }

    #[tokio::test]
    async fn errored_stream_keeps_alert_without_reevaluating() {
        let f = fixture();
        f.engine.create_threshold(lag_threshold(30.0, Severity::Warning)).unwrap();
        let s = stream(&f);
        sample_lag(&f, s.id, 45.0);
        assert_eq!(f.engine.run_cycle().await.unwrap().created, 1);

        f.store
            .update::<ReplicationStream, _>(&s.id.to_string(), |stream| {
                stream.status = StreamStatus::Error;
                true
            })
            .unwrap();
        f.engine.create_threshold(lag_threshold(60.0, Severity::Critical)).unwrap();
        sample_lag(&f, s.id, 400.0);

        let report = f.engine.run_cycle().await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.resolved, 0);
        let alerts = open_alerts(&f);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn identical_cycles_keep_one_alert() {
        let f = fixture();
        f.engine.seed_default_thresholds().unwrap();
        let s = stream(&f);
        sample_lag(&f, s.id, 400.0);

        let first = f.engine.run_cycle().await.unwrap();
        let second = f.engine.run_cycle().await.unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(second.created, 0);
        assert_eq!(second.refreshed, 1);
        assert_eq!(open_alerts(&f).len(), 1);
        assert_eq!(f.recorder.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn highest_severity_breach_wins_and_escalates() {
        let f = fixture();
        f.engine.seed_default_thresholds().unwrap();
        let s = stream(&f);

        sample_lag(&f, s.id, 400.0);
        f.engine.run_cycle().await.unwrap();
        sample_lag(&f, s.id, 2000.0);
        let report = f.engine.run_cycle().await.unwrap();
        assert_eq!(report.escalated, 1);

        let alerts = open_alerts(&f);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].threshold_value, Some(1800.0));
    }

    #[tokio::test]
    async fn acknowledgment_in_cycle_blocks_resolution() {
        let f = fixture();
        f.engine.create_threshold(lag_threshold(30.0, Severity::Warning)).unwrap();
        let s = stream(&f);
        sample_lag(&f, s.id, 45.0);
        f.engine.run_cycle().await.unwrap();
        let id = open_alerts(&f)[0].id;

        sample_lag(&f, s.id, 10.0);
        let cycle_started = Utc::now() - ChronoDuration::milliseconds(1);
        let collection = f.engine.collector.collect().await.unwrap();
        // Administrator acts while the cycle is running.
        f.engine.acknowledge(id, "dba").unwrap();
        let report = f.engine.evaluate(&collection, cycle_started).unwrap();
        assert_eq!(report.resolved, 0);
        assert_eq!(f.engine.alert(id).unwrap().status, AlertStatus::Acknowledged);

        // A later cycle resolves it.
        f.engine.run_cycle().await.unwrap();
        assert_eq!(f.engine.alert(id).unwrap().status, AlertStatus::Resolved);
    }

    #[tokio::test]
    async fn unhealthy_database_raises_connection_alert() {
        let f = fixture();
        f.engine.seed_default_thresholds().unwrap();
        let db = endpoint(&f.store, "orders", DatabaseRole::Primary);
        f.cluster.add(db.id, FakeDatabase::primary().unreachable());
        let probe = f.connections.health_check(&db).await;
        assert!(!probe.healthy);

        f.engine.run_cycle().await.unwrap();
        let alerts = open_alerts(&f);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::DatabaseConnection);
        assert_eq!(alerts[0].severity, Severity::Critical);

        let health = f.engine.system_health().await.unwrap();
        assert_eq!(health.status, crate::health::OverallStatus::Critical);
        assert_eq!(health.healthy_databases, 0);
    }

    #[tokio::test]
    async fn removed_target_resolves_its_alert() {
        let f = fixture();
        f.engine.create_threshold(lag_threshold(30.0, Severity::Warning)).unwrap();
        let s = stream(&f);
        sample_lag(&f, s.id, 45.0);
        f.engine.run_cycle().await.unwrap();

        f.store.delete::<ReplicationStream>(&s.id.to_string()).unwrap();
        let report = f.engine.run_cycle().await.unwrap();
        assert_eq!(report.resolved, 1);
        let alert = f.engine.alerts(Some(AlertStatus::Resolved), 10).unwrap();
        assert_eq!(alert[0].resolution_notes.as_deref(), Some(TARGET_REMOVED));
    }

    #[tokio::test]
    async fn manual_transitions() {
        let f = fixture();
        f.engine.create_threshold(lag_threshold(30.0, Severity::Warning)).unwrap();
        let s = stream(&f);
        sample_lag(&f, s.id, 45.0);
        f.engine.run_cycle().await.unwrap();
        let id = open_alerts(&f)[0].id;

        let acked = f.engine.acknowledge(id, "alice").unwrap();
        assert_eq!(acked.acknowledged_by.as_deref(), Some("alice"));

        let resolved = f
            .engine
            .resolve(id, "bob", Some("replica rebuilt".into()))
            .unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("bob"));

        assert!(matches!(
            f.engine.acknowledge(id, "alice"),
            Err(AlertError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.engine.resolve(Uuid::new_v4(), "bob", None),
            Err(AlertError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn disabled_threshold_is_ignored() {
        let f = fixture();
        let mut spec = lag_threshold(30.0, Severity::Warning);
        spec.enabled = false;
        f.engine.create_threshold(spec).unwrap();
        let s = stream(&f);
        sample_lag(&f, s.id, 45.0);
        let report = f.engine.run_cycle().await.unwrap();
        assert_eq!(report.created, 0);
    }

    #[test]
    fn threshold_crud() {
        let f = fixture();
        assert_eq!(f.engine.seed_default_thresholds().unwrap(), 6);
        assert_eq!(f.engine.seed_default_thresholds().unwrap(), 0);

        let created = f
            .engine
            .create_threshold(lag_threshold(60.0, Severity::Info))
            .unwrap();
        let mut spec = lag_threshold(90.0, Severity::Warning);
        spec.name = "renamed".into();
        let updated = f.engine.update_threshold(created.id, spec).unwrap();
        assert_eq!(updated.value, 90.0);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(f.engine.thresholds().unwrap().len(), 7);

        f.engine.delete_threshold(created.id).unwrap();
        assert!(matches!(
            f.engine.delete_threshold(created.id),
            Err(AlertError::NotFound { .. })
        ));
        assert!(matches!(
            f.engine.update_threshold(created.id, lag_threshold(1.0, Severity::Info)),
            Err(AlertError::NotFound { .. })
        ));
    }
}
