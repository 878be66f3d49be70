//! Domain types for the replwatch state store.
//!
//! These types represent configured database endpoints, the discovered
//! replication topology, lag samples, alerting state, and migration history.
//! All types are serializable to/from JSON for storage in redb tables.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::lsn::Lsn;
use crate::record::Record;
use crate::tables::Namespace;

/// Wall-clock instant, always UTC.
pub type Timestamp = DateTime<Utc>;

/// PostgreSQL's limit on identifier length.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Check a name that will be interpolated into DDL as an identifier.
pub fn validate_identifier(kind: &str, name: &str) -> StateResult<()> {
    if name.is_empty() {
        return Err(StateError::Invalid(format!("{kind} name must not be empty")));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(StateError::Invalid(format!(
            "{kind} name '{name}' exceeds {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StateError::Invalid(format!(
            "{kind} name '{name}' may only contain letters, digits and underscores"
        )));
    }
    Ok(())
}

// ── Database endpoints ─────────────────────────────────────────────

/// Role an endpoint is configured to play.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseRole {
    Primary,
    Replica,
}

impl fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseRole::Primary => f.write_str("primary"),
            DatabaseRole::Replica => f.write_str("replica"),
        }
    }
}

/// A configured PostgreSQL database that replwatch monitors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseEndpoint {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub role: DatabaseRole,
    pub environment: String,
    pub cloud_provider: String,
    /// Opaque secret reference resolved by a credential provider.
    pub credential_ref: String,
    /// Authenticate with a short-lived token; forces TLS.
    #[serde(default)]
    pub use_iam_auth: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl DatabaseEndpoint {
    /// Build a new endpoint from validated input.
    pub fn create(spec: EndpointSpec) -> StateResult<Self> {
        spec.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: spec.name,
            host: spec.host,
            port: spec.port,
            database: spec.database,
            role: spec.role,
            environment: spec.environment,
            cloud_provider: spec.cloud_provider,
            credential_ref: spec.credential_ref,
            use_iam_auth: spec.use_iam_auth,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the editable fields, keeping identity and creation time.
    pub fn apply(&mut self, spec: EndpointSpec) -> StateResult<()> {
        spec.validate()?;
        self.name = spec.name;
        self.host = spec.host;
        self.port = spec.port;
        self.database = spec.database;
        self.role = spec.role;
        self.environment = spec.environment;
        self.cloud_provider = spec.cloud_provider;
        self.credential_ref = spec.credential_ref;
        self.use_iam_auth = spec.use_iam_auth;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `host:port/database`, for logs and messages.
    pub fn address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl Record for DatabaseEndpoint {
    const NAMESPACE: Namespace = Namespace::Databases;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_cloud_provider() -> String {
    "aws".to_string()
}

/// User-supplied endpoint definition (create and edit).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointSpec {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub role: DatabaseRole,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_cloud_provider")]
    pub cloud_provider: String,
    pub credential_ref: String,
    #[serde(default)]
    pub use_iam_auth: bool,
}

fn default_port() -> u16 {
    5432
}

impl EndpointSpec {
    pub fn validate(&self) -> StateResult<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(StateError::Invalid("name must not be empty".into()));
        }
        if name.len() > 100 {
            return Err(StateError::Invalid("name exceeds 100 characters".into()));
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' '))
        {
            return Err(StateError::Invalid(
                "name may only contain letters, digits, spaces, hyphens and underscores".into(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(StateError::Invalid("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(StateError::Invalid("port must be between 1 and 65535".into()));
        }
        if self.database.trim().is_empty() {
            return Err(StateError::Invalid("database must not be empty".into()));
        }
        if self.credential_ref.trim().is_empty() {
            return Err(StateError::Invalid("credential_ref must not be empty".into()));
        }
        Ok(())
    }
}

// ── Replication streams ────────────────────────────────────────────

/// Replication mechanism plus its mechanism-specific identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamKind {
    Logical {
        publication: String,
        subscription: String,
    },
    Physical {
        application_name: String,
        slot_name: Option<String>,
        sender_pid: Option<i32>,
        client_addr: Option<String>,
    },
}

impl StreamKind {
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Logical { .. } => "logical",
            StreamKind::Physical { .. } => "physical",
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, StreamKind::Logical { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Active,
    Inactive,
    Error,
    Syncing,
}

/// Identifies a standby that is not a configured endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalTarget {
    pub address: String,
    pub application_name: String,
}

impl ExternalTarget {
    /// Deterministic id so the same standby maps to the same placeholder
    /// on every scan.
    pub fn placeholder_id(&self) -> Uuid {
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("replwatch-external:{}:{}", self.address, self.application_name).as_bytes(),
        )
    }
}

/// A directed replication relationship between two endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationStream {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub kind: StreamKind,
    pub status: StreamStatus,
    pub lag_bytes: Option<u64>,
    pub lag_seconds: Option<f64>,
    pub last_sync_at: Option<Timestamp>,
    pub error_message: Option<String>,
    /// Logical streams can be created and dropped; physical are monitor-only.
    pub manageable: bool,
    /// Present when `target_id` is a synthesized placeholder.
    #[serde(default)]
    pub external_target: Option<ExternalTarget>,
    /// Consecutive discovery scans that did not observe this stream.
    #[serde(default)]
    pub missed_scans: u32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_seen_at: Timestamp,
}

impl ReplicationStream {
    /// Discovery upsert key. A subscriber may hold several subscriptions to
    /// the same source, so logical identity includes the subscription name.
    pub fn identity(&self) -> String {
        stream_identity(self.source_id, self.target_id, &self.kind)
    }
}

pub fn stream_identity(source_id: Uuid, target_id: Uuid, kind: &StreamKind) -> String {
    match kind {
        StreamKind::Logical { subscription, .. } => {
            format!("{source_id}:{target_id}:logical:{subscription}")
        }
        StreamKind::Physical { .. } => format!("{source_id}:{target_id}:physical"),
    }
}

impl Record for ReplicationStream {
    const NAMESPACE: Namespace = Namespace::Streams;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

// ── Lag samples ────────────────────────────────────────────────────

/// Where a sample's seconds-lag came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LagBasis {
    /// Reported directly by the server.
    Reported,
    /// Derived from byte lag and the observed apply rate.
    Estimated,
    /// No basis yet (first physical sample); value is zero.
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationMetricSample {
    pub stream_id: Uuid,
    pub timestamp: Timestamp,
    pub lag_bytes: u64,
    pub lag_seconds: f64,
    pub lag_seconds_basis: LagBasis,
    pub wal_position: Option<Lsn>,
    pub synced_tables: Option<u32>,
    pub total_tables: Option<u32>,
    /// 0 to 100, logical streams only.
    pub backfill_progress: Option<f64>,
}

impl ReplicationMetricSample {
    /// Key prefix covering every sample of one stream.
    pub fn stream_prefix(stream_id: Uuid) -> String {
        format!("{stream_id}:")
    }
}

impl Record for ReplicationMetricSample {
    const NAMESPACE: Namespace = Namespace::Samples;

    fn key(&self) -> String {
        format!("{}:{:020}", self.stream_id, self.timestamp.timestamp_millis().max(0))
    }
}

// ── Alerts ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    DatabaseConnection,
    ReplicationLag,
    LongRunningQuery,
    WalRetention,
    ReplicationFailure,
    MigrationFailure,
    SystemError,
}

/// Ordered so that `Critical` is the greatest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// What an alert is about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AlertTarget {
    Database(Uuid),
    Stream(Uuid),
    System,
}

impl fmt::Display for AlertTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertTarget::Database(id) => write!(f, "database {id}"),
            AlertTarget::Stream(id) => write!(f, "stream {id}"),
            AlertTarget::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub threshold_id: Option<Uuid>,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub target: AlertTarget,
    pub title: String,
    pub message: String,
    pub metric: Option<MetricName>,
    pub metric_value: Option<f64>,
    pub threshold_value: Option<f64>,
    pub status: AlertStatus,
    pub triggered_at: Timestamp,
    /// Last evaluation at which the condition was true.
    pub last_seen_at: Timestamp,
    pub acknowledged_at: Option<Timestamp>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<Timestamp>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.status != AlertStatus::Resolved
    }
}

impl Record for Alert {
    const NAMESPACE: Namespace = Namespace::Alerts;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

// ── Thresholds ─────────────────────────────────────────────────────

/// Metrics the alert engine can evaluate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    ReplicationLagSeconds,
    ReplicationLagBytes,
    DatabaseConnectionFailed,
    DatabaseResponseTimeMs,
    LongRunningQueryCount,
    LongRunningQueryMaxDuration,
    WalRetentionRatio,
}

impl MetricName {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricName::ReplicationLagSeconds => "replication_lag_seconds",
            MetricName::ReplicationLagBytes => "replication_lag_bytes",
            MetricName::DatabaseConnectionFailed => "database_connection_failed",
            MetricName::DatabaseResponseTimeMs => "database_response_time_ms",
            MetricName::LongRunningQueryCount => "long_running_query_count",
            MetricName::LongRunningQueryMaxDuration => "long_running_query_max_duration",
            MetricName::WalRetentionRatio => "wal_retention_ratio",
        }
    }

    /// Stream metrics target streams; everything else targets databases.
    pub fn is_stream_metric(self) -> bool {
        matches!(
            self,
            MetricName::ReplicationLagSeconds | MetricName::ReplicationLagBytes
        )
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Comparison {
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "gte")]
    Gte,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "lte")]
    Lte,
    #[serde(rename = "==", alias = "eq")]
    Eq,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
            Comparison::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Comparison::Gt => "greater than",
            Comparison::Gte => "greater than or equal to",
            Comparison::Lt => "less than",
            Comparison::Lte => "less than or equal to",
            Comparison::Eq => "equal to",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertThreshold {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub metric: MetricName,
    pub comparison: Comparison,
    pub value: f64,
    /// Restrict to a single database or stream id.
    #[serde(default)]
    pub scope: Option<Uuid>,
    pub enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AlertThreshold {
    pub fn breached_by(&self, value: f64) -> bool {
        self.comparison.holds(value, self.value)
    }

    pub fn applies_to(&self, target: &AlertTarget) -> bool {
        match (self.scope, target) {
            (None, _) => true,
            (Some(scope), AlertTarget::Database(id) | AlertTarget::Stream(id)) => scope == *id,
            (Some(_), AlertTarget::System) => false,
        }
    }
}

impl Record for AlertThreshold {
    const NAMESPACE: Namespace = Namespace::Thresholds;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

// ── Migrations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationOptions {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub rollback_on_error: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            rollback_on_error: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl MigrationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Success,
    Failed,
    Skipped,
    /// Dry run: checked, nothing sent.
    Validated,
}

/// Outcome of a migration on one database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationResult {
    pub database_id: Uuid,
    pub database_name: String,
    pub status: TargetStatus,
    pub execution_time_ms: Option<u64>,
    pub rows_affected: Option<u64>,
    pub error_message: Option<String>,
}

/// Static checks run before anything is sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Preflight {
    pub statement_count: usize,
    pub target_count: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationExecution {
    pub id: Uuid,
    pub script: String,
    pub targets: Vec<Uuid>,
    pub options: MigrationOptions,
    pub preflight: Preflight,
    pub status: MigrationStatus,
    pub results: Vec<MigrationResult>,
    /// Set when a failure or cancellation stopped the queue early.
    #[serde(default)]
    pub halted: bool,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub initiated_by: Option<String>,
}

impl MigrationExecution {
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

impl Record for MigrationExecution {
    const NAMESPACE: Namespace = Namespace::Migrations;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

// ── Discovery bookkeeping ──────────────────────────────────────────

/// A configured role that discovery found to be contradicted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleInconsistency {
    pub endpoint_id: Uuid,
    pub configured: DatabaseRole,
    pub observed: String,
}

/// Summary of the most recent discovery scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSummary {
    pub finished_at: Timestamp,
    pub duration_ms: u64,
    pub endpoints_scanned: usize,
    pub unreachable: Vec<Uuid>,
    pub failed: Vec<Uuid>,
    pub streams_observed: usize,
    pub inconsistencies: Vec<RoleInconsistency>,
}

impl ScanSummary {
    pub const KEY: &'static str = "last_scan";
}

impl Record for ScanSummary {
    const NAMESPACE: Namespace = Namespace::Meta;

    fn key(&self) -> String {
        Self::KEY.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> EndpointSpec {
        EndpointSpec {
            name: "orders-primary".into(),
            host: "10.0.0.5".into(),
            port: 5432,
            database: "orders".into(),
            role: DatabaseRole::Primary,
            environment: "production".into(),
            cloud_provider: "aws".into(),
            credential_ref: "prod/orders".into(),
            use_iam_auth: false,
        }
    }

    #[test]
    fn endpoint_spec_validation() {
        assert!(spec().validate().is_ok());

        let mut bad = spec();
        bad.name = "  ".into();
        assert!(bad.validate().is_err());

        let mut bad = spec();
        bad.name = "orders;drop".into();
        assert!(bad.validate().is_err());

        let mut bad = spec();
        bad.port = 0;
        assert!(bad.validate().is_err());

        let mut bad = spec();
        bad.credential_ref = String::new();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn endpoint_apply_keeps_identity() {
        let mut endpoint = DatabaseEndpoint::create(spec()).unwrap();
        let id = endpoint.id;
        let created = endpoint.created_at;
        let mut edited = spec();
        edited.role = DatabaseRole::Replica;
        endpoint.apply(edited).unwrap();
        assert_eq!(endpoint.id, id);
        assert_eq!(endpoint.created_at, created);
        assert_eq!(endpoint.role, DatabaseRole::Replica);
    }

    #[test]
    fn identifier_rules() {
        assert!(validate_identifier("publication", "orders_pub").is_ok());
        assert!(validate_identifier("publication", "").is_err());
        assert!(validate_identifier("publication", "bad-name").is_err());
        assert!(validate_identifier("publication", &"a".repeat(64)).is_err());
        assert!(validate_identifier("publication", &"a".repeat(63)).is_ok());
    }

    #[test]
    fn stream_kind_is_tagged() {
        let kind = StreamKind::Logical {
            publication: "pub1".into(),
            subscription: "sub1".into(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "logical");
        assert_eq!(json["publication"], "pub1");
    }

    #[test]
    fn placeholder_id_is_deterministic() {
        let a = ExternalTarget {
            address: "10.1.1.9".into(),
            application_name: "walreceiver".into(),
        };
        assert_eq!(a.placeholder_id(), a.clone().placeholder_id());
        let b = ExternalTarget {
            address: "10.1.1.10".into(),
            ..a.clone()
        };
        assert_ne!(a.placeholder_id(), b.placeholder_id());
    }

    #[test]
    fn comparison_accepts_symbols_and_words() {
        let gt: Comparison = serde_json::from_str("\">\"").unwrap();
        let gte: Comparison = serde_json::from_str("\"gte\"").unwrap();
        assert_eq!(gt, Comparison::Gt);
        assert_eq!(gte, Comparison::Gte);
        assert!(Comparison::Gt.holds(45.0, 30.0));
        assert!(!Comparison::Gt.holds(30.0, 30.0));
        assert!(Comparison::Gte.holds(30.0, 30.0));
        assert!(Comparison::Lt.holds(1.0, 2.0));
        assert!(Comparison::Eq.holds(1.0, 1.0));
    }

    #[test]
    fn threshold_scope() {
        let scoped = Uuid::new_v4();
        let threshold = AlertThreshold {
            id: Uuid::new_v4(),
            name: "lag".into(),
            description: None,
            alert_type: AlertType::ReplicationLag,
            severity: Severity::Warning,
            metric: MetricName::ReplicationLagSeconds,
            comparison: Comparison::Gt,
            value: 30.0,
            scope: Some(scoped),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(threshold.applies_to(&AlertTarget::Stream(scoped)));
        assert!(!threshold.applies_to(&AlertTarget::Stream(Uuid::new_v4())));
        assert!(!threshold.applies_to(&AlertTarget::System));
    }

    #[test]
    fn severity_order() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn sample_keys_sort_by_time() {
        let stream_id = Uuid::new_v4();
        let early = ReplicationMetricSample {
            stream_id,
            timestamp: DateTime::from_timestamp_millis(9_000).unwrap(),
            lag_bytes: 0,
            lag_seconds: 0.0,
            lag_seconds_basis: LagBasis::Reported,
            wal_position: None,
            synced_tables: None,
            total_tables: None,
            backfill_progress: None,
        };
        let late = ReplicationMetricSample {
            timestamp: DateTime::from_timestamp_millis(10_000).unwrap(),
            ..early.clone()
        };
        assert!(early.key() < late.key());
        assert!(early.key().starts_with(&ReplicationMetricSample::stream_prefix(stream_id)));
    }
}
