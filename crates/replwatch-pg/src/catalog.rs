//! Replication catalog snapshots and the [`Session`] surface.
//!
//! Each row type mirrors what one catalog query returns, already decoded
//! into Rust types (LSNs parsed, intervals as seconds).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use replwatch_state::Lsn;

use crate::error::QueryError;

/// A row of `pg_publication`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicationInfo {
    pub name: String,
    pub all_tables: bool,
    pub table_count: i64,
}

/// A subscription in the current database, joined with its apply worker
/// statistics and per-relation sync state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionInfo {
    pub name: String,
    pub enabled: bool,
    pub conninfo: String,
    pub publications: Vec<String>,
    pub slot_name: Option<String>,
    pub received_lsn: Option<Lsn>,
    /// Last position confirmed back to the publisher.
    pub latest_end_lsn: Option<Lsn>,
    pub latest_end_time: Option<DateTime<Utc>>,
    pub last_msg_receipt_time: Option<DateTime<Utc>>,
    pub synced_tables: i64,
    pub total_tables: i64,
}

impl SubscriptionInfo {
    /// Tables still in initial copy or catch-up.
    pub fn is_backfilling(&self) -> bool {
        self.synced_tables < self.total_tables
    }
}

/// A row of `pg_stat_replication`, with the slot it streams from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalSenderInfo {
    pub pid: i32,
    pub application_name: String,
    pub client_addr: Option<String>,
    pub client_port: Option<i32>,
    pub state: String,
    pub sent_lsn: Option<Lsn>,
    pub write_lsn: Option<Lsn>,
    pub flush_lsn: Option<Lsn>,
    pub replay_lsn: Option<Lsn>,
    pub write_lag_secs: Option<f64>,
    pub flush_lag_secs: Option<f64>,
    pub replay_lag_secs: Option<f64>,
    pub slot_name: Option<String>,
    /// `physical` or `logical` when the sender uses a slot.
    pub slot_type: Option<String>,
}

impl WalSenderInfo {
    pub fn is_logical(&self) -> bool {
        self.slot_type.as_deref() == Some("logical")
    }

    pub fn is_streaming(&self) -> bool {
        self.state == "streaming"
    }
}

/// Recovery state of a server and, on a standby, where it streams from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StandbyStatus {
    pub in_recovery: bool,
    pub sender_host: Option<String>,
    pub sender_port: Option<i32>,
    pub flushed_lsn: Option<Lsn>,
    pub replay_lsn: Option<Lsn>,
    pub last_replay_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LongRunningQuery {
    pub pid: i32,
    pub username: Option<String>,
    pub duration_secs: f64,
    pub state: Option<String>,
}

/// WAL held back by one replication slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotRetention {
    pub slot_name: String,
    pub slot_type: String,
    pub active: bool,
    pub retained_bytes: i64,
}

/// One borrowed connection to an endpoint.
///
/// Everything discovery, sampling, stream setup and migrations need from a
/// server goes through this trait.
#[async_trait]
pub trait Session: Send {
    async fn server_version(&mut self) -> Result<String, QueryError>;

    /// Current WAL insert position, or the receive position on a standby.
    async fn current_wal_lsn(&mut self) -> Result<Lsn, QueryError>;

    async fn publications(&mut self) -> Result<Vec<PublicationInfo>, QueryError>;

    async fn subscriptions(&mut self) -> Result<Vec<SubscriptionInfo>, QueryError>;

    async fn wal_senders(&mut self) -> Result<Vec<WalSenderInfo>, QueryError>;

    async fn standby_status(&mut self) -> Result<StandbyStatus, QueryError>;

    async fn long_running_queries(
        &mut self,
        min_duration: Duration,
    ) -> Result<Vec<LongRunningQuery>, QueryError>;

    async fn slot_retention(&mut self) -> Result<Vec<SlotRetention>, QueryError>;

    /// Whether the session user may create subscriptions and slots.
    async fn has_replication_privilege(&mut self) -> Result<bool, QueryError>;

    /// Subset of `tables` that do not resolve to a relation.
    async fn missing_tables(&mut self, tables: &[String]) -> Result<Vec<String>, QueryError>;

    /// `tables = None` publishes every table.
    async fn create_publication(
        &mut self,
        name: &str,
        tables: Option<&[String]>,
    ) -> Result<(), QueryError>;

    async fn drop_publication(&mut self, name: &str) -> Result<(), QueryError>;

    async fn create_subscription(
        &mut self,
        name: &str,
        conninfo: &str,
        publication: &str,
        copy_data: bool,
    ) -> Result<(), QueryError>;

    async fn drop_subscription(&mut self, name: &str) -> Result<(), QueryError>;

    /// Run a whole script in one transaction: commit on success, roll back
    /// on the first error. Returns rows affected.
    async fn execute_in_transaction(&mut self, script: &str) -> Result<u64, QueryError>;
}
