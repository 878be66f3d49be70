//! In-process fake cluster for tests.
//!
//! A [`FakeCluster`] maps endpoint ids to [`FakeDatabase`] states. Its pool
//! factory plugs into a [`ConnectionManager`](crate::ConnectionManager) so
//! engines can be exercised without a server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use replwatch_state::{DatabaseEndpoint, Lsn};

use crate::catalog::{
    LongRunningQuery, PublicationInfo, Session, SlotRetention, StandbyStatus, SubscriptionInfo,
    WalSenderInfo,
};
use crate::credentials::{CredentialProvider, Credentials};
use crate::error::{ConnectionError, CredentialError, QueryError};
use crate::manager::{ConnectionConfig, ConnectionManager, RetryConfig};
use crate::pool::{PoolConfig, PoolFactory, PoolStats, SessionPool};

fn lsn(raw: &str) -> Lsn {
    raw.parse().unwrap_or_default()
}

/// State of one fake server.
#[derive(Debug, Clone)]
pub struct FakeDatabase {
    pub reachable: bool,
    pub rejecting: bool,
    /// Acquires that fail as unreachable before one succeeds.
    pub failing_acquires: u32,
    pub acquire_delay: Option<Duration>,
    pub server_version: String,
    pub current_lsn: Lsn,
    pub publications: Vec<PublicationInfo>,
    pub subscriptions: Vec<SubscriptionInfo>,
    pub wal_senders: Vec<WalSenderInfo>,
    pub standby: StandbyStatus,
    pub long_running: Vec<LongRunningQuery>,
    pub slots: Vec<SlotRetention>,
    pub replication_privilege: bool,
    pub tables: Vec<String>,
    pub fail_catalog: Option<String>,
    pub fail_create_publication: Option<String>,
    pub fail_create_subscription: Option<String>,
    pub fail_script: Option<String>,
    pub script_delay: Option<Duration>,
    /// Pause after a subscription is created, before the call returns.
    pub ddl_delay: Option<Duration>,
    pub script_rows: u64,
    /// Every DDL statement applied, in order.
    pub ddl_log: Vec<String>,
    pub committed_scripts: Vec<String>,
    pub rolled_back_scripts: Vec<String>,
}

impl FakeDatabase {
    pub fn primary() -> Self {
        Self {
            reachable: true,
            rejecting: false,
            failing_acquires: 0,
            acquire_delay: None,
            server_version: "16.2".to_string(),
            current_lsn: lsn("0/3000000"),
            publications: Vec::new(),
            subscriptions: Vec::new(),
            wal_senders: Vec::new(),
            standby: StandbyStatus::default(),
            long_running: Vec::new(),
            slots: Vec::new(),
            replication_privilege: true,
            tables: Vec::new(),
            fail_catalog: None,
            fail_create_publication: None,
            fail_create_subscription: None,
            fail_script: None,
            script_delay: None,
            ddl_delay: None,
            script_rows: 0,
            ddl_log: Vec::new(),
            committed_scripts: Vec::new(),
            rolled_back_scripts: Vec::new(),
        }
    }

    /// A hot standby streaming from `sender_host:sender_port`.
    pub fn standby(sender_host: &str, sender_port: i32) -> Self {
        Self {
            standby: StandbyStatus {
                in_recovery: true,
                sender_host: Some(sender_host.to_string()),
                sender_port: Some(sender_port),
                flushed_lsn: None,
                replay_lsn: None,
                last_replay_at: None,
            },
            ..Self::primary()
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.rejecting = true;
        self
    }

    pub fn failing_first(mut self, acquires: u32) -> Self {
        self.failing_acquires = acquires;
        self
    }

    pub fn with_lsn(mut self, raw: &str) -> Self {
        self.current_lsn = lsn(raw);
        self
    }

    pub fn with_publication(mut self, name: &str) -> Self {
        self.publications.push(PublicationInfo {
            name: name.to_string(),
            all_tables: true,
            table_count: 0,
        });
        self
    }

    pub fn with_subscription(mut self, subscription: SubscriptionInfo) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    pub fn with_wal_sender(mut self, sender: WalSenderInfo) -> Self {
        self.wal_senders.push(sender);
        self
    }

    pub fn with_tables(mut self, tables: &[&str]) -> Self {
        self.tables = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_catalog_failure(mut self, message: &str) -> Self {
        self.fail_catalog = Some(message.to_string());
        self
    }

    pub fn with_script_failure(mut self, message: &str) -> Self {
        self.fail_script = Some(message.to_string());
        self
    }

    /// A streaming subscription to `publication` at `conninfo`.
    pub fn subscription(name: &str, conninfo: &str, publication: &str) -> SubscriptionInfo {
        SubscriptionInfo {
            name: name.to_string(),
            enabled: true,
            conninfo: conninfo.to_string(),
            publications: vec![publication.to_string()],
            slot_name: Some(name.to_string()),
            received_lsn: None,
            latest_end_lsn: None,
            latest_end_time: None,
            last_msg_receipt_time: None,
            synced_tables: 0,
            total_tables: 0,
        }
    }

    /// A physical WAL sender streaming to `client_addr`.
    pub fn wal_sender(pid: i32, application_name: &str, client_addr: &str) -> WalSenderInfo {
        WalSenderInfo {
            pid,
            application_name: application_name.to_string(),
            client_addr: Some(client_addr.to_string()),
            client_port: Some(50_000),
            state: "streaming".to_string(),
            sent_lsn: None,
            write_lsn: None,
            flush_lsn: None,
            replay_lsn: None,
            write_lag_secs: None,
            flush_lag_secs: None,
            replay_lag_secs: None,
            slot_name: None,
            slot_type: Some("physical".to_string()),
        }
    }

    fn catalog_check(&self) -> Result<(), QueryError> {
        match &self.fail_catalog {
            Some(message) => Err(QueryError::new(message.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct ClusterState {
    databases: HashMap<Uuid, FakeDatabase>,
    acquire_attempts: HashMap<Uuid, u32>,
    pools_built: HashMap<Uuid, u32>,
}

/// Shared handle to a set of fake databases.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, endpoint_id: Uuid, database: FakeDatabase) {
        self.lock().databases.insert(endpoint_id, database);
    }

    /// Inspect or mutate one database. Panics if it was never added.
    pub fn with<R>(&self, endpoint_id: Uuid, f: impl FnOnce(&mut FakeDatabase) -> R) -> R {
        let mut state = self.lock();
        let database = state
            .databases
            .get_mut(&endpoint_id)
            .unwrap_or_else(|| panic!("fake database {endpoint_id} not registered"));
        f(database)
    }

    pub fn snapshot(&self, endpoint_id: Uuid) -> FakeDatabase {
        self.with(endpoint_id, |db| db.clone())
    }

    pub fn acquire_attempts(&self, endpoint_id: Uuid) -> u32 {
        self.lock()
            .acquire_attempts
            .get(&endpoint_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn pools_built(&self, endpoint_id: Uuid) -> u32 {
        self.lock().pools_built.get(&endpoint_id).copied().unwrap_or(0)
    }

    pub fn factory(&self) -> Arc<dyn PoolFactory> {
        Arc::new(FakePoolFactory {
            cluster: self.clone(),
        })
    }

    /// A manager over this cluster with near-instant retries. Every
    /// credential reference resolves except those starting with `missing/`.
    pub fn manager(&self) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            Arc::new(AnyCredentials),
            self.factory(),
            fast_connection_config(),
        ))
    }
}

/// Connection settings for tests: two quick retries, short timeouts.
pub fn fast_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        pool: PoolConfig {
            acquire_timeout_secs: 2,
            ..PoolConfig::default()
        },
        retry: RetryConfig {
            max_retries: 2,
            min_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        },
        ..ConnectionConfig::default()
    }
}

struct AnyCredentials;

#[async_trait]
impl CredentialProvider for AnyCredentials {
    async fn resolve(&self, reference: &str) -> Result<Credentials, CredentialError> {
        if reference.starts_with("missing/") {
            return Err(CredentialError::NotFound(reference.to_string()));
        }
        Ok(Credentials::new("replwatch", "test"))
    }
}

struct FakePoolFactory {
    cluster: FakeCluster,
}

impl PoolFactory for FakePoolFactory {
    fn build(
        &self,
        endpoint: &DatabaseEndpoint,
        _credentials: &Credentials,
        _config: &PoolConfig,
    ) -> Result<Arc<dyn SessionPool>, ConnectionError> {
        *self
            .cluster
            .lock()
            .pools_built
            .entry(endpoint.id)
            .or_insert(0) += 1;
        Ok(Arc::new(FakePool {
            cluster: self.cluster.clone(),
            endpoint_id: endpoint.id,
            address: endpoint.address(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakePool {
    cluster: FakeCluster,
    endpoint_id: Uuid,
    address: String,
    closed: AtomicBool,
}

#[async_trait]
impl SessionPool for FakePool {
    async fn acquire(&self) -> Result<Box<dyn Session>, ConnectionError> {
        let delay = {
            let mut state = self.cluster.lock();
            *state.acquire_attempts.entry(self.endpoint_id).or_insert(0) += 1;
            let unreachable = |cause: &str| ConnectionError::Unreachable {
                endpoint: self.address.clone(),
                cause: cause.to_string(),
            };
            if self.closed.load(Ordering::SeqCst) {
                return Err(unreachable("pool closed"));
            }
            let Some(db) = state.databases.get_mut(&self.endpoint_id) else {
                return Err(unreachable("no such host"));
            };
            if !db.reachable {
                return Err(unreachable("connection refused"));
            }
            if db.rejecting {
                return Err(ConnectionError::Rejected {
                    endpoint: self.address.clone(),
                    cause: "password authentication failed".to_string(),
                });
            }
            if db.failing_acquires > 0 {
                db.failing_acquires -= 1;
                return Err(unreachable("connection reset"));
            }
            db.acquire_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Box::new(FakeSession {
            cluster: self.cluster.clone(),
            endpoint_id: self.endpoint_id,
        }))
    }

    fn stats(&self) -> PoolStats {
        PoolStats { size: 1, idle: 1 }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeSession {
    cluster: FakeCluster,
    endpoint_id: Uuid,
}

impl FakeSession {
    fn with<R>(
        &self,
        f: impl FnOnce(&mut FakeDatabase) -> Result<R, QueryError>,
    ) -> Result<R, QueryError> {
        let mut state = self.cluster.lock();
        match state.databases.get_mut(&self.endpoint_id) {
            Some(db) if db.reachable => f(db),
            _ => Err(QueryError::new("server closed the connection unexpectedly")),
        }
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn server_version(&mut self) -> Result<String, QueryError> {
        self.with(|db| Ok(db.server_version.clone()))
    }

    async fn current_wal_lsn(&mut self) -> Result<Lsn, QueryError> {
        self.with(|db| Ok(db.current_lsn))
    }

    async fn publications(&mut self) -> Result<Vec<PublicationInfo>, QueryError> {
        self.with(|db| {
            db.catalog_check()?;
            Ok(db.publications.clone())
        })
    }

    async fn subscriptions(&mut self) -> Result<Vec<SubscriptionInfo>, QueryError> {
        self.with(|db| {
            db.catalog_check()?;
            Ok(db.subscriptions.clone())
        })
    }

    async fn wal_senders(&mut self) -> Result<Vec<WalSenderInfo>, QueryError> {
        self.with(|db| {
            db.catalog_check()?;
            Ok(db.wal_senders.clone())
        })
    }

    async fn standby_status(&mut self) -> Result<StandbyStatus, QueryError> {
        self.with(|db| {
            db.catalog_check()?;
            Ok(db.standby.clone())
        })
    }

    async fn long_running_queries(
        &mut self,
        min_duration: Duration,
    ) -> Result<Vec<LongRunningQuery>, QueryError> {
        let floor = min_duration.as_secs_f64();
        self.with(|db| {
            Ok(db
                .long_running
                .iter()
                .filter(|q| q.duration_secs > floor)
                .cloned()
                .collect())
        })
    }

    async fn slot_retention(&mut self) -> Result<Vec<SlotRetention>, QueryError> {
        self.with(|db| Ok(db.slots.clone()))
    }

    async fn has_replication_privilege(&mut self) -> Result<bool, QueryError> {
        self.with(|db| Ok(db.replication_privilege))
    }

    async fn missing_tables(&mut self, tables: &[String]) -> Result<Vec<String>, QueryError> {
        self.with(|db| {
            Ok(tables
                .iter()
                .filter(|t| !db.tables.contains(t))
                .cloned()
                .collect())
        })
    }

    async fn create_publication(
        &mut self,
        name: &str,
        tables: Option<&[String]>,
    ) -> Result<(), QueryError> {
        let sql = crate::ddl::create_publication(name, tables)
            .map_err(|e| QueryError::new(e.to_string()))?;
        self.with(|db| {
            if let Some(message) = &db.fail_create_publication {
                return Err(QueryError::new(message.clone()));
            }
            if db.publications.iter().any(|p| p.name == name) {
                return Err(QueryError::new(format!(
                    "publication \"{name}\" already exists"
                )));
            }
            db.publications.push(PublicationInfo {
                name: name.to_string(),
                all_tables: tables.is_none(),
                table_count: tables.map_or(0, |t| t.len() as i64),
            });
            db.ddl_log.push(sql);
            Ok(())
        })
    }

    async fn drop_publication(&mut self, name: &str) -> Result<(), QueryError> {
        let sql = crate::ddl::drop_publication(name).map_err(|e| QueryError::new(e.to_string()))?;
        self.with(|db| {
            db.publications.retain(|p| p.name != name);
            db.ddl_log.push(sql);
            Ok(())
        })
    }

    async fn create_subscription(
        &mut self,
        name: &str,
        conninfo: &str,
        publication: &str,
        _copy_data: bool,
    ) -> Result<(), QueryError> {
        let delay = self.with(|db| {
            if let Some(message) = &db.fail_create_subscription {
                return Err(QueryError::new(message.clone()));
            }
            db.subscriptions
                .push(FakeDatabase::subscription(name, conninfo, publication));
            db.ddl_log.push(format!("CREATE SUBSCRIPTION \"{name}\""));
            Ok(db.ddl_delay)
        })?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn drop_subscription(&mut self, name: &str) -> Result<(), QueryError> {
        let sql =
            crate::ddl::drop_subscription(name).map_err(|e| QueryError::new(e.to_string()))?;
        self.with(|db| {
            db.subscriptions.retain(|s| s.name != name);
            db.ddl_log.push(sql);
            Ok(())
        })
    }

    async fn execute_in_transaction(&mut self, script: &str) -> Result<u64, QueryError> {
        let delay = self.with(|db| Ok(db.script_delay))?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with(|db| match &db.fail_script {
            Some(message) => {
                db.rolled_back_scripts.push(script.to_string());
                Err(QueryError::new(message.clone()))
            }
            None => {
                db.committed_scripts.push(script.to_string());
                Ok(db.script_rows)
            }
        })
    }
}
