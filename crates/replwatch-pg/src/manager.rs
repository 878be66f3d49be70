//! ConnectionManager — one pool per endpoint, lazily built.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use replwatch_state::DatabaseEndpoint;

use crate::catalog::Session;
use crate::conninfo;
use crate::credentials::{CredentialCache, CredentialProvider};
use crate::error::ConnectionError;
use crate::health::{EndpointHealth, HealthTracker};
use crate::pool::{PoolConfig, PoolFactory, PoolStats, SessionPool};
use crate::postgres::SqlxPoolFactory;

/// Backoff between connection attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Background health checking of pools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub interval_secs: u64,
    pub max_backoff_secs: u64,
    /// Consecutive failures before an endpoint counts as down.
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_backoff_secs: 300,
            unhealthy_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    pub health: HealthCheckConfig,
    /// How long resolved credentials are reused before asking the provider again.
    pub credential_ttl_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            health: HealthCheckConfig::default(),
            credential_ttl_secs: 300,
        }
    }
}

/// Outcome of a single health probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub endpoint_id: Uuid,
    pub healthy: bool,
    pub latency_ms: u64,
    pub server_version: Option<String>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// A session borrowed from an endpoint's pool. Returned to the pool on drop.
pub struct PooledSession {
    endpoint_id: Uuid,
    session: Box<dyn Session>,
}

impl PooledSession {
    pub fn endpoint_id(&self) -> Uuid {
        self.endpoint_id
    }
}

impl Deref for PooledSession {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

struct PoolEntry {
    pool: Arc<dyn SessionPool>,
    /// Connection-relevant endpoint fields the pool was built from.
    fingerprint: String,
    credential_ref: String,
}

fn fingerprint(endpoint: &DatabaseEndpoint) -> String {
    format!(
        "{}|{}|{}",
        endpoint.address(),
        endpoint.credential_ref,
        endpoint.use_iam_auth
    )
}

/// Shared by discovery, sampling, stream setup and migrations.
pub struct ConnectionManager {
    provider: Arc<dyn CredentialProvider>,
    factory: Arc<dyn PoolFactory>,
    config: ConnectionConfig,
    credentials: CredentialCache,
    pools: RwLock<HashMap<Uuid, PoolEntry>>,
    health: RwLock<HashMap<Uuid, HealthTracker>>,
}

impl ConnectionManager {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        factory: Arc<dyn PoolFactory>,
        config: ConnectionConfig,
    ) -> Self {
        let credentials = CredentialCache::new(Duration::from_secs(config.credential_ttl_secs));
        Self {
            provider,
            factory,
            config,
            credentials,
            pools: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
        }
    }

    /// Manager backed by real PostgreSQL pools.
    pub fn postgres(provider: Arc<dyn CredentialProvider>, config: ConnectionConfig) -> Self {
        Self::new(provider, Arc::new(SqlxPoolFactory), config)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Borrow a session, retrying transient failures with backoff.
    pub async fn acquire(
        &self,
        endpoint: &DatabaseEndpoint,
    ) -> Result<PooledSession, ConnectionError> {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let this = self;
        let result = (move || async move {
            counter.fetch_add(1, Ordering::Relaxed);
            this.connect_once(endpoint).await
        })
        .retry(self.config.retry.backoff())
        .when(|e: &ConnectionError| e.is_transient())
        .notify(|e: &ConnectionError, delay: Duration| {
            warn!(endpoint_id = %endpoint.id, error = %e, ?delay, "connection failed, retrying");
        })
        .await;

        match result {
            Ok(session) => {
                self.record_success(endpoint.id, None, None).await;
                Ok(session)
            }
            Err(e) => {
                self.handle_failure(endpoint, &e).await;
                let attempts = attempts.load(Ordering::Relaxed);
                if e.is_transient() && attempts > 1 {
                    Err(ConnectionError::Exhausted {
                        endpoint: endpoint.address(),
                        attempts,
                        cause: e.to_string(),
                    })
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Return a session to its pool.
    pub fn release(&self, session: PooledSession) {
        debug!(endpoint_id = %session.endpoint_id, "session released");
        drop(session);
    }

    /// Probe an endpoint once: connect, read the server version, time it.
    pub async fn health_check(&self, endpoint: &DatabaseEndpoint) -> HealthReport {
        let started = Instant::now();
        let outcome = match self.connect_once(endpoint).await {
            Ok(mut session) => session.server_version().await.map_err(|e| e.to_string()),
            Err(e) => {
                self.handle_failure(endpoint, &e).await;
                Err(e.to_string())
            }
        };
        let latency = started.elapsed();
        let report = HealthReport {
            endpoint_id: endpoint.id,
            healthy: outcome.is_ok(),
            latency_ms: latency.as_millis() as u64,
            server_version: outcome.as_ref().ok().cloned(),
            error: outcome.as_ref().err().cloned(),
            checked_at: Utc::now(),
        };
        match &outcome {
            Ok(version) => {
                self.record_success(endpoint.id, Some(latency), Some(version.clone()))
                    .await;
            }
            Err(error) => {
                self.record_failure(endpoint.id, error).await;
            }
        }
        report
    }

    /// Last recorded health of one endpoint.
    pub async fn health_status(&self, endpoint_id: Uuid) -> Option<EndpointHealth> {
        self.health
            .read()
            .await
            .get(&endpoint_id)
            .map(HealthTracker::snapshot)
    }

    pub async fn health_snapshot(&self) -> HashMap<Uuid, EndpointHealth> {
        self.health
            .read()
            .await
            .iter()
            .map(|(id, tracker)| (*id, tracker.snapshot()))
            .collect()
    }

    pub async fn pool_stats(&self) -> HashMap<Uuid, PoolStats> {
        self.pools
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.pool.stats()))
            .collect()
    }

    /// Connection string a subscriber uses to reach `endpoint`.
    pub async fn connection_string(
        &self,
        endpoint: &DatabaseEndpoint,
    ) -> Result<String, ConnectionError> {
        let credentials = self
            .credentials
            .resolve(self.provider.as_ref(), &endpoint.credential_ref)
            .await?;
        Ok(conninfo::build(endpoint, &credentials))
    }

    /// Close an endpoint's pool, forget its health and cached credentials.
    pub async fn remove_endpoint(&self, endpoint_id: Uuid) {
        let entry = self.pools.write().await.remove(&endpoint_id);
        self.health.write().await.remove(&endpoint_id);
        if let Some(entry) = entry {
            self.credentials.invalidate(&entry.credential_ref).await;
            entry.pool.close().await;
            info!(%endpoint_id, "endpoint pool closed");
        }
    }

    /// Health-check due endpoints, drop pools of failing or removed ones.
    /// Returns the number of probes run.
    pub async fn maintain(&self, endpoints: &[DatabaseEndpoint]) -> usize {
        let known: Vec<Uuid> = self.pools.read().await.keys().copied().collect();
        for id in known {
            if !endpoints.iter().any(|e| e.id == id) {
                self.remove_endpoint(id).await;
            }
        }

        let now = Instant::now();
        let due: Vec<&DatabaseEndpoint> = {
            let health = self.health.read().await;
            endpoints
                .iter()
                .filter(|e| health.get(&e.id).is_none_or(|t| t.check_due(now)))
                .collect()
        };

        for endpoint in &due {
            let report = self.health_check(endpoint).await;
            if !report.healthy {
                self.drop_pool(endpoint.id).await;
            }
        }
        due.len()
    }

    async fn connect_once(
        &self,
        endpoint: &DatabaseEndpoint,
    ) -> Result<PooledSession, ConnectionError> {
        let pool = self.pool_for(endpoint).await?;
        let timeout = Duration::from_secs(self.config.pool.acquire_timeout_secs);
        let session = tokio::time::timeout(timeout, pool.acquire())
            .await
            .map_err(|_| ConnectionError::Timeout {
                endpoint: endpoint.address(),
                timeout,
            })??;
        Ok(PooledSession {
            endpoint_id: endpoint.id,
            session,
        })
    }

    async fn pool_for(
        &self,
        endpoint: &DatabaseEndpoint,
    ) -> Result<Arc<dyn SessionPool>, ConnectionError> {
        let wanted = fingerprint(endpoint);
        if let Some(entry) = self.pools.read().await.get(&endpoint.id) {
            if entry.fingerprint == wanted {
                return Ok(entry.pool.clone());
            }
        }

        let credentials = self
            .credentials
            .resolve(self.provider.as_ref(), &endpoint.credential_ref)
            .await?;
        let pool = self
            .factory
            .build(endpoint, &credentials, &self.config.pool)?;

        let replaced = {
            let mut pools = self.pools.write().await;
            // Another task may have built one meanwhile.
            if let Some(entry) = pools.get(&endpoint.id) {
                if entry.fingerprint == wanted {
                    return Ok(entry.pool.clone());
                }
            }
            pools.insert(
                endpoint.id,
                PoolEntry {
                    pool: pool.clone(),
                    fingerprint: wanted,
                    credential_ref: endpoint.credential_ref.clone(),
                },
            )
        };
        if let Some(old) = replaced {
            old.pool.close().await;
        }
        debug!(endpoint_id = %endpoint.id, address = %endpoint.address(), "pool created");
        Ok(pool)
    }

    async fn drop_pool(&self, endpoint_id: Uuid) {
        let entry = self.pools.write().await.remove(&endpoint_id);
        if let Some(entry) = entry {
            entry.pool.close().await;
            debug!(%endpoint_id, "stale pool dropped");
        }
    }

    async fn handle_failure(&self, endpoint: &DatabaseEndpoint, error: &ConnectionError) {
        if error.is_rejection() {
            // Secrets may have rotated; rebuild from fresh credentials next time.
            self.credentials.invalidate(&endpoint.credential_ref).await;
            self.drop_pool(endpoint.id).await;
        }
        self.record_failure(endpoint.id, &error.to_string()).await;
    }

    async fn record_success(
        &self,
        endpoint_id: Uuid,
        latency: Option<Duration>,
        version: Option<String>,
    ) {
        let mut health = self.health.write().await;
        self.tracker_entry(&mut health, endpoint_id)
            .record_success(latency, version);
    }

    async fn record_failure(&self, endpoint_id: Uuid, error: &str) {
        let mut health = self.health.write().await;
        self.tracker_entry(&mut health, endpoint_id)
            .record_failure(error);
    }

    fn tracker_entry<'a>(
        &self,
        health: &'a mut HashMap<Uuid, HealthTracker>,
        endpoint_id: Uuid,
    ) -> &'a mut HealthTracker {
        let config = &self.config.health;
        health.entry(endpoint_id).or_insert_with(|| {
            HealthTracker::new(
                config.unhealthy_threshold,
                Duration::from_secs(config.interval_secs),
                Duration::from_secs(config.max_backoff_secs),
            )
        })
    }
}
