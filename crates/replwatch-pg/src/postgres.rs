//! sqlx-backed sessions and pools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Connection, Executor, Postgres, Row};
use tracing::warn;

use replwatch_state::{DatabaseEndpoint, Lsn};

use crate::catalog::{
    LongRunningQuery, PublicationInfo, Session, SlotRetention, StandbyStatus, SubscriptionInfo,
    WalSenderInfo,
};
use crate::credentials::Credentials;
use crate::ddl;
use crate::error::{ConnectionError, QueryError};
use crate::pool::{PoolConfig, PoolFactory, PoolStats, SessionPool};

const PUBLICATIONS_SQL: &str = "\
SELECT p.pubname::text AS name,
       p.puballtables AS all_tables,
       (SELECT count(*) FROM pg_publication_tables pt WHERE pt.pubname = p.pubname) AS table_count
FROM pg_publication p
ORDER BY p.pubname";

const SUBSCRIPTIONS_SQL: &str = "\
SELECT s.subname::text AS name,
       s.subenabled AS enabled,
       s.subconninfo AS conninfo,
       s.subpublications::text[] AS publications,
       s.subslotname::text AS slot_name,
       ss.received_lsn::text AS received_lsn,
       ss.latest_end_lsn::text AS latest_end_lsn,
       ss.latest_end_time AS latest_end_time,
       ss.last_msg_receipt_time AS last_msg_receipt_time,
       (SELECT count(*) FROM pg_subscription_rel r WHERE r.srsubid = s.oid) AS total_tables,
       (SELECT count(*) FROM pg_subscription_rel r
         WHERE r.srsubid = s.oid AND r.srsubstate IN ('r', 's')) AS synced_tables
FROM pg_subscription s
LEFT JOIN pg_stat_subscription ss ON ss.subid = s.oid AND ss.relid IS NULL
WHERE s.subdbid = (SELECT oid FROM pg_database WHERE datname = current_database())
ORDER BY s.subname";

const WAL_SENDERS_SQL: &str = "\
SELECT r.pid,
       r.application_name,
       host(r.client_addr) AS client_addr,
       r.client_port,
       r.state,
       r.sent_lsn::text AS sent_lsn,
       r.write_lsn::text AS write_lsn,
       r.flush_lsn::text AS flush_lsn,
       r.replay_lsn::text AS replay_lsn,
       EXTRACT(EPOCH FROM r.write_lag)::float8 AS write_lag,
       EXTRACT(EPOCH FROM r.flush_lag)::float8 AS flush_lag,
       EXTRACT(EPOCH FROM r.replay_lag)::float8 AS replay_lag,
       sl.slot_name::text AS slot_name,
       sl.slot_type AS slot_type
FROM pg_stat_replication r
LEFT JOIN pg_replication_slots sl ON sl.active_pid = r.pid
ORDER BY r.pid";

const STANDBY_SQL: &str = "\
SELECT pg_is_in_recovery() AS in_recovery,
       (SELECT sender_host FROM pg_stat_wal_receiver LIMIT 1) AS sender_host,
       (SELECT sender_port FROM pg_stat_wal_receiver LIMIT 1) AS sender_port,
       (SELECT flushed_lsn::text FROM pg_stat_wal_receiver LIMIT 1) AS flushed_lsn,
       pg_last_wal_replay_lsn()::text AS replay_lsn,
       pg_last_xact_replay_timestamp() AS last_replay_at";

const CURRENT_LSN_SQL: &str = "\
SELECT (CASE WHEN pg_is_in_recovery() THEN pg_last_wal_receive_lsn()
             ELSE pg_current_wal_lsn() END)::text AS lsn";

const LONG_RUNNING_SQL: &str = "\
SELECT pid,
       usename::text AS username,
       state,
       EXTRACT(EPOCH FROM (now() - query_start))::float8 AS duration_secs
FROM pg_stat_activity
WHERE state <> 'idle'
  AND pid <> pg_backend_pid()
  AND query_start IS NOT NULL
  AND EXTRACT(EPOCH FROM (now() - query_start)) > $1
ORDER BY duration_secs DESC";

const SLOT_RETENTION_SQL: &str = "\
SELECT slot_name::text AS slot_name,
       slot_type,
       active,
       COALESCE(pg_wal_lsn_diff(
           CASE WHEN pg_is_in_recovery() THEN pg_last_wal_receive_lsn()
                ELSE pg_current_wal_lsn() END,
           restart_lsn), 0)::int8 AS retained_bytes
FROM pg_replication_slots
ORDER BY slot_name";

const REPLICATION_PRIVILEGE_SQL: &str = "\
SELECT rolreplication OR rolsuper AS allowed FROM pg_roles WHERE rolname = current_user";

const MISSING_TABLES_SQL: &str = "\
SELECT t AS name FROM unnest($1::text[]) AS t WHERE to_regclass(t) IS NULL";

fn lsn_column(row: &PgRow, column: &str) -> Result<Option<Lsn>, QueryError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| {
        s.parse::<Lsn>()
            .map_err(|e| QueryError::new(format!("column {column}: {e}")))
    })
    .transpose()
}

/// One pooled sqlx connection.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl Session for PgSession {
    async fn server_version(&mut self) -> Result<String, QueryError> {
        let row = sqlx::query("SELECT current_setting('server_version') AS version")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(row.try_get("version")?)
    }

    async fn current_wal_lsn(&mut self) -> Result<Lsn, QueryError> {
        let row = sqlx::query(CURRENT_LSN_SQL)
            .fetch_one(&mut *self.conn)
            .await?;
        lsn_column(&row, "lsn")?.ok_or_else(|| QueryError::new("server reported no WAL position"))
    }

    async fn publications(&mut self) -> Result<Vec<PublicationInfo>, QueryError> {
        let rows = sqlx::query(PUBLICATIONS_SQL)
            .fetch_all(&mut *self.conn)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(PublicationInfo {
                    name: row.try_get("name")?,
                    all_tables: row.try_get("all_tables")?,
                    table_count: row.try_get("table_count")?,
                })
            })
            .collect()
    }

    async fn subscriptions(&mut self) -> Result<Vec<SubscriptionInfo>, QueryError> {
        let rows = sqlx::query(SUBSCRIPTIONS_SQL)
            .fetch_all(&mut *self.conn)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(SubscriptionInfo {
                    name: row.try_get("name")?,
                    enabled: row.try_get("enabled")?,
                    conninfo: row.try_get("conninfo")?,
                    publications: row.try_get("publications")?,
                    slot_name: row.try_get("slot_name")?,
                    received_lsn: lsn_column(row, "received_lsn")?,
                    latest_end_lsn: lsn_column(row, "latest_end_lsn")?,
                    latest_end_time: row.try_get::<Option<DateTime<Utc>>, _>("latest_end_time")?,
                    last_msg_receipt_time: row
                        .try_get::<Option<DateTime<Utc>>, _>("last_msg_receipt_time")?,
                    synced_tables: row.try_get("synced_tables")?,
                    total_tables: row.try_get("total_tables")?,
                })
            })
            .collect()
    }

    async fn wal_senders(&mut self) -> Result<Vec<WalSenderInfo>, QueryError> {
        let rows = sqlx::query(WAL_SENDERS_SQL)
            .fetch_all(&mut *self.conn)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(WalSenderInfo {
                    pid: row.try_get("pid")?,
                    application_name: row
                        .try_get::<Option<String>, _>("application_name")?
                        .unwrap_or_default(),
                    client_addr: row.try_get("client_addr")?,
                    client_port: row.try_get("client_port")?,
                    state: row
                        .try_get::<Option<String>, _>("state")?
                        .unwrap_or_default(),
                    sent_lsn: lsn_column(row, "sent_lsn")?,
                    write_lsn: lsn_column(row, "write_lsn")?,
                    flush_lsn: lsn_column(row, "flush_lsn")?,
                    replay_lsn: lsn_column(row, "replay_lsn")?,
                    write_lag_secs: row.try_get("write_lag")?,
                    flush_lag_secs: row.try_get("flush_lag")?,
                    replay_lag_secs: row.try_get("replay_lag")?,
                    slot_name: row.try_get("slot_name")?,
                    slot_type: row.try_get("slot_type")?,
                })
            })
            .collect()
    }

    async fn standby_status(&mut self) -> Result<StandbyStatus, QueryError> {
        let row = sqlx::query(STANDBY_SQL)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(StandbyStatus {
            in_recovery: row.try_get("in_recovery")?,
            sender_host: row.try_get("sender_host")?,
            sender_port: row.try_get("sender_port")?,
            flushed_lsn: lsn_column(&row, "flushed_lsn")?,
            replay_lsn: lsn_column(&row, "replay_lsn")?,
            last_replay_at: row.try_get::<Option<DateTime<Utc>>, _>("last_replay_at")?,
        })
    }

    async fn long_running_queries(
        &mut self,
        min_duration: Duration,
    ) -> Result<Vec<LongRunningQuery>, QueryError> {
        let rows = sqlx::query(LONG_RUNNING_SQL)
            .bind(min_duration.as_secs_f64())
            .fetch_all(&mut *self.conn)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(LongRunningQuery {
                    pid: row.try_get("pid")?,
                    username: row.try_get("username")?,
                    duration_secs: row
                        .try_get::<Option<f64>, _>("duration_secs")?
                        .unwrap_or_default(),
                    state: row.try_get("state")?,
                })
            })
            .collect()
    }

    async fn slot_retention(&mut self) -> Result<Vec<SlotRetention>, QueryError> {
        let rows = sqlx::query(SLOT_RETENTION_SQL)
            .fetch_all(&mut *self.conn)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(SlotRetention {
                    slot_name: row.try_get("slot_name")?,
                    slot_type: row.try_get("slot_type")?,
                    active: row.try_get("active")?,
                    retained_bytes: row.try_get("retained_bytes")?,
                })
            })
            .collect()
    }

    async fn has_replication_privilege(&mut self) -> Result<bool, QueryError> {
        let row = sqlx::query(REPLICATION_PRIVILEGE_SQL)
            .fetch_optional(&mut *self.conn)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("allowed")?),
            None => Ok(false),
        }
    }

    async fn missing_tables(&mut self, tables: &[String]) -> Result<Vec<String>, QueryError> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(MISSING_TABLES_SQL)
            .bind(tables.to_vec())
            .fetch_all(&mut *self.conn)
            .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("name")?))
            .collect()
    }

    async fn create_publication(
        &mut self,
        name: &str,
        tables: Option<&[String]>,
    ) -> Result<(), QueryError> {
        let sql = ddl::create_publication(name, tables).map_err(|e| QueryError::new(e.to_string()))?;
        (&mut *self.conn).execute(sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    async fn drop_publication(&mut self, name: &str) -> Result<(), QueryError> {
        let sql = ddl::drop_publication(name).map_err(|e| QueryError::new(e.to_string()))?;
        (&mut *self.conn).execute(sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    async fn create_subscription(
        &mut self,
        name: &str,
        conninfo: &str,
        publication: &str,
        copy_data: bool,
    ) -> Result<(), QueryError> {
        let sql = ddl::create_subscription(name, conninfo, publication, copy_data)
            .map_err(|e| QueryError::new(e.to_string()))?;
        (&mut *self.conn).execute(sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    async fn drop_subscription(&mut self, name: &str) -> Result<(), QueryError> {
        let sql = ddl::drop_subscription(name).map_err(|e| QueryError::new(e.to_string()))?;
        (&mut *self.conn).execute(sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    async fn execute_in_transaction(&mut self, script: &str) -> Result<u64, QueryError> {
        let mut tx = self.conn.begin().await?;
        match (&mut *tx).execute(sqlx::raw_sql(script)).await {
            Ok(result) => {
                tx.commit().await?;
                Ok(result.rows_affected())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed script also failed");
                }
                Err(e.into())
            }
        }
    }
}

/// Pool over one endpoint.
pub struct SqlxPool {
    pool: PgPool,
    endpoint: String,
}

fn classify(endpoint: &str, err: sqlx::Error) -> ConnectionError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            // 57P03: the server is starting up or shutting down.
            if code == "57P03" {
                ConnectionError::Unreachable {
                    endpoint: endpoint.to_string(),
                    cause: err.to_string(),
                }
            } else {
                ConnectionError::Rejected {
                    endpoint: endpoint.to_string(),
                    cause: err.to_string(),
                }
            }
        }
        sqlx::Error::Configuration(_) | sqlx::Error::Tls(_) => ConnectionError::Rejected {
            endpoint: endpoint.to_string(),
            cause: err.to_string(),
        },
        _ => ConnectionError::Unreachable {
            endpoint: endpoint.to_string(),
            cause: err.to_string(),
        },
    }
}

#[async_trait]
impl SessionPool for SqlxPool {
    async fn acquire(&self) -> Result<Box<dyn Session>, ConnectionError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| classify(&self.endpoint, e))?;
        Ok(Box::new(PgSession { conn }))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Builds lazily-connecting sqlx pools.
pub struct SqlxPoolFactory;

impl PoolFactory for SqlxPoolFactory {
    fn build(
        &self,
        endpoint: &DatabaseEndpoint,
        credentials: &Credentials,
        config: &PoolConfig,
    ) -> Result<Arc<dyn SessionPool>, ConnectionError> {
        let mut options = PgConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .database(&endpoint.database)
            .username(&credentials.username)
            .password(&credentials.password)
            .application_name(&config.application_name);
        if endpoint.use_iam_auth {
            options = options.ssl_mode(PgSslMode::Require);
        }
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(config.min_connections.min(config.max_connections))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .max_lifetime(Some(Duration::from_secs(config.max_lifetime_secs)))
            .test_before_acquire(true)
            .connect_lazy_with(options);
        Ok(Arc::new(SqlxPool {
            pool,
            endpoint: endpoint.address(),
        }))
    }
}
