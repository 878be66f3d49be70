//! redb table definitions for the replwatch state store.
//!
//! Each namespace table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Keys are record ids, except samples which use
//! `{stream_id}:{epoch_millis}` so a prefix scan yields a stream's history in
//! time order.

use redb::TableDefinition;

/// Database endpoints keyed by `{endpoint_id}`.
pub const DATABASES: TableDefinition<&str, &[u8]> = TableDefinition::new("databases");

/// Replication streams keyed by `{stream_id}`.
pub const STREAMS: TableDefinition<&str, &[u8]> = TableDefinition::new("streams");

/// Lag samples keyed by `{stream_id}:{epoch_millis}` (zero padded).
pub const SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("samples");

/// Alerts keyed by `{alert_id}`.
pub const ALERTS: TableDefinition<&str, &[u8]> = TableDefinition::new("alerts");

/// Alert thresholds keyed by `{threshold_id}`.
pub const THRESHOLDS: TableDefinition<&str, &[u8]> = TableDefinition::new("thresholds");

/// Migration executions keyed by `{execution_id}`.
pub const MIGRATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("migrations");

/// Singleton bookkeeping records (last discovery scan, ...).
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Expiry deadlines (epoch millis) keyed by `{namespace}/{key}`.
pub const EXPIRIES: TableDefinition<&str, u64> = TableDefinition::new("expiries");

/// Logical partition of the store. One redb table per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Databases,
    Streams,
    Samples,
    Alerts,
    Thresholds,
    Migrations,
    Meta,
}

impl Namespace {
    pub const ALL: [Namespace; 7] = [
        Namespace::Databases,
        Namespace::Streams,
        Namespace::Samples,
        Namespace::Alerts,
        Namespace::Thresholds,
        Namespace::Migrations,
        Namespace::Meta,
    ];

    pub const fn table(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Namespace::Databases => DATABASES,
            Namespace::Streams => STREAMS,
            Namespace::Samples => SAMPLES,
            Namespace::Alerts => ALERTS,
            Namespace::Thresholds => THRESHOLDS,
            Namespace::Migrations => MIGRATIONS,
            Namespace::Meta => META,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Namespace::Databases => "databases",
            Namespace::Streams => "streams",
            Namespace::Samples => "samples",
            Namespace::Alerts => "alerts",
            Namespace::Thresholds => "thresholds",
            Namespace::Migrations => "migrations",
            Namespace::Meta => "meta",
        }
    }

    /// Key under which a record's deadline is kept in [`EXPIRIES`].
    pub fn expiry_key(self, key: &str) -> String {
        format!("{}/{key}", self.name())
    }
}
