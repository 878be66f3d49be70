//! replwatch-state — embedded state store for replwatch.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for database endpoints, replication streams, lag samples, alerts,
//! thresholds, and migration history.
//!
//! # Architecture
//!
//! Every persisted type implements [`Record`], which names its namespace
//! (one redb table per namespace) and its key. Values are JSON-serialized
//! into redb's `&[u8]` value columns. Composite keys (`{stream_id}:{millis}`)
//! enable ordered prefix scans for time series.
//!
//! Records may carry a TTL. Deadlines live in a separate `expiries` table;
//! expired records are invisible to reads and physically removed by
//! [`StateStore::purge_expired`].
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod lsn;
pub mod record;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use lsn::Lsn;
pub use record::{Record, WriteBatch};
pub use store::StateStore;
pub use tables::Namespace;
pub use types::*;
