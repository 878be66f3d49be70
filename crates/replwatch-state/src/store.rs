//! StateStore — redb-backed state persistence for replwatch.
//!
//! One generic interface (`put`, `get`, `list`, `delete`, `expire_after`)
//! serves every [`Record`] type; the record's namespace selects the table.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::record::{BatchOp, Record, WriteBatch};
use crate::tables::{EXPIRIES, Namespace};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn deadline_after(ttl: Duration) -> u64 {
    now_millis().saturating_add(ttl.as_millis().min(u128::from(u64::MAX)) as u64)
}

fn decode<R: Record>(bytes: &[u8]) -> StateResult<R> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn is_expired(
    expiries: &impl ReadableTable<&'static str, u64>,
    namespace: Namespace,
    key: &str,
    now: u64,
) -> StateResult<bool> {
    let expiry_key = namespace.expiry_key(key);
    Ok(expiries
        .get(expiry_key.as_str())
        .map_err(map_err!(Read))?
        .is_some_and(|deadline| deadline.value() <= now))
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> String {
    let mut bound = prefix.to_string();
    match bound.pop() {
        Some(last) if (last as u32) < 0x7f => {
            bound.push(char::from_u32(last as u32 + 1).unwrap_or(char::MAX));
        }
        Some(last) => {
            bound.push(last);
            bound.push(char::MAX);
        }
        None => bound.push(char::MAX),
    }
    bound
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for namespace in Namespace::ALL {
            txn.open_table(namespace.table()).map_err(map_err!(Table))?;
        }
        txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert or replace a record. Clears any TTL previously set on the key.
    pub fn put<R: Record>(&self, record: &R) -> StateResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(record)?;
        self.apply(batch)
    }

    /// Insert or replace a record that disappears after `ttl`.
    pub fn put_with_ttl<R: Record>(&self, record: &R, ttl: Duration) -> StateResult<()> {
        let mut batch = WriteBatch::new();
        batch.put_with_ttl(record, ttl)?;
        self.apply(batch)
    }

    /// Insert `record` with a TTL only if its key sorts after every live key
    /// under `prefix`. Check and write share one transaction.
    ///
    /// Returns `None` when written, or the live record with the greatest
    /// key when the append was refused.
    pub fn append_with_ttl<R: Record>(
        &self,
        record: &R,
        prefix: &str,
        ttl: Duration,
    ) -> StateResult<Option<R>> {
        let key = record.key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let upper = prefix_upper_bound(prefix);
        let now = now_millis();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let refused;
        {
            let mut table = txn.open_table(R::NAMESPACE.table()).map_err(map_err!(Table))?;
            let mut expiries = txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
            let mut last: Option<(String, R)> = None;
            for entry in table
                .range(prefix..upper.as_str())
                .map_err(map_err!(Read))?
                .rev()
            {
                let (k, v) = entry.map_err(map_err!(Read))?;
                if is_expired(&expiries, R::NAMESPACE, k.value(), now)? {
                    continue;
                }
                last = Some((k.value().to_string(), decode(v.value())?));
                break;
            }
            refused = match last {
                Some((last_key, latest)) if last_key >= key => Some(latest),
                _ => None,
            };
            if refused.is_none() {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                expiries
                    .insert(R::NAMESPACE.expiry_key(&key).as_str(), deadline_after(ttl))
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(refused)
    }

    /// Delete a record by key. Returns true if it existed.
    pub fn delete<R: Record>(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(R::NAMESPACE.table()).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
            let mut expiries = txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
            expiries
                .remove(R::NAMESPACE.expiry_key(key).as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(namespace = R::NAMESPACE.name(), %key, existed, "record deleted");
        Ok(existed)
    }

    /// Delete every record whose key starts with `prefix`. Returns number deleted.
    pub fn delete_prefix<R: Record>(&self, prefix: &str) -> StateResult<u32> {
        let upper = prefix_upper_bound(prefix);
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(R::NAMESPACE.table()).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table
                .range(prefix..upper.as_str())
                .map_err(map_err!(Read))?
            {
                let (key, _) = entry.map_err(map_err!(Read))?;
                keys.push(key.value().to_string());
            }
            keys
        };
        let mut batch = WriteBatch::new();
        for key in &keys {
            batch.delete::<R>(key);
        }
        self.apply(batch)?;
        Ok(keys.len() as u32)
    }

    /// Give an existing record a TTL. Returns false if the key is absent.
    pub fn expire_after<R: Record>(&self, key: &str, ttl: Duration) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let exists;
        {
            let table = txn.open_table(R::NAMESPACE.table()).map_err(map_err!(Table))?;
            exists = table.get(key).map_err(map_err!(Read))?.is_some();
            if exists {
                let mut expiries = txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
                expiries
                    .insert(R::NAMESPACE.expiry_key(key).as_str(), deadline_after(ttl))
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(exists)
    }

    /// Atomically read, modify and write back one record.
    ///
    /// `f` returns whether it changed the record; unchanged records are not
    /// rewritten. Returns the record as stored after the call, or `None` if
    /// the key is absent or expired.
    pub fn update<R, F>(&self, key: &str, f: F) -> StateResult<Option<R>>
    where
        R: Record,
        F: FnOnce(&mut R) -> bool,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result;
        {
            let mut table = txn.open_table(R::NAMESPACE.table()).map_err(map_err!(Table))?;
            let expiries = txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
            let current: Option<R> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            let current = match current {
                Some(record) if !is_expired(&expiries, R::NAMESPACE, key, now_millis())? => {
                    Some(record)
                }
                _ => None,
            };
            result = match current {
                Some(mut record) => {
                    if f(&mut record) {
                        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                        table
                            .insert(key, value.as_slice())
                            .map_err(map_err!(Write))?;
                    }
                    Some(record)
                }
                None => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(result)
    }

    /// Commit a batch of puts and deletes in one write transaction.
    pub fn apply(&self, batch: WriteBatch) -> StateResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for op in batch.ops {
            match op {
                BatchOp::Put {
                    namespace,
                    key,
                    value,
                    ttl,
                } => {
                    let mut table = txn.open_table(namespace.table()).map_err(map_err!(Table))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    let mut expiries = txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
                    let expiry_key = namespace.expiry_key(&key);
                    match ttl {
                        Some(ttl) => {
                            expiries
                                .insert(expiry_key.as_str(), deadline_after(ttl))
                                .map_err(map_err!(Write))?;
                        }
                        None => {
                            expiries
                                .remove(expiry_key.as_str())
                                .map_err(map_err!(Write))?;
                        }
                    }
                }
                BatchOp::Delete { namespace, key } => {
                    let mut table = txn.open_table(namespace.table()).map_err(map_err!(Table))?;
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                    let mut expiries = txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
                    expiries
                        .remove(namespace.expiry_key(&key).as_str())
                        .map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(ops, "write batch committed");
        Ok(())
    }

    /// Physically remove every record whose TTL has passed.
    pub fn purge_expired(&self) -> StateResult<u32> {
        let now = now_millis();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut purged = 0;
        {
            let mut expiries = txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
            let mut due = Vec::new();
            for entry in expiries.iter().map_err(map_err!(Read))? {
                let (key, deadline) = entry.map_err(map_err!(Read))?;
                if deadline.value() <= now {
                    due.push(key.value().to_string());
                }
            }
            for expiry_key in &due {
                expiries
                    .remove(expiry_key.as_str())
                    .map_err(map_err!(Write))?;
                let Some((name, key)) = expiry_key.split_once('/') else {
                    continue;
                };
                let Some(namespace) = Namespace::ALL.into_iter().find(|ns| ns.name() == name)
                else {
                    continue;
                };
                let mut table = txn.open_table(namespace.table()).map_err(map_err!(Table))?;
                if table.remove(key).map_err(map_err!(Write))?.is_some() {
                    purged += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if purged > 0 {
            debug!(purged, "expired records purged");
        }
        Ok(purged)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Get a record by key. Expired records read as absent.
    pub fn get<R: Record>(&self, key: &str) -> StateResult<Option<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::NAMESPACE.table()).map_err(map_err!(Table))?;
        let expiries = txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) if !is_expired(&expiries, R::NAMESPACE, key, now_millis())? => {
                Ok(Some(decode(guard.value())?))
            }
            _ => Ok(None),
        }
    }

    /// Get a record by key, failing with `NotFound` when absent.
    pub fn require<R: Record>(&self, key: &str) -> StateResult<R> {
        self.get(key)?
            .ok_or_else(|| StateError::NotFound(format!("{}/{key}", R::NAMESPACE.name())))
    }

    /// List every live record of a type, in key order.
    pub fn list<R: Record>(&self) -> StateResult<Vec<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::NAMESPACE.table()).map_err(map_err!(Table))?;
        let expiries = txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
        let now = now_millis();
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !is_expired(&expiries, R::NAMESPACE, key.value(), now)? {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    /// List live records whose key starts with `prefix`, in key order,
    /// keeping at most the last `limit` of them.
    pub fn list_prefix<R: Record>(&self, prefix: &str, limit: usize) -> StateResult<Vec<R>> {
        let upper = prefix_upper_bound(prefix);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::NAMESPACE.table()).map_err(map_err!(Table))?;
        let expiries = txn.open_table(EXPIRIES).map_err(map_err!(Table))?;
        let now = now_millis();
        let mut results = Vec::new();
        for entry in table
            .range(prefix..upper.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            if results.len() >= limit {
                break;
            }
            let (key, value) = entry.map_err(map_err!(Read))?;
            if is_expired(&expiries, R::NAMESPACE, key.value(), now)? {
                continue;
            }
            results.push(decode(value.value())?);
        }
        results.reverse();
        Ok(results)
    }

    /// The live record with the greatest key under `prefix`.
    pub fn last_with_prefix<R: Record>(&self, prefix: &str) -> StateResult<Option<R>> {
        Ok(self.list_prefix(prefix, 1)?.pop())
    }
}
