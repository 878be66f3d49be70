//! The `Record` trait and batched writes.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StateError, StateResult};
use crate::tables::Namespace;

/// A type persisted in one namespace of the [`StateStore`](crate::StateStore).
pub trait Record: Serialize + DeserializeOwned {
    /// Table the record lives in.
    const NAMESPACE: Namespace;

    /// Key of this record within its namespace.
    fn key(&self) -> String;
}

pub(crate) enum BatchOp {
    Put {
        namespace: Namespace,
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        namespace: Namespace,
        key: String,
    },
}

/// A set of puts and deletes committed in one redb write transaction.
///
/// Readers observe either none or all of the batch.
#[derive(Default)]
pub struct WriteBatch {
    pub(crate) ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<R: Record>(&mut self, record: &R) -> StateResult<()> {
        self.push_put(record, None)
    }

    pub fn put_with_ttl<R: Record>(&mut self, record: &R, ttl: Duration) -> StateResult<()> {
        self.push_put(record, Some(ttl))
    }

    pub fn delete<R: Record>(&mut self, key: &str) {
        self.ops.push(BatchOp::Delete {
            namespace: R::NAMESPACE,
            key: key.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn push_put<R: Record>(&mut self, record: &R, ttl: Option<Duration>) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(|e| StateError::Serialize(e.to_string()))?;
        self.ops.push(BatchOp::Put {
            namespace: R::NAMESPACE,
            key: record.key(),
            value,
            ttl,
        });
        Ok(())
    }
}
