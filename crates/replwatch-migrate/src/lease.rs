//! Per-database exclusive leases for in-flight migrations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

/// Which execution holds each leased database.
#[derive(Debug, Default)]
pub struct LeaseTable {
    held: Mutex<HashMap<Uuid, Uuid>>,
}

impl LeaseTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lease every database in `targets` for `execution_id`, or none of them.
    ///
    /// On overlap returns the first target (in `targets` order) that is
    /// already held, and the execution holding it.
    pub fn acquire(
        self: &Arc<Self>,
        execution_id: Uuid,
        targets: &[Uuid],
    ) -> Result<LeaseGuard, (Uuid, Uuid)> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((db, holder)) = targets
            .iter()
            .find_map(|db| held.get(db).map(|holder| (*db, *holder)))
        {
            return Err((db, holder));
        }
        for db in targets {
            held.insert(*db, execution_id);
        }
        Ok(LeaseGuard {
            table: Arc::clone(self),
            execution_id,
            targets: targets.to_vec(),
        })
    }

    pub fn holder(&self, database_id: Uuid) -> Option<Uuid> {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&database_id)
            .copied()
    }

    fn release(&self, execution_id: Uuid, targets: &[Uuid]) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for db in targets {
            if held.get(db) == Some(&execution_id) {
                held.remove(db);
            }
        }
    }
}

/// Releases its leases when dropped.
#[derive(Debug)]
pub struct LeaseGuard {
    table: Arc<LeaseTable>,
    execution_id: Uuid,
    targets: Vec<Uuid>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.table.release(self.execution_id, &self.targets);
    }
}
