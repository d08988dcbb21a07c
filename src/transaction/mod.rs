//! Transaction table and record-level lock manager.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{DbError, DbResult};
use crate::types::{Lsn, TrxId};

mod lock_manager;

pub use lock_manager::{LockId, LockManager, LockMode};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrxStatus {
    Running,
    Waiting,
}

struct TrxEntry {
    status: TrxStatus,
    // The transaction this one is blocked behind, 0 when running.
    waiting_for: TrxId,
    locks: Vec<LockId>,
    undo_lsns: Vec<Lsn>,
}

struct TrxTable {
    next_id: TrxId,
    actives: HashMap<TrxId, TrxEntry>,
}

/// All state behind one table-wide mutex. Lock ordering: the lock
/// manager's mutex may be held while taking this one, never the other
/// way around.
pub struct TrxManager {
    inner: Mutex<TrxTable>,
}

impl TrxManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrxTable {
                next_id: 1,
                actives: HashMap::new(),
            }),
        }
    }

    pub fn begin(&self) -> TrxId {
        let mut table = self.inner.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.actives.insert(
            id,
            TrxEntry {
                status: TrxStatus::Running,
                waiting_for: 0,
                locks: Vec::new(),
                undo_lsns: Vec::new(),
            },
        );
        id
    }

    pub fn is_active(&self, id: TrxId) -> bool {
        self.inner.lock().actives.contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().actives.len()
    }

    /// Bump the id counter past ids seen in the log, so post-recovery
    /// transactions never collide with logged ones.
    pub fn seed_next_id(&self, min: TrxId) {
        let mut table = self.inner.lock();
        if table.next_id < min {
            table.next_id = min;
        }
    }

    pub(crate) fn record_undo(&self, id: TrxId, lsn: Lsn) -> DbResult<()> {
        let mut table = self.inner.lock();
        let entry = table.actives.get_mut(&id).ok_or(DbError::InvalidTrx(id))?;
        entry.undo_lsns.push(lsn);
        Ok(())
    }

    /// Take the recorded update LSNs, most recent last.
    pub(crate) fn take_undo_lsns(&self, id: TrxId) -> DbResult<Vec<Lsn>> {
        let mut table = self.inner.lock();
        let entry = table.actives.get_mut(&id).ok_or(DbError::InvalidTrx(id))?;
        Ok(std::mem::take(&mut entry.undo_lsns))
    }

    pub(crate) fn attach_lock(&self, id: TrxId, lock: LockId) {
        let mut table = self.inner.lock();
        if let Some(entry) = table.actives.get_mut(&id) {
            entry.locks.push(lock);
        }
    }

    pub(crate) fn forget_lock(&self, id: TrxId, lock: LockId) {
        let mut table = self.inner.lock();
        if let Some(entry) = table.actives.get_mut(&id) {
            entry.locks.retain(|&l| l != lock);
        }
    }

    /// Detach the held locks in acquisition order.
    pub(crate) fn detach_locks(&self, id: TrxId) -> Vec<LockId> {
        let mut table = self.inner.lock();
        match table.actives.get_mut(&id) {
            Some(entry) => std::mem::take(&mut entry.locks),
            None => Vec::new(),
        }
    }

    pub(crate) fn set_waiting(&self, id: TrxId, on: TrxId) {
        let mut table = self.inner.lock();
        if let Some(entry) = table.actives.get_mut(&id) {
            entry.status = TrxStatus::Waiting;
            entry.waiting_for = on;
        }
    }

    pub(crate) fn set_running(&self, id: TrxId) {
        let mut table = self.inner.lock();
        if let Some(entry) = table.actives.get_mut(&id) {
            entry.status = TrxStatus::Running;
            entry.waiting_for = 0;
        }
    }

    /// Follow waiting-for edges from `from`; true when the chain leads
    /// back to `target`, meaning a new wait would close a cycle.
    pub(crate) fn wait_chain_reaches(&self, from: TrxId, target: TrxId) -> bool {
        let table = self.inner.lock();
        let mut current = from;
        let mut hops = 0;
        while current != 0 {
            if current == target {
                return true;
            }
            hops += 1;
            if hops > table.actives.len() {
                return false;
            }
            current = match table.actives.get(&current) {
                Some(e) if e.status == TrxStatus::Waiting => e.waiting_for,
                _ => 0,
            };
        }
        false
    }

    pub(crate) fn finish(&self, id: TrxId) {
        self.inner.lock().actives.remove(&id);
    }
}

impl Default for TrxManager {
    fn default() -> Self {
        Self::new()
    }
}
