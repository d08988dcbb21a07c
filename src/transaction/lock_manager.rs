//! Record-level lock manager.
//!
//! One mutex guards the whole lock table: a map from `(table, page)`
//! to a FIFO list of lock objects, allocated out of an arena and linked
//! by index. Blocking requests wait on a per-lock condition variable;
//! a `granted` flag guards against spurious wakeups.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::error::{DbError, DbResult};
use crate::transaction::TrxManager;
use crate::types::{Key, PageNum, TableId, TrxId};

pub type LockId = usize;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockObj {
    table_id: TableId,
    pagenum: PageNum,
    key: Key,
    mode: LockMode,
    owner: TrxId,
    granted: bool,
    prev: Option<LockId>,
    next: Option<LockId>,
    cond: Arc<Condvar>,
}

#[derive(Clone, Copy, Default)]
struct LockEntry {
    head: Option<LockId>,
    tail: Option<LockId>,
}

struct LockTable {
    entries: HashMap<(TableId, PageNum), LockEntry>,
    arena: Vec<Option<LockObj>>,
    free: Vec<LockId>,
}

impl LockTable {
    fn obj(&self, id: LockId) -> &LockObj {
        self.arena[id].as_ref().expect("live lock")
    }

    fn obj_mut(&mut self, id: LockId) -> &mut LockObj {
        self.arena[id].as_mut().expect("live lock")
    }

    fn alloc(&mut self, obj: LockObj) -> LockId {
        match self.free.pop() {
            Some(id) => {
                self.arena[id] = Some(obj);
                id
            }
            None => {
                self.arena.push(Some(obj));
                self.arena.len() - 1
            }
        }
    }

    fn push_tail(&mut self, obj: LockObj) -> LockId {
        let entry_key = (obj.table_id, obj.pagenum);
        let id = self.alloc(obj);
        let entry = self.entries.entry(entry_key).or_default();
        let old_tail = entry.tail;
        entry.tail = Some(id);
        if entry.head.is_none() {
            entry.head = Some(id);
        }
        if let Some(t) = old_tail {
            self.obj_mut(t).next = Some(id);
        }
        self.obj_mut(id).prev = old_tail;
        id
    }

    fn unlink(&mut self, id: LockId) {
        let (entry_key, prev, next) = {
            let o = self.obj(id);
            ((o.table_id, o.pagenum), o.prev, o.next)
        };
        match prev {
            Some(p) => self.obj_mut(p).next = next,
            None => {
                if let Some(e) = self.entries.get_mut(&entry_key) {
                    e.head = next;
                }
            }
        }
        match next {
            Some(n) => self.obj_mut(n).prev = prev,
            None => {
                if let Some(e) = self.entries.get_mut(&entry_key) {
                    e.tail = prev;
                }
            }
        }
        if let Some(e) = self.entries.get(&entry_key) {
            if e.head.is_none() {
                self.entries.remove(&entry_key);
            }
        }
        self.arena[id] = None;
        self.free.push(id);
    }

    fn head_of(&self, table_id: TableId, pagenum: PageNum) -> Option<LockId> {
        self.entries.get(&(table_id, pagenum)).and_then(|e| e.head)
    }
}

pub struct LockManager {
    table: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable {
                entries: HashMap::new(),
                arena: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Acquire a record lock, blocking behind conflicting holders.
    ///
    /// `last_writer` is the slot's recorded writer; if it still runs
    /// and owns no explicit lock on the record yet, its implicit lock
    /// is materialised first so the requester queues behind it.
    ///
    /// `Err(Deadlock)` means the wait would close a cycle. The request
    /// is withdrawn and the caller must abort the transaction.
    pub fn acquire(
        &self,
        trx: &TrxManager,
        table_id: TableId,
        pagenum: PageNum,
        key: Key,
        trx_id: TrxId,
        mode: LockMode,
        last_writer: TrxId,
    ) -> DbResult<LockId> {
        let mut table = self.table.lock();

        if last_writer != 0
            && last_writer != trx_id
            && trx.is_active(last_writer)
            && Self::find_by_owner(&table, table_id, pagenum, key, last_writer).is_none()
        {
            let id = table.push_tail(LockObj {
                table_id,
                pagenum,
                key,
                mode: LockMode::Exclusive,
                owner: last_writer,
                granted: true,
                prev: None,
                next: None,
                cond: Arc::new(Condvar::new()),
            });
            trx.attach_lock(last_writer, id);
            debug!(
                "implicit lock of trx {} on ({}, {}, {}) made explicit",
                last_writer, table_id, pagenum, key
            );
        }

        // Re-entry: hand back a compatible lock we already hold.
        if let Some(id) = Self::find_reentrant(&table, table_id, pagenum, key, trx_id, mode) {
            return Ok(id);
        }

        let blocker = Self::last_conflict(&table, table_id, pagenum, key, trx_id, mode);
        let cond = Arc::new(Condvar::new());
        let id = table.push_tail(LockObj {
            table_id,
            pagenum,
            key,
            mode,
            owner: trx_id,
            granted: blocker.is_none(),
            prev: None,
            next: None,
            cond: cond.clone(),
        });
        trx.attach_lock(trx_id, id);

        if let Some(owner) = blocker {
            trx.set_waiting(trx_id, owner);
            if trx.wait_chain_reaches(owner, trx_id) {
                table.unlink(id);
                trx.forget_lock(trx_id, id);
                trx.set_running(trx_id);
                debug!("trx {} would deadlock behind trx {}", trx_id, owner);
                return Err(DbError::Deadlock(trx_id));
            }
            while !table.obj(id).granted {
                cond.wait(&mut table);
            }
            trx.set_running(trx_id);
        }
        Ok(id)
    }

    /// Drop a lock and wake the first waiting successor on the same key
    /// when nothing conflicting remains ahead of it.
    pub fn release(&self, lock_id: LockId) {
        let mut table = self.table.lock();
        let (table_id, pagenum, key) = {
            let o = table.obj(lock_id);
            (o.table_id, o.pagenum, o.key)
        };
        table.unlink(lock_id);

        let mut successor = None;
        let mut cursor = table.head_of(table_id, pagenum);
        while let Some(id) = cursor {
            let o = table.obj(id);
            if o.key == key && !o.granted {
                successor = Some(id);
                break;
            }
            cursor = o.next;
        }

        if let Some(succ) = successor {
            let (succ_mode, succ_owner) = {
                let o = table.obj(succ);
                (o.mode, o.owner)
            };
            let mut blocked = false;
            let mut cursor = table.head_of(table_id, pagenum);
            while let Some(id) = cursor {
                if id == succ {
                    break;
                }
                let o = table.obj(id);
                if o.key == key
                    && o.owner != succ_owner
                    && (succ_mode == LockMode::Exclusive || o.mode == LockMode::Exclusive)
                {
                    blocked = true;
                    break;
                }
                cursor = o.next;
            }
            if !blocked {
                let cond = {
                    let o = table.obj_mut(succ);
                    o.granted = true;
                    o.cond.clone()
                };
                cond.notify_one();
            }
        }
    }

    /// True when another transaction holds or waits for the record.
    pub fn lock_exists(
        &self,
        table_id: TableId,
        pagenum: PageNum,
        key: Key,
        trx_id: TrxId,
    ) -> bool {
        let table = self.table.lock();
        let mut cursor = table.head_of(table_id, pagenum);
        while let Some(id) = cursor {
            let o = table.obj(id);
            if o.key == key && o.owner != trx_id {
                return true;
            }
            cursor = o.next;
        }
        false
    }

    fn find_by_owner(
        table: &LockTable,
        table_id: TableId,
        pagenum: PageNum,
        key: Key,
        owner: TrxId,
    ) -> Option<LockId> {
        let mut cursor = table.head_of(table_id, pagenum);
        while let Some(id) = cursor {
            let o = table.obj(id);
            if o.key == key && o.owner == owner {
                return Some(id);
            }
            cursor = o.next;
        }
        None
    }

    /// A held exclusive lock absorbs any re-request; a held shared lock
    /// absorbs shared. Shared-then-exclusive falls through and queues
    /// as an upgrade.
    fn find_reentrant(
        table: &LockTable,
        table_id: TableId,
        pagenum: PageNum,
        key: Key,
        trx_id: TrxId,
        mode: LockMode,
    ) -> Option<LockId> {
        let mut cursor = table.head_of(table_id, pagenum);
        while let Some(id) = cursor {
            let o = table.obj(id);
            if o.key == key
                && o.owner == trx_id
                && (o.mode == LockMode::Exclusive || o.mode == mode)
            {
                return Some(id);
            }
            cursor = o.next;
        }
        None
    }

    /// The nearest predecessor this request would have to wait behind.
    fn last_conflict(
        table: &LockTable,
        table_id: TableId,
        pagenum: PageNum,
        key: Key,
        trx_id: TrxId,
        mode: LockMode,
    ) -> Option<TrxId> {
        let mut found = None;
        let mut cursor = table.head_of(table_id, pagenum);
        while let Some(id) = cursor {
            let o = table.obj(id);
            if o.key == key
                && o.owner != trx_id
                && (mode == LockMode::Exclusive || o.mode == LockMode::Exclusive)
            {
                found = Some(o.owner);
            }
            cursor = o.next;
        }
        found
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
