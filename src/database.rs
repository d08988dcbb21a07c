//! The database context object: one value wiring the disk manager,
//! buffer pool, B+tree, lock manager and log manager together. Create
//! it with `Database::init`, tear it down with `shutdown`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::btree::BTree;
use crate::buffer::BufferPool;
use crate::disk::DiskManager;
use crate::error::{DbError, DbResult};
use crate::page::{MAX_VALUE_SIZE, MIN_VALUE_SIZE};
use crate::transaction::{LockManager, LockMode, TrxManager};
use crate::tx_log::{LogBody, LogManager, RecoveryMode, UpdateBody, IMAGE_SIZE};
use crate::types::{Key, TableId, TrxId};

pub struct DbConfig {
    pub buffer_capacity: usize,
    pub log_path: PathBuf,
    /// Human-readable recovery trace, written during restart.
    pub trace_path: Option<PathBuf>,
    /// Table files to open before recovery, in their original open
    /// order, so logged table ids resolve to the right files.
    pub table_paths: Vec<PathBuf>,
    pub recovery: RecoveryMode,
}

impl DbConfig {
    pub fn new<P: AsRef<Path>>(log_path: P) -> Self {
        Self {
            buffer_capacity: 256,
            log_path: log_path.as_ref().to_path_buf(),
            trace_path: None,
            table_paths: Vec::new(),
            recovery: RecoveryMode::Normal,
        }
    }
}

pub struct Database {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    log: Arc<LogManager>,
    locks: LockManager,
    trxs: TrxManager,
    btree: BTree,
}

impl Database {
    /// Build every manager, reopen the listed tables, and run restart
    /// recovery over the log.
    pub fn init(config: DbConfig) -> DbResult<Database> {
        let disk = Arc::new(DiskManager::new());
        let log = Arc::new(LogManager::new(
            config.log_path.clone(),
            config.trace_path.clone(),
        )?);
        let pool = Arc::new(BufferPool::new(
            config.buffer_capacity,
            disk.clone(),
            log.clone(),
        ));
        let trxs = TrxManager::new();

        for path in &config.table_paths {
            disk.open_table_file(path)?;
        }
        log.recover(&pool, &trxs, config.recovery)?;
        log.flush();

        let btree = BTree::new(pool.clone());
        Ok(Database {
            disk,
            pool,
            log,
            locks: LockManager::new(),
            trxs,
            btree,
        })
    }

    pub fn open_table<P: AsRef<Path>>(&self, path: P) -> DbResult<TableId> {
        self.disk.open_table_file(path)
    }

    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn log(&self) -> &LogManager {
        &self.log
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn trxs(&self) -> &TrxManager {
        &self.trxs
    }

    pub fn btree(&self) -> &BTree {
        &self.btree
    }

    fn check_table(&self, table_id: TableId) -> DbResult<()> {
        if self.disk.is_open(table_id) {
            Ok(())
        } else {
            Err(DbError::InvalidTable(table_id))
        }
    }

    pub fn insert(&self, table_id: TableId, key: Key, value: &[u8]) -> DbResult<()> {
        self.check_table(table_id)?;
        if value.len() < MIN_VALUE_SIZE || value.len() > MAX_VALUE_SIZE {
            return Err(DbError::BadValueLength(value.len()));
        }
        self.btree.insert(table_id, key, value)
    }

    pub fn delete(&self, table_id: TableId, key: Key) -> DbResult<()> {
        self.check_table(table_id)?;
        self.btree.delete(table_id, key)
    }

    /// Transactional point read under a shared lock. `Err(Deadlock)`
    /// means the transaction must be aborted by the caller.
    pub fn find(&self, table_id: TableId, key: Key, trx_id: TrxId) -> DbResult<Vec<u8>> {
        self.check_table(table_id)?;
        if !self.trxs.is_active(trx_id) {
            return Err(DbError::InvalidTrx(trx_id));
        }

        let leaf = self.btree.find_leaf(table_id, key);
        if leaf == 0 {
            return Err(DbError::KeyNotFound(key));
        }
        let last_writer = {
            let guard = self.pool.request_page(table_id, leaf);
            match guard.page().leaf_find(key) {
                Some(idx) => guard.page().slot(idx).trx_id,
                None => return Err(DbError::KeyNotFound(key)),
            }
        };

        self.locks.acquire(
            &self.trxs,
            table_id,
            leaf,
            key,
            trx_id,
            LockMode::Shared,
            last_writer,
        )?;

        let guard = self.pool.request_page(table_id, leaf);
        match guard.page().leaf_find(key) {
            Some(idx) => Ok(guard.page().value(idx).to_vec()),
            None => Err(DbError::KeyNotFound(key)),
        }
    }

    /// Transactional in-place update under an exclusive lock. The new
    /// value must fit the stored one; the old stored size is returned.
    pub fn update(
        &self,
        table_id: TableId,
        key: Key,
        new_value: &[u8],
        trx_id: TrxId,
    ) -> DbResult<u16> {
        self.check_table(table_id)?;
        if !self.trxs.is_active(trx_id) {
            return Err(DbError::InvalidTrx(trx_id));
        }
        if new_value.is_empty() || new_value.len() > IMAGE_SIZE {
            return Err(DbError::BadValueLength(new_value.len()));
        }

        let leaf = self.btree.find_leaf(table_id, key);
        if leaf == 0 {
            return Err(DbError::KeyNotFound(key));
        }
        let last_writer = {
            let guard = self.pool.request_page(table_id, leaf);
            match guard.page().leaf_find(key) {
                Some(idx) => guard.page().slot(idx).trx_id,
                None => return Err(DbError::KeyNotFound(key)),
            }
        };

        self.locks.acquire(
            &self.trxs,
            table_id,
            leaf,
            key,
            trx_id,
            LockMode::Exclusive,
            last_writer,
        )?;

        let mut guard = self.pool.request_page(table_id, leaf);
        let idx = guard
            .page()
            .leaf_find(key)
            .ok_or(DbError::KeyNotFound(key))?;
        let mut slot = guard.page().slot(idx);
        if new_value.len() > slot.size as usize {
            return Err(DbError::ValueTooLarge {
                got: new_value.len(),
                stored: slot.size,
            });
        }
        let old_size = slot.size;

        // The update record exists before the page changes.
        let len = new_value.len();
        let mut old_image = [0u8; IMAGE_SIZE];
        let mut new_image = [0u8; IMAGE_SIZE];
        old_image[..len].copy_from_slice(&guard.page().value(idx)[..len]);
        new_image[..len].copy_from_slice(new_value);
        let lsn = self.log.append(
            trx_id,
            LogBody::Update(UpdateBody {
                table_id: table_id as u64,
                pagenum: leaf,
                offset: slot.offset,
                data_length: len as u16,
                old_image,
                new_image,
            }),
        );
        self.trxs.record_undo(trx_id, lsn)?;

        let page = guard.page_mut();
        page.overwrite_value(idx, new_value);
        slot.trx_id = trx_id;
        page.set_slot(idx, &slot);
        page.set_lsn(lsn);
        Ok(old_size)
    }

    pub fn begin_transaction(&self) -> TrxId {
        let trx_id = self.trxs.begin();
        self.log.append(trx_id, LogBody::Begin);
        trx_id
    }

    pub fn commit_transaction(&self, trx_id: TrxId) -> DbResult<()> {
        if !self.trxs.is_active(trx_id) {
            return Err(DbError::InvalidTrx(trx_id));
        }

        // 1. the commit record becomes durable before any lock falls
        self.log.append(trx_id, LogBody::Commit);
        self.log.flush();

        // 2. release locks in acquisition order
        for lock in self.trxs.detach_locks(trx_id) {
            self.locks.release(lock);
        }

        // 3. the transaction leaves the table
        self.trxs.finish(trx_id);
        Ok(())
    }

    pub fn abort_transaction(&self, trx_id: TrxId) -> DbResult<()> {
        if !self.trxs.is_active(trx_id) {
            return Err(DbError::InvalidTrx(trx_id));
        }

        // 1. walk the recorded updates newest-first, restoring old
        //    images and logging a compensation for each
        let mut lsns = self.trxs.take_undo_lsns(trx_id)?;
        while let Some(lsn) = lsns.pop() {
            let record = self.log.read_record(lsn)?;
            let update = match record.update_body() {
                Some(u) => u.clone(),
                None => continue,
            };
            let next_undo_lsn = lsns.last().copied().unwrap_or(0);
            let clr_lsn = self.log.append(
                trx_id,
                LogBody::Compensate {
                    update: update.inverted(),
                    next_undo_lsn,
                },
            );

            let mut guard = self
                .pool
                .request_page(update.table_id as TableId, update.pagenum);
            let off = update.offset as usize;
            let data = update.old_data();
            let page = guard.page_mut();
            page.as_bytes_mut()[off..off + data.len()].copy_from_slice(data);
            page.set_lsn(clr_lsn);
        }

        // 2. the rollback record becomes durable
        self.log.append(trx_id, LogBody::Rollback);
        self.log.flush();

        // 3. locks fall and the transaction leaves the table
        for lock in self.trxs.detach_locks(trx_id) {
            self.locks.release(lock);
        }
        self.trxs.finish(trx_id);
        Ok(())
    }

    /// Flush everything and close. Dropping without calling this is the
    /// crash case recovery exists for.
    pub fn shutdown(self) {
        self.pool.flush_all_pages();
        self.log.flush();
        info!("database shut down cleanly");
    }
}
