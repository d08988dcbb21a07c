//! Log manager: append with LSN assignment, tail buffering, and the
//! three-pass restart (analysis, redo, undo).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

use bytes::BytesMut;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::buffer::BufferPool;
use crate::error::DbResult;
use crate::transaction::TrxManager;
use crate::tx_log::record::{LogBody, LogRecord};
use crate::types::{Lsn, TableId, TrxId};

const LOG_BUFFER_CAPACITY: usize = 1 << 16;

/// Crash injection for recovery tests: stop after the given number of
/// redo applications or undo compensations, as a real crash would.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RecoveryMode {
    Normal,
    RedoCrash(usize),
    UndoCrash(usize),
}

struct LogInner {
    file: File,
    trace: Option<File>,
    buf: BytesMut,
    // Byte length of the durable prefix; also the buffer's base LSN.
    flushed_lsn: Lsn,
    tail_lsn: Lsn,
    // Start of the most recently appended record.
    last_lsn: Lsn,
}

pub struct LogManager {
    inner: Mutex<LogInner>,
}

impl LogManager {
    pub fn new<P: AsRef<Path>>(log_path: P, trace_path: Option<P>) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log_path)?;
        let len = file.metadata()?.len() as Lsn;
        let trace = match trace_path {
            Some(p) => Some(
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(p)?,
            ),
            None => None,
        };
        Ok(Self {
            inner: Mutex::new(LogInner {
                file,
                trace,
                buf: BytesMut::with_capacity(LOG_BUFFER_CAPACITY),
                flushed_lsn: len,
                tail_lsn: len,
                last_lsn: 0,
            }),
        })
    }

    /// Append a record, assigning its LSN as the current log tail.
    pub fn append(&self, trx_id: TrxId, body: LogBody) -> Lsn {
        let mut inner = self.inner.lock();
        let lsn = inner.tail_lsn;
        let record = LogRecord {
            lsn,
            prev_lsn: inner.last_lsn,
            trx_id,
            body,
        };
        let bytes = record.encode();
        inner.buf.extend_from_slice(&bytes);
        inner.tail_lsn += bytes.len() as Lsn;
        inner.last_lsn = lsn;
        if inner.buf.len() >= LOG_BUFFER_CAPACITY {
            Self::flush_inner(&mut inner);
        }
        lsn
    }

    fn flush_inner(inner: &mut LogInner) {
        if inner.buf.is_empty() {
            return;
        }
        inner
            .file
            .write_all_at(&inner.buf, inner.flushed_lsn as u64)
            .unwrap_or_else(|e| {
                error!("fatal log write failure: {}", e);
                std::process::abort();
            });
        inner.file.sync_all().unwrap_or_else(|e| {
            error!("fatal log sync failure: {}", e);
            std::process::abort();
        });
        inner.flushed_lsn += inner.buf.len() as Lsn;
        inner.buf.clear();
    }

    pub fn flush(&self) {
        Self::flush_inner(&mut self.inner.lock());
    }

    /// Make the log durable at least up to the given record, so a page
    /// carrying that LSN may be written back.
    pub fn flush_up_to(&self, lsn: Lsn) {
        let mut inner = self.inner.lock();
        if lsn >= inner.flushed_lsn {
            Self::flush_inner(&mut inner);
        }
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.inner.lock().flushed_lsn
    }

    pub fn tail_lsn(&self) -> Lsn {
        self.inner.lock().tail_lsn
    }

    /// Read a record by its LSN, serving it from the tail buffer when
    /// it is not yet on disk.
    pub fn read_record(&self, lsn: Lsn) -> DbResult<LogRecord> {
        let inner = self.inner.lock();
        if lsn >= inner.flushed_lsn {
            let off = (lsn - inner.flushed_lsn) as usize;
            let mut cursor = std::io::Cursor::new(&inner.buf[off..]);
            LogRecord::decode_from(&mut cursor)
        } else {
            let mut size_buf = [0u8; 4];
            inner.file.read_exact_at(&mut size_buf, lsn as u64)?;
            let size = u32::from_le_bytes(size_buf) as usize;
            let mut buf = vec![0u8; size];
            inner.file.read_exact_at(&mut buf, lsn as u64)?;
            LogRecord::decode_from(&mut std::io::Cursor::new(&buf[..]))
        }
    }

    fn trace_line(&self, line: &str) {
        let mut inner = self.inner.lock();
        if let Some(f) = inner.trace.as_mut() {
            let _ = writeln!(f, "{}", line);
        }
    }

    /// Three-pass restart. Committed work is replayed, losers are
    /// rolled back with compensation records, and the pass is safe to
    /// repeat after a mid-recovery crash.
    pub fn recover(&self, pool: &BufferPool, trx: &TrxManager, mode: RecoveryMode) -> DbResult<()> {
        let end = {
            let mut inner = self.inner.lock();
            Self::flush_inner(&mut inner);
            inner.flushed_lsn
        };
        if end == 0 {
            return Ok(());
        }

        // ---- analysis ----
        self.trace_line("[ANALYSIS] analysis pass starts");
        let mut losers: HashMap<TrxId, Vec<Lsn>> = HashMap::new();
        let mut winner_count = 0usize;
        let mut max_trx: TrxId = 0;
        let mut last = 0;
        let mut lsn = 0;
        while lsn < end {
            let record = self.read_record(lsn)?;
            max_trx = max_trx.max(record.trx_id);
            match record.body {
                LogBody::Begin => {
                    losers.insert(record.trx_id, Vec::new());
                }
                LogBody::Commit | LogBody::Rollback => {
                    losers.remove(&record.trx_id);
                    winner_count += 1;
                }
                LogBody::Update(_) | LogBody::Compensate { .. } => {
                    if let Some(list) = losers.get_mut(&record.trx_id) {
                        list.push(lsn);
                    }
                }
            }
            last = lsn;
            lsn += record.size() as Lsn;
        }
        self.inner.lock().last_lsn = last;
        trx.seed_next_id(max_trx + 1);
        self.trace_line(&format!(
            "[ANALYSIS] analysis pass ends: {} winners, {} losers",
            winner_count,
            losers.len()
        ));
        info!(
            "recovery: {} winners, {} losers, log ends at {}",
            winner_count,
            losers.len(),
            end
        );

        // ---- redo ----
        self.trace_line("[REDO] redo pass starts");
        let mut redone = 0usize;
        let mut lsn = 0;
        while lsn < end {
            let record = self.read_record(lsn)?;
            let size = record.size() as Lsn;
            if let Some(update) = record.update_body() {
                let table_id = update.table_id as TableId;
                if pool.disk().is_open(table_id) {
                    let mut guard = pool.request_page(table_id, update.pagenum);
                    if record.lsn > guard.page().lsn() {
                        let off = update.offset as usize;
                        let data = update.new_data();
                        let page = guard.page_mut();
                        page.as_bytes_mut()[off..off + data.len()].copy_from_slice(data);
                        page.set_lsn(record.lsn);
                        self.trace_line(&format!(
                            "LSN {} [REDO] trx {} redone on table {} page {}",
                            record.lsn, record.trx_id, table_id, update.pagenum
                        ));
                    } else {
                        self.trace_line(&format!(
                            "LSN {} [CONSIDER-REDO] trx {} already reflected",
                            record.lsn, record.trx_id
                        ));
                    }
                } else {
                    warn!(
                        "redo skipped: table {} of lsn {} is not open",
                        table_id, record.lsn
                    );
                }
                redone += 1;
                if let RecoveryMode::RedoCrash(limit) = mode {
                    if redone >= limit {
                        self.trace_line("[REDO] crash injected");
                        pool.flush_all_pages();
                        self.flush();
                        return Ok(());
                    }
                }
            }
            lsn += size;
        }
        self.trace_line("[REDO] redo pass ends");

        // ---- undo ----
        self.trace_line("[UNDO] undo pass starts");
        let mut undone = 0usize;
        loop {
            // A loser with nothing left to undo rolls back and leaves.
            let finished: Vec<TrxId> = losers
                .iter()
                .filter(|(_, list)| list.is_empty())
                .map(|(t, _)| *t)
                .collect();
            for trx_id in finished {
                let rollback_lsn = self.append(trx_id, LogBody::Rollback);
                self.trace_line(&format!(
                    "LSN {} [UNDO] trx {} rolled back during recovery",
                    rollback_lsn, trx_id
                ));
                losers.remove(&trx_id);
            }
            if losers.is_empty() {
                break;
            }

            // Always undo the globally most recent outstanding record.
            let (victim, tail) = match losers
                .iter()
                .map(|(t, list)| (*t, *list.last().expect("non-empty")))
                .max_by_key(|&(_, l)| l)
            {
                Some(pick) => pick,
                None => break,
            };
            let record = self.read_record(tail)?;
            let list = losers.get_mut(&victim).expect("live loser");

            match &record.body {
                LogBody::Update(update) => {
                    list.pop();
                    let next_undo_lsn = list.last().copied().unwrap_or(0);
                    let clr_lsn = self.append(
                        victim,
                        LogBody::Compensate {
                            update: update.inverted(),
                            next_undo_lsn,
                        },
                    );
                    let table_id = update.table_id as TableId;
                    if pool.disk().is_open(table_id) {
                        let mut guard = pool.request_page(table_id, update.pagenum);
                        if record.lsn <= guard.page().lsn() {
                            let off = update.offset as usize;
                            let data = update.old_data();
                            let page = guard.page_mut();
                            page.as_bytes_mut()[off..off + data.len()].copy_from_slice(data);
                            page.set_lsn(clr_lsn);
                        }
                    }
                    self.trace_line(&format!(
                        "LSN {} [UNDO] trx {} update undone by CLR {}",
                        record.lsn, victim, clr_lsn
                    ));
                    undone += 1;
                    if let RecoveryMode::UndoCrash(limit) = mode {
                        if undone >= limit {
                            self.trace_line("[UNDO] crash injected");
                            pool.flush_all_pages();
                            self.flush();
                            return Ok(());
                        }
                    }
                }
                LogBody::Compensate { next_undo_lsn, .. } => {
                    // Work up to this point was already undone before a
                    // previous crash; skip straight to the next target.
                    let next = *next_undo_lsn;
                    while let Some(&l) = list.last() {
                        if l > next {
                            list.pop();
                        } else {
                            break;
                        }
                    }
                    self.trace_line(&format!(
                        "LSN {} [UNDO] trx {} compensation found, resuming at {}",
                        record.lsn, victim, next
                    ));
                }
                _ => {
                    list.pop();
                }
            }
        }
        self.trace_line("[UNDO] undo pass ends");
        self.flush();
        debug!("recovery complete, log tail at {}", self.tail_lsn());
        Ok(())
    }
}
