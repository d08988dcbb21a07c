//! Buffer pool.
//!
//! A pool-wide mutex guards the frame directory and the arena-linked
//! free and LRU lists; each frame carries its own mutex whose guard
//! doubles as the page latch and the pin. `request_page` hands out an
//! owned guard, so dropping the `PageGuard` is the release.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

use crate::disk::DiskManager;
use crate::page::Page;
use crate::tx_log::LogManager;
use crate::types::{PageNum, TableId};

pub type FrameId = usize;

pub struct Frame {
    table_id: TableId,
    pagenum: PageNum,
    dirty: bool,
    valid: bool,
    page: Page,
}

struct PoolState {
    directory: HashMap<(TableId, PageNum), FrameId>,
    prev: Vec<Option<FrameId>>,
    next: Vec<Option<FrameId>>,
    free_head: Option<FrameId>,
    lru_head: Option<FrameId>,
    lru_tail: Option<FrameId>,
}

impl PoolState {
    fn new(capacity: usize) -> Self {
        // Thread every frame into the free list.
        let mut next: Vec<Option<FrameId>> = (1..capacity).map(Some).collect();
        next.push(None);
        Self {
            directory: HashMap::new(),
            prev: vec![None; capacity],
            next,
            free_head: if capacity > 0 { Some(0) } else { None },
            lru_head: None,
            lru_tail: None,
        }
    }

    fn free_pop(&mut self) -> Option<FrameId> {
        let fid = self.free_head?;
        self.free_head = self.next[fid];
        self.next[fid] = None;
        Some(fid)
    }

    fn free_push(&mut self, fid: FrameId) {
        self.prev[fid] = None;
        self.next[fid] = self.free_head;
        self.free_head = Some(fid);
    }

    fn lru_unlink(&mut self, fid: FrameId) {
        match self.prev[fid] {
            Some(p) => self.next[p] = self.next[fid],
            None => self.lru_head = self.next[fid],
        }
        match self.next[fid] {
            Some(n) => self.prev[n] = self.prev[fid],
            None => self.lru_tail = self.prev[fid],
        }
        self.prev[fid] = None;
        self.next[fid] = None;
    }

    fn lru_push_front(&mut self, fid: FrameId) {
        self.prev[fid] = None;
        self.next[fid] = self.lru_head;
        if let Some(h) = self.lru_head {
            self.prev[h] = Some(fid);
        }
        self.lru_head = Some(fid);
        if self.lru_tail.is_none() {
            self.lru_tail = Some(fid);
        }
    }

    fn lru_touch(&mut self, fid: FrameId) {
        self.lru_unlink(fid);
        self.lru_push_front(fid);
    }
}

pub struct BufferPool {
    disk: Arc<DiskManager>,
    log: Arc<LogManager>,
    frames: Vec<Arc<Mutex<Frame>>>,
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new(capacity: usize, disk: Arc<DiskManager>, log: Arc<LogManager>) -> Self {
        assert!(capacity > 0);
        let frames = (0..capacity)
            .map(|_| {
                Arc::new(Mutex::new(Frame {
                    table_id: 0,
                    pagenum: 0,
                    dirty: false,
                    valid: false,
                    page: Page::new(),
                }))
            })
            .collect();
        Self {
            disk,
            log,
            frames,
            state: Mutex::new(PoolState::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Latch a page in the pool, loading it from disk on a miss. The
    /// returned guard pins the frame until dropped.
    pub fn request_page(&self, table_id: TableId, pagenum: PageNum) -> PageGuard {
        loop {
            let mut state = self.state.lock();

            if let Some(&fid) = state.directory.get(&(table_id, pagenum)) {
                state.lru_touch(fid);
                let arc = self.frames[fid].clone();
                drop(state);
                // Block on the latch without the pool lock; the binding
                // may change while we wait, so re-check it.
                let guard = arc.lock_arc();
                if guard.valid && guard.table_id == table_id && guard.pagenum == pagenum {
                    return PageGuard::new(guard, self.disk.clone());
                }
                continue;
            }

            let (fid, mut guard) = match self.grab_frame(&mut state) {
                Some(pair) => pair,
                None => {
                    // Every frame pinned; back off and retry.
                    drop(state);
                    std::thread::yield_now();
                    continue;
                }
            };

            if guard.valid {
                // Only drop the mapping if it still points here.
                let old_key = (guard.table_id, guard.pagenum);
                if state.directory.get(&old_key) == Some(&fid) {
                    state.directory.remove(&old_key);
                }
            }
            state.directory.insert((table_id, pagenum), fid);
            state.lru_push_front(fid);
            drop(state);

            // I/O happens with only the frame latch held.
            if guard.valid && guard.dirty {
                self.write_back(&guard);
            }
            guard.table_id = table_id;
            guard.pagenum = pagenum;
            guard.dirty = false;
            guard.valid = true;
            self.disk.read_page(table_id, pagenum, &mut guard.page);
            return PageGuard::new(guard, self.disk.clone());
        }
    }

    /// Pick a free frame, or evict the coldest unpinned one.
    fn grab_frame(
        &self,
        state: &mut PoolState,
    ) -> Option<(FrameId, ArcMutexGuard<RawMutex, Frame>)> {
        if let Some(fid) = state.free_pop() {
            // Free frames are never latched by anyone else.
            match self.frames[fid].try_lock_arc() {
                Some(guard) => return Some((fid, guard)),
                None => state.free_push(fid),
            }
        }

        let mut cursor = state.lru_tail;
        while let Some(fid) = cursor {
            if let Some(guard) = self.frames[fid].try_lock_arc() {
                state.lru_unlink(fid);
                return Some((fid, guard));
            }
            cursor = state.prev[fid];
        }
        None
    }

    /// Before a dirty page leaves the pool, its log records must be on
    /// disk: flush the log up to the page LSN, then write the page.
    fn write_back(&self, frame: &Frame) {
        if frame.pagenum != 0 {
            self.log.flush_up_to(frame.page.lsn());
        }
        self.disk.write_page(frame.table_id, frame.pagenum, &frame.page);
        debug!("evicted table {} page {}", frame.table_id, frame.pagenum);
    }

    /// Allocate a page on disk, then refresh any buffered header page
    /// so the cached free-list view never goes stale.
    pub fn alloc_page(&self, table_id: TableId) -> PageNum {
        let pagenum = self.disk.alloc_page(table_id);
        self.refresh_header(table_id);
        pagenum
    }

    /// Free a page on disk and drop any cached copy of it.
    pub fn free_page(&self, table_id: TableId, pagenum: PageNum) {
        {
            let mut state = self.state.lock();
            if let Some(fid) = state.directory.remove(&(table_id, pagenum)) {
                if let Some(mut guard) = self.frames[fid].try_lock() {
                    guard.valid = false;
                    guard.dirty = false;
                    state.lru_unlink(fid);
                    state.free_push(fid);
                }
                // A pinned frame keeps its latch; with the mapping gone
                // it ages out of the LRU list on its own.
            }
        }
        self.disk.free_page(table_id, pagenum);
        self.refresh_header(table_id);
    }

    fn refresh_header(&self, table_id: TableId) {
        loop {
            let state = self.state.lock();
            let fid = match state.directory.get(&(table_id, 0)) {
                Some(&fid) => fid,
                None => return,
            };
            let arc = self.frames[fid].clone();
            drop(state);
            let mut guard = arc.lock_arc();
            if guard.valid && guard.table_id == table_id && guard.pagenum == 0 {
                self.disk.read_page(table_id, 0, &mut guard.page);
                guard.dirty = false;
                return;
            }
        }
    }

    /// Write back every dirty frame. Frames stay resident.
    pub fn flush_all_pages(&self) {
        for arc in &self.frames {
            let mut guard = arc.lock();
            if guard.valid && guard.dirty {
                self.write_back(&guard);
                guard.dirty = false;
            }
        }
    }
}

/// An exclusively latched, pinned page. Mutating access marks the frame
/// dirty; dropping the guard releases the page. Dirty header pages are
/// forced to disk on release so the disk copy of the free list and root
/// pointer stays current.
pub struct PageGuard {
    guard: ArcMutexGuard<RawMutex, Frame>,
    disk: Arc<DiskManager>,
}

impl PageGuard {
    fn new(guard: ArcMutexGuard<RawMutex, Frame>, disk: Arc<DiskManager>) -> Self {
        Self { guard, disk }
    }

    pub fn table_id(&self) -> TableId {
        self.guard.table_id
    }

    pub fn pagenum(&self) -> PageNum {
        self.guard.pagenum
    }

    pub fn page(&self) -> &Page {
        &self.guard.page
    }

    pub fn page_mut(&mut self) -> &mut Page {
        self.guard.dirty = true;
        &mut self.guard.page
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if self.guard.dirty && self.guard.pagenum == 0 {
            self.disk
                .write_page(self.guard.table_id, 0, &self.guard.page);
            self.guard.dirty = false;
        }
    }
}
