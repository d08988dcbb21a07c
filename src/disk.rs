//! Disk space manager: one file per table, a header page at page 0 and
//! a LIFO free list threaded through unused pages.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::{error, info};
use parking_lot::{Mutex, RwLock};

use crate::error::{DbError, DbResult};
use crate::page::{Page, PAGE_SIZE};
use crate::types::{PageNum, TableId};

pub const MAX_TABLES: usize = 20;

/// New table files are preformatted to 10 MiB.
pub const INITIAL_PAGE_COUNT: u64 = 10 * 1024 * 1024 / PAGE_SIZE as u64;

/// Disk writes that fail leave the file in an unknown state; continuing
/// would risk silent corruption, so the process stops here.
fn fatal<T>(op: &str, err: std::io::Error) -> T {
    error!("fatal disk failure during {}: {}", op, err);
    std::process::abort();
}

struct TableFile {
    path: PathBuf,
    file: File,
}

pub struct DiskManager {
    tables: RwLock<Vec<TableFile>>,
    // Serializes free-list manipulation across threads.
    alloc_latch: Mutex<()>,
}

impl DiskManager {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Vec::new()),
            alloc_latch: Mutex::new(()),
        }
    }

    /// Open a table file, creating and preformatting it when absent.
    /// Opening the same path twice returns the same table id.
    pub fn open_table_file<P: AsRef<Path>>(&self, path: P) -> DbResult<TableId> {
        let path = path.as_ref().to_path_buf();
        let mut tables = self.tables.write();

        if let Some(id) = tables.iter().position(|t| t.path == path) {
            return Ok(id);
        }
        if tables.len() >= MAX_TABLES {
            return Err(DbError::TableLimit(MAX_TABLES));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        if file.metadata()?.len() == 0 {
            Self::preformat(&file)?;
            info!(
                "created table file {:?} with {} pages",
                path, INITIAL_PAGE_COUNT
            );
        }

        let id = tables.len();
        tables.push(TableFile { path, file });
        Ok(id)
    }

    /// Lay out the header page and thread every other page into the
    /// free list, last page pointing at 0.
    fn preformat(file: &File) -> std::io::Result<()> {
        let mut image = vec![0u8; (INITIAL_PAGE_COUNT * PAGE_SIZE as u64) as usize];

        let mut header = Page::new();
        header.init_header(1, INITIAL_PAGE_COUNT, 0);
        image[..PAGE_SIZE].copy_from_slice(header.as_bytes());

        for pagenum in 1..INITIAL_PAGE_COUNT {
            let next = if pagenum + 1 < INITIAL_PAGE_COUNT {
                pagenum + 1
            } else {
                0
            };
            let base = (pagenum * PAGE_SIZE as u64) as usize;
            image[base..base + 8].copy_from_slice(&next.to_le_bytes());
        }

        file.write_all_at(&image, 0)?;
        file.sync_all()
    }

    pub fn is_open(&self, table_id: TableId) -> bool {
        table_id < self.tables.read().len()
    }

    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    pub fn read_page(&self, table_id: TableId, pagenum: PageNum, page: &mut Page) {
        let tables = self.tables.read();
        let file = &tables[table_id].file;
        file.read_exact_at(page.as_bytes_mut(), pagenum * PAGE_SIZE as u64)
            .unwrap_or_else(|e| fatal("page read", e));
    }

    pub fn write_page(&self, table_id: TableId, pagenum: PageNum, page: &Page) {
        let tables = self.tables.read();
        let file = &tables[table_id].file;
        file.write_all_at(page.as_bytes(), pagenum * PAGE_SIZE as u64)
            .unwrap_or_else(|e| fatal("page write", e));
        file.sync_all().unwrap_or_else(|e| fatal("page sync", e));
    }

    /// Pop the head of the free list, doubling the file first when the
    /// list is empty. The allocated page is zeroed on disk.
    pub fn alloc_page(&self, table_id: TableId) -> PageNum {
        let _g = self.alloc_latch.lock();

        let mut header = Page::new();
        self.read_page(table_id, 0, &mut header);

        if header.first_free_pagenum() == 0 {
            self.extend(table_id, &mut header);
        }

        let pagenum = header.first_free_pagenum();
        let mut free = Page::new();
        self.read_page(table_id, pagenum, &mut free);
        header.set_first_free_pagenum(free.next_free_pagenum());

        let zeroed = Page::new();
        self.write_page(table_id, pagenum, &zeroed);
        self.write_page(table_id, 0, &header);
        pagenum
    }

    /// Double the file, threading the new pages into the free list.
    fn extend(&self, table_id: TableId, header: &mut Page) {
        let old = header.number_of_pages();
        let mut image = vec![0u8; (old * PAGE_SIZE as u64) as usize];
        for i in 0..old {
            let pagenum = old + i;
            let next = if i + 1 < old { pagenum + 1 } else { 0 };
            let base = (i * PAGE_SIZE as u64) as usize;
            image[base..base + 8].copy_from_slice(&next.to_le_bytes());
        }

        {
            let tables = self.tables.read();
            let file = &tables[table_id].file;
            file.write_all_at(&image, old * PAGE_SIZE as u64)
                .unwrap_or_else(|e| fatal("file extension", e));
            file.sync_all()
                .unwrap_or_else(|e| fatal("file extension sync", e));
        }

        header.set_first_free_pagenum(old);
        header.set_number_of_pages(old * 2);
        self.write_page(table_id, 0, header);
        info!("table {} grown to {} pages", table_id, old * 2);
    }

    /// Push a page onto the head of the free list.
    pub fn free_page(&self, table_id: TableId, pagenum: PageNum) {
        let _g = self.alloc_latch.lock();

        let mut header = Page::new();
        self.read_page(table_id, 0, &mut header);

        let mut page = Page::new();
        page.set_next_free_pagenum(header.first_free_pagenum());
        self.write_page(table_id, pagenum, &page);

        header.set_first_free_pagenum(pagenum);
        self.write_page(table_id, 0, &header);
    }

    // Inspection helpers for tests and tools.

    pub fn first_free_pagenum(&self, table_id: TableId) -> PageNum {
        let mut header = Page::new();
        self.read_page(table_id, 0, &mut header);
        header.first_free_pagenum()
    }

    pub fn page_count(&self, table_id: TableId) -> u64 {
        let mut header = Page::new();
        self.read_page(table_id, 0, &mut header);
        header.number_of_pages()
    }

    pub fn next_free_pagenum(&self, table_id: TableId, pagenum: PageNum) -> PageNum {
        let mut page = Page::new();
        self.read_page(table_id, pagenum, &mut page);
        page.next_free_pagenum()
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}
