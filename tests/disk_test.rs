mod common;

use bptdb::disk::{DiskManager, INITIAL_PAGE_COUNT};
use bptdb::page::Page;

#[test]
fn preformat_new_table_file() {
    let dir = common::setup();
    let disk = DiskManager::new();

    let table = disk.open_table_file(common::table_path(&dir)).unwrap();
    assert_eq!(table, 0);
    assert!(disk.is_open(table));
    assert_eq!(disk.table_count(), 1);

    // Fresh file: a header page plus a chain of free pages.
    assert_eq!(disk.page_count(table), INITIAL_PAGE_COUNT);
    assert_eq!(disk.first_free_pagenum(table), 1);
    assert_eq!(disk.next_free_pagenum(table, 1), 2);
    assert_eq!(disk.next_free_pagenum(table, INITIAL_PAGE_COUNT - 1), 0);
}

#[test]
fn reopen_returns_existing_id() {
    let dir = common::setup();
    let disk = DiskManager::new();

    let first = disk.open_table_file(common::table_path(&dir)).unwrap();
    let second = disk.open_table_file(common::table_path(&dir)).unwrap();
    assert_eq!(first, second);
    assert_eq!(disk.table_count(), 1);

    let other = disk.open_table_file(dir.path().join("table1.db")).unwrap();
    assert_eq!(other, 1);
}

#[test]
fn alloc_pops_and_free_pushes() {
    let dir = common::setup();
    let disk = DiskManager::new();
    let table = disk.open_table_file(common::table_path(&dir)).unwrap();

    let a = disk.alloc_page(table);
    assert_eq!(a, 1);
    assert_eq!(disk.first_free_pagenum(table), 2);
    let b = disk.alloc_page(table);
    assert_eq!(b, 2);

    // Freed pages go to the head of the list, so allocation is LIFO.
    disk.free_page(table, a);
    assert_eq!(disk.first_free_pagenum(table), a);
    assert_eq!(disk.next_free_pagenum(table, a), 3);
    assert_eq!(disk.alloc_page(table), a);
}

#[test]
fn allocated_page_starts_zeroed() {
    let dir = common::setup();
    let disk = DiskManager::new();
    let table = disk.open_table_file(common::table_path(&dir)).unwrap();

    // Dirty a free page on disk, then allocate it back.
    let pagenum = disk.alloc_page(table);
    let mut page = Page::new();
    page.as_bytes_mut().fill(0xab);
    disk.write_page(table, pagenum, &page);
    disk.free_page(table, pagenum);

    assert_eq!(disk.alloc_page(table), pagenum);
    disk.read_page(table, pagenum, &mut page);
    assert!(page.as_bytes().iter().all(|b| *b == 0));
}

#[test]
fn exhausted_file_doubles() {
    let dir = common::setup();
    let disk = DiskManager::new();
    let table = disk.open_table_file(common::table_path(&dir)).unwrap();

    for _ in 0..INITIAL_PAGE_COUNT - 1 {
        disk.alloc_page(table);
    }
    assert_eq!(disk.first_free_pagenum(table), 0);

    let grown = disk.alloc_page(table);
    assert_eq!(grown, INITIAL_PAGE_COUNT);
    assert_eq!(disk.page_count(table), INITIAL_PAGE_COUNT * 2);
    assert_eq!(disk.first_free_pagenum(table), INITIAL_PAGE_COUNT + 1);
}

#[test]
fn page_round_trip() {
    let dir = common::setup();
    let disk = DiskManager::new();
    let table = disk.open_table_file(common::table_path(&dir)).unwrap();
    let pagenum = disk.alloc_page(table);

    let mut page = Page::new();
    page.init_leaf(0);
    page.set_lsn(42);
    disk.write_page(table, pagenum, &page);

    let mut read = Page::new();
    disk.read_page(table, pagenum, &mut read);
    assert_eq!(&read.as_bytes()[..], &page.as_bytes()[..]);
}
