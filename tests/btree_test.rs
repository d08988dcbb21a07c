mod common;

use rand::seq::SliceRandom;
use rand::SeedableRng;

use bptdb::error::DbError;
use bptdb::Database;

fn shuffled_keys(n: i64, seed: u64) -> Vec<i64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut keys: Vec<i64> = (1..=n).collect();
    keys.shuffle(&mut rng);
    keys
}

/// Walk the leaf level left to right and collect every key, checking
/// sort order and occupancy along the way.
fn collect_leaf_keys(db: &Database, table: usize) -> Vec<i64> {
    let root = db.btree().root_pagenum(table);
    if root == 0 {
        return Vec::new();
    }

    let mut keys = Vec::new();
    let mut pagenum = db.btree().find_leaf(table, i64::MIN);
    while pagenum != 0 {
        let guard = db.pool().request_page(table, pagenum);
        let page = guard.page();
        assert!(page.is_leaf());
        if pagenum != root {
            assert!(page.number_of_keys() > 0, "leaf {} is empty", pagenum);
        }
        let mut used = 0u64;
        for i in 0..page.number_of_keys() {
            let slot = page.slot(i);
            keys.push(slot.key);
            used += 16 + slot.size as u64;
        }
        assert_eq!(page.used_space(), used);
        pagenum = page.right_sibling();
    }

    for w in keys.windows(2) {
        assert!(w[0] < w[1], "keys out of order: {} before {}", w[0], w[1]);
    }
    keys
}

#[test]
fn single_record_round_trip() {
    let dir = common::setup();
    let (db, table) = common::open_db(&dir);

    let value = common::value_for(7);
    db.insert(table, 7, &value).unwrap();
    assert_eq!(db.btree().find(table, 7), Some(value));
    assert_eq!(db.btree().find(table, 8), None);
}

#[test]
fn duplicate_and_missing_keys_error() {
    let dir = common::setup();
    let (db, table) = common::open_db(&dir);

    db.insert(table, 1, &common::value_for(1)).unwrap();
    match db.insert(table, 1, &common::value_for(1)) {
        Err(DbError::DuplicateKey(1)) => {}
        other => panic!("expected duplicate key error, got {:?}", other.err()),
    }
    match db.delete(table, 9) {
        Err(DbError::KeyNotFound(9)) => {}
        other => panic!("expected key not found, got {:?}", other.err()),
    }
}

#[test]
fn value_length_is_bounded() {
    let dir = common::setup();
    let (db, table) = common::open_db(&dir);

    assert!(matches!(
        db.insert(table, 1, &[0u8; 49]),
        Err(DbError::BadValueLength(49))
    ));
    assert!(matches!(
        db.insert(table, 1, &[0u8; 113]),
        Err(DbError::BadValueLength(113))
    ));
    db.insert(table, 1, &[0u8; 50]).unwrap();
    db.insert(table, 2, &[0u8; 112]).unwrap();
}

#[test]
fn bulk_load_splits_and_stays_sorted() {
    let dir = common::setup();
    let (db, table) = common::open_db(&dir);

    const N: i64 = 3000;
    for key in shuffled_keys(N, 11) {
        db.insert(table, key, &common::value_for(key)).unwrap();
    }

    let keys = collect_leaf_keys(&db, table);
    assert_eq!(keys, (1..=N).collect::<Vec<_>>());

    // The tree grew past a single leaf and past a single internal level.
    // The root guard must drop before the finds below descend from the
    // root again; the frame latch does not re-enter.
    let root = db.btree().root_pagenum(table);
    {
        let guard = db.pool().request_page(table, root);
        assert!(!guard.page().is_leaf());
    }

    for key in shuffled_keys(N, 13) {
        assert_eq!(db.btree().find(table, key), Some(common::value_for(key)));
    }
}

#[test]
fn leaf_split_keeps_left_page_under_half_occupancy() {
    let dir = common::setup();
    let (db, table) = common::open_db(&dir);

    // 100-byte values: 34 records fill a leaf, the 35th forces a split.
    for key in 1..=40 {
        db.insert(table, key, &common::value_of(key, 100, 0)).unwrap();
    }

    // The record crossing the 1984-byte mark opens the right page, so
    // the left page accumulates 19 values and stays below half a body.
    let left = db.btree().find_leaf(table, i64::MIN);
    let guard = db.pool().request_page(table, left);
    let page = guard.page();
    let value_bytes: u64 = (0..page.number_of_keys())
        .map(|i| page.slot(i).size as u64)
        .sum();
    assert_eq!(page.number_of_keys(), 19);
    assert_eq!(value_bytes, 1900);
}

#[test]
fn delete_all_then_reinsert() {
    let dir = common::setup();
    let (db, table) = common::open_db(&dir);

    const N: i64 = 2000;
    for key in shuffled_keys(N, 3) {
        db.insert(table, key, &common::value_for(key)).unwrap();
    }
    for key in shuffled_keys(N, 5) {
        db.delete(table, key).unwrap();
    }

    // Every page went back to the free list and the root slot cleared.
    assert_eq!(db.btree().root_pagenum(table), 0);
    assert_eq!(db.btree().find(table, 1), None);

    for key in shuffled_keys(N, 7) {
        db.insert(table, key, &common::value_for(key)).unwrap();
    }
    assert_eq!(collect_leaf_keys(&db, table).len(), N as usize);

    // Reinsertion reuses freed pages instead of extending the file.
    assert_eq!(db.disk().page_count(table), 2560);
}

#[test]
fn interleaved_deletes_keep_occupancy() {
    let dir = common::setup();
    let (db, table) = common::open_db(&dir);

    const N: i64 = 3000;
    for key in shuffled_keys(N, 21) {
        db.insert(table, key, &common::value_for(key)).unwrap();
    }
    // Drop two thirds in random order so both redistribution and
    // coalescing fire at leaf and internal levels.
    let mut removed = shuffled_keys(N, 23);
    removed.truncate(2 * N as usize / 3);
    for key in &removed {
        db.delete(table, *key).unwrap();
    }

    let keys = collect_leaf_keys(&db, table);
    let mut expected: Vec<i64> = (1..=N).filter(|k| !removed.contains(k)).collect();
    expected.sort_unstable();
    assert_eq!(keys, expected);

    for key in &expected {
        assert_eq!(db.btree().find(table, *key), Some(common::value_for(*key)));
    }
    for key in &removed {
        assert_eq!(db.btree().find(table, *key), None);
    }
}

#[test]
fn tiny_pool_evicts_and_reloads() {
    let dir = common::setup();
    let mut config = common::config_for(&dir);
    config.buffer_capacity = 10;
    let db = Database::init(config).unwrap();
    let table = db.open_table(common::table_path(&dir)).unwrap();

    // Far more pages than frames, so every insert churns the pool.
    for key in 1..=300 {
        db.insert(table, key, &common::value_of(key, 100, 0)).unwrap();
    }

    let root = db.btree().root_pagenum(table);
    {
        let guard = db.pool().request_page(table, root);
        assert!(!guard.page().is_leaf());
    }
    assert_eq!(db.btree().find(table, 150), Some(common::value_of(150, 100, 0)));
    assert_eq!(collect_leaf_keys(&db, table), (1..=300).collect::<Vec<_>>());
}

#[test]
fn two_tables_are_independent() {
    let dir = common::setup();
    let (db, t0) = common::open_db(&dir);
    let t1 = db.open_table(dir.path().join("table1.db")).unwrap();

    for key in 1..=200 {
        db.insert(t0, key, &common::value_of(key, 60, 0)).unwrap();
        db.insert(t1, key, &common::value_of(key, 60, 1)).unwrap();
    }
    db.delete(t0, 100).unwrap();

    assert_eq!(db.btree().find(t0, 100), None);
    assert_eq!(db.btree().find(t1, 100), Some(common::value_of(100, 60, 1)));
}
