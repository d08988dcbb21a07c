#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;

use bptdb::types::TableId;
use bptdb::{Database, DbConfig};

pub fn setup() -> TempDir {
    bptdb::logging::init_log();
    tempfile::tempdir().expect("scratch dir")
}

pub fn table_path(dir: &TempDir) -> PathBuf {
    dir.path().join("table0.db")
}

pub fn config_for(dir: &TempDir) -> DbConfig {
    let mut config = DbConfig::new(dir.path().join("db.log"));
    config.trace_path = Some(dir.path().join("db.trace"));
    config
}

/// A config that reopens the table before recovery, the way a restart
/// after a crash would.
pub fn reopen_config(dir: &TempDir) -> DbConfig {
    let mut config = config_for(dir);
    config.table_paths = vec![table_path(dir)];
    config
}

pub fn open_db(dir: &TempDir) -> (Database, TableId) {
    let db = Database::init(config_for(dir)).expect("database init");
    let table = db.open_table(table_path(dir)).expect("table open");
    (db, table)
}

/// Deterministic value for a key; length varies with the key.
pub fn value_for(key: i64) -> Vec<u8> {
    let len = 50 + (key.unsigned_abs() % 63) as usize;
    value_of(key, len, 0)
}

/// Deterministic value with an explicit length and generation marker.
pub fn value_of(key: i64, len: usize, generation: u8) -> Vec<u8> {
    let seed = key.to_le_bytes();
    (0..len)
        .map(|i| seed[i % 8].wrapping_add(i as u8).wrapping_add(generation))
        .collect()
}
