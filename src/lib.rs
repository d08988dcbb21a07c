//! An embedded disk-based B+tree database kernel.
//!
//! Records are `(i64 key, 50..=112 byte value)` pairs stored one
//! B+tree per table file, behind a buffer pool with an approximate-LRU
//! eviction policy. Record-level shared/exclusive locks with immediate
//! deadlock detection and a write-ahead log with full restart recovery
//! sit on top.

pub mod btree;
pub mod buffer;
pub mod database;
pub mod disk;
pub mod error;
pub mod io;
pub mod logging;
pub mod page;
pub mod transaction;
pub mod tx_log;
pub mod types;

pub use database::{Database, DbConfig};
pub use error::{DbError, DbResult};
