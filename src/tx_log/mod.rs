//! Write-ahead log and recovery.

mod log_manager;
mod record;

pub use log_manager::{LogManager, RecoveryMode};
pub use record::{
    LogBody, LogRecord, RecordType, UpdateBody, COMPENSATE_RECORD_SIZE, IMAGE_SIZE,
    SMALL_RECORD_SIZE, UPDATE_RECORD_SIZE,
};
