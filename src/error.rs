use thiserror::Error;

use crate::types::{Key, TableId, TrxId};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot open more than {0} tables")]
    TableLimit(usize),

    #[error("table {0} is not open")]
    InvalidTable(TableId),

    #[error("key {0} already exists")]
    DuplicateKey(Key),

    #[error("key {0} not found")]
    KeyNotFound(Key),

    #[error("value length {0} is outside the accepted range")]
    BadValueLength(usize),

    #[error("new value of {got} bytes does not fit the stored {stored} bytes")]
    ValueTooLarge { got: usize, stored: u16 },

    /// The requesting transaction closed a waiting cycle. It must be
    /// aborted by the caller; no further operation on it is valid.
    #[error("deadlock detected, transaction {0} must abort")]
    Deadlock(TrxId),

    #[error("transaction {0} is not active")]
    InvalidTrx(TrxId),

    #[error("log corrupted at lsn {0}")]
    BadLogRecord(crate::types::Lsn),
}

pub type DbResult<T> = std::result::Result<T, DbError>;
