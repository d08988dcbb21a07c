/// Index of an open table, assigned in open order.
pub type TableId = usize;

/// On-disk page number within a table file. Page 0 is the header page,
/// and 0 also serves as the "no page" sentinel everywhere a page link
/// can be absent (root, sibling, parent, free list).
pub type PageNum = u64;

/// Record key.
pub type Key = i64;

/// Transaction id. 0 means "no transaction".
pub type TrxId = i32;

/// Log sequence number: the byte offset of a record's start in the log
/// file. 0 is both the first record's position and the "no LSN" sentinel
/// (page LSNs start at 0, and the first record is always a Begin, so no
/// comparison ever confuses the two).
pub type Lsn = i64;
