//! Log record layout. All records are fixed width, little-endian:
//! a 28-byte header `{ log_size u32, lsn i64, prev_lsn i64, trx_id i32,
//! type u32 }`, followed for Update/Compensate by the touched location
//! and the before/after images, and for Compensate by `next_undo_lsn`.

use std::convert::TryInto;
use std::io::Read;

use crate::error::{DbError, DbResult};
use crate::io::{read_exact, read_into, ByteWriter};
use crate::types::{Lsn, PageNum, TrxId};

pub const SMALL_RECORD_SIZE: u32 = 28;
pub const UPDATE_RECORD_SIZE: u32 = 264;
pub const COMPENSATE_RECORD_SIZE: u32 = 272;

pub const IMAGE_SIZE: usize = 108;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RecordType {
    Begin = 0,
    Update = 1,
    Commit = 2,
    Rollback = 3,
    Compensate = 4,
}

#[derive(Clone)]
pub struct UpdateBody {
    pub table_id: u64,
    pub pagenum: PageNum,
    pub offset: u16,
    pub data_length: u16,
    pub old_image: [u8; IMAGE_SIZE],
    pub new_image: [u8; IMAGE_SIZE],
}

impl UpdateBody {
    pub fn old_data(&self) -> &[u8] {
        &self.old_image[..self.data_length as usize]
    }

    pub fn new_data(&self) -> &[u8] {
        &self.new_image[..self.data_length as usize]
    }

    /// The record that would undo this one.
    pub fn inverted(&self) -> UpdateBody {
        UpdateBody {
            table_id: self.table_id,
            pagenum: self.pagenum,
            offset: self.offset,
            data_length: self.data_length,
            old_image: self.new_image,
            new_image: self.old_image,
        }
    }
}

#[derive(Clone)]
pub enum LogBody {
    Begin,
    Commit,
    Rollback,
    Update(UpdateBody),
    Compensate {
        update: UpdateBody,
        next_undo_lsn: Lsn,
    },
}

#[derive(Clone)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub trx_id: TrxId,
    pub body: LogBody,
}

impl LogRecord {
    pub fn rtype(&self) -> RecordType {
        match self.body {
            LogBody::Begin => RecordType::Begin,
            LogBody::Update(_) => RecordType::Update,
            LogBody::Commit => RecordType::Commit,
            LogBody::Rollback => RecordType::Rollback,
            LogBody::Compensate { .. } => RecordType::Compensate,
        }
    }

    pub fn size(&self) -> u32 {
        match self.body {
            LogBody::Update(_) => UPDATE_RECORD_SIZE,
            LogBody::Compensate { .. } => COMPENSATE_RECORD_SIZE,
            _ => SMALL_RECORD_SIZE,
        }
    }

    /// The update payload of an Update or Compensate record.
    pub fn update_body(&self) -> Option<&UpdateBody> {
        match &self.body {
            LogBody::Update(u) => Some(u),
            LogBody::Compensate { update, .. } => Some(update),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let size = self.size();
        let mut w = ByteWriter::new_reserved(size as usize);
        w.write(&size);
        w.write(&self.lsn);
        w.write(&self.prev_lsn);
        w.write(&self.trx_id);
        w.write(&(self.rtype() as u32));
        match &self.body {
            LogBody::Update(u) => encode_update(&mut w, u),
            LogBody::Compensate {
                update,
                next_undo_lsn,
            } => {
                encode_update(&mut w, update);
                w.write(next_undo_lsn);
            }
            _ => {}
        }
        debug_assert_eq!(w.len(), size as usize);
        w.to_bytes()
    }

    pub fn decode_from<R: Read>(reader: &mut R) -> DbResult<LogRecord> {
        let _size: u32 = read_into(reader);
        let lsn: Lsn = read_into(reader);
        let prev_lsn: Lsn = read_into(reader);
        let trx_id: TrxId = read_into(reader);
        let type_code: u32 = read_into(reader);

        let body = match type_code {
            0 => LogBody::Begin,
            1 => LogBody::Update(decode_update(reader)),
            2 => LogBody::Commit,
            3 => LogBody::Rollback,
            4 => {
                let update = decode_update(reader);
                let next_undo_lsn: Lsn = read_into(reader);
                LogBody::Compensate {
                    update,
                    next_undo_lsn,
                }
            }
            _ => return Err(DbError::BadLogRecord(lsn)),
        };
        Ok(LogRecord {
            lsn,
            prev_lsn,
            trx_id,
            body,
        })
    }
}

fn encode_update(w: &mut ByteWriter, u: &UpdateBody) {
    w.write(&u.table_id);
    w.write(&u.pagenum);
    w.write(&u.offset);
    w.write(&u.data_length);
    w.write_bytes(&u.old_image);
    w.write_bytes(&u.new_image);
}

fn decode_update<R: Read>(reader: &mut R) -> UpdateBody {
    let table_id: u64 = read_into(reader);
    let pagenum: PageNum = read_into(reader);
    let offset: u16 = read_into(reader);
    let data_length: u16 = read_into(reader);
    let old_image: [u8; IMAGE_SIZE] = read_exact(reader, IMAGE_SIZE).try_into().unwrap();
    let new_image: [u8; IMAGE_SIZE] = read_exact(reader, IMAGE_SIZE).try_into().unwrap();
    UpdateBody {
        table_id,
        pagenum,
        offset,
        data_length,
        old_image,
        new_image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update() -> UpdateBody {
        let mut old_image = [0u8; IMAGE_SIZE];
        let mut new_image = [0u8; IMAGE_SIZE];
        old_image[..4].copy_from_slice(b"aaaa");
        new_image[..4].copy_from_slice(b"bbbb");
        UpdateBody {
            table_id: 2,
            pagenum: 17,
            offset: 3000,
            data_length: 4,
            old_image,
            new_image,
        }
    }

    #[test]
    fn record_sizes_are_fixed() {
        let begin = LogRecord {
            lsn: 0,
            prev_lsn: 0,
            trx_id: 1,
            body: LogBody::Begin,
        };
        assert_eq!(begin.encode().len(), 28);

        let update = LogRecord {
            lsn: 28,
            prev_lsn: 0,
            trx_id: 1,
            body: LogBody::Update(sample_update()),
        };
        assert_eq!(update.encode().len(), 264);

        let clr = LogRecord {
            lsn: 292,
            prev_lsn: 28,
            trx_id: 1,
            body: LogBody::Compensate {
                update: sample_update().inverted(),
                next_undo_lsn: 0,
            },
        };
        assert_eq!(clr.encode().len(), 272);
    }

    #[test]
    fn update_record_round_trip() {
        let rec = LogRecord {
            lsn: 28,
            prev_lsn: 0,
            trx_id: 9,
            body: LogBody::Update(sample_update()),
        };
        let bytes = rec.encode();
        let decoded =
            LogRecord::decode_from(&mut std::io::Cursor::new(bytes)).expect("decodable");
        assert_eq!(decoded.lsn, 28);
        assert_eq!(decoded.trx_id, 9);
        assert_eq!(decoded.rtype(), RecordType::Update);
        let u = decoded.update_body().expect("update body");
        assert_eq!(u.pagenum, 17);
        assert_eq!(u.old_data(), b"aaaa");
        assert_eq!(u.new_data(), b"bbbb");
    }

    #[test]
    fn compensate_carries_next_undo() {
        let rec = LogRecord {
            lsn: 292,
            prev_lsn: 28,
            trx_id: 9,
            body: LogBody::Compensate {
                update: sample_update().inverted(),
                next_undo_lsn: 28,
            },
        };
        let decoded =
            LogRecord::decode_from(&mut std::io::Cursor::new(rec.encode())).expect("decodable");
        match decoded.body {
            LogBody::Compensate { next_undo_lsn, .. } => assert_eq!(next_undo_lsn, 28),
            _ => panic!("wrong record type"),
        }
    }

    #[test]
    fn garbage_type_is_rejected() {
        let mut bytes = LogRecord {
            lsn: 0,
            prev_lsn: 0,
            trx_id: 1,
            body: LogBody::Begin,
        }
        .encode();
        bytes[24] = 0xff;
        assert!(LogRecord::decode_from(&mut std::io::Cursor::new(bytes)).is_err());
    }
}
