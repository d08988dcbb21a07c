//! Little-endian fixed-layout encode/decode helpers for the log codec.

use std::convert::TryInto;
use std::io::Write;

/// Read a `Decodeable` object without an explicit type annotation at
/// the call site when inference allows it.
pub fn read_into<T: Decodeable, R: std::io::Read>(reader: &mut R) -> T {
    T::decode_from(reader)
}

pub fn read_exact<R: std::io::Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .unwrap_or_else(|e| panic!("io error, expect {} bytes: {}", bytes_count, e));
    buffer
}

pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new_reserved(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        obj.encode(self);
    }

    pub fn write_bytes(&mut self, obj: &[u8]) {
        self.buf.write_all(obj).unwrap();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub trait Encodeable {
    fn encode(&self, writer: &mut ByteWriter);
}

pub trait Decodeable {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self;
}

macro_rules! impl_serialization {
    ($t:ty) => {
        impl Encodeable for $t {
            fn encode(&self, writer: &mut ByteWriter) {
                writer.write_bytes(&self.to_le_bytes());
            }
        }

        impl Decodeable for $t {
            fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
                let buf = read_exact(reader, std::mem::size_of::<$t>());
                <$t>::from_le_bytes(buf.try_into().unwrap())
            }
        }
    };
}

impl_serialization!(u16);
impl_serialization!(u32);
impl_serialization!(u64);
impl_serialization!(i32);
impl_serialization!(i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_round_trip_little_endian() {
        let mut w = ByteWriter::new_reserved(10);
        w.write(&0x1122u16);
        w.write(&-7i64);
        assert_eq!(w.len(), 10);
        let bytes = w.to_bytes();
        assert_eq!(bytes[0..2], [0x22, 0x11]);

        let mut cursor = std::io::Cursor::new(bytes);
        let a: u16 = read_into(&mut cursor);
        let b: i64 = read_into(&mut cursor);
        assert_eq!(a, 0x1122);
        assert_eq!(b, -7);
    }
}
