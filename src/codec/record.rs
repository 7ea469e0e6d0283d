//! Record framing
//!
//! Length-prefixed key/value records and a lazy reader over a byte range.

use bytes::BufMut;
use prost::encoding::{decode_varint, encode_varint, encoded_len_varint};

use super::value::{encode_into, encoded_len};
use super::Value;
use crate::error::{KvError, Result};

/// A framed record borrowed from the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord<'a> {
    pub key: &'a [u8],
    /// Encoded value (kind tag + payload); empty for tombstones
    pub value: &'a [u8],
    /// Offset of the record inside the scanned range
    pub offset: usize,
    /// Full framed length
    pub len: usize,
}

impl<'a> RawRecord<'a> {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }

    pub fn key_str(&self) -> Result<&'a str> {
        std::str::from_utf8(self.key).map_err(|_| KvError::malformed("key is not utf-8"))
    }

    /// Offset just past this record
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Framed length of a record; `None` is a tombstone
pub fn record_len(key: &str, value: Option<&Value>) -> usize {
    let value_len = value.map(encoded_len).unwrap_or(0);
    encoded_len_varint(key.len() as u64)
        + key.len()
        + encoded_len_varint(value_len as u64)
        + value_len
}

pub fn encode_record(key: &str, value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(record_len(key, Some(value)));
    put_key(key, &mut buf);
    encode_varint(encoded_len(value) as u64, &mut buf);
    encode_into(value, &mut buf);
    buf
}

pub fn encode_tombstone(key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(record_len(key, None));
    put_key(key, &mut buf);
    encode_varint(0, &mut buf);
    buf
}

fn put_key(key: &str, buf: &mut Vec<u8>) {
    encode_varint(key.len() as u64, buf);
    buf.put_slice(key.as_bytes());
}

/// Lazily walks records in `[start, buf.len())`
///
/// Yields one error at the first record that does not frame correctly and
/// then stops; `position()` is the end of the last good record, which callers
/// treat as the torn-write boundary.
pub struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::starting_at(buf, 0)
    }

    pub fn starting_at(buf: &'a [u8], start: usize) -> Self {
        Self {
            buf,
            pos: start.min(buf.len()),
            done: false,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn read_record(&self) -> Result<RawRecord<'a>> {
        let mut cursor = &self.buf[self.pos..];
        let available = cursor.len();

        let key_len = read_len(&mut cursor, "key length")?;
        if key_len == 0 {
            return Err(KvError::malformed("empty key"));
        }
        let key = take(&mut cursor, key_len, "key")?;
        let value_len = read_len(&mut cursor, "value length")?;
        let value = take(&mut cursor, value_len, "value")?;

        Ok(RawRecord {
            key,
            value,
            offset: self.pos,
            len: available - cursor.len(),
        })
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<RawRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.buf.len() {
            return None;
        }
        match self.read_record() {
            Ok(record) => {
                self.pos = record.end();
                Some(Ok(record))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn read_len(cursor: &mut &[u8], what: &str) -> Result<usize> {
    let len = decode_varint(cursor).map_err(|e| KvError::malformed(format!("{}: {}", what, e)))?;
    usize::try_from(len).map_err(|_| KvError::malformed(format!("{} overflows", what)))
}

fn take<'a>(cursor: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    if cursor.len() < len {
        return Err(KvError::malformed(format!(
            "{} declares {} bytes, {} remain",
            what,
            len,
            cursor.len()
        )));
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}
