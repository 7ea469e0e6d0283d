//! Value encoding
//!
//! `[kind tag][payload]`; the surrounding record already carries the length,
//! so variable-size kinds simply consume the remainder.

use std::collections::BTreeSet;

use bytes::{Buf, BufMut};
use prost::encoding::{decode_varint, encode_varint, encoded_len_varint};

use super::{Kind, Value};
use crate::error::{KvError, Result};

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Encoded size of a value, tag included
pub(crate) fn encoded_len(value: &Value) -> usize {
    1 + match value {
        Value::Bool(_) => 1,
        Value::Int32(v) => encoded_len_varint(zigzag(*v as i64)),
        Value::Int64(v) => encoded_len_varint(zigzag(*v)),
        Value::UInt32(v) => encoded_len_varint(*v as u64),
        Value::UInt64(v) => encoded_len_varint(*v),
        Value::Float(_) => 4,
        Value::Double(_) => 8,
        Value::String(s) => s.len(),
        Value::Bytes(b) => b.len(),
        Value::StringSet(set) => {
            encoded_len_varint(set.len() as u64)
                + set
                    .iter()
                    .map(|s| encoded_len_varint(s.len() as u64) + s.len())
                    .sum::<usize>()
        }
    }
}

/// Encode a value with its kind tag
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(value));
    encode_into(value, &mut buf);
    buf
}

pub(crate) fn encode_into(value: &Value, buf: &mut impl BufMut) {
    buf.put_u8(value.kind().tag());
    match value {
        Value::Bool(v) => buf.put_u8(*v as u8),
        Value::Int32(v) => encode_varint(zigzag(*v as i64), buf),
        Value::Int64(v) => encode_varint(zigzag(*v), buf),
        Value::UInt32(v) => encode_varint(*v as u64, buf),
        Value::UInt64(v) => encode_varint(*v, buf),
        Value::Float(v) => buf.put_f32_le(*v),
        Value::Double(v) => buf.put_f64_le(*v),
        Value::String(s) => buf.put_slice(s.as_bytes()),
        Value::Bytes(b) => buf.put_slice(b),
        Value::StringSet(set) => {
            encode_varint(set.len() as u64, buf);
            for member in set {
                encode_varint(member.len() as u64, buf);
                buf.put_slice(member.as_bytes());
            }
        }
    }
}

/// Decode a value, requiring it to be of `kind`
pub fn decode(bytes: &[u8], kind: Kind) -> Result<Value> {
    let value = decode_value(bytes)?;
    if value.kind() != kind {
        return Err(KvError::KindMismatch {
            expected: kind,
            found: value.kind(),
        });
    }
    Ok(value)
}

/// Decode a value of whatever kind its tag declares
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    let mut buf = bytes;
    if !buf.has_remaining() {
        return Err(KvError::malformed("empty value"));
    }
    let tag = buf.get_u8();
    let kind =
        Kind::from_tag(tag).ok_or_else(|| KvError::malformed(format!("unknown kind tag {}", tag)))?;

    let value = match kind {
        Kind::Bool => {
            expect_remaining(buf, 1, "bool")?;
            match buf.get_u8() {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(KvError::malformed(format!("bool byte {}", other))),
            }
        }
        Kind::Int32 => {
            let v = unzigzag(read_varint(&mut buf)?);
            let v = i32::try_from(v).map_err(|_| KvError::malformed("int32 out of range"))?;
            Value::Int32(v)
        }
        Kind::Int64 => Value::Int64(unzigzag(read_varint(&mut buf)?)),
        Kind::UInt32 => {
            let v = read_varint(&mut buf)?;
            let v = u32::try_from(v).map_err(|_| KvError::malformed("uint32 out of range"))?;
            Value::UInt32(v)
        }
        Kind::UInt64 => Value::UInt64(read_varint(&mut buf)?),
        Kind::Float => {
            expect_remaining(buf, 4, "float")?;
            Value::Float(buf.get_f32_le())
        }
        Kind::Double => {
            expect_remaining(buf, 8, "double")?;
            Value::Double(buf.get_f64_le())
        }
        Kind::String => {
            let s = read_utf8(buf)?;
            buf = &[];
            Value::String(s)
        }
        Kind::Bytes => {
            let b = buf.to_vec();
            buf = &[];
            Value::Bytes(b)
        }
        Kind::StringSet => {
            let count = read_varint(&mut buf)?;
            // every member needs at least its length byte
            if count > buf.remaining() as u64 {
                return Err(KvError::malformed(format!(
                    "string set declares {} members in {} bytes",
                    count,
                    buf.remaining()
                )));
            }
            let mut set = BTreeSet::new();
            for _ in 0..count {
                let len = read_varint(&mut buf)? as usize;
                expect_remaining(buf, len, "string set member")?;
                set.insert(read_utf8(&buf[..len])?);
                buf.advance(len);
            }
            Value::StringSet(set)
        }
    };

    if buf.has_remaining() {
        return Err(KvError::malformed(format!(
            "{} trailing bytes after {:?}",
            buf.remaining(),
            kind
        )));
    }
    Ok(value)
}

fn read_varint(buf: &mut &[u8]) -> Result<u64> {
    decode_varint(buf).map_err(|e| KvError::malformed(format!("varint: {}", e)))
}

fn read_utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| KvError::malformed("invalid utf-8"))
}

fn expect_remaining(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.len() < len {
        return Err(KvError::malformed(format!(
            "{}: need {} bytes, {} left",
            what,
            len,
            buf.len()
        )));
    }
    Ok(())
}
