//! Codec Module
//!
//! Encodes typed values into the compact binary records stored in the log.
//!
//! ## Record Format
//! ```text
//! ┌──────────────┬─────────┬────────────────┬──────────────────────────┐
//! │ KeyLen (var) │   Key   │ ValueLen (var) │ Value                    │
//! └──────────────┴─────────┴────────────────┴──────────────────────────┘
//!                                            ┌──────────┬─────────────┐
//!                                            │ Kind (1) │  Payload    │
//!                                            └──────────┴─────────────┘
//! ```
//! A record with `ValueLen == 0` is a tombstone.
//!
//! ## Payload by Kind
//! - Bool: one byte, 0 or 1
//! - Int32 / Int64: zigzag varint
//! - UInt32 / UInt64: varint
//! - Float / Double: little-endian IEEE 754
//! - String / Bytes: the remaining bytes of the value
//! - StringSet: varint count, then (varint len, utf8) per member

mod record;
mod value;

use std::collections::BTreeSet;
use std::fmt;

pub use record::{encode_record, encode_tombstone, record_len, RawRecord, RecordReader};
pub use value::{decode, decode_value, encode};

/// Discriminant stored in front of every encoded value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Bool = 1,
    Int32 = 2,
    UInt32 = 3,
    Int64 = 4,
    UInt64 = 5,
    Float = 6,
    Double = 7,
    String = 8,
    Bytes = 9,
    StringSet = 10,
}

impl Kind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Kind::Bool),
            2 => Some(Kind::Int32),
            3 => Some(Kind::UInt32),
            4 => Some(Kind::Int64),
            5 => Some(Kind::UInt64),
            6 => Some(Kind::Float),
            7 => Some(Kind::Double),
            8 => Some(Kind::String),
            9 => Some(Kind::Bytes),
            10 => Some(Kind::StringSet),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// A typed value held by the store
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    StringSet(BTreeSet<String>),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Int32(_) => Kind::Int32,
            Value::UInt32(_) => Kind::UInt32,
            Value::Int64(_) => Kind::Int64,
            Value::UInt64(_) => Kind::UInt64,
            Value::Float(_) => Kind::Float,
            Value::Double(_) => Kind::Double,
            Value::String(_) => Kind::String,
            Value::Bytes(_) => Kind::Bytes,
            Value::StringSet(_) => Kind::StringSet,
        }
    }

    /// Bytes this value occupies in a record, kind tag included
    pub fn encoded_len(&self) -> usize {
        value::encoded_len(self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::StringSet(v) => write!(f, "{:?}", v),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

macro_rules! value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl TryFrom<Value> for $ty {
                type Error = crate::KvError;

                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(crate::KvError::KindMismatch {
                            expected: Kind::$variant,
                            found: other.kind(),
                        }),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    bool => Bool,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<u8> => Bytes,
    BTreeSet<String> => StringSet,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}
