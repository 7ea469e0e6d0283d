//! Log replay
//!
//! Applies a plaintext record stream to a Dictionary. Replay stops at the
//! first record that fails to frame or decode; everything after it is treated
//! as a torn tail.

use super::Dictionary;
use crate::codec::{decode_value, RecordReader};
use crate::error::KvError;

/// Result of replaying a record stream
#[derive(Debug, Default)]
pub struct ReplayResult {
    /// Records applied (puts and tombstones)
    pub records: usize,

    /// Of which tombstones
    pub tombstones: usize,

    /// End offset of the last applied record
    pub consumed: usize,

    /// Why replay stopped early, if it did
    pub error: Option<KvError>,
}

impl ReplayResult {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Replay `plain[start..]` into `dict`
pub fn replay(dict: &mut Dictionary, plain: &[u8], start: usize) -> ReplayResult {
    let mut result = ReplayResult {
        consumed: start.min(plain.len()),
        ..ReplayResult::default()
    };

    for record in RecordReader::starting_at(plain, start) {
        let applied = record.and_then(|record| {
            let key = record.key_str()?;
            if record.is_tombstone() {
                dict.delete(key);
                result.tombstones += 1;
            } else {
                let value = decode_value(record.value)?;
                dict.put(key.to_string(), value);
            }
            Ok(record.end())
        });

        match applied {
            Ok(end) => {
                result.records += 1;
                result.consumed = end;
            }
            Err(e) => {
                result.error = Some(e);
                break;
            }
        }
    }
    result
}

/// Walk record boundaries without applying anything
pub(crate) fn scan_boundaries(plain: &[u8]) -> (Vec<usize>, Option<KvError>) {
    let mut boundaries = Vec::new();
    for record in RecordReader::new(plain) {
        match record {
            Ok(record) => boundaries.push(record.end()),
            Err(e) => return (boundaries, Some(e)),
        }
    }
    (boundaries, None)
}
