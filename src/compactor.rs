//! Compactor
//!
//! Decides when the log has accumulated enough dead records to be rewritten
//! and produces the replacement payload from the Dictionary.
//!
//! ## Policy
//! ```text
//!   valid_len > ratio * live_size      → rewrite from the Dictionary
//!   otherwise                          → grow the mapping in place
//! ```
//! Capacity after either step leaves room for the incoming record plus an
//! estimate of near-future writes (half the current entry count, at least 8
//! average-sized entries).

use crate::codec::encode_record;
use crate::config::round_up_to_page;
use crate::dictionary::Dictionary;
use crate::log::HEADER_SIZE;

/// Result of an explicit or policy-driven compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionOutcome {
    /// Valid length before the rewrite
    pub before: usize,

    /// Valid length after the rewrite
    pub after: usize,

    /// Data file length after the rewrite
    pub file_len: usize,
}

impl CompactionOutcome {
    pub fn reclaimed(&self) -> usize {
        self.before.saturating_sub(self.after)
    }
}

/// True when the log is more than `ratio` times the size of its live content
pub fn should_compact(valid_len: usize, live_size: usize, ratio: f64) -> bool {
    if valid_len == 0 {
        return false;
    }
    valid_len as f64 > ratio * live_size as f64
}

/// Serialize every live entry (no tombstones) in key order
pub fn compact(dict: &Dictionary) -> Vec<u8> {
    let mut out = Vec::with_capacity(dict.live_size());
    for (key, value) in dict.iter() {
        out.extend(encode_record(key, value));
    }
    out
}

/// Bytes likely to be appended soon, sized from the average live entry
pub fn future_usage(needed: usize, count: usize) -> usize {
    let avg = needed / count.max(1);
    avg * 8.max((count + 1) / 2)
}

/// Data file length that holds `payload_len` bytes plus headroom
///
/// Starts from `current_file_len` and multiplies by `growth_factor` until it
/// fits; never returns less than `current_file_len`.
pub fn plan_capacity(
    current_file_len: usize,
    payload_len: usize,
    count: usize,
    growth_factor: usize,
) -> usize {
    let wanted = HEADER_SIZE + payload_len + future_usage(payload_len, count);
    let mut file_len = current_file_len.max(HEADER_SIZE + 1);
    while file_len < wanted {
        file_len = file_len.saturating_mul(growth_factor.max(2));
    }
    round_up_to_page(file_len)
}

/// Data file length after a trim, or `None` when it would not shrink
///
/// Halves while the file stays at least twice what `payload_len` needs and
/// never goes below `min_file_len`.
pub fn plan_trim(current_file_len: usize, payload_len: usize, min_file_len: usize) -> Option<usize> {
    let needed = HEADER_SIZE + payload_len;
    let mut file_len = current_file_len;
    while file_len / 2 >= needed * 2 && file_len / 2 >= min_file_len {
        file_len /= 2;
    }
    let file_len = round_up_to_page(file_len.max(min_file_len).max(needed));
    (file_len < current_file_len).then_some(file_len)
}
