//! CRC Guard
//!
//! Integrity checksum over the valid byte range of the log.
//!
//! The checksum is always extended incrementally on append
//! (`rolling_update`), so write cost stays proportional to the appended bytes.
//! On load the guard picks the longest stored `(len, crc)` pair that still
//! verifies, or searches record boundaries for the longest verified prefix.

use crc32fast::Hasher;

/// A `(valid length, crc)` pair recorded somewhere on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub len: usize,
    pub crc: u32,
}

impl Checkpoint {
    pub const EMPTY: Checkpoint = Checkpoint { len: 0, crc: 0 };

    pub fn new(len: usize, crc: u32) -> Self {
        Self { len, crc }
    }
}

pub fn compute_crc(buffer: &[u8]) -> u32 {
    crc32fast::hash(buffer)
}

pub fn verify(stored_crc: u32, buffer: &[u8]) -> bool {
    compute_crc(buffer) == stored_crc
}

/// Extend `prior_crc` (covering `prior_len` bytes) with `new_bytes`
pub fn rolling_update(prior_crc: u32, prior_len: usize, new_bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial_len(prior_crc, prior_len as u64);
    hasher.update(new_bytes);
    hasher.finalize()
}

/// Longest candidate whose crc matches `payload[..len]`
///
/// Candidates longer than the payload are ignored.
pub fn best_checkpoint(payload: &[u8], candidates: &[Checkpoint]) -> Option<Checkpoint> {
    let mut sorted: Vec<Checkpoint> = candidates
        .iter()
        .copied()
        .filter(|c| c.len <= payload.len())
        .collect();
    sorted.sort_by(|a, b| b.len.cmp(&a.len));
    sorted.dedup();

    sorted
        .into_iter()
        .find(|c| verify(c.crc, &payload[..c.len]))
}

/// Search record boundaries for the longest prefix whose running crc equals
/// one of `known_crcs`, never returning a prefix shorter than `floor`.
///
/// `boundaries` must be ascending offsets into `payload`.
pub fn search_prefix(
    payload: &[u8],
    boundaries: &[usize],
    known_crcs: &[u32],
    floor: usize,
) -> Option<Checkpoint> {
    let mut crc = 0u32;
    let mut covered = 0usize;
    let mut best = None;

    for &boundary in boundaries {
        if boundary > payload.len() || boundary < covered {
            break;
        }
        crc = rolling_update(crc, covered, &payload[covered..boundary]);
        covered = boundary;
        if boundary >= floor && known_crcs.contains(&crc) {
            best = Some(Checkpoint::new(boundary, crc));
        }
    }
    best
}
