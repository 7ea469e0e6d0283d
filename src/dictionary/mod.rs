//! Dictionary Module
//!
//! In-memory view of the store: the result of replaying every record in the
//! valid range, in log order.
//!
//! ## Responsibilities
//! - Serve all reads once loaded (the log is never consulted for `get`)
//! - Last write wins; tombstones erase the key
//! - Track the size a from-scratch serialization would need
//! - Sorted iteration for compaction
//!
//! ## Data Structure Choice
//! BTreeMap keyed by `String`:
//! - Sorted keys give deterministic compaction output
//! - Locking lives one level up, in the store's guard

mod replay;
mod table;

pub use replay::{replay, ReplayResult};
pub(crate) use replay::scan_boundaries;
pub use table::Dictionary;

use crate::codec::Value;

/// Entry stored in the Dictionary
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub value: Value,

    /// Framed length of this entry when written out
    pub record_len: usize,
}
