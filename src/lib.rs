//! # mmapkv
//!
//! A memory-mapped, append-only key-value store with:
//! - Typed values encoded into compact length-prefixed records
//! - CRC-guarded crash recovery with torn-write truncation
//! - Optional AES-128-CFB encryption of the record stream
//! - Compaction from the in-memory Dictionary
//! - Writer exclusion across threads and processes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │        (registry-shared handle, Concurrency Guard)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │ reads                   │ writes
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐      ┌─────────────┐
//!   │ Dictionary  │◄─replay──│    Codec    │─────►│  Compactor  │
//!   │  (BTreeMap) │          │  (records)  │      │  (rewrite)  │
//!   └─────────────┘          └──────┬──────┘      └──────┬──────┘
//!                                   ▼                    │
//!                           ┌──────────────┐             │
//!                           │ Crypt Stream │             │
//!                           └──────┬───────┘             │
//!                                  ▼                     │
//!                  ┌─────────────────────────────┐       │
//!                  │ Append Log (mmap) + CRC     │◄──────┘
//!                  │ {id}  {id}.crc  {id}.lock   │
//!                  └─────────────────────────────┘
//! ```
//!
//! ## Example
//! ```no_run
//! use mmapkv::{Config, Mode, Store};
//!
//! let config = Config::builder().root_dir("/tmp/mmapkv").build()?;
//! let store = Store::open(config, "demo", Mode::SingleProcess, None)?;
//! store.set("int", -2147483648i32)?;
//! assert_eq!(store.get_as::<i32>("int")?, i32::MIN);
//! # Ok::<(), mmapkv::KvError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod crc;
pub mod crypt;
pub mod log;
pub mod dictionary;
pub mod compactor;
pub mod guard;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use codec::{Kind, Value};
pub use compactor::CompactionOutcome;
pub use config::{Config, ConfigBuilder, ContentChangeHandler, RecoveryStrategy, SyncStrategy};
pub use error::{KvError, Result};
pub use store::{Mode, Store, StoreLock, SyncMode};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of mmapkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
