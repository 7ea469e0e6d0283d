//! Error types for mmapkv
//!
//! Provides a unified error type for all store operations.

use thiserror::Error;

use crate::codec::Kind;

/// Result type alias using KvError
pub type Result<T> = std::result::Result<T, KvError>;

/// Unified error type for mmapkv operations
#[derive(Debug, Error)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // Open Errors
    // -------------------------------------------------------------------------
    #[error("Open error: {0}")]
    Open(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // -------------------------------------------------------------------------
    // Lookup / Decode Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    NotFound,

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Kind mismatch: requested {expected:?}, stored {found:?}")]
    KindMismatch { expected: Kind, found: Kind },

    // -------------------------------------------------------------------------
    // Crypt Errors
    // -------------------------------------------------------------------------
    #[error("Decryption failure: {0}")]
    DecryptionFailure(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Timed out waiting for store lock")]
    LockTimeout,

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised by the append log when the mapping is full; the store reacts by
    /// growing or compacting and never hands it to callers of `set`.
    #[error("Capacity exceeded: need {needed} bytes, {available} available")]
    CapacityExceeded { needed: usize, available: usize },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KvError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        KvError::MalformedRecord(reason.into())
    }
}

impl From<bincode::Error> for KvError {
    fn from(e: bincode::Error) -> Self {
        KvError::MalformedRecord(format!("meta record: {}", e))
    }
}
