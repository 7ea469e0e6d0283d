//! Meta Info
//!
//! Fixed-size control record kept in `{id}.crc`, mapped for the lifetime of
//! the store. It survives full rewrites of the data file, which makes it the
//! channel through which other processes notice appends and region swaps.
//!
//! ```text
//! ┌────────────── bincode body (56) ─────────────────────────────┬──────────┐
//! │ magic │ ver │ seq │ len │ crc │ iv(16) │ check(8) │ flags │ confirmed │ CRC (4) │
//! └───────────────────────────────────────────────────────────────┴──────────┘
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::mapped::MappedFile;
use crate::config::PAGE_SIZE;
use crate::crc::{compute_crc, Checkpoint};
use crate::crypt::{KEY_CHECK_LEN, KEY_LEN};
use crate::error::Result;

const META_MAGIC: [u8; 4] = *b"MKVM";

pub const META_VERSION: u32 = 1;

/// Serialized size of `MetaInfo` (fixed-int bincode)
pub const META_BODY_LEN: usize = 56;

/// Body plus trailing checksum
pub const META_RECORD_LEN: usize = META_BODY_LEN + 4;

/// Last state known to have been synced to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfirmedInfo {
    pub valid_len: u32,
    pub crc: u32,
}

impl ConfirmedInfo {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.valid_len as usize, self.crc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaInfo {
    magic: [u8; 4],
    pub version: u32,
    /// Number of full rewrites of the data file
    pub sequence: u32,
    pub valid_len: u32,
    pub crc: u32,
    pub iv: [u8; KEY_LEN],
    pub key_check: [u8; KEY_CHECK_LEN],
    pub flags: u32,
    pub last_confirmed: ConfirmedInfo,
}

impl Default for MetaInfo {
    fn default() -> Self {
        Self {
            magic: META_MAGIC,
            version: META_VERSION,
            sequence: 0,
            valid_len: 0,
            crc: 0,
            iv: [0u8; KEY_LEN],
            key_check: [0u8; KEY_CHECK_LEN],
            flags: 0,
            last_confirmed: ConfirmedInfo::default(),
        }
    }
}

impl MetaInfo {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.valid_len as usize, self.crc)
    }

    pub fn set_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.valid_len = checkpoint.len as u32;
        self.crc = checkpoint.crc;
    }

    pub fn confirm(&mut self) {
        self.last_confirmed = ConfirmedInfo {
            valid_len: self.valid_len,
            crc: self.crc,
        };
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = bincode::serialize(self)?;
        debug_assert_eq!(bytes.len(), META_BODY_LEN);
        let checksum = compute_crc(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        Ok(bytes)
    }

    /// `None` when the record is absent, foreign or torn
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < META_RECORD_LEN {
            return None;
        }
        let body = &bytes[..META_BODY_LEN];
        let stored = u32::from_le_bytes([
            bytes[META_BODY_LEN],
            bytes[META_BODY_LEN + 1],
            bytes[META_BODY_LEN + 2],
            bytes[META_BODY_LEN + 3],
        ]);
        if compute_crc(body) != stored {
            return None;
        }
        let info: MetaInfo = bincode::deserialize(body).ok()?;
        if info.magic != META_MAGIC || info.version > META_VERSION {
            return None;
        }
        Some(info)
    }
}

/// The mapped `{id}.crc` file
pub struct MetaFile {
    file: MappedFile,
}

impl MetaFile {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            file: MappedFile::open(path, PAGE_SIZE)?,
        })
    }

    /// Current on-disk record, as other processes would see it
    pub fn read(&self) -> Option<MetaInfo> {
        MetaInfo::decode(self.file.as_slice())
    }

    pub fn write(&mut self, info: &MetaInfo) -> Result<()> {
        let bytes = info.encode()?;
        self.file.as_mut_slice()[..bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }

    pub fn flush_async(&self) -> Result<()> {
        self.file.flush_async()
    }
}
