//! Data file header
//!
//! ```text
//! ┌───────────┬──────────┬──────────┬───────────┬─────────┬──────────┐
//! │ Magic (4) │ Fmt (4)  │ Seq (4)  │ ValidLen  │ CRC (4) │ Flags(4) │
//! │  "MKVL"   │   u32    │   u32    │  u32 (4)  │   u32   │   u32    │
//! └───────────┴──────────┴──────────┴───────────┴─────────┴──────────┘
//! ```
//! All fields little-endian. An all-zero magic marks a fresh file.

use crate::crc::Checkpoint;
use crate::error::{KvError, Result};

/// Magic bytes identifying an mmapkv data file
pub(crate) const MAGIC: &[u8; 4] = b"MKVL";

/// Current data file format version
pub const FORMAT_VERSION: u32 = 1;

/// Header size: Magic (4) + Format (4) + Seq (4) + ValidLen (4) + CRC (4) + Flags (4)
pub const HEADER_SIZE: usize = 24;

/// Payload is AES-128-CFB encrypted
pub const FLAG_ENCRYPTED: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogHeader {
    pub sequence: u32,
    pub valid_len: u32,
    pub crc: u32,
    pub flags: u32,
}

impl LogHeader {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.valid_len as usize, self.crc)
    }

    pub fn set_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.valid_len = checkpoint.len as u32;
        self.crc = checkpoint.crc;
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.sequence.to_le_bytes());
        buf[12..16].copy_from_slice(&self.valid_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.crc.to_le_bytes());
        buf[20..24].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    /// `Ok(None)` for a fresh (zeroed) file
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() < HEADER_SIZE {
            return Err(KvError::Open(format!(
                "data file too short for header: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] == [0u8; 4] {
            return Ok(None);
        }
        if &bytes[0..4] != MAGIC {
            return Err(KvError::Open(format!(
                "invalid data file magic: expected MKVL, got {:?}",
                &bytes[0..4]
            )));
        }

        let field = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let format = field(4);
        if format > FORMAT_VERSION || format == 0 {
            return Err(KvError::Open(format!(
                "unsupported data file format version: {}",
                format
            )));
        }

        Ok(Some(Self {
            sequence: field(8),
            valid_len: field(12),
            crc: field(16),
            flags: field(20),
        }))
    }
}
