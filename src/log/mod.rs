//! Append Log Module
//!
//! Owns the backing file, its memory mapping and the append cursor.
//!
//! ## Responsibilities
//! - Append encoded (and possibly encrypted) records through the mapping
//! - Keep header and meta info `(valid_len, crc)` current on every append
//! - Grow the mapping in place; replace it wholesale on rewrite
//! - Explicit flush for durability, tracked as the last confirmed state
//!
//! ## Rewrite protocol
//! 1. Build the new region in `{id}.compact` and fsync it
//! 2. Update meta info (sequence + 1, IV, checkpoint) and flush it
//! 3. `rename` the new region over the data file
//!
//! A crash before step 2 leaves meta info naming the old file, and the
//! leftover `.compact` is discarded at open. A crash between 2 and 3 is
//! rolled forward at open, since meta info already names the new region.

mod header;
mod mapped;
mod meta;

use std::borrow::Cow;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::round_up_to_page;
use crate::crc::{self, Checkpoint};
use crate::crypt::{random_iv, CryptKey, CryptStream, KEY_LEN};
use crate::error::{KvError, Result};

pub use header::{LogHeader, FLAG_ENCRYPTED, FORMAT_VERSION, HEADER_SIZE};
pub use mapped::MappedFile;
pub use meta::{ConfirmedInfo, MetaFile, MetaInfo, META_RECORD_LEN};

/// Files making up one store
#[derive(Debug, Clone)]
pub struct LogPaths {
    pub data: PathBuf,
    pub meta: PathBuf,
    pub compact: PathBuf,
}

impl LogPaths {
    pub fn new(data: PathBuf) -> Self {
        let with_suffix = |suffix: &str| {
            let mut name = data.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            meta: with_suffix(".crc"),
            compact: with_suffix(".compact"),
            data,
        }
    }
}

/// What the files said when they were opened
#[derive(Debug, Clone, Default)]
pub struct DiskState {
    pub header: Option<LogHeader>,
    pub meta: Option<MetaInfo>,
}

impl DiskState {
    /// Stored `(len, crc)` pairs, newest first
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        let mut out = Vec::with_capacity(3);
        if let Some(header) = &self.header {
            out.push(header.checkpoint());
        }
        if let Some(meta) = &self.meta {
            out.push(meta.checkpoint());
            out.push(meta.last_confirmed.checkpoint());
        }
        out
    }

    pub fn claimed_len(&self) -> usize {
        self.checkpoints().iter().map(|c| c.len).max().unwrap_or(0)
    }

    pub fn sequence(&self) -> u32 {
        let header = self.header.map(|h| h.sequence).unwrap_or(0);
        let meta = self.meta.as_ref().map(|m| m.sequence).unwrap_or(0);
        header.max(meta)
    }
}

pub struct AppendLog {
    paths: LogPaths,
    data: MappedFile,
    meta_file: MetaFile,
    header: LogHeader,
    meta: MetaInfo,
    disk: DiskState,
    valid_len: usize,
    crc: u32,
    crypt: CryptStream,
}

impl AppendLog {
    /// Open (or create) the data and meta files
    ///
    /// The log starts with an empty valid range; the loader decides which
    /// checkpoint to `adopt` after verifying the payload.
    pub fn open(paths: LogPaths, initial_len: usize) -> Result<Self> {
        let meta_file = MetaFile::open(&paths.meta)?;
        let meta = meta_file.read();
        settle_compact_file(&paths, meta.as_ref())?;

        let data = MappedFile::open(&paths.data, round_up_to_page(initial_len))?;
        let header = LogHeader::decode(data.as_slice())?;
        if meta.is_none() && header.is_some() {
            warn!(path = %paths.meta.display(), "meta info missing or torn");
        }
        let disk = DiskState { header, meta };

        Ok(Self {
            header: header.unwrap_or_default(),
            meta: disk.meta.clone().unwrap_or_default(),
            paths,
            data,
            meta_file,
            disk,
            valid_len: 0,
            crc: 0,
            crypt: CryptStream::Plain,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    /// State read from disk at open (or at the last `reopen`)
    pub fn disk_state(&self) -> &DiskState {
        &self.disk
    }

    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.valid_len, self.crc)
    }

    pub fn sequence(&self) -> u32 {
        self.meta.sequence
    }

    pub fn meta(&self) -> &MetaInfo {
        &self.meta
    }

    /// Whole data file length
    pub fn file_len(&self) -> usize {
        self.data.len()
    }

    /// Bytes available for payload
    pub fn capacity(&self) -> usize {
        self.data.len().saturating_sub(HEADER_SIZE)
    }

    pub fn space_left(&self) -> usize {
        self.capacity() - self.valid_len
    }

    pub fn crypt_key(&self) -> Option<&CryptKey> {
        self.crypt.key()
    }

    /// The full payload region, including bytes past the valid length
    pub fn payload(&self) -> &[u8] {
        &self.data.as_slice()[HEADER_SIZE..]
    }

    /// Current meta info as stored on disk
    pub fn read_disk_meta(&self) -> Option<MetaInfo> {
        self.meta_file.read()
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Plaintext of `payload[..len]` decrypted from the stored IV
    ///
    /// Borrowed straight from the mapping when the store is not encrypted.
    pub fn plaintext(&self, key: Option<&CryptKey>, iv: &[u8; KEY_LEN], len: usize) -> Cow<'_, [u8]> {
        let len = len.min(self.capacity());
        let bytes = &self.payload()[..len];
        match key {
            None => Cow::Borrowed(bytes),
            Some(key) => {
                let mut plain = bytes.to_vec();
                CryptStream::new(Some(key), iv).transform_decode(&mut plain);
                Cow::Owned(plain)
            }
        }
    }

    /// Plaintext of the valid range, ready for a `RecordReader`
    pub fn read_all(&self) -> Cow<'_, [u8]> {
        self.plaintext(self.crypt.key(), &self.meta.iv, self.valid_len)
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Take `checkpoint` as the valid range and persist it to header and meta
    pub fn adopt(&mut self, checkpoint: Checkpoint, key: Option<&CryptKey>, iv: [u8; KEY_LEN]) -> Result<()> {
        let checkpoint = Checkpoint::new(checkpoint.len.min(self.capacity()), checkpoint.crc);
        let sequence = self.disk.sequence();

        let mut crypt = CryptStream::new(key, &iv);
        crypt.advance(&self.payload()[..checkpoint.len]);

        self.valid_len = checkpoint.len;
        self.crc = checkpoint.crc;
        self.crypt = crypt;

        self.header = LogHeader {
            sequence,
            valid_len: checkpoint.len as u32,
            crc: checkpoint.crc,
            flags: if key.is_some() { FLAG_ENCRYPTED } else { 0 },
        };
        self.meta.sequence = sequence;
        self.meta.set_checkpoint(checkpoint);
        self.meta.iv = iv;
        self.meta.flags = self.header.flags;
        self.meta.key_check = key.map(|k| k.check_for(&iv)).unwrap_or_default();
        if self.meta.last_confirmed.valid_len as usize > self.capacity() {
            self.meta.confirm();
        }
        self.write_header();
        self.meta_file.write(&self.meta)?;
        Ok(())
    }

    /// Append `plain` at the cursor and return its payload offset
    ///
    /// Fails with `CapacityExceeded` when the mapping is full; nothing is
    /// written in that case.
    pub fn append(&mut self, plain: &[u8]) -> Result<usize> {
        if plain.len() > self.space_left() {
            return Err(KvError::CapacityExceeded {
                needed: plain.len(),
                available: self.space_left(),
            });
        }

        let offset = self.valid_len;
        let start = HEADER_SIZE + offset;
        let end = start + plain.len();
        {
            let region = &mut self.data.as_mut_slice()[start..end];
            region.copy_from_slice(plain);
            self.crypt.transform_encode(region);
        }
        let written = &self.data.as_slice()[start..end];
        self.crc = crc::rolling_update(self.crc, self.valid_len, written);
        self.valid_len += plain.len();

        self.publish_checkpoint()?;
        Ok(offset)
    }

    /// Shrink the valid range to `len` (used to undo a failed write)
    pub fn truncate_to(&mut self, len: usize) -> Result<()> {
        let len = len.min(self.valid_len);
        let prefix = &self.payload()[..len];
        let crc = crc::compute_crc(prefix);
        let mut crypt = self.crypt.clone();
        crypt.reset_iv(&self.meta.iv);
        crypt.advance(prefix);

        self.crypt = crypt;
        self.valid_len = len;
        self.crc = crc;
        self.publish_checkpoint()
    }

    fn publish_checkpoint(&mut self) -> Result<()> {
        let checkpoint = self.checkpoint();
        self.header.set_checkpoint(checkpoint);
        self.write_header();
        self.meta.set_checkpoint(checkpoint);
        self.meta_file.write(&self.meta)
    }

    fn write_header(&mut self) {
        let bytes = self.header.encode();
        self.data.as_mut_slice()[..HEADER_SIZE].copy_from_slice(&bytes);
    }

    /// Extend the data file to `new_file_len` (page rounded)
    ///
    /// Valid bytes keep their offsets, so readers holding an older mapping
    /// stay correct up to the length they snapshotted.
    pub fn grow(&mut self, new_file_len: usize) -> Result<()> {
        let new_file_len = round_up_to_page(new_file_len);
        if new_file_len <= self.file_len() {
            return Ok(());
        }
        let old = self.file_len();
        self.data.grow(new_file_len)?;
        info!(
            path = %self.paths.data.display(),
            from = old,
            to = new_file_len,
            "grew data file"
        );
        Ok(())
    }

    /// Make everything durable and record it as the last confirmed state
    pub fn flush(&mut self) -> Result<()> {
        self.data.flush()?;
        self.meta.confirm();
        self.meta_file.write(&self.meta)?;
        self.meta_file.flush()
    }

    pub fn flush_async(&self) -> Result<()> {
        self.data.flush_async()?;
        self.meta_file.flush_async()
    }

    /// Replace the whole region with `plain` (already serialized records)
    ///
    /// A new random IV is drawn when `key` is set. On error the current
    /// region is left untouched.
    pub fn rewrite(&mut self, plain: &[u8], file_len: usize, key: Option<&CryptKey>) -> Result<()> {
        let file_len = round_up_to_page(file_len.max(HEADER_SIZE + plain.len()));
        let iv = if key.is_some() { random_iv() } else { [0u8; KEY_LEN] };
        let mut crypt = CryptStream::new(key, &iv);

        let mut payload = plain.to_vec();
        crypt.transform_encode(&mut payload);
        let crc = crc::compute_crc(&payload);

        let header = LogHeader {
            sequence: self.meta.sequence.wrapping_add(1),
            valid_len: payload.len() as u32,
            crc,
            flags: if key.is_some() { FLAG_ENCRYPTED } else { 0 },
        };

        let mut fresh = match self.build_region(&header, &payload, file_len) {
            Ok(fresh) => fresh,
            Err(e) => {
                let _ = fs::remove_file(&self.paths.compact);
                return Err(e);
            }
        };

        // Meta info is the commit point: once it names the new sequence, a
        // crash before the rename is rolled forward at the next open.
        let previous = self.meta.clone();
        let mut meta = self.meta.clone();
        meta.sequence = header.sequence;
        meta.set_checkpoint(header.checkpoint());
        meta.iv = iv;
        meta.flags = header.flags;
        meta.key_check = key.map(|k| k.check_for(&iv)).unwrap_or_default();
        meta.confirm();

        let committed = self
            .meta_file
            .write(&meta)
            .and_then(|_| self.meta_file.flush())
            .and_then(|_| fs::rename(&self.paths.compact, &self.paths.data).map_err(KvError::from));
        if let Err(e) = committed {
            let _ = fs::remove_file(&self.paths.compact);
            self.meta_file.write(&previous)?;
            self.meta_file.flush()?;
            return Err(e);
        }

        fresh.set_path(self.paths.data.clone());
        self.data = fresh;
        self.header = header;
        self.meta = meta;
        self.valid_len = payload.len();
        self.crc = crc;
        self.crypt = crypt;
        self.disk = DiskState {
            header: Some(header),
            meta: Some(self.meta.clone()),
        };
        debug!(
            path = %self.paths.data.display(),
            sequence = header.sequence,
            valid_len = self.valid_len,
            file_len = self.file_len(),
            "rewrote data file"
        );
        Ok(())
    }

    fn build_region(&self, header: &LogHeader, payload: &[u8], file_len: usize) -> Result<MappedFile> {
        let mut region = MappedFile::create(&self.paths.compact, file_len)?;
        let bytes = region.as_mut_slice();
        bytes[..HEADER_SIZE].copy_from_slice(&header.encode());
        bytes[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        region.sync_all()?;
        Ok(region)
    }

    // =========================================================================
    // Multi-process catch-up
    // =========================================================================

    /// Reopen the data file after another process swapped it
    pub fn reopen(&mut self) -> Result<()> {
        self.data = MappedFile::open(&self.paths.data, HEADER_SIZE)?;
        let header = LogHeader::decode(self.data.as_slice())?;
        self.disk = DiskState {
            header,
            meta: self.meta_file.read(),
        };
        self.header = header.unwrap_or_default();
        self.meta = self.disk.meta.clone().unwrap_or_default();
        self.valid_len = 0;
        self.crc = 0;
        Ok(())
    }

    /// Remap when another process grew the file
    pub fn remap_if_grown(&mut self) -> Result<bool> {
        if self.data.disk_len()? != self.data.len() {
            self.data.remap()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Verify and decrypt bytes another process appended up to `target`
    ///
    /// Returns the plaintext tail, or `None` when the crypt state changed or
    /// the rolling crc does not reach `target.crc` (the caller then reloads
    /// from scratch).
    pub fn catch_up(&mut self, target: &MetaInfo) -> Result<Option<Vec<u8>>> {
        let to = target.valid_len as usize;
        let from = self.valid_len;
        if target.iv != self.meta.iv || target.flags != self.meta.flags {
            return Ok(None);
        }
        if to < from || to > self.capacity() {
            return Ok(None);
        }
        let tail = &self.payload()[from..to];
        if crc::rolling_update(self.crc, from, tail) != target.crc {
            return Ok(None);
        }

        let mut plain = tail.to_vec();
        self.crypt.transform_decode(&mut plain);
        self.valid_len = to;
        self.crc = target.crc;
        self.header.set_checkpoint(self.checkpoint());
        self.meta = target.clone();
        Ok(Some(plain))
    }

    /// Flush and release the files
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

/// Finish or discard a rewrite interrupted by a crash
///
/// A `.compact` file whose header matches the committed meta sequence and
/// verifies is moved into place; anything else is removed.
fn settle_compact_file(paths: &LogPaths, meta: Option<&MetaInfo>) -> Result<()> {
    if !paths.compact.exists() {
        return Ok(());
    }

    let bytes = fs::read(&paths.compact)?;
    let header = LogHeader::decode(&bytes).ok().flatten();
    let committed = match (header, meta) {
        (Some(header), Some(meta)) => {
            let end = HEADER_SIZE + header.valid_len as usize;
            header.sequence == meta.sequence
                && header.checkpoint() == meta.checkpoint()
                && end <= bytes.len()
                && crc::verify(header.crc, &bytes[HEADER_SIZE..end])
        }
        _ => false,
    };

    if committed {
        info!(path = %paths.data.display(), "completing interrupted rewrite");
        fs::rename(&paths.compact, &paths.data)?;
    } else {
        warn!(path = %paths.compact.display(), "removing leftover compaction file");
        fs::remove_file(&paths.compact)?;
    }
    Ok(())
}
