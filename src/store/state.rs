//! Store state
//!
//! Everything guarded by the store's `ConcurrencyGuard`: the append log, the
//! Dictionary built from it and the crypt key. Every mutation keeps the two
//! in step: the log is written first and the Dictionary only changes once the
//! append (and the flush its sync strategy asks for) succeeded. A failed
//! flush truncates the record away again.

use tracing::{debug, info, warn};

use crate::codec::{encode_record, encode_tombstone, Value};
use crate::compactor::{self, CompactionOutcome};
use crate::config::{Config, SyncStrategy};
use crate::crypt::CryptKey;
use crate::dictionary::{replay, Dictionary};
use crate::error::{KvError, Result};
use crate::log::AppendLog;

pub(crate) struct StoreState {
    pub(crate) log: AppendLog,
    pub(crate) dict: Dictionary,
    pub(crate) key: Option<CryptKey>,
    growth_factor: usize,
    compaction_ratio: f64,
    min_file_len: usize,
    sync_strategy: SyncStrategy,
    writes_since_sync: usize,
}

/// What `sync_with_disk` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiskChange {
    Unchanged,
    /// Another process appended; the tail was replayed
    Appended,
    /// Another process rewrote the file, or the tail did not verify
    Reloaded,
}

impl StoreState {
    pub(crate) fn new(log: AppendLog, key: Option<CryptKey>, config: &Config) -> Self {
        Self {
            log,
            dict: Dictionary::new(),
            key,
            growth_factor: config.growth_factor,
            compaction_ratio: config.compaction_ratio,
            min_file_len: config.initial_file_len(),
            sync_strategy: config.sync_strategy,
            writes_since_sync: 0,
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub(crate) fn set(&mut self, key: &str, value: Value) -> Result<()> {
        validate_key(key)?;
        let record = encode_record(key, &value);
        let offset = self.append(&record)?;
        self.after_write(offset)?;
        self.dict.put(key.to_string(), value);
        Ok(())
    }

    /// Returns whether the key was present
    pub(crate) fn remove(&mut self, key: &str) -> Result<bool> {
        if !self.dict.contains_key(key) {
            return Ok(false);
        }
        let offset = self.append(&encode_tombstone(key))?;
        self.after_write(offset)?;
        self.dict.delete(key);
        Ok(true)
    }

    /// Tombstones for every present key, appended as one write
    pub(crate) fn remove_all<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<usize> {
        let present: Vec<&str> = keys
            .iter()
            .map(AsRef::as_ref)
            .filter(|key| self.dict.contains_key(key))
            .collect();
        if present.is_empty() {
            return Ok(0);
        }

        let batch: Vec<u8> = present.iter().flat_map(|key| encode_tombstone(key)).collect();
        let offset = self.append(&batch)?;
        self.after_write(offset)?;
        for key in &present {
            self.dict.delete(key);
        }
        Ok(present.len())
    }

    /// Flush per the sync strategy; on failure drop the write at `offset`
    fn after_write(&mut self, offset: usize) -> Result<()> {
        let flushed = match self.sync_strategy {
            SyncStrategy::EveryWrite => self.log.flush(),
            SyncStrategy::EveryNWrites { count } => {
                self.writes_since_sync += 1;
                if self.writes_since_sync >= count {
                    self.writes_since_sync = 0;
                    self.log.flush()
                } else {
                    Ok(())
                }
            }
            SyncStrategy::Manual => Ok(()),
        };
        if flushed.is_err() {
            self.undo_append(offset);
        }
        flushed
    }

    fn undo_append(&mut self, offset: usize) {
        if let Err(e) = self.log.truncate_to(offset) {
            warn!(offset, error = %e, "could not roll back unflushed write");
        }
    }

    /// Append `plain`, making room first when the mapping is full
    ///
    /// Returns the payload offset the bytes were written at.
    fn append(&mut self, plain: &[u8]) -> Result<usize> {
        match self.log.append(plain) {
            Err(KvError::CapacityExceeded { needed, available }) => {
                debug!(needed, available, "append log full");
                self.ensure_space(plain.len())?;
                self.log.append(plain)
            }
            other => other,
        }
    }

    /// Compact when the log is mostly dead records, otherwise grow
    fn ensure_space(&mut self, incoming: usize) -> Result<()> {
        let live = self.dict.live_size();
        let count = self.dict.count() + 1;

        if compactor::should_compact(self.log.valid_len(), live, self.compaction_ratio) {
            let file_len =
                compactor::plan_capacity(self.log.file_len(), live + incoming, count, self.growth_factor);
            match self.rewrite(file_len) {
                Ok(outcome) if self.log.space_left() >= incoming => {
                    info!(
                        before = outcome.before,
                        after = outcome.after,
                        file_len = outcome.file_len,
                        "compacted append log"
                    );
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "compaction failed, growing instead"),
            }
        }

        let file_len = compactor::plan_capacity(
            self.log.file_len(),
            self.log.valid_len() + incoming,
            count,
            self.growth_factor,
        );
        self.log.grow(file_len)
    }

    // =========================================================================
    // Rewrites
    // =========================================================================

    /// Rewrite the log from the Dictionary into a file of `file_len` bytes
    pub(crate) fn rewrite(&mut self, file_len: usize) -> Result<CompactionOutcome> {
        let key = self.key.clone();
        self.rewrite_with_key(file_len, key)
    }

    fn rewrite_with_key(&mut self, file_len: usize, key: Option<CryptKey>) -> Result<CompactionOutcome> {
        let before = self.log.valid_len();
        let payload = compactor::compact(&self.dict);
        self.log.rewrite(&payload, file_len, key.as_ref())?;
        self.key = key;
        self.writes_since_sync = 0;
        Ok(CompactionOutcome {
            before,
            after: self.log.valid_len(),
            file_len: self.log.file_len(),
        })
    }

    pub(crate) fn compact(&mut self) -> Result<CompactionOutcome> {
        let file_len = compactor::plan_capacity(
            self.log.file_len(),
            self.dict.live_size(),
            self.dict.count(),
            self.growth_factor,
        );
        self.rewrite(file_len)
    }

    /// Compact and give back capacity that is no longer needed
    pub(crate) fn trim(&mut self) -> Result<CompactionOutcome> {
        if self.dict.is_empty() {
            return self.clear_all();
        }
        let file_len = compactor::plan_trim(self.log.file_len(), self.dict.live_size(), self.min_file_len)
            .unwrap_or(self.log.file_len());
        self.rewrite(file_len)
    }

    pub(crate) fn clear_all(&mut self) -> Result<CompactionOutcome> {
        let before = self.log.valid_len();
        let removed = std::mem::take(&mut self.dict);
        match self.rewrite(self.min_file_len) {
            Ok(outcome) => Ok(CompactionOutcome { before, ..outcome }),
            Err(e) => {
                self.dict = removed;
                Err(e)
            }
        }
    }

    /// Re-encrypt (or decrypt) the whole store under `key`
    pub(crate) fn rekey(&mut self, key: Option<CryptKey>) -> Result<bool> {
        if key == self.key {
            return Ok(false);
        }
        let file_len = self.log.file_len();
        self.rewrite_with_key(file_len, key)?;
        Ok(true)
    }

    // =========================================================================
    // Multi-process coherence
    // =========================================================================

    /// True when meta info on disk differs from what this handle last saw
    pub(crate) fn disk_changed(&self) -> bool {
        self.log.read_disk_meta().as_ref() != Some(self.log.meta())
    }

    /// Bring the Dictionary up to date with changes made by another process
    pub(crate) fn sync_with_disk(&mut self, config: &Config) -> Result<DiskChange> {
        let Some(disk) = self.log.read_disk_meta() else {
            self.reload(config)?;
            return Ok(DiskChange::Reloaded);
        };
        if &disk == self.log.meta() {
            return Ok(DiskChange::Unchanged);
        }
        if disk.sequence != self.log.sequence() {
            debug!(from = self.log.sequence(), to = disk.sequence, "data file was rewritten elsewhere");
            self.reload(config)?;
            return Ok(DiskChange::Reloaded);
        }

        self.log.remap_if_grown()?;
        let from = self.log.valid_len();
        if let Some(tail) = self.log.catch_up(&disk)? {
            let result = replay(&mut self.dict, &tail, 0);
            if result.is_clean() {
                debug!(from, to = self.log.valid_len(), records = result.records, "partial reload");
                return Ok(DiskChange::Appended);
            }
        }
        self.reload(config)?;
        Ok(DiskChange::Reloaded)
    }

    /// Drop the Dictionary and rebuild it from the files
    pub(crate) fn reload(&mut self, config: &Config) -> Result<()> {
        self.log.reopen()?;
        self.dict.clear();
        self.writes_since_sync = 0;
        let outcome = self.load_from_log(config)?;
        debug!(entries = self.dict.count(), outcome = ?outcome, "full reload");
        Ok(())
    }

    /// Flush unless another process owns newer meta info
    pub(crate) fn flush_if_current(&mut self) -> Result<()> {
        if self.disk_changed() {
            return self.log.flush_async();
        }
        self.log.flush()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(KvError::InvalidKey("key must not be empty".to_string()));
    }
    if key.len() > u32::MAX as usize {
        return Err(KvError::InvalidKey(format!("key is {} bytes", key.len())));
    }
    Ok(())
}
