//! Loading and crash recovery
//!
//! ## Load sequence
//! 1. Check the crypt key against meta info (`DecryptionFailure` on mismatch)
//! 2. Pick the longest stored checkpoint whose crc verifies
//! 3. Otherwise walk record boundaries for the longest prefix matching a
//!    stored crc, never below the last confirmed length
//! 4. Otherwise apply the configured `RecoveryStrategy`
//! 5. Replay the chosen prefix into a fresh Dictionary

use std::fs;

use tracing::{debug, error, info, warn};

use super::paths::StorePaths;
use super::state::StoreState;
use crate::config::{Config, RecoveryStrategy};
use crate::crc::{self, Checkpoint};
use crate::crypt::{random_iv, CryptKey, KEY_LEN};
use crate::dictionary::{replay, scan_boundaries, Dictionary};
use crate::error::{KvError, Result};
use crate::log::{AppendLog, DiskState, LogHeader, MetaInfo, FLAG_ENCRYPTED, HEADER_SIZE};

/// How the valid range was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing on disk yet
    Fresh,
    /// A stored checkpoint verified
    Verified,
    /// A shorter prefix matched a stored crc
    Truncated { claimed: usize, kept: usize },
    /// Nothing verified; records replayed up to the first malformed one
    Salvaged { claimed: usize, kept: usize },
    /// Nothing verified; started empty
    Discarded { claimed: usize },
}

impl StoreState {
    pub(crate) fn load(config: &Config, paths: &StorePaths, key: Option<CryptKey>) -> Result<Self> {
        fs::create_dir_all(&config.root_dir)?;
        let log = AppendLog::open(paths.log.clone(), config.initial_file_len())?;
        let mut state = StoreState::new(log, key, config);
        let outcome = state.load_from_log(config)?;

        info!(
            path = %paths.data().display(),
            entries = state.dict.count(),
            valid_len = state.log.valid_len(),
            file_len = state.log.file_len(),
            encrypted = state.key.is_some(),
            outcome = ?outcome,
            "loaded store"
        );
        Ok(state)
    }

    /// Rebuild the Dictionary and cursor from whatever the log files hold
    pub(crate) fn load_from_log(&mut self, config: &Config) -> Result<LoadOutcome> {
        let disk = self.log.disk_state().clone();
        let claimed = disk.claimed_len();
        let iv = check_crypt(&disk, self.key.as_ref(), claimed)?;

        let (checkpoint, outcome) = self.choose_checkpoint(&disk, &iv, config.recovery);
        let plain = self.log.plaintext(self.key.as_ref(), &iv, checkpoint.len);

        let mut dict = Dictionary::new();
        let result = replay(&mut dict, &plain, 0);
        drop(plain);

        let mut checkpoint = checkpoint;
        let mut needs_rewrite = matches!(outcome, LoadOutcome::Salvaged { .. });
        if let Some(e) = &result.error {
            warn!(
                error = %e,
                kept = result.consumed,
                claimed = checkpoint.len,
                "verified range holds a malformed record, truncating"
            );
            checkpoint = Checkpoint::new(
                result.consumed,
                crc::compute_crc(&self.log.payload()[..result.consumed]),
            );
            needs_rewrite = true;
        }

        self.dict = dict;
        self.log.adopt(checkpoint, self.key.as_ref(), iv)?;

        if needs_rewrite {
            let file_len = self.log.file_len();
            if let Err(e) = self.rewrite(file_len) {
                warn!(error = %e, "rewrite after recovery failed, keeping recovered prefix");
            }
        }
        Ok(outcome)
    }

    fn choose_checkpoint(
        &self,
        disk: &DiskState,
        iv: &[u8; KEY_LEN],
        strategy: RecoveryStrategy,
    ) -> (Checkpoint, LoadOutcome) {
        if disk.header.is_none() && disk.meta.is_none() {
            return (Checkpoint::EMPTY, LoadOutcome::Fresh);
        }

        let payload = self.log.payload();
        let claimed = disk.claimed_len();
        // An empty checkpoint verifies against anything, so it only counts
        // when the files claim nothing else.
        let candidates: Vec<Checkpoint> = disk
            .checkpoints()
            .into_iter()
            .filter(|c| c.len > 0 || claimed == 0)
            .collect();
        if let Some(best) = crc::best_checkpoint(payload, &candidates) {
            if best.len < claimed {
                warn!(claimed, kept = best.len, "newest checkpoint did not verify, using an older one");
                return (best, LoadOutcome::Truncated { claimed, kept: best.len });
            }
            return (best, LoadOutcome::Verified);
        }

        error!(
            claimed,
            capacity = payload.len(),
            "crc check failed for every stored checkpoint"
        );

        let plain = self.log.plaintext(self.key.as_ref(), iv, claimed);
        let (boundaries, _) = scan_boundaries(&plain);
        let known: Vec<u32> = candidates.iter().map(|c| c.crc).collect();
        let floor = disk
            .meta
            .as_ref()
            .map(|m| m.last_confirmed.valid_len as usize)
            .unwrap_or(0);
        if let Some(found) = crc::search_prefix(payload, &boundaries, &known, floor) {
            warn!(claimed, kept = found.len, "recovered to the longest verified prefix");
            return (found, LoadOutcome::Truncated { claimed, kept: found.len });
        }

        match strategy {
            RecoveryStrategy::Recover => {
                let kept = boundaries.last().copied().unwrap_or(0);
                warn!(claimed, kept, "no prefix verified, salvaging readable records");
                (
                    Checkpoint::new(kept, crc::compute_crc(&payload[..kept])),
                    LoadOutcome::Salvaged { claimed, kept },
                )
            }
            RecoveryStrategy::Discard => {
                warn!(claimed, "no prefix verified, discarding store contents");
                (Checkpoint::EMPTY, LoadOutcome::Discarded { claimed })
            }
        }
    }
}

/// Validate `key` against the stored crypt state and return the IV to use
///
/// Stores with no content adopt whatever mode they are opened with.
fn check_crypt(disk: &DiskState, key: Option<&CryptKey>, claimed: usize) -> Result<[u8; KEY_LEN]> {
    let encrypted = disk.meta.as_ref().map(|m| m.flags & FLAG_ENCRYPTED != 0).unwrap_or(false)
        || disk.header.map(|h| h.flags & FLAG_ENCRYPTED != 0).unwrap_or(false);

    if claimed == 0 {
        if encrypted != key.is_some() {
            debug!(encrypted = key.is_some(), "empty store adopts the requested crypt mode");
        }
        // Keep an IV another handle already committed for this key.
        return Ok(match (key, disk.meta.as_ref()) {
            (Some(key), Some(meta)) if encrypted && key.check_for(&meta.iv) == meta.key_check => meta.iv,
            (Some(_), _) => random_iv(),
            (None, _) => [0u8; KEY_LEN],
        });
    }

    match (encrypted, key) {
        (false, None) => Ok([0u8; KEY_LEN]),
        (false, Some(_)) => Err(KvError::DecryptionFailure(
            "store is not encrypted but a crypt key was supplied".to_string(),
        )),
        (true, None) => Err(KvError::DecryptionFailure(
            "store is encrypted and no crypt key was supplied".to_string(),
        )),
        (true, Some(key)) => {
            let meta = disk.meta.as_ref().ok_or_else(|| {
                KvError::DecryptionFailure("meta info holding the IV is missing".to_string())
            })?;
            if key.check_for(&meta.iv) != meta.key_check {
                return Err(KvError::DecryptionFailure("crypt key does not match".to_string()));
            }
            Ok(meta.iv)
        }
    }
}

/// Verify the files of a store without mapping or modifying them
///
/// A store that does not exist yet is reported valid.
pub(crate) fn verify_files(paths: &StorePaths) -> Result<bool> {
    let data = match fs::read(paths.data()) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    if data.len() < HEADER_SIZE {
        return Ok(data.iter().all(|b| *b == 0));
    }

    let header = match LogHeader::decode(&data) {
        Ok(header) => header,
        Err(_) => return Ok(false),
    };
    let meta = fs::read(&paths.log.meta)
        .ok()
        .and_then(|bytes| MetaInfo::decode(&bytes));
    let disk = DiskState { header, meta };
    if disk.claimed_len() == 0 {
        return Ok(true);
    }

    let payload = &data[HEADER_SIZE..];
    let newest = disk.checkpoints().into_iter().max_by_key(|c| c.len);
    Ok(newest
        .filter(|c| c.len <= payload.len())
        .map(|c| crc::verify(c.crc, &payload[..c.len]))
        .unwrap_or(false))
}
