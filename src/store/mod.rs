//! Store Module
//!
//! The public handle over one key-value store.
//!
//! ## Responsibilities
//! - Open stores through the process-wide registry (one instance per file)
//! - Route reads to the Dictionary and writes through the append log
//! - Hold the Concurrency Guard for the duration of every operation
//! - In multi-process mode, pick up changes made by other processes first
//!
//! ## Operation flow
//! ```text
//!   get ──► guard.read ──► Dictionary
//!              │ meta info changed on disk (multi-process)
//!              ▼
//!           guard.refresh ──► sync_with_disk ──► on_content_change
//!
//!   set ──► guard.write ──► sync_with_disk (multi-process)
//!                     ──► encode ──► AppendLog::append ──► Dictionary::put
//!                                        │ full
//!                                        ▼
//!                               compact (mostly dead) or grow
//! ```

mod load;
mod paths;
mod registry;
mod state;

pub use load::LoadOutcome;
pub use paths::{file_name, StorePaths};

use std::fs;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use self::state::StoreState;
use crate::codec::Value;
use crate::compactor::CompactionOutcome;
use crate::config::Config;
use crate::crypt::CryptKey;
use crate::error::{KvError, Result};
use crate::guard::{ConcurrencyGuard, LockKind, ProcessGuard, ProcessLock};
use self::state::DiskChange;

/// Who else may open the same files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Only this process; no OS lock is taken
    SingleProcess,
    /// Other processes may open the store concurrently
    MultiProcess,
}

/// Durability level for `Store::sync`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// msync and wait
    Sync,
    /// schedule msync and return
    Async,
}

pub(crate) struct StoreInner {
    id: String,
    mode: Mode,
    config: Config,
    paths: StorePaths,
    guard: ConcurrencyGuard<StoreState>,
    registered: bool,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        match self.guard.write() {
            Ok(mut state) => {
                if let Err(e) = state.flush_if_current() {
                    warn!(id = %self.id, error = %e, "flush on close failed");
                }
            }
            Err(e) => warn!(id = %self.id, error = %e, "could not lock store for final flush"),
        }
        if self.registered {
            registry::release(self.paths.data());
        }
        info!(id = %self.id, "closed store");
    }
}

/// Exclusive hold on a multi-process store, from `Store::lock`
///
/// Other processes cannot write until it is dropped or unlocked.
pub struct StoreLock<'a> {
    _process: ProcessGuard<'a>,
}

impl StoreLock<'_> {
    pub fn unlock(self) {}
}

/// Handle to an open store
///
/// Cloning is cheap; every clone (and every `open` of the same id in this
/// process) shares one instance.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("path", &self.inner.paths.data())
            .finish()
    }
}

impl Store {
    // =========================================================================
    // Opening
    // =========================================================================

    /// Open (or create) store `id` under `config.root_dir`
    ///
    /// `crypt_key` of `None` or an empty slice means no encryption.
    pub fn open(config: Config, id: &str, mode: Mode, crypt_key: Option<&[u8]>) -> Result<Self> {
        let paths = StorePaths::new(&config.root_dir, id)?;
        let key = crypt_key.and_then(CryptKey::new);
        let data = paths.data().to_path_buf();

        let inner = registry::get_or_open(&data, mode, key.as_ref(), || {
            Self::open_inner(config, id, mode, key.clone(), paths, true).map(Arc::new)
        })?;
        Ok(Self { inner })
    }

    /// Open an instance that does not share state with other handles
    ///
    /// Behaves like a handle held by a separate process.
    pub fn open_detached(config: Config, id: &str, mode: Mode, crypt_key: Option<&[u8]>) -> Result<Self> {
        let paths = StorePaths::new(&config.root_dir, id)?;
        let key = crypt_key.and_then(CryptKey::new);
        let inner = Self::open_inner(config, id, mode, key, paths, false)?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    fn open_inner(
        config: Config,
        id: &str,
        mode: Mode,
        key: Option<CryptKey>,
        paths: StorePaths,
        registered: bool,
    ) -> Result<StoreInner> {
        fs::create_dir_all(&config.root_dir)
            .map_err(|e| KvError::Open(format!("{}: {}", config.root_dir.display(), e)))?;

        let process = match mode {
            Mode::SingleProcess => ProcessLock::disabled(),
            Mode::MultiProcess => ProcessLock::open(&paths.lock)?,
        };
        let state = {
            let deadline = config.lock_timeout.map(|t| Instant::now() + t);
            let _exclusive = process.lock(LockKind::Exclusive, deadline)?;
            StoreState::load(&config, &paths, key)?
        };

        info!(id, mode = ?mode, path = %paths.data().display(), "opened store");
        let guard = ConcurrencyGuard::new(state, process, config.lock_timeout);
        Ok(StoreInner {
            id: id.to_string(),
            mode,
            config,
            paths,
            guard,
            registered,
        })
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    /// Run `f` against state that reflects every committed write
    ///
    /// Readers share the thread lock; only a reader that sees another
    /// process's meta info escalates to a refresh.
    fn with_read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> Result<R> {
        let guard = &self.inner.guard;
        {
            let state = guard.read()?;
            if !guard.is_multi_process() || !state.disk_changed() {
                return Ok(f(&*state));
            }
        }

        let scope = guard.refresh()?;
        if !scope.disk_changed() {
            return Ok(f(&*scope));
        }
        let mut state = scope.upgrade()?;
        let change = state.sync_with_disk(&self.inner.config)?;
        let result = f(&*state);
        drop(state);
        self.notify(change);
        Ok(result)
    }

    fn with_write<R>(&self, f: impl FnOnce(&mut StoreState) -> Result<R>) -> Result<R> {
        let mut state = self.inner.guard.write()?;
        let change = if self.inner.guard.is_multi_process() {
            state.sync_with_disk(&self.inner.config)?
        } else {
            DiskChange::Unchanged
        };
        let result = f(&mut *state);
        drop(state);
        self.notify(change);
        result
    }

    /// Run the content-change callback, with no lock held
    fn notify(&self, change: DiskChange) {
        if change == DiskChange::Unchanged {
            return;
        }
        debug!(id = %self.inner.id, change = ?change, "content changed by another process");
        if let Some(handler) = &self.inner.config.on_content_change {
            handler.notify(&self.inner.id);
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// `KvError::NotFound` when the key is absent
    pub fn get(&self, key: &str) -> Result<Value> {
        self.with_read(|state| state.dict.get(key).cloned())?
    }

    /// Typed read; `KvError::KindMismatch` when the stored kind differs
    pub fn get_as<T>(&self, key: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = KvError>,
    {
        T::try_from(self.get(key)?)
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.with_read(|state| state.dict.contains_key(key))
    }

    /// Live keys in sorted order
    pub fn all_keys(&self) -> Result<Vec<String>> {
        self.with_read(|state| state.dict.keys())
    }

    /// Stored size of a value in bytes, kind tag included
    pub fn value_size(&self, key: &str) -> Result<usize> {
        self.with_read(|state| state.dict.get(key).map(Value::encoded_len))?
    }

    pub fn count(&self) -> Result<usize> {
        self.with_read(|state| state.dict.count())
    }

    /// Length of the data file, header included
    pub fn total_size(&self) -> Result<usize> {
        self.with_read(|state| state.log.file_len())
    }

    /// Bytes of valid payload
    pub fn actual_size(&self) -> Result<usize> {
        self.with_read(|state| state.log.valid_len())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.with_write(|state| state.set(key, value))
    }

    /// Removing a missing key is a no-op
    pub fn remove(&self, key: &str) -> Result<()> {
        self.with_write(|state| state.remove(key)).map(|_| ())
    }

    pub fn remove_all<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        self.with_write(|state| state.remove_all(keys)).map(|_| ())
    }

    /// Remove every entry and shrink the file back to its initial size
    pub fn clear_all(&self) -> Result<()> {
        let outcome = self.with_write(|state| state.clear_all())?;
        info!(id = %self.inner.id, dropped = outcome.before, "cleared store");
        Ok(())
    }

    /// Forget the in-memory Dictionary and rebuild it from the files
    pub fn clear_memory_cache(&self) -> Result<()> {
        let mut state = self.inner.guard.write()?;
        state.reload(&self.inner.config)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub fn sync(&self, mode: SyncMode) -> Result<()> {
        self.with_write(|state| match mode {
            SyncMode::Sync => state.log.flush(),
            SyncMode::Async => state.log.flush_async(),
        })
    }

    /// Rewrite the log from the Dictionary, dropping dead records
    pub fn compact(&self) -> Result<CompactionOutcome> {
        let outcome = self.with_write(|state| state.compact())?;
        info!(
            id = %self.inner.id,
            before = outcome.before,
            after = outcome.after,
            "compacted store"
        );
        Ok(outcome)
    }

    /// Compact and release unused capacity (never below the initial size)
    pub fn trim(&self) -> Result<CompactionOutcome> {
        let outcome = self.with_write(|state| state.trim())?;
        info!(id = %self.inner.id, file_len = outcome.file_len, "trimmed store");
        Ok(outcome)
    }

    /// Change the crypt key; `None` or empty decrypts the store
    pub fn rekey(&self, crypt_key: Option<&[u8]>) -> Result<()> {
        let key = crypt_key.and_then(CryptKey::new);
        let changed = self.with_write(|state| state.rekey(key.clone()))?;
        if changed {
            if self.inner.registered {
                registry::update_key(self.inner.paths.data(), key.as_ref());
            }
            info!(id = %self.inner.id, encrypted = key.is_some(), "changed crypt key");
        }
        Ok(())
    }

    pub fn crypt_key(&self) -> Result<Option<Vec<u8>>> {
        self.with_read(|state| state.key.as_ref().map(|k| k.as_bytes().to_vec()))
    }

    /// Pick up changes made by other processes now
    ///
    /// Returns whether anything changed. Always `false` in single-process mode.
    pub fn check_content_changed(&self) -> Result<bool> {
        if !self.inner.guard.is_multi_process() {
            return Ok(false);
        }
        let scope = self.inner.guard.refresh()?;
        if !scope.disk_changed() {
            return Ok(false);
        }
        let mut state = scope.upgrade()?;
        let change = state.sync_with_disk(&self.inner.config)?;
        drop(state);
        self.notify(change);
        Ok(change != DiskChange::Unchanged)
    }

    /// Keep other processes from writing until the returned lock drops
    ///
    /// Writes through this handle still proceed. A no-op in single-process
    /// mode. Waits up to `Config::lock_timeout`.
    pub fn lock(&self) -> Result<StoreLock<'_>> {
        let process = self.inner.guard.hold_process()?;
        Ok(StoreLock { _process: process })
    }

    /// `lock` without waiting; `None` when another process holds the store
    pub fn try_lock(&self) -> Result<Option<StoreLock<'_>>> {
        Ok(self
            .inner
            .guard
            .try_hold_process()?
            .map(|process| StoreLock { _process: process }))
    }

    /// Flush and release this handle
    ///
    /// The store itself closes when its last handle goes away.
    pub fn close(self) -> Result<()> {
        self.with_write(|state| state.flush_if_current())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    pub fn paths(&self) -> &StorePaths {
        &self.inner.paths
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // =========================================================================
    // Static helpers
    // =========================================================================

    /// Check a store's crc without opening it
    pub fn is_file_valid(config: &Config, id: &str) -> Result<bool> {
        let paths = StorePaths::new(&config.root_dir, id)?;
        load::verify_files(&paths)
    }

    /// Delete every file of a store that is not open in this process
    ///
    /// Returns whether anything was removed.
    pub fn remove_storage(config: &Config, id: &str) -> Result<bool> {
        let paths = StorePaths::new(&config.root_dir, id)?;
        if registry::is_open(paths.data()) {
            return Err(KvError::Open(format!("store {} is open", id)));
        }
        let mut removed = false;
        for path in paths.all() {
            match fs::remove_file(path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed {
            info!(id, "removed store files");
        }
        Ok(removed)
    }
}
