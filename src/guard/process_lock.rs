//! Cross-process lock
//!
//! Advisory `flock` on a sentinel file, with shared/exclusive re-entrancy
//! counts so nested scopes within one handle take the OS lock only once.
//!
//! ```text
//!   shared  0 → 1 : lock_shared
//!   excl    0 → 1 : try_lock_exclusive, else drop shared and wait
//!   excl    1 → 0 : back to shared if shared > 0, else unlock
//!   shared  1 → 0 : unlock (when no exclusive is held)
//! ```

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;
use fs2::FileExt;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{KvError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct LockCounts {
    shared: usize,
    exclusive: usize,
}

pub struct ProcessLock {
    sentinel: Option<(PathBuf, File)>,
    counts: Mutex<LockCounts>,
}

impl ProcessLock {
    /// Lock backed by `path`, created if missing
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            sentinel: Some((path.to_path_buf(), file)),
            counts: Mutex::new(LockCounts::default()),
        })
    }

    /// No-op lock for single-process stores
    pub fn disabled() -> Self {
        Self {
            sentinel: None,
            counts: Mutex::new(LockCounts::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sentinel.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.sentinel.as_ref().map(|(path, _)| path.as_path())
    }

    /// Acquire `kind`, waiting until `deadline` (`None` blocks)
    pub fn lock(&self, kind: LockKind, deadline: Option<Instant>) -> Result<ProcessGuard<'_>> {
        let Some((_, file)) = &self.sentinel else {
            return Ok(ProcessGuard { lock: self, kind });
        };

        let mut counts = self.counts.lock();
        match kind {
            LockKind::Shared => {
                if counts.shared == 0 && counts.exclusive == 0 {
                    acquire(
                        deadline,
                        || FileExt::try_lock_shared(file),
                        || FileExt::lock_shared(file),
                    )?;
                }
                counts.shared += 1;
            }
            LockKind::Exclusive => {
                if counts.exclusive == 0 {
                    match FileExt::try_lock_exclusive(file) {
                        Ok(()) => {}
                        Err(e) if is_contended(&e) => {
                            if counts.shared > 0 {
                                // Holding shared while waiting would deadlock
                                // against another process doing the same.
                                FileExt::unlock(file)?;
                            }
                            let taken = acquire(
                                deadline,
                                || FileExt::try_lock_exclusive(file),
                                || FileExt::lock_exclusive(file),
                            );
                            if let Err(e) = taken {
                                if counts.shared > 0 {
                                    FileExt::lock_shared(file)?;
                                }
                                return Err(e);
                            }
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                counts.exclusive += 1;
            }
        }
        Ok(ProcessGuard { lock: self, kind })
    }

    fn unlock(&self, kind: LockKind) -> io::Result<()> {
        let Some((_, file)) = &self.sentinel else {
            return Ok(());
        };

        let mut counts = self.counts.lock();
        match kind {
            LockKind::Shared => {
                counts.shared = counts.shared.saturating_sub(1);
                if counts.shared == 0 && counts.exclusive == 0 {
                    FileExt::unlock(file)?;
                }
            }
            LockKind::Exclusive => {
                counts.exclusive = counts.exclusive.saturating_sub(1);
                if counts.exclusive == 0 {
                    if counts.shared > 0 {
                        FileExt::lock_shared(file)?;
                    } else {
                        FileExt::unlock(file)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Releases one count of its kind on drop
pub struct ProcessGuard<'a> {
    lock: &'a ProcessLock,
    kind: LockKind,
}

impl Drop for ProcessGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock(self.kind) {
            warn!(path = ?self.lock.path(), kind = ?self.kind, error = %e, "failed to release process lock");
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Poll `try_lock` until `deadline`, or block on `lock` when there is none
fn acquire(
    deadline: Option<Instant>,
    try_lock: impl Fn() -> io::Result<()>,
    lock: impl Fn() -> io::Result<()>,
) -> Result<()> {
    let Some(deadline) = deadline else {
        return lock().map_err(KvError::from);
    };

    let backoff = Backoff::new();
    loop {
        match try_lock() {
            Ok(()) => return Ok(()),
            Err(e) if is_contended(&e) => {}
            Err(e) => return Err(e.into()),
        }
        if Instant::now() >= deadline {
            return Err(KvError::LockTimeout);
        }
        if backoff.is_completed() {
            thread::sleep(Duration::from_millis(1));
        } else {
            backoff.snooze();
        }
    }
}
