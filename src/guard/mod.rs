//! Concurrency Guard Module
//!
//! Serializes writers across threads and processes sharing one store.
//!
//! ## Lock Hierarchy
//! ```text
//!   thread lock (parking_lot RwLock over the store state)
//!        │   taken first, so threads of one process queue here instead
//!        ▼   of on the OS lock
//!   process lock (flock on `{id}.lock`, multi-process mode only)
//! ```
//!
//! | scope     | thread lock     | process lock |
//! |-----------|-----------------|--------------|
//! | `read`    | read            | none         |
//! | `refresh` | upgradable read | shared       |
//! | `write`   | write           | exclusive    |
//! | `hold_process` | none       | exclusive    |
//!
//! Every scope releases both locks on drop, process lock first.

mod process_lock;

pub use process_lock::{LockKind, ProcessGuard, ProcessLock};

use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

use crate::error::{KvError, Result};

pub struct ConcurrencyGuard<T> {
    state: RwLock<T>,
    process: ProcessLock,
    timeout: Option<Duration>,
}

impl<T> ConcurrencyGuard<T> {
    pub fn new(state: T, process: ProcessLock, timeout: Option<Duration>) -> Self {
        Self {
            state: RwLock::new(state),
            process,
            timeout,
        }
    }

    pub fn is_multi_process(&self) -> bool {
        self.process.is_enabled()
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| Instant::now() + t)
    }

    /// Thread-local read access; never touches the process lock
    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>> {
        match self.timeout {
            None => Ok(self.state.read()),
            Some(t) => self.state.try_read_for(t).ok_or(KvError::LockTimeout),
        }
    }

    /// Exclusive access across threads and processes
    pub fn write(&self) -> Result<WriteScope<'_, T>> {
        let deadline = self.deadline();
        let state = match deadline {
            None => self.state.write(),
            Some(d) => self
                .state
                .try_write_for(remaining(d))
                .ok_or(KvError::LockTimeout)?,
        };
        let process = self.process.lock(LockKind::Exclusive, deadline)?;
        Ok(WriteScope {
            _process: process,
            state,
        })
    }

    /// Shared process lock plus an upgradable thread lock, for checking
    /// whether another process changed the files
    pub fn refresh(&self) -> Result<RefreshScope<'_, T>> {
        let deadline = self.deadline();
        let state = match deadline {
            None => self.state.upgradable_read(),
            Some(d) => self
                .state
                .try_upgradable_read_for(remaining(d))
                .ok_or(KvError::LockTimeout)?,
        };
        let process = self.process.lock(LockKind::Shared, deadline)?;
        Ok(RefreshScope {
            guard: self,
            process,
            state,
        })
    }

    /// Hold the exclusive process lock without touching the thread lock
    ///
    /// Writers of this handle still get in (the process lock is reentrant);
    /// writers in other processes wait until the guard drops.
    pub fn hold_process(&self) -> Result<ProcessGuard<'_>> {
        self.process.lock(LockKind::Exclusive, self.deadline())
    }

    /// Like `hold_process` but gives up at once when another process holds it
    pub fn try_hold_process(&self) -> Result<Option<ProcessGuard<'_>>> {
        match self.process.lock(LockKind::Exclusive, Some(Instant::now())) {
            Ok(held) => Ok(Some(held)),
            Err(KvError::LockTimeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Held while mutating the store
pub struct WriteScope<'a, T> {
    // Declared first so it is released before the thread lock.
    _process: ProcessGuard<'a>,
    state: RwLockWriteGuard<'a, T>,
}

impl<T> Deref for WriteScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state
    }
}

impl<T> DerefMut for WriteScope<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state
    }
}

pub struct RefreshScope<'a, T> {
    guard: &'a ConcurrencyGuard<T>,
    process: ProcessGuard<'a>,
    state: RwLockUpgradableReadGuard<'a, T>,
}

impl<'a, T> RefreshScope<'a, T> {
    /// Trade this scope for a write scope without letting another writer in
    pub fn upgrade(self) -> Result<WriteScope<'a, T>> {
        let deadline = self.guard.deadline();
        let exclusive = self.guard.process.lock(LockKind::Exclusive, deadline)?;
        let RefreshScope { process, state, .. } = self;
        let state = match deadline {
            None => RwLockUpgradableReadGuard::upgrade(state),
            Some(d) => RwLockUpgradableReadGuard::try_upgrade_for(state, remaining(d))
                .map_err(|_| KvError::LockTimeout)?,
        };
        drop(process);
        Ok(WriteScope {
            _process: exclusive,
            state,
        })
    }
}

impl<T> Deref for RefreshScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state
    }
}
