//! Process-wide store registry
//!
//! Handles opened for the same data file share one `StoreInner`. Entries hold
//! a `Weak`, so the registry never keeps a store alive; the last handle to go
//! away tears the store down and removes its entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::{Mode, StoreInner};
use crate::crypt::CryptKey;
use crate::error::{KvError, Result};

struct Entry {
    mode: Mode,
    key: Option<CryptKey>,
    inner: Weak<StoreInner>,
}

static REGISTRY: Lazy<Mutex<HashMap<PathBuf, Entry>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Return the live store for `data`, or open one with `open`
///
/// The registry lock is held across `open`, so two threads racing to open
/// the same id end up with the same instance.
pub(crate) fn get_or_open(
    data: &Path,
    mode: Mode,
    key: Option<&CryptKey>,
    open: impl FnOnce() -> Result<Arc<StoreInner>>,
) -> Result<Arc<StoreInner>> {
    let mut registry = REGISTRY.lock();

    if let Some(entry) = registry.get(data) {
        if let Some(inner) = entry.inner.upgrade() {
            let conflict = if entry.mode != mode {
                Some(format!("{} is already open in {:?} mode", data.display(), entry.mode))
            } else if entry.key.as_ref() != key {
                Some(format!("{} is already open with a different crypt key", data.display()))
            } else {
                None
            };
            // `inner` may be the last handle; its drop takes the registry lock.
            drop(registry);
            return match conflict {
                Some(reason) => Err(KvError::Open(reason)),
                None => Ok(inner),
            };
        }
    }

    let inner = open()?;
    registry.insert(
        data.to_path_buf(),
        Entry {
            mode,
            key: key.cloned(),
            inner: Arc::downgrade(&inner),
        },
    );
    Ok(inner)
}

/// Record a key change made through a live handle
pub(crate) fn update_key(data: &Path, key: Option<&CryptKey>) {
    if let Some(entry) = REGISTRY.lock().get_mut(data) {
        entry.key = key.cloned();
    }
}

/// Drop the entry for `data` once no handle refers to it
pub(crate) fn release(data: &Path) {
    let mut registry = REGISTRY.lock();
    if registry
        .get(data)
        .is_some_and(|entry| entry.inner.strong_count() == 0)
    {
        registry.remove(data);
    }
}

pub(crate) fn is_open(data: &Path) -> bool {
    REGISTRY
        .lock()
        .get(data)
        .is_some_and(|entry| entry.inner.strong_count() > 0)
}
