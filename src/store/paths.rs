//! Store file naming
//!
//! ```text
//!   {root}/{name}           data file
//!   {root}/{name}.crc       meta info
//!   {root}/{name}.lock      process lock sentinel (multi-process)
//!   {root}/{name}.compact   rewrite in progress
//! ```
//! `name` is the store id, or its hex MD5 when the id cannot be used as a
//! file name.

use std::path::{Path, PathBuf};

use crate::error::{KvError, Result};
use crate::log::LogPaths;

const SPECIAL_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone)]
pub struct StorePaths {
    pub log: LogPaths,
    pub lock: PathBuf,
}

impl StorePaths {
    pub fn new(root: &Path, id: &str) -> Result<Self> {
        let data = root.join(file_name(id)?);
        let mut lock = data.as_os_str().to_owned();
        lock.push(".lock");
        Ok(Self {
            log: LogPaths::new(data),
            lock: PathBuf::from(lock),
        })
    }

    pub fn data(&self) -> &Path {
        &self.log.data
    }

    /// Every file that may belong to the store
    pub fn all(&self) -> [&Path; 4] {
        [
            &self.log.data,
            &self.log.meta,
            &self.log.compact,
            &self.lock,
        ]
    }
}

/// File name used for store `id`
pub fn file_name(id: &str) -> Result<String> {
    if id.is_empty() {
        return Err(KvError::Open("store id must not be empty".to_string()));
    }
    if id == "." || id == ".." || id.contains(SPECIAL_CHARS) || id.chars().any(char::is_control) {
        return Ok(format!("{:x}", md5::compute(id.as_bytes())));
    }
    Ok(id.to_string())
}
