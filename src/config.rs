//! Configuration for mmapkv
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{KvError, Result};

/// Size of one mapping page; file lengths are always a multiple of it.
pub const PAGE_SIZE: usize = 4096;

/// Main configuration shared by every store opened with it
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all store files
    /// Internal structure:
    ///   {root_dir}/
    ///     ├── {id}           (data file: header + record log)
    ///     ├── {id}.crc       (meta info)
    ///     └── {id}.lock      (sentinel, multi-process stores only)
    pub root_dir: PathBuf,

    /// Initial length of a new data file (rounded up to whole pages)
    pub initial_capacity: usize,

    // -------------------------------------------------------------------------
    // Growth / Compaction Configuration
    // -------------------------------------------------------------------------
    /// Multiplier applied to the file length each time it must grow
    pub growth_factor: usize,

    /// Compact once the log is this many times larger than the live entries
    pub compaction_ratio: f64,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// When to msync the mapping after writes
    pub sync_strategy: SyncStrategy,

    /// What to do when no CRC candidate verifies on load
    pub recovery: RecoveryStrategy,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// Upper bound for acquiring the store locks; `None` blocks indefinitely
    pub lock_timeout: Option<Duration>,

    /// Called with the store id after changes made by another process were
    /// picked up (multi-process stores only)
    pub on_content_change: Option<ContentChangeHandler>,
}

/// Shared callback for `Config::on_content_change`
#[derive(Clone)]
pub struct ContentChangeHandler(Arc<dyn Fn(&str) + Send + Sync>);

impl ContentChangeHandler {
    pub fn new(f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub(crate) fn notify(&self, id: &str) {
        (self.0)(id)
    }
}

impl fmt::Debug for ContentChangeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentChangeHandler")
    }
}

/// Sync strategy: how often to msync the mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// msync after every write (safest, slowest)
    EveryWrite,

    /// msync after N writes
    EveryNWrites { count: usize },

    /// Leave write-back to the OS until `sync` or close
    Manual,
}

/// Recovery strategy when the stored checksums disagree with the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Keep every record that still decodes, then rewrite the log
    Recover,

    /// Drop the log contents and start empty
    Discard,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join("mmapkv"),
            initial_capacity: PAGE_SIZE,
            growth_factor: 2,
            compaction_ratio: 2.0,
            sync_strategy: SyncStrategy::Manual,
            recovery: RecoveryStrategy::Recover,
            lock_timeout: None,
            on_content_change: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Initial data file length rounded to whole pages
    pub(crate) fn initial_file_len(&self) -> usize {
        round_up_to_page(self.initial_capacity.max(PAGE_SIZE))
    }

    fn validate(&self) -> Result<()> {
        if self.initial_capacity == 0 {
            return Err(KvError::Config("initial_capacity must be > 0".to_string()));
        }
        if self.growth_factor < 2 {
            return Err(KvError::Config(format!(
                "growth_factor must be >= 2, got {}",
                self.growth_factor
            )));
        }
        if !(self.compaction_ratio > 1.0) {
            return Err(KvError::Config(format!(
                "compaction_ratio must be > 1.0, got {}",
                self.compaction_ratio
            )));
        }
        if let SyncStrategy::EveryNWrites { count: 0 } = self.sync_strategy {
            return Err(KvError::Config("EveryNWrites count must be > 0".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn round_up_to_page(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the root directory for store files
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    /// Set the initial data file length (in bytes)
    pub fn initial_capacity(mut self, bytes: usize) -> Self {
        self.config.initial_capacity = bytes;
        self
    }

    /// Set the growth multiplier
    pub fn growth_factor(mut self, factor: usize) -> Self {
        self.config.growth_factor = factor;
        self
    }

    /// Set the log-size / live-size ratio that triggers compaction
    pub fn compaction_ratio(mut self, ratio: f64) -> Self {
        self.config.compaction_ratio = ratio;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the recovery strategy
    pub fn recovery(mut self, strategy: RecoveryStrategy) -> Self {
        self.config.recovery = strategy;
        self
    }

    /// Bound lock acquisition
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = Some(timeout);
        self
    }

    /// Register a callback for changes written by other processes
    pub fn on_content_change(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.config.on_content_change = Some(ContentChangeHandler::new(f));
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
