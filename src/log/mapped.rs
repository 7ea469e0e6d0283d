//! Memory-mapped file
//!
//! Owns a file and a shared writable mapping of its full length.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::Result;

pub struct MappedFile {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
}

impl MappedFile {
    /// Open (creating if missing) and extend to at least `min_len` bytes
    pub fn open(path: &Path, min_len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if (file.metadata()?.len() as usize) < min_len {
            file.set_len(min_len as u64)?;
        }

        Self::map(path.to_path_buf(), file)
    }

    /// Create a brand new file of exactly `len` bytes, replacing any leftover
    pub fn create(path: &Path, len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;
        Self::map(path.to_path_buf(), file)
    }

    fn map(path: PathBuf, file: File) -> Result<Self> {
        // SAFETY: the mapping is only resized through `grow`/`remap`, which
        // take `&mut self`, and files are never shrunk in place.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { path, file, mmap })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record that the file now lives at `path` (after a rename)
    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    /// Length of the current mapping
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Length of the file as the OS currently reports it
    pub fn disk_len(&self) -> Result<usize> {
        Ok(self.file.metadata()?.len() as usize)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Extend the file and map the new length
    pub fn grow(&mut self, new_len: usize) -> Result<()> {
        if new_len <= self.len() {
            return Ok(());
        }
        self.mmap.flush_async()?;
        self.file.set_len(new_len as u64)?;
        self.remap()
    }

    /// Map the file again at its current on-disk length
    pub fn remap(&mut self) -> Result<()> {
        // SAFETY: see `map`
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }

    /// Synchronous msync of the whole mapping
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    pub fn flush_async(&self) -> Result<()> {
        self.mmap.flush_async()?;
        Ok(())
    }

    /// msync plus fsync of the file metadata
    pub fn sync_all(&self) -> Result<()> {
        self.mmap.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
