//! Single-writer exclusion across processes.
//!
//! An advisory file lock on `<repo>/bunsen.lock` is held for the duration
//! of one ingest or maintenance call. Readers never take the lock.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;
use tracing::debug;

use crate::BunsenError;

pub const LOCK_FILE: &str = "bunsen.lock";

/// Held write lock; released on drop.
pub struct WriteLock {
    file: File,
}

impl WriteLock {
    /// Acquire the repo write lock, blocking until it is free.
    pub fn acquire(base_dir: &Path) -> Result<Self, BunsenError> {
        let file = Self::open(base_dir)?;
        file.lock_exclusive().map_err(BunsenError::Io)?;
        debug!("acquired write lock");
        Ok(WriteLock { file })
    }

    /// Acquire the lock without blocking; fails with `LockHeld` if
    /// another writer has it.
    pub fn try_acquire(base_dir: &Path) -> Result<Self, BunsenError> {
        let file = Self::open(base_dir)?;
        file.try_lock_exclusive().map_err(|e| {
            if e.kind() == fs2::lock_contended_error().kind() {
                BunsenError::LockHeld
            } else {
                BunsenError::Io(e)
            }
        })?;
        Ok(WriteLock { file })
    }

    fn open(base_dir: &Path) -> Result<File, BunsenError> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(base_dir.join(LOCK_FILE))
            .map_err(BunsenError::Io)
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
