//! Advisory file locks shared with unrelated processes.
//!
//! Every lock is an empty file carrying an OS-level advisory lock. Within a
//! process, two handles on the same lock file conflict just like two
//! processes do, so threads and processes coordinate through one mechanism.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use fs4::FileExt;

/// An advisory file lock released when the value is dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    fn open(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create lock directory {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open lock file {}", path.display()))
    }

    /// Block until a shared lock on `path` is held.
    pub fn shared(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_shared()
            .with_context(|| format!("failed to lock {} (shared)", path.display()))?;
        Ok(Self { file })
    }

    /// Block until an exclusive lock on `path` is held.
    pub fn exclusive(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_exclusive()
            .with_context(|| format!("failed to lock {} (exclusive)", path.display()))?;
        Ok(Self { file })
    }

    /// Take an exclusive lock without blocking; `None` when another holder
    /// is in the way.
    pub fn try_exclusive(path: &Path) -> Result<Option<Self>> {
        let file = Self::open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to lock {} (try)", path.display()))
            }
        }
    }

    /// Convert this lock to exclusive mode, waiting out other holders.
    pub fn upgrade_exclusive(&self) -> Result<()> {
        self.file
            .lock_exclusive()
            .context("failed to upgrade lock to exclusive")
    }

    /// Convert this lock back to shared mode.
    pub fn downgrade_shared(&self) -> Result<()> {
        self.file
            .lock_shared()
            .context("failed to downgrade lock to shared")
    }

    /// Shared lock on the per-key lock file under `dir`.
    pub fn shared_key_lock(dir: &Path, key: &str) -> Result<Self> {
        Self::shared(&dir.join(key))
    }

    /// Exclusive lock on the per-key lock file under `dir`.
    pub fn exclusive_key_lock(dir: &Path, key: &str) -> Result<Self> {
        Self::exclusive(&dir.join(key))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
