//! Flat content-addressed file store, one opaque file per key.
//!
//! Two instances share the key space: `blob` for image tarballs and
//! `imageManifest` for serialized manifests. Writes land through an atomic
//! rename so a reader observes either the whole old file or the whole new
//! one, never a partial.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::keys::block_transform;
use crate::fsync_dir;

#[derive(Debug)]
pub(crate) struct DiskStore {
    base: PathBuf,
}

impl DiskStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    /// Physical location of `key`: two shard levels from the hex portion,
    /// then the full key as the file name.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let (k0, k1) = block_transform(key);
        self.base.join(k0).join(k1).join(key)
    }

    fn ensure_parent(&self, dest: &Path) -> Result<()> {
        let parent = dest.parent().expect("store paths have parents");
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create store directory {}", parent.display()))
    }

    /// Place an already-materialized file under `key`. With `mv` the source
    /// is renamed into place (it must live on the store's filesystem for the
    /// rename to be atomic); otherwise it is copied and then unlinked.
    pub fn import(&self, src: &Path, key: &str, mv: bool) -> Result<()> {
        let dest = self.path_for(key);
        self.ensure_parent(&dest)?;
        if mv {
            match fs::rename(src, &dest) {
                Ok(()) => {}
                Err(_) => {
                    // Cross-device source; fall back to copy + unlink.
                    fs::copy(src, &dest).with_context(|| {
                        format!("failed to copy {} into the store", src.display())
                    })?;
                    fs::remove_file(src).ok();
                }
            }
        } else {
            fs::copy(src, &dest)
                .with_context(|| format!("failed to copy {} into the store", src.display()))?;
            fs::remove_file(src)
                .with_context(|| format!("failed to unlink import source {}", src.display()))?;
        }
        fsync_dir(dest.parent().expect("store paths have parents")).ok();
        debug!(key, dest = %dest.display(), "blob imported");
        Ok(())
    }

    /// Write a short buffer under `key` atomically: temp file on the same
    /// directory, fsync, rename.
    pub fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let dest = self.path_for(key);
        self.ensure_parent(&dest)?;
        let tmp = dest.with_extension("partial");
        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("failed to create temp object {}", tmp.display()))?;
            file.write_all(bytes)
                .with_context(|| format!("failed to write temp object {}", tmp.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to flush temp object {}", tmp.display()))?;
        }
        fs::rename(&tmp, &dest).with_context(|| {
            format!(
                "failed to move object into place ({} -> {})",
                tmp.display(),
                dest.display()
            )
        })?;
        fsync_dir(dest.parent().expect("store paths have parents")).ok();
        Ok(())
    }

    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        fs::read(&path).with_context(|| format!("failed to read object {}", path.display()))
    }

    /// A streaming handle on the object, positioned at byte 0.
    pub fn read_stream(&self, key: &str) -> Result<File> {
        let path = self.path_for(key);
        File::open(&path).with_context(|| format!("failed to open object {}", path.display()))
    }

    /// Remove the object for `key`; absence is not an error.
    pub fn erase(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                fsync_dir(path.parent().expect("store paths have parents")).ok();
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to erase object {}", path.display()))
            }
        }
    }

    /// Lazily enumerate stored keys, in undefined order. Unreadable entries
    /// are skipped.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        walkdir::WalkDir::new(&self.base)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(|entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        debug!(%err, "skipping entry while enumerating store keys");
                        return None;
                    }
                };
                if !entry.file_type().is_file() {
                    return None;
                }
                entry.file_name().to_str().map(str::to_string)
            })
    }
}
