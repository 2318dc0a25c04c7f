//! Rendered images on disk, one directory per image key.
//!
//! An entry holds the rendered manifest, a populated `rootfs/`, a `hash`
//! file with an integrity digest over the rendered contents, and a
//! zero-byte `rendered` marker written last. The marker is the completeness
//! certificate: a crashed render leaves no marker, and the entry is then
//! fair game for discard-and-rebuild without further checks.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::keys::key_from_digest;
use crate::render;
use crate::store::Store;
use crate::{fsync_dir, StoreError};

const HASH_FILE: &str = "hash";
const RENDERED_FILE: &str = "rendered";

#[derive(Debug)]
pub(crate) struct TreeStore {
    path: PathBuf,
}

impl TreeStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the entry for `key`. Pure path math; existence is the
    /// caller's problem.
    pub fn get_path(&self, key: &str) -> PathBuf {
        self.path.join(key)
    }

    /// Path of the rendered rootfs for `key`. Pure path math.
    pub fn get_rootfs(&self, key: &str) -> PathBuf {
        self.get_path(key).join("rootfs")
    }

    pub fn is_rendered(&self, key: &str) -> bool {
        self.get_path(key).join(RENDERED_FILE).is_file()
    }

    /// Render the image into its entry, then certify it: integrity digest
    /// into `hash`, zero-byte `rendered` marker last.
    pub fn write(&self, key: &str, store: &Store) -> Result<()> {
        let dst = self.get_path(key);
        fs::create_dir_all(&dst)
            .with_context(|| format!("failed to create tree entry {}", dst.display()))?;
        render::render_image(store, key, &dst)
            .with_context(|| format!("error rendering image {key}"))?;
        let digest = self.hash(key)?;
        fs::write(dst.join(HASH_FILE), &digest)
            .with_context(|| format!("failed to write tree hash for {key}"))?;
        File::create(dst.join(RENDERED_FILE))
            .with_context(|| format!("failed to write rendered marker for {key}"))?;
        fsync_dir(&dst).ok();
        debug!(key, path = %dst.display(), "tree store rendered");
        Ok(())
    }

    /// Recompute the integrity digest and compare it to the stored one.
    pub fn check(&self, key: &str) -> Result<()> {
        let expected = fs::read_to_string(self.get_path(key).join(HASH_FILE))
            .with_context(|| format!("failed to read tree hash for {key}"))?;
        let actual = self.hash(key)?;
        if actual != expected {
            return Err(StoreError::Integrity {
                key: key.to_string(),
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Delete the entry recursively; absence is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        let dst = self.get_path(key);
        if dst.exists() {
            fs::remove_dir_all(&dst)
                .with_context(|| format!("failed to remove tree entry {}", dst.display()))?;
            fsync_dir(&self.path).ok();
            debug!(key, "tree store entry removed");
        }
        Ok(())
    }

    /// Deterministic digest over the rendered entry: a sorted walk feeding
    /// each entry's relative path, type, link target, and file contents into
    /// one SHA-512. The certification files themselves are excluded.
    fn hash(&self, key: &str) -> Result<String> {
        let root = self.get_path(key);
        let mut hasher = Sha512::new();
        let mut buf = [0u8; 32 * 1024];
        for entry in walkdir::WalkDir::new(&root)
            .sort_by(|a, b| a.path().cmp(b.path()))
            .follow_links(false)
        {
            let entry = entry.context("failed to walk tree entry")?;
            let path = entry.path();
            if path == root {
                continue;
            }
            let rel = path
                .strip_prefix(&root)
                .context("failed to relativize tree path")?;
            if rel == Path::new(HASH_FILE) || rel == Path::new(RENDERED_FILE) {
                continue;
            }
            hasher.update(rel.to_string_lossy().as_bytes());
            let file_type = entry.file_type();
            if file_type.is_dir() {
                hasher.update(b"\0d");
            } else if file_type.is_symlink() {
                hasher.update(b"\0l");
                let target = fs::read_link(path)
                    .with_context(|| format!("failed to read symlink {}", path.display()))?;
                hasher.update(target.to_string_lossy().as_bytes());
            } else {
                hasher.update(b"\0f");
                let mut file = File::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                loop {
                    let n = file
                        .read(&mut buf)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
            }
            hasher.update(b"\0");
        }
        Ok(key_from_digest(&hasher.finalize()))
    }
}
