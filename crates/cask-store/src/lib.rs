//! Content-addressable store for ACI container images.
//!
//! The store persists images under keys derived from the SHA-512 of their
//! decompressed bytes, keeps per-image metadata in an embedded SQLite
//! database, and materializes dependency closures into on-disk trees a
//! container can chroot into. Multiple processes may open the same store
//! concurrently; coordination happens through advisory file locks, so a
//! crashed or killed writer never leaves externally visible corruption.
//!
//! The entry point is [`Store`]; everything else supports it.

use std::fs::File;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

mod aci;
mod blobstore;
mod db;
mod keys;
mod lock;
mod manifest;
mod render;
mod store;
mod treestore;

pub use db::{ACIInfo, Remote};
pub use keys::key_for_bytes;
pub use lock::FileLock;
pub use manifest::{Dependency, ImageManifest, Label};
pub use store::{BlobReader, Store};

/// Errors surfaced by the store.
///
/// I/O and external-collaborator failures travel as plain [`anyhow::Error`]
/// chains with operation context; this enum carries the cases callers branch
/// on, recoverable with `err.downcast_ref::<StoreError>()`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no image found for {0}")]
    KeyNotFound(String),
    #[error("ambiguous key prefix {prefix:?}: {matches} images match")]
    AmbiguousKey { prefix: String, matches: usize },
    #[error("bad image key {key:?}: {reason}")]
    BadKey { key: String, reason: &'static str },
    #[error("store migration: {0}")]
    Migration(String),
    #[error("some image disk entries could not be removed: {errors:?}")]
    StoreRemoval { errors: Vec<String> },
    #[error("tree store {key} integrity mismatch (expected {expected}, found {actual})")]
    Integrity {
        key: String,
        expected: String,
        actual: String,
    },
}

pub(crate) fn fsync_dir(dir: &Path) -> Result<()> {
    let file = File::open(dir)?;
    file.sync_all()?;
    Ok(())
}

/// Milliseconds since the Unix epoch; import-time ties are broken by
/// later-wins, so second resolution is too coarse.
pub(crate) fn timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
