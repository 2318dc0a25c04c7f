//! Versioned backups of the database directory, taken before migration.
//!
//! Backups land in numbered slots (`1`, `2`, ...); a ring of the five most
//! recent is kept. A backup is staged under a `.partial` suffix and renamed
//! into its slot, so a crash mid-copy leaves only a `.partial` directory
//! that the next store open sweeps away.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::fsync_dir;

pub(crate) const BACKUPS_KEPT: usize = 5;

fn numbered_slots(backups_dir: &Path) -> Result<Vec<u64>> {
    let mut slots = Vec::new();
    if !backups_dir.exists() {
        return Ok(slots);
    }
    for entry in fs::read_dir(backups_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            slots.push(n);
        }
    }
    slots.sort_unstable();
    Ok(slots)
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("failed to copy {} into backup", entry.path().display())
            })?;
        }
    }
    Ok(())
}

/// Copy `dbdir` into the next numbered backup slot, pruning the oldest
/// slots beyond `keep`.
pub(crate) fn create_backup(dbdir: &Path, backups_dir: &Path, keep: usize) -> Result<()> {
    fs::create_dir_all(backups_dir)
        .with_context(|| format!("failed to create {}", backups_dir.display()))?;
    let slots = numbered_slots(backups_dir)?;
    let next = slots.last().copied().unwrap_or(0) + 1;

    let staging = backups_dir.join(format!("{next}.partial"));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    copy_dir(dbdir, &staging)?;
    let slot = backups_dir.join(next.to_string());
    fs::rename(&staging, &slot)
        .with_context(|| format!("failed to move backup into place at {}", slot.display()))?;
    fsync_dir(backups_dir).ok();
    debug!(slot = %slot.display(), "db backed up before migration");

    let mut slots = numbered_slots(backups_dir)?;
    while slots.len() > keep {
        let oldest = slots.remove(0);
        let path = backups_dir.join(oldest.to_string());
        fs::remove_dir_all(&path)
            .with_context(|| format!("failed to prune old backup {}", path.display()))?;
    }
    Ok(())
}

/// Remove incomplete backups left behind by a crash mid-copy.
pub(crate) fn sweep_partial_backups(backups_dir: &Path) {
    let Ok(entries) = fs::read_dir(backups_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_partial = path
            .extension()
            .map_or(false, |ext| ext == "partial");
        if is_partial && path.is_dir() {
            if let Err(err) = fs::remove_dir_all(&path) {
                warn!(path = %path.display(), %err, "failed to sweep incomplete db backup");
            }
        }
    }
}
