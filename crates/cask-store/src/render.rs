//! Materializes an image and its dependency closure into a tree entry.
//!
//! Dependencies render depth-first, then the image's own `rootfs/` unpacks
//! over whatever they laid down, so later layers win. Every read goes
//! through the store's public APIs and therefore takes shared per-key image
//! locks; the caller is expected to hold the tree lock for the key being
//! rendered.

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Component, Path};

use anyhow::{bail, Context, Result};

use crate::store::Store;

pub(crate) fn render_image(store: &Store, key: &str, dst: &Path) -> Result<()> {
    let rootfs = dst.join("rootfs");
    fs::create_dir_all(&rootfs)
        .with_context(|| format!("failed to create rootfs at {}", rootfs.display()))?;
    let mut seen = HashSet::new();
    render_closure(store, key, &rootfs, &mut seen)?;
    let manifest = store.get_image_manifest(key)?;
    let buf = serde_json::to_vec(&manifest).context("failed to serialize rendered manifest")?;
    fs::write(dst.join("manifest"), buf)
        .with_context(|| format!("failed to write rendered manifest for {key}"))?;
    Ok(())
}

fn render_closure(
    store: &Store,
    key: &str,
    rootfs: &Path,
    seen: &mut HashSet<String>,
) -> Result<()> {
    // A dependency shared by several images in the closure unpacks once.
    if !seen.insert(key.to_string()) {
        return Ok(());
    }
    let manifest = store.get_image_manifest(key)?;
    for dep in &manifest.dependencies {
        let dep_key = match &dep.image_id {
            Some(id) => store.resolve_key(id)?,
            None => store.get_aci(&dep.image_name, &dep.labels)?,
        };
        render_closure(store, &dep_key, rootfs, seen)?;
    }
    let stream = store.read_stream(key)?;
    unpack_rootfs(stream, rootfs).with_context(|| format!("failed to unpack image {key}"))
}

/// Unpack the `rootfs/` entries of an image tar under `rootfs`, overwriting
/// whatever earlier layers put there.
fn unpack_rootfs<R: Read>(r: R, rootfs: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(r);
    archive.set_preserve_permissions(true);
    for entry in archive.entries().context("failed to read image tar")? {
        let mut entry = entry.context("failed to read image tar entry")?;
        let rel = {
            let path = entry.path().context("bad path in image tar")?;
            let path = path.strip_prefix("./").unwrap_or(&path);
            match path.strip_prefix("rootfs") {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            }
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("image tar entry escapes rootfs: {}", rel.display());
        }
        let dst = rootfs.join(&rel);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        // Replace anything an earlier layer left at this path, so regular
        // files can overwrite symlinks and vice versa.
        match fs::symlink_metadata(&dst) {
            Ok(meta) if !meta.is_dir() => {
                fs::remove_file(&dst).ok();
            }
            _ => {}
        }
        entry
            .unpack(&dst)
            .with_context(|| format!("failed to unpack {}", dst.display()))?;
    }
    Ok(())
}
