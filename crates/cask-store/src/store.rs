//! The public store facade.
//!
//! Composes the blob/manifest stores, the metadata database, the lock
//! manager, and the tree store into the operations a container runtime
//! consumes. Every operation states its locking in its doc comment; the DB
//! transaction is the atomic boundary for metadata, and blob/manifest/tree
//! mutations after a commit are best-effort with their failures reported
//! separately.

use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha512};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::aci;
use crate::blobstore::DiskStore;
use crate::db::{aciinfo, backup, remote, schema, ACIInfo, Remote, DB};
use crate::keys::{self, HASH_PREFIX, LEN_KEY, MIN_LEN_KEY};
use crate::lock::FileLock;
use crate::manifest::{ImageManifest, Label};
use crate::treestore::TreeStore;
use crate::{timestamp_millis, StoreError};

/// A content-addressable store for ACIs rooted at a base directory.
///
/// Multiple instances, in one process or many, may share a base directory;
/// cross-process coordination runs entirely over advisory file locks and
/// the database's single-writer transactions.
#[derive(Debug)]
pub struct Store {
    base: PathBuf,
    blobs: DiskStore,
    manifests: DiskStore,
    db: DB,
    treestore: TreeStore,
    // Held shared for the lifetime of the instance; upgraded to exclusive
    // only while migrating the db schema, as another process still running
    // against the old schema must not observe the migration mid-flight.
    store_lock: FileLock,
    image_lock_dir: PathBuf,
    tree_lock_dir: PathBuf,
}

impl Store {
    /// Open (creating if needed) the store rooted at `base`.
    ///
    /// Takes the shared whole-store lock, then creates the schema or
    /// migrates it forward. Migration upgrades the whole-store lock to
    /// exclusive and backs up the db directory first; opening a store whose
    /// schema is newer than this build supports fails with
    /// [`StoreError::Migration`].
    pub fn new(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let cas_dir = base.join("cas");

        let image_lock_dir = cas_dir.join("imagelocks");
        fs::create_dir_all(&image_lock_dir)
            .with_context(|| format!("failed to create {}", image_lock_dir.display()))?;
        let tree_lock_dir = cas_dir.join("treestorelocks");
        fs::create_dir_all(&tree_lock_dir)
            .with_context(|| format!("failed to create {}", tree_lock_dir.display()))?;

        let store_lock = FileLock::shared(&cas_dir.join("cas"))?;
        backup::sweep_partial_backups(&cas_dir.join("db-backups"));

        let store = Self {
            blobs: DiskStore::new(cas_dir.join("blob")),
            manifests: DiskStore::new(cas_dir.join("imageManifest")),
            db: DB::open(&cas_dir.join("db"))?,
            treestore: TreeStore::new(cas_dir.join("tree")),
            store_lock,
            image_lock_dir,
            tree_lock_dir,
            base,
        };

        let mut needs_migrate = false;
        store.db.do_tx(|tx| {
            if !schema::is_populated(tx)? {
                return schema::create_schema(tx);
            }
            let version = schema::get_version(tx)?;
            if version > schema::DB_VERSION {
                return Err(StoreError::Migration(format!(
                    "stored db version {version} is newer than the supported version {}",
                    schema::DB_VERSION
                ))
                .into());
            }
            needs_migrate = version < schema::DB_VERSION;
            Ok(())
        })?;

        // Migration runs in a second transaction because it must hold the
        // exclusive store lock. If another process migrated in between, the
        // migration below starts from the current version and does nothing.
        if needs_migrate {
            store.store_lock.upgrade_exclusive()?;
            store.backup_db()?;
            store
                .db
                .do_tx(|tx| schema::migrate(tx, schema::DB_VERSION))?;
            store.store_lock.downgrade_shared()?;
            debug!(base = %store.base.display(), version = schema::DB_VERSION, "store db migrated");
        }

        Ok(store)
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn backup_db(&self) -> Result<()> {
        let backups_dir = self.base.join("cas").join("db-backups");
        backup::create_backup(self.db.dbdir(), &backups_dir, backup::BACKUPS_KEPT)
    }

    /// Scratch directory on the same filesystem as the store, so temp files
    /// can be renamed into it atomically.
    pub fn tmp_dir(&self) -> Result<PathBuf> {
        let dir = self.base.join("tmp");
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// A temp file in [`Store::tmp_dir`].
    pub fn tmp_file(&self) -> Result<NamedTempFile> {
        let dir = self.tmp_dir()?;
        NamedTempFile::new_in(&dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))
    }

    /// Ingest an ACI: decompress, hash the canonical bytes into the content
    /// key, and store blob, manifest, and metadata under it.
    ///
    /// Holds the exclusive per-key image lock from key computation through
    /// the metadata commit. `latest` marks an image fetched without a
    /// pinned version. The tree is not rendered here; callers ask for it
    /// explicitly via [`Store::render_tree_store`].
    pub fn write_aci(&self, r: impl Read + Seek, latest: bool) -> Result<String> {
        let mut dr = aci::decompressed_reader(r).context("error decompressing image")?;

        // Tee the decompressed image into a temp file and the hash.
        let mut hasher = Sha512::new();
        let mut tmp = self.tmp_file().context("error creating image temp file")?;
        let mut buf = [0u8; 32 * 1024];
        loop {
            let n = dr.read(&mut buf).context("error reading image")?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.as_file_mut()
                .write_all(&buf[..n])
                .context("error copying image")?;
        }
        tmp.as_file().sync_all().context("error flushing image")?;

        let fh = tmp.reopen().context("error reopening image")?;
        let im = aci::manifest_from_image(fh).context("error extracting image manifest")?;

        let key = keys::key_from_digest(&hasher.finalize());
        let _key_lock = FileLock::exclusive_key_lock(&self.image_lock_dir, &key)
            .context("error locking image")?;

        let tmp_path = tmp.into_temp_path();
        self.blobs
            .import(&tmp_path, &key, true)
            .context("error importing image")?;

        let imj = serde_json::to_vec(&im).context("error marshalling image manifest")?;
        self.manifests
            .write(&key, &imj)
            .context("error importing image manifest")?;

        self.db
            .do_tx(|tx| {
                aciinfo::write(
                    tx,
                    &ACIInfo {
                        blob_key: key.clone(),
                        app_name: im.name.clone(),
                        import_time: timestamp_millis(),
                        latest,
                    },
                )
            })
            .context("error writing ACI info")?;

        debug!(key = %key, name = %im.name, latest, "image stored");
        Ok(key)
    }

    /// Resolve a partial key (`sha512-0c45e8…`) to a full key by treating it
    /// as a prefix. Longer-than-full keys are truncated first.
    pub fn resolve_key(&self, key: &str) -> Result<String> {
        if !key.starts_with(HASH_PREFIX) {
            return Err(StoreError::BadKey {
                key: key.to_string(),
                reason: "missing sha512- prefix",
            }
            .into());
        }
        if key.len() < MIN_LEN_KEY {
            return Err(StoreError::BadKey {
                key: key.to_string(),
                reason: "key too short",
            }
            .into());
        }
        let prefix = &key[..key.len().min(LEN_KEY)];

        let infos = self
            .db
            .do_tx(|tx| aciinfo::get_by_key_prefix(tx, prefix))
            .context("error retrieving ACI infos")?;
        match infos.len() {
            0 => Err(StoreError::KeyNotFound(format!("key prefix {prefix:?}")).into()),
            1 => Ok(infos.into_iter().next().expect("one match").blob_key),
            matches => Err(StoreError::AmbiguousKey {
                prefix: prefix.to_string(),
                matches,
            }
            .into()),
        }
    }

    /// A reader over the stored image blob. Takes the shared per-key image
    /// lock, which is held until the returned reader is dropped.
    pub fn read_stream(&self, key: &str) -> Result<BlobReader> {
        let key = self.resolve_key(key).context("error resolving key")?;
        let lock = FileLock::shared_key_lock(&self.image_lock_dir, &key)
            .context("error locking image")?;
        let file = self.blobs.read_stream(&key)?;
        Ok(BlobReader { file, _lock: lock })
    }

    /// The image manifest stored under `key` (or a prefix of it). Shared
    /// per-key image lock for the duration of the read.
    pub fn get_image_manifest(&self, key: &str) -> Result<ImageManifest> {
        let key = self.resolve_key(key).context("error resolving key")?;
        let _key_lock = FileLock::shared_key_lock(&self.image_lock_dir, &key)
            .context("error locking image")?;
        let imj = self
            .manifests
            .read(&key)
            .context("error retrieving image manifest")?;
        serde_json::from_slice(&imj).context("error unmarshalling image manifest")
    }

    /// The key of the ACI best matching `name` under the given label
    /// constraints: every requested label must appear in the manifest;
    /// `latest`-marked images win when no `version` label was asked for;
    /// remaining ties go to the most recently imported.
    pub fn get_aci(&self, name: &str, labels: &[Label]) -> Result<String> {
        let version_requested = labels.iter().any(|l| l.name == "version");
        let infos = self.db.do_tx(|tx| aciinfo::get_by_app_name(tx, name))?;

        let mut best: Option<ACIInfo> = None;
        'next: for info in infos {
            let im = self
                .get_image_manifest(&info.blob_key)
                .context("error getting image manifest")?;
            for label in labels {
                if !im.has_label(&label.name, &label.value) {
                    continue 'next;
                }
            }
            let Some(cur) = &best else {
                best = Some(info);
                continue;
            };
            if !version_requested && cur.latest != info.latest {
                if info.latest {
                    best = Some(info);
                }
                continue;
            }
            if info.import_time > cur.import_time {
                best = Some(info);
            }
        }

        match best {
            Some(info) => Ok(info.blob_key),
            None => {
                let labels = labels
                    .iter()
                    .map(|l| format!("{}={}", l.name, l.value))
                    .collect::<Vec<_>>()
                    .join(",");
                Err(StoreError::KeyNotFound(format!("name {name:?}, labels [{labels}]")).into())
            }
        }
    }

    /// Remove the image with the given (full) key.
    ///
    /// Under the exclusive per-key image lock, deletes the ACI-info and its
    /// remote record in one transaction, then erases the blob and manifest
    /// objects best-effort. When an erase fails the image counts as removed
    /// (the database is authoritative) and the leftovers are reported as
    /// [`StoreError::StoreRemoval`]; nothing garbage-collects them later.
    pub fn remove_aci(&self, key: &str) -> Result<()> {
        keys::validate_full_key(key)?;
        let _key_lock = FileLock::exclusive_key_lock(&self.image_lock_dir, key)
            .context("error locking image")?;

        self.db
            .do_tx(|tx| {
                if aciinfo::get_by_blob_key(tx, key)?.is_none() {
                    return Err(StoreError::KeyNotFound(format!("key {key:?}")).into());
                }
                aciinfo::remove(tx, key)?;
                remote::remove_by_blob_key(tx, key)?;
                Ok(())
            })
            .with_context(|| format!("cannot remove image with key {key} from db"))?;

        let mut errors = Vec::new();
        for (name, store) in [("blob", &self.blobs), ("imageManifest", &self.manifests)] {
            if let Err(err) = store.erase(key) {
                errors.push(format!("{name}: {err:#}"));
            }
        }
        if !errors.is_empty() {
            warn!(key, ?errors, "image removed from db but disk entries remain");
            return Err(StoreError::StoreRemoval { errors }.into());
        }
        debug!(key, "image removed");
        Ok(())
    }

    /// Render the tree store entry for `key` unless one is already fully
    /// rendered (or unconditionally with `rebuild`).
    ///
    /// Holds the exclusive per-key *tree* lock, which is distinct from the
    /// image lock: rendering reads the image and its dependencies through
    /// [`Store::read_stream`] / [`Store::get_image_manifest`], and those
    /// take shared per-key image locks of their own.
    pub fn render_tree_store(&self, key: &str, rebuild: bool) -> Result<()> {
        keys::validate_full_key(key)?;
        let _tree_lock = FileLock::exclusive_key_lock(&self.tree_lock_dir, key)
            .context("error locking tree store")?;

        if !rebuild && self.treestore.is_rendered(key) {
            return Ok(());
        }
        // Drain any partial entry from a crashed render or a failed removal
        // before starting over.
        self.treestore.remove(key)?;
        self.treestore.write(key, self)
    }

    /// Verify the tree store entry for `key` against its recorded digest.
    /// Shared per-key tree lock.
    pub fn check_tree_store(&self, key: &str) -> Result<()> {
        keys::validate_full_key(key)?;
        let _tree_lock = FileLock::shared_key_lock(&self.tree_lock_dir, key)
            .context("error locking tree store")?;
        self.treestore.check(key)
    }

    /// Remove the rendered entry for `key`. Exclusive per-key tree lock.
    pub fn remove_tree_store(&self, key: &str) -> Result<()> {
        keys::validate_full_key(key)?;
        let _tree_lock = FileLock::exclusive_key_lock(&self.tree_lock_dir, key)
            .context("error locking tree store")?;
        self.treestore
            .remove(key)
            .context("error removing the tree store")
    }

    /// Whether a fully rendered tree entry exists for `key`.
    #[must_use]
    pub fn is_rendered(&self, key: &str) -> bool {
        self.treestore.is_rendered(key)
    }

    /// Absolute path of the tree entry for `key`; does not check that it
    /// exists or is fully rendered.
    #[must_use]
    pub fn get_tree_store_path(&self, key: &str) -> PathBuf {
        self.treestore.get_path(key)
    }

    /// Absolute path of the rendered rootfs for `key`; does not check that
    /// it exists or is fully rendered.
    #[must_use]
    pub fn get_tree_store_rootfs(&self, key: &str) -> PathBuf {
        self.treestore.get_rootfs(key)
    }

    /// The remote record for `aci_url`, if one exists.
    pub fn get_remote(&self, aci_url: &str) -> Result<Option<Remote>> {
        self.db.do_tx(|tx| remote::get(tx, aci_url))
    }

    /// Add or update the given remote record.
    pub fn write_remote(&self, r: &Remote) -> Result<()> {
        self.db.do_tx(|tx| remote::write(tx, r))
    }

    /// All ACI-info rows, ordered by the given whitelisted columns
    /// (`blobkey`, `appname`, `importtime`, `latest`).
    pub fn get_all_aci_infos(&self, sort_fields: &[&str], ascending: bool) -> Result<Vec<ACIInfo>> {
        self.db
            .do_tx(|tx| aciinfo::get_all(tx, sort_fields, ascending))
    }

    /// Enumerate the keys present in the blob store, in undefined order.
    pub fn blob_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.blobs.keys()
    }

    #[cfg(test)]
    pub(crate) fn db(&self) -> &DB {
        &self.db
    }
}

/// A streaming reader over a stored blob. The shared per-key image lock is
/// bound to this value and released when it is dropped.
pub struct BlobReader {
    file: File,
    _lock: FileLock,
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}
