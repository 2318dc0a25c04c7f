//! The metadata database: ACI-info records, remote-fetch records, and the
//! schema version, all behind short single-writer transactions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub(crate) mod aciinfo;
pub(crate) mod backup;
pub(crate) mod remote;
pub(crate) mod schema;

pub use aciinfo::ACIInfo;
pub use remote::Remote;

const DB_FILENAME: &str = "store.sqlite";

/// Handle on the store's embedded database. The underlying engine is
/// single-writer, so the connection lives behind a process-wide mutex and
/// every access goes through [`DB::do_tx`].
#[derive(Debug)]
pub(crate) struct DB {
    conn: Mutex<Connection>,
    dbdir: PathBuf,
}

impl DB {
    pub fn open(dbdir: &Path) -> Result<Self> {
        fs::create_dir_all(dbdir)
            .with_context(|| format!("failed to create db directory {}", dbdir.display()))?;
        let path = dbdir.join(DB_FILENAME);
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open store db at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(10))
            .context("failed to set busy timeout for store db")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL for store db")?;
        Ok(Self {
            conn: Mutex::new(conn),
            dbdir: dbdir.to_path_buf(),
        })
    }

    pub fn dbdir(&self) -> &Path {
        &self.dbdir
    }

    /// Run `f` inside an immediate transaction: committed when `f` returns
    /// success, rolled back otherwise.
    pub fn do_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("store db mutex poisoned"))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start store db transaction")?;
        let value = f(&tx)?;
        tx.commit().context("failed to commit store db transaction")?;
        Ok(value)
    }
}
