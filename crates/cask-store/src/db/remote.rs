use anyhow::Result;
use rusqlite::{params, Row, Transaction};

/// Record of how an image was fetched from a remote URL, one per URL ever
/// fetched successfully.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Remote {
    /// Primary identity.
    pub aci_url: String,
    pub sig_url: String,
    /// Content key of the image fetched from this URL.
    pub blob_key: String,
    pub etag: String,
    /// Seconds since the Unix epoch of the last freshness check.
    pub last_check: i64,
}

const COLUMNS: &str = "aciurl, sigurl, blobkey, etag, lastcheck";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Remote> {
    Ok(Remote {
        aci_url: row.get(0)?,
        sig_url: row.get(1)?,
        blob_key: row.get(2)?,
        etag: row.get(3)?,
        last_check: row.get(4)?,
    })
}

pub(crate) fn get(tx: &Transaction<'_>, aci_url: &str) -> Result<Option<Remote>> {
    let mut stmt = tx.prepare(&format!("SELECT {COLUMNS} FROM remote WHERE aciurl = ?1"))?;
    let mut rows = stmt.query_map(params![aci_url], from_row)?;
    Ok(rows.next().transpose()?)
}

/// Upsert keyed by `aci_url`.
pub(crate) fn write(tx: &Transaction<'_>, remote: &Remote) -> Result<()> {
    tx.execute(
        "INSERT INTO remote (aciurl, sigurl, blobkey, etag, lastcheck) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(aciurl) DO UPDATE SET \
         sigurl = excluded.sigurl, \
         blobkey = excluded.blobkey, \
         etag = excluded.etag, \
         lastcheck = excluded.lastcheck",
        params![
            remote.aci_url,
            remote.sig_url,
            remote.blob_key,
            remote.etag,
            remote.last_check
        ],
    )?;
    Ok(())
}

/// Remove the remote referencing `key`; a removed image must not leave a
/// remote row pointing at a blob no ACI-info describes.
pub(crate) fn remove_by_blob_key(tx: &Transaction<'_>, key: &str) -> Result<()> {
    tx.execute("DELETE FROM remote WHERE blobkey = ?1", params![key])?;
    Ok(())
}
