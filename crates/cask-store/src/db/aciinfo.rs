use anyhow::{anyhow, Result};
use rusqlite::{params, Row, Transaction};

/// Metadata row describing one stored image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ACIInfo {
    /// Content key; the image's primary identity.
    pub blob_key: String,
    pub app_name: String,
    /// Milliseconds since the Unix epoch.
    pub import_time: i64,
    /// Set when the image was fetched without a pinned version.
    pub latest: bool,
}

const COLUMNS: &str = "blobkey, appname, importtime, latest";
const SORTABLE: [&str; 4] = ["blobkey", "appname", "importtime", "latest"];

fn from_row(row: &Row<'_>) -> rusqlite::Result<ACIInfo> {
    Ok(ACIInfo {
        blob_key: row.get(0)?,
        app_name: row.get(1)?,
        import_time: row.get(2)?,
        latest: row.get(3)?,
    })
}

/// Upsert keyed by `blob_key`.
pub(crate) fn write(tx: &Transaction<'_>, info: &ACIInfo) -> Result<()> {
    tx.execute(
        "INSERT INTO aciinfo (blobkey, appname, importtime, latest) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(blobkey) DO UPDATE SET \
         appname = excluded.appname, \
         importtime = excluded.importtime, \
         latest = excluded.latest",
        params![info.blob_key, info.app_name, info.import_time, info.latest],
    )?;
    Ok(())
}

pub(crate) fn get_by_blob_key(tx: &Transaction<'_>, key: &str) -> Result<Option<ACIInfo>> {
    let mut stmt = tx.prepare(&format!("SELECT {COLUMNS} FROM aciinfo WHERE blobkey = ?1"))?;
    let mut rows = stmt.query_map(params![key], from_row)?;
    Ok(rows.next().transpose()?)
}

/// Byte-prefix match on the content key.
pub(crate) fn get_by_key_prefix(tx: &Transaction<'_>, prefix: &str) -> Result<Vec<ACIInfo>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {COLUMNS} FROM aciinfo WHERE blobkey LIKE ?1"
    ))?;
    let rows = stmt
        .query_map(params![format!("{prefix}%")], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn get_by_app_name(tx: &Transaction<'_>, name: &str) -> Result<Vec<ACIInfo>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {COLUMNS} FROM aciinfo WHERE appname = ?1"
    ))?;
    let rows = stmt
        .query_map(params![name], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// All rows, ordered by the given whitelisted columns.
pub(crate) fn get_all(
    tx: &Transaction<'_>,
    sort_fields: &[&str],
    ascending: bool,
) -> Result<Vec<ACIInfo>> {
    let mut query = format!("SELECT {COLUMNS} FROM aciinfo");
    if !sort_fields.is_empty() {
        for field in sort_fields {
            if !SORTABLE.contains(field) {
                return Err(anyhow!("unknown aciinfo sort field {field:?}"));
            }
        }
        query.push_str(" ORDER BY ");
        query.push_str(&sort_fields.join(", "));
        query.push_str(if ascending { " ASC" } else { " DESC" });
    }
    let mut stmt = tx.prepare(&query)?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn remove(tx: &Transaction<'_>, key: &str) -> Result<()> {
    tx.execute("DELETE FROM aciinfo WHERE blobkey = ?1", params![key])?;
    Ok(())
}
