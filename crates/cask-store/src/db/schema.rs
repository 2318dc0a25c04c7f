//! Schema creation and forward migration.
//!
//! The `version` table holds a single row. A store created today is at
//! [`DB_VERSION`]; opening an older store runs the migration steps from
//! `stored + 1` through the target, each step bumping the recorded version.
//! Downgrades are unsupported and fail the open.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Transaction};

use crate::StoreError;

pub(crate) const DB_VERSION: i64 = 2;

// Current (v2) schema.
const CREATE_STMTS: &str = r#"
CREATE TABLE version (
    version INTEGER NOT NULL
);
CREATE TABLE aciinfo (
    blobkey TEXT PRIMARY KEY,
    appname TEXT NOT NULL,
    importtime INTEGER NOT NULL,
    latest INTEGER NOT NULL
);
CREATE INDEX idx_aciinfo_appname ON aciinfo (appname);
CREATE TABLE remote (
    aciurl TEXT PRIMARY KEY,
    sigurl TEXT NOT NULL DEFAULT '',
    blobkey TEXT NOT NULL,
    etag TEXT NOT NULL DEFAULT '',
    lastcheck INTEGER NOT NULL DEFAULT 0
);
"#;

/// Whether the schema tables already exist.
pub(crate) fn is_populated(tx: &Transaction<'_>) -> Result<bool> {
    let found = tx
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'version'",
            [],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Create the current schema in an empty database.
pub(crate) fn create_schema(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(CREATE_STMTS)?;
    tx.execute("INSERT INTO version (version) VALUES (?1)", params![DB_VERSION])?;
    Ok(())
}

pub(crate) fn get_version(tx: &Transaction<'_>) -> Result<i64> {
    let version = tx.query_row("SELECT version FROM version", [], |row| row.get(0))?;
    Ok(version)
}

fn set_version(tx: &Transaction<'_>, version: i64) -> Result<()> {
    tx.execute("UPDATE version SET version = ?1", params![version])?;
    Ok(())
}

/// Run the migration steps from the stored version up to `to`. A no-op when
/// the store is already at `to` (another process may have migrated between
/// the version check and this call).
pub(crate) fn migrate(tx: &Transaction<'_>, to: i64) -> Result<()> {
    let from = get_version(tx)?;
    if from > to {
        return Err(StoreError::Migration(format!(
            "stored db version {from} is newer than the supported version {to}"
        ))
        .into());
    }
    for version in (from + 1)..=to {
        match version {
            2 => migrate_to_v2(tx)?,
            _ => {
                return Err(StoreError::Migration(format!(
                    "no migration step for version {version}"
                ))
                .into())
            }
        }
        set_version(tx, version)?;
    }
    Ok(())
}

// v1 -> v2: remote rows gain fetch-provenance fields.
fn migrate_to_v2(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
        ALTER TABLE remote ADD COLUMN etag TEXT NOT NULL DEFAULT '';
        ALTER TABLE remote ADD COLUMN lastcheck INTEGER NOT NULL DEFAULT 0;
        "#,
    )?;
    Ok(())
}

/// The v1 schema, kept for migration tests.
#[cfg(test)]
pub(crate) fn create_schema_v1(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE version (
            version INTEGER NOT NULL
        );
        CREATE TABLE aciinfo (
            blobkey TEXT PRIMARY KEY,
            appname TEXT NOT NULL,
            importtime INTEGER NOT NULL,
            latest INTEGER NOT NULL
        );
        CREATE INDEX idx_aciinfo_appname ON aciinfo (appname);
        CREATE TABLE remote (
            aciurl TEXT PRIMARY KEY,
            sigurl TEXT NOT NULL DEFAULT '',
            blobkey TEXT NOT NULL
        );
        "#,
    )?;
    tx.execute("INSERT INTO version (version) VALUES (1)", [])?;
    Ok(())
}
