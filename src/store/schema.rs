//! SQLite schema for the video store.
//!
//! Versions are applied in order; the database records the last applied one
//! in `PRAGMA user_version`, offset by [`BASE_DB_VERSION`] so a foreign SQLite
//! file is never mistaken for a store.

use rusqlite::Connection;

pub const BASE_DB_VERSION: i64 = 99999;

pub struct SchemaVersion {
    pub version: i64,
    pub statements: &'static [&'static str],
}

// =============================================================================
// Version 1 - Documents
// =============================================================================

const DOCUMENTS_V1: &[&str] = &[
    "CREATE TABLE documents (
        collection TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (collection, doc_id)
    )",
];

// =============================================================================
// Version 2 - Collection sync markers
// =============================================================================

const COLLECTION_SYNC_V2: &[&str] = &[
    "CREATE TABLE collection_sync (
        collection TEXT PRIMARY KEY,
        synced_at TEXT NOT NULL,
        document_count INTEGER NOT NULL
    )",
    "CREATE INDEX idx_documents_updated ON documents (collection, updated_at DESC)",
];

pub const STORE_SCHEMAS: &[SchemaVersion] = &[
    SchemaVersion {
        version: 1,
        statements: DOCUMENTS_V1,
    },
    SchemaVersion {
        version: 2,
        statements: COLLECTION_SYNC_V2,
    },
];

pub fn latest_version() -> i64 {
    STORE_SCHEMAS.last().map(|s| s.version).unwrap_or(0)
}

/// Bring `conn` up to the latest schema. Returns the version it started from
/// (0 for a fresh database).
pub fn migrate(conn: &mut Connection) -> anyhow::Result<i64> {
    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let current = if raw_version == 0 {
        0
    } else {
        raw_version - BASE_DB_VERSION
    };

    if current < 0 || current > latest_version() {
        anyhow::bail!(
            "Store database version {} is not a known schema version",
            raw_version
        );
    }

    let tx = conn.transaction()?;
    for schema in STORE_SCHEMAS.iter().filter(|s| s.version > current) {
        for statement in schema.statements {
            tx.execute(statement, [])?;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + schema.version),
            [],
        )?;
    }
    tx.commit()?;

    Ok(current)
}
