use super::schema;
use super::{StoreError, StoreResult, StoredDocument, VideoStore};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// SQLite-backed [`VideoStore`].
///
/// A single connection behind a mutex; `None` once closed.
pub struct SqliteVideoStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteVideoStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        let path = db_path.as_ref();
        if !path.exists() {
            info!("Creating new store database at {:?}", path);
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open store database at {:?}", path))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory store")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> anyhow::Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to configure store connection")?;

        let from = schema::migrate(&mut conn).context("Failed to migrate store schema")?;
        if from != schema::latest_version() {
            info!(
                "Store schema migrated from version {} to {}",
                from,
                schema::latest_version()
            );
        }

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(StoreError::Closed),
        }
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, String)> {
        Ok((
            row.get("collection")?,
            row.get("doc_id")?,
            row.get("body")?,
            row.get("updated_at")?,
        ))
    }

    fn into_document(raw: (String, String, String, String)) -> StoreResult<StoredDocument> {
        let (collection, doc_id, body, updated_at) = raw;
        Ok(StoredDocument {
            collection,
            doc_id,
            body: serde_json::from_str(&body)?,
            updated_at: Self::parse_datetime(&updated_at),
        })
    }
}

impl VideoStore for SqliteVideoStore {
    fn upsert_document(
        &self,
        collection: &str,
        doc_id: &str,
        body: &JsonValue,
    ) -> StoreResult<()> {
        let body = serde_json::to_string(body)?;
        let now = Self::format_datetime(&Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, doc_id, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, doc_id) DO UPDATE SET body = ?3, updated_at = ?4",
                params![collection, doc_id, body, now],
            )?;
            Ok(())
        })
    }

    fn get_document(&self, collection: &str, doc_id: &str) -> StoreResult<Option<StoredDocument>> {
        let raw = self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    "SELECT collection, doc_id, body, updated_at FROM documents
                     WHERE collection = ?1 AND doc_id = ?2",
                    params![collection, doc_id],
                    Self::row_to_document,
                )
                .optional()?;
            Ok(raw)
        })?;
        raw.map(Self::into_document).transpose()
    }

    fn list_documents(&self, collection: &str) -> StoreResult<Vec<StoredDocument>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT collection, doc_id, body, updated_at FROM documents
                 WHERE collection = ?1 ORDER BY doc_id",
            )?;
            let rows = stmt
                .query_map(params![collection], Self::row_to_document)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(Self::into_document).collect()
    }

    fn replace_collection(
        &self,
        collection: &str,
        documents: &[(String, JsonValue)],
    ) -> StoreResult<usize> {
        let encoded = documents
            .iter()
            .map(|(id, body)| Ok((id.as_str(), serde_json::to_string(body)?)))
            .collect::<StoreResult<Vec<_>>>()?;
        let now = Self::format_datetime(&Utc::now());

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM documents WHERE collection = ?1",
                params![collection],
            )?;
            for (doc_id, body) in &encoded {
                tx.execute(
                    "INSERT OR REPLACE INTO documents (collection, doc_id, body, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![collection, doc_id, body, now],
                )?;
            }
            tx.execute(
                "INSERT INTO collection_sync (collection, synced_at, document_count)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection) DO UPDATE SET synced_at = ?2, document_count = ?3",
                params![collection, now, encoded.len() as i64],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        debug!(
            "Replaced collection {} with {} documents",
            collection,
            encoded.len()
        );
        Ok(encoded.len())
    }

    fn last_synced(&self, collection: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let raw: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT synced_at FROM collection_sync WHERE collection = ?1",
                    params![collection],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        Ok(raw.as_deref().map(Self::parse_datetime))
    }

    fn close(&self) -> StoreResult<()> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        match guard.take() {
            Some(conn) => {
                conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
                info!("Store connection closed");
                Ok(())
            }
            None => Err(StoreError::Closed),
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }
}
