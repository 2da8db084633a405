//! Persistent store shared by every collector job.

mod schema;
mod sqlite_video_store;

pub use schema::{BASE_DB_VERSION, STORE_SCHEMAS};
pub use sqlite_video_store::SqliteVideoStore;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store is closed")]
    Closed,

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid document body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store connection lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A JSON document stored under `(collection, doc_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub collection: String,
    pub doc_id: String,
    pub body: JsonValue,
    pub updated_at: DateTime<Utc>,
}

/// Document store handle.
///
/// Implementations must be safe for concurrent use by many jobs; the
/// orchestrator holds one instance per process and never locks around it.
pub trait VideoStore: Send + Sync {
    /// Insert or overwrite a single document.
    fn upsert_document(&self, collection: &str, doc_id: &str, body: &JsonValue)
        -> StoreResult<()>;

    fn get_document(&self, collection: &str, doc_id: &str) -> StoreResult<Option<StoredDocument>>;

    /// All documents of a collection ordered by `doc_id`.
    fn list_documents(&self, collection: &str) -> StoreResult<Vec<StoredDocument>>;

    /// Atomically replace the whole content of a collection.
    /// Returns the number of documents written.
    fn replace_collection(
        &self,
        collection: &str,
        documents: &[(String, JsonValue)],
    ) -> StoreResult<usize>;

    /// When the collection was last replaced, if ever.
    fn last_synced(&self, collection: &str) -> StoreResult<Option<DateTime<Utc>>>;

    /// Release the underlying connection. Further calls fail with
    /// [`StoreError::Closed`].
    fn close(&self) -> StoreResult<()>;

    fn is_closed(&self) -> bool;
}
