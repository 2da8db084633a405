//! Resource handles that count how often they are opened and closed

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vtbili_server::orchestrator::OrchestratorError;
use vtbili_server::platform::{PlatformClient, PlatformSettings};
use vtbili_server::store::{SqliteVideoStore, StoreResult, StoredDocument, VideoStore};
use vtbili_server::Resources;

#[derive(Debug, Default)]
pub struct HandleCounters {
    pub opens: AtomicUsize,
    pub store_closes: AtomicUsize,
}

impl HandleCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn store_closes(&self) -> usize {
        self.store_closes.load(Ordering::SeqCst)
    }
}

struct CountingStore {
    inner: SqliteVideoStore,
    counters: Arc<HandleCounters>,
}

impl VideoStore for CountingStore {
    fn upsert_document(&self, c: &str, d: &str, b: &JsonValue) -> StoreResult<()> {
        self.inner.upsert_document(c, d, b)
    }

    fn get_document(&self, c: &str, d: &str) -> StoreResult<Option<StoredDocument>> {
        self.inner.get_document(c, d)
    }

    fn list_documents(&self, c: &str) -> StoreResult<Vec<StoredDocument>> {
        self.inner.list_documents(c)
    }

    fn replace_collection(&self, c: &str, docs: &[(String, JsonValue)]) -> StoreResult<usize> {
        self.inner.replace_collection(c, docs)
    }

    fn last_synced(&self, c: &str) -> StoreResult<Option<DateTime<Utc>>> {
        self.inner.last_synced(c)
    }

    fn close(&self) -> StoreResult<()> {
        self.counters.store_closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Open an in-memory store and an unverified platform client, counting the
/// open and every store close.
pub async fn open_counted(counters: Arc<HandleCounters>) -> Result<Resources, OrchestratorError> {
    counters.opens.fetch_add(1, Ordering::SeqCst);

    let inner = SqliteVideoStore::open_in_memory()
        .map_err(|e| OrchestratorError::connection("store", e))?;
    let settings = PlatformSettings {
        verify_on_open: false,
        ..PlatformSettings::default()
    };
    let platform = PlatformClient::new(&settings)
        .map_err(|e| OrchestratorError::connection("platform client", e))?;

    Ok(Resources::new(
        Arc::new(CountingStore { inner, counters }),
        Arc::new(platform),
    ))
}

/// An open attempt against a store that cannot be reached.
pub async fn failing_open(counters: Arc<HandleCounters>) -> Result<Resources, OrchestratorError> {
    counters.opens.fetch_add(1, Ordering::SeqCst);
    Err(OrchestratorError::connection(
        "store",
        "unable to open database file",
    ))
}
