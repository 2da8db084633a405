//! Process-wide resource lifecycle.
//!
//! [`Resources`] owns the long-lived handles every job shares. It is opened
//! once at startup, handed around behind an `Arc`, and closed exactly once:
//! either explicitly by the shutdown path or, failing that, when dropped.

use crate::config::AppConfig;
use crate::orchestrator::OrchestratorError;
use crate::platform::{PlatformClient, PlatformSettings};
use crate::store::{SqliteVideoStore, VideoStore};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Kinds of shared handles a job can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Store,
    Platform,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Store => write!(f, "store"),
            ResourceKind::Platform => write!(f, "platform"),
        }
    }
}

pub struct Resources {
    store: Arc<dyn VideoStore>,
    platform: Arc<PlatformClient>,
    closed: AtomicBool,
}

impl Resources {
    pub fn new(store: Arc<dyn VideoStore>, platform: Arc<PlatformClient>) -> Self {
        Self {
            store,
            platform,
            closed: AtomicBool::new(false),
        }
    }

    /// Open every handle described by `config`. The store is opened first; if
    /// the platform client then fails, the store is released before returning.
    pub async fn open(config: &AppConfig) -> Result<Self, OrchestratorError> {
        info!("Opening store {:?}", config.store_location());
        let store: Arc<dyn VideoStore> = match config.store_location() {
            None => Arc::new(
                SqliteVideoStore::open_in_memory()
                    .map_err(|e| OrchestratorError::connection("store", format!("{:#}", e)))?,
            ),
            Some(path) => Arc::new(
                SqliteVideoStore::open(&path)
                    .map_err(|e| OrchestratorError::connection("store", format!("{:#}", e)))?,
            ),
        };
        info!("Store opened");

        info!("Opening platform client");
        let platform = match PlatformClient::open(&config.platform).await {
            Ok(platform) => Arc::new(platform),
            Err(e) => {
                if let Err(close_err) = store.close() {
                    warn!("Failed to close store after startup failure: {}", close_err);
                }
                return Err(e);
            }
        };

        Ok(Self::new(store, platform))
    }

    /// In-memory store plus an unverified client pointed at the default
    /// endpoints. Used for dry runs and tests.
    pub fn in_memory() -> Result<Self, OrchestratorError> {
        let store = SqliteVideoStore::open_in_memory()
            .map_err(|e| OrchestratorError::connection("store", format!("{:#}", e)))?;
        let settings = PlatformSettings {
            verify_on_open: false,
            ..PlatformSettings::default()
        };
        let platform = PlatformClient::new(&settings)
            .map_err(|e| OrchestratorError::connection("platform client", e))?;
        Ok(Self::new(Arc::new(store), Arc::new(platform)))
    }

    pub fn store(&self) -> Arc<dyn VideoStore> {
        Arc::clone(&self.store)
    }

    pub fn platform(&self) -> Arc<PlatformClient> {
        Arc::clone(&self.platform)
    }

    /// Every kind this set provides.
    pub fn kinds(&self) -> &'static [ResourceKind] {
        &[ResourceKind::Store, ResourceKind::Platform]
    }

    pub fn provides(&self, kind: ResourceKind) -> bool {
        self.kinds().contains(&kind)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every handle. Only the first call does anything; it returns the
    /// number of handles it closed, later calls return 0.
    pub fn close_all(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let mut closed = 0;
        match self.store.close() {
            Ok(()) => closed += 1,
            Err(e) => error!("Failed to close store: {}", e),
        }
        match self.platform.close() {
            Ok(()) => closed += 1,
            Err(e) => error!("Failed to close platform client: {}", e),
        }
        info!("Released {} resource handle(s)", closed);
        closed
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!("Resources dropped while open, closing now");
            self.close_all();
        }
    }
}
