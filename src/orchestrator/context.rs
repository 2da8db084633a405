use crate::platform::PlatformClient;
use crate::resources::Resources;
use crate::store::VideoStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// Every invocation receives the same store and platform handles; the
/// orchestrator never creates a second instance of either.
#[derive(Clone)]
pub struct JobContext {
    /// Cancelled once shutdown begins.
    pub cancellation_token: CancellationToken,

    /// Shared persistent store.
    pub store: Arc<dyn VideoStore>,

    /// Shared platform API client.
    pub platform: Arc<PlatformClient>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        store: Arc<dyn VideoStore>,
        platform: Arc<PlatformClient>,
    ) -> Self {
        Self {
            cancellation_token,
            store,
            platform,
        }
    }

    /// Context over the handles of `resources` with a fresh cancellation token.
    pub fn for_resources(resources: &Resources) -> Self {
        Self::new(
            CancellationToken::new(),
            resources.store(),
            resources.platform(),
        )
    }

    /// Check if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
