//! vtbili collector service library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod datasets;
pub mod jobs;
pub mod orchestrator;
pub mod platform;
pub mod resources;
pub mod store;

// Re-export commonly used types for convenience
pub use orchestrator::{run_service, Job, JobContext, JobRegistry, Orchestrator, RunSummary};
pub use resources::{ResourceKind, Resources};
pub use store::{SqliteVideoStore, VideoStore};
