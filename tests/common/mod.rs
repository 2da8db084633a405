//! Common test infrastructure
//!
//! Counted resource handles and scriptable jobs for the orchestration tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{open_counted, CountingJob, HandleCounters};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_something() {
//!     let counters = HandleCounters::new();
//!     let resources = open_counted(counters.clone()).await.unwrap();
//!     // register jobs, run the orchestrator...
//! }
//! ```

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

mod constants;
mod fixtures;
mod jobs;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{failing_open, open_counted, HandleCounters};
#[allow(unused_imports)]
pub use jobs::{BlockingJob, CountingJob, FailingJob, LaunchLog};
