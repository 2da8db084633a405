//! Scriptable jobs

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use vtbili_server::orchestrator::{JobError, RunResult};
use vtbili_server::{Job, JobContext};

/// Start instants of every run of a job.
#[derive(Debug, Clone, Default)]
pub struct LaunchLog(Arc<Mutex<Vec<Instant>>>);

impl LaunchLog {
    pub fn record(&self) {
        self.0.lock().unwrap().push(Instant::now());
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn instants(&self) -> Vec<Instant> {
        self.0.lock().unwrap().clone()
    }
}

/// Records each run, then stays busy for `busy`.
pub struct CountingJob {
    pub log: LaunchLog,
    pub busy: Duration,
}

impl CountingJob {
    pub fn new(busy: Duration) -> (Arc<Self>, LaunchLog) {
        let log = LaunchLog::default();
        (
            Arc::new(Self {
                log: log.clone(),
                busy,
            }),
            log,
        )
    }
}

#[async_trait]
impl Job for CountingJob {
    async fn run(&self, _ctx: &JobContext) -> RunResult {
        self.log.record();
        tokio::time::sleep(self.busy).await;
        Ok(())
    }
}

/// Fails on every run.
pub struct FailingJob {
    pub log: LaunchLog,
}

impl FailingJob {
    pub fn new() -> (Arc<Self>, LaunchLog) {
        let log = LaunchLog::default();
        (Arc::new(Self { log: log.clone() }), log)
    }
}

#[async_trait]
impl Job for FailingJob {
    async fn run(&self, _ctx: &JobContext) -> RunResult {
        self.log.record();
        Err(JobError::failed("upstream unavailable"))
    }
}

/// Ignores cancellation, stays busy for `busy` and then writes to the store.
/// The outcome of that write is kept in `late_write`.
pub struct BlockingJob {
    pub log: LaunchLog,
    pub busy: Duration,
    /// Return right away on the first (bootstrap) run.
    pub quick_first_run: bool,
    pub late_write: Arc<Mutex<Option<bool>>>,
}

impl BlockingJob {
    pub fn new(
        busy: Duration,
        quick_first_run: bool,
    ) -> (Arc<Self>, LaunchLog, Arc<Mutex<Option<bool>>>) {
        let log = LaunchLog::default();
        let late_write = Arc::new(Mutex::new(None));
        (
            Arc::new(Self {
                log: log.clone(),
                busy,
                quick_first_run,
                late_write: late_write.clone(),
            }),
            log,
            late_write,
        )
    }
}

#[async_trait]
impl Job for BlockingJob {
    async fn run(&self, ctx: &JobContext) -> RunResult {
        self.log.record();
        if self.quick_first_run && self.log.count() == 1 {
            return Ok(());
        }
        tokio::time::sleep(self.busy).await;
        let result = ctx
            .store
            .upsert_document("late", "doc", &serde_json::json!({}));
        *self.late_write.lock().unwrap() = Some(result.is_ok());
        result.map_err(JobError::failed)
    }
}
