use super::context::JobContext;
use crate::resources::ResourceKind;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use thiserror::Error;

/// Errors a job body can report. The orchestrator records them and moves on;
/// it never interprets the payload.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        JobError::ExecutionFailed(err.to_string())
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::ExecutionFailed(format!("{:#}", err))
    }
}

/// Outcome of a single execution.
pub type RunResult = Result<(), JobError>;

/// Last observed state of a job, as tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    NeverRun,
    InProgress,
    Succeeded,
    Failed(String),
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::NeverRun => "never_run",
            RunOutcome::InProgress => "in_progress",
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed(_) => "failed",
        }
    }
}

impl From<&RunResult> for RunOutcome {
    fn from(result: &RunResult) -> Self {
        match result {
            Ok(()) => RunOutcome::Succeeded,
            Err(e) => RunOutcome::Failed(e.to_string()),
        }
    }
}

/// A unit of recurring work.
///
/// The struct implementing this trait owns its static arguments (dataset
/// paths, API keys, pre-loaded mappings). Shared handles arrive through the
/// [`JobContext`] on every invocation. Retries and backoff are the job's own
/// business.
#[async_trait]
pub trait Job: Send + Sync {
    /// Handles this job needs. Registration fails if one of them is not open.
    fn resources(&self) -> &'static [ResourceKind] {
        &[ResourceKind::Store]
    }

    /// Execute the job once.
    ///
    /// Long-running bodies should check `ctx.is_cancelled()` between steps and
    /// return `JobError::Cancelled` once shutdown has begun.
    async fn run(&self, ctx: &JobContext) -> RunResult;
}

/// Run a job body, turning a panic into `JobError::Panicked`.
pub(crate) async fn invoke(job: &dyn Job, ctx: &JobContext) -> RunResult {
    match AssertUnwindSafe(job.run(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            Err(JobError::Panicked(message))
        }
    }
}
