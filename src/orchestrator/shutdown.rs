use super::scheduler::{DrainReport, InFlight, SchedulerHandle};
use crate::resources::Resources;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Resolve once the process is asked to terminate (Ctrl+C, or SIGTERM on unix).
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping everything..."),
        _ = terminate => info!("Received SIGTERM, stopping everything..."),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drained: DrainReport,
    /// Handles closed by this shutdown. Zero if something closed them first.
    pub handles_closed: usize,
}

/// Stops scheduling, gives in-flight runs a bounded grace period and releases
/// the shared handles.
pub struct ShutdownCoordinator {
    grace: Duration,
    job_token: CancellationToken,
}

impl ShutdownCoordinator {
    /// `job_token` is the parent of every token handed to a job.
    pub fn new(grace: Duration, job_token: CancellationToken) -> Self {
        Self { grace, job_token }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Ask running jobs to wrap up. Jobs that ignore it keep running.
    pub fn request_cancellation(&self) {
        if !self.job_token.is_cancelled() {
            info!("Asking running jobs to stop");
            self.job_token.cancel();
        }
    }

    /// Close every handle. Safe to call more than once.
    pub fn release(&self, resources: &Resources) -> usize {
        resources.close_all()
    }

    pub async fn shutdown(
        &self,
        scheduler: &SchedulerHandle,
        scheduler_task: JoinHandle<InFlight>,
        resources: &Resources,
    ) -> ShutdownReport {
        scheduler.stop();
        let in_flight = match scheduler_task.await {
            Ok(in_flight) => Some(in_flight),
            Err(e) => {
                error!("Scheduler task ended abnormally: {}", e);
                None
            }
        };

        self.request_cancellation();
        let drained = match in_flight {
            Some(in_flight) => in_flight.drain(self.grace).await,
            None => DrainReport::default(),
        };

        let handles_closed = self.release(resources);
        info!("Scheduler stopped.");
        ShutdownReport {
            drained,
            handles_closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::context::JobContext;
    use crate::orchestrator::job::{Job, JobError, RunResult};
    use crate::orchestrator::registry::JobRegistry;
    use crate::orchestrator::scheduler::{create_scheduler, SchedulerSettings};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Waits for cancellation, then returns.
    struct CooperativeJob;

    #[async_trait]
    impl Job for CooperativeJob {
        async fn run(&self, ctx: &JobContext) -> RunResult {
            ctx.cancellation_token.cancelled().await;
            Err(JobError::Cancelled)
        }
    }

    /// Ignores cancellation.
    struct StubbornJob;

    #[async_trait]
    impl Job for StubbornJob {
        async fn run(&self, _ctx: &JobContext) -> RunResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    async fn shutdown_with(job: Arc<dyn Job>) -> (ShutdownReport, Duration, Resources) {
        let resources = Resources::in_memory().unwrap();
        let job_token = CancellationToken::new();
        let ctx = JobContext::new(job_token.clone(), resources.store(), resources.platform());

        let mut registry = JobRegistry::for_resources(&resources);
        registry.register("job", Duration::from_secs(10), job).unwrap();
        let (scheduler, handle) = create_scheduler(&registry, &SchedulerSettings::default(), ctx);
        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_secs(15)).await;

        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30), job_token);
        let started = tokio::time::Instant::now();
        let report = coordinator.shutdown(&handle, task, &resources).await;
        (report, started.elapsed(), resources)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_jobs_finish_within_grace() {
        let (report, elapsed, resources) = shutdown_with(Arc::new(CooperativeJob)).await;

        assert_eq!(report.drained.completed, 1);
        assert_eq!(report.drained.detached, 0);
        assert_eq!(report.handles_closed, 2);
        assert!(elapsed < Duration::from_secs(1));
        assert!(resources.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_jobs_are_left_behind_after_grace() {
        let (report, elapsed, resources) = shutdown_with(Arc::new(StubbornJob)).await;

        assert_eq!(report.drained.detached, 1);
        assert_eq!(report.handles_closed, 2);
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
        assert!(resources.store().is_closed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_resolves_wait_for_signal() {
        use tokio::signal::unix::{signal, SignalKind};

        // Keep a handler installed so the signal never takes the test process down.
        let _guard = signal(SignalKind::terminate()).unwrap();
        let waiter = tokio::spawn(wait_for_signal());
        let pid = std::process::id().to_string();

        let resolved = tokio::time::timeout(Duration::from_secs(5), async {
            while !waiter.is_finished() {
                std::process::Command::new("kill")
                    .args(["-TERM", &pid])
                    .status()
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        assert!(resolved.is_ok(), "SIGTERM did not resolve wait_for_signal");
        waiter.await.unwrap();
    }
}
