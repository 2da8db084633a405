//! Periodic job orchestration.
//!
//! Startup opens the shared [`Resources`] and builds a [`JobRegistry`]; any
//! failure there is fatal and nothing runs. The [`Orchestrator`] then walks
//! through the [`Phase`]s: one concurrent bootstrap pass over every job, then
//! fixed-rate scheduling until the shutdown future resolves, then a bounded
//! drain and a single release of the handles.

mod bootstrap;
mod context;
mod error;
mod job;
mod lifecycle;
mod registry;
mod scheduler;
mod shutdown;

pub use bootstrap::{run_once_all, BootstrapPass, BootstrapReport};
pub use context::JobContext;
pub use error::{OrchestratorError, Result};
pub use job::{Job, JobError, RunOutcome, RunResult};
pub use lifecycle::{Lifecycle, Phase, PhaseError};
pub use registry::{JobDescriptor, JobRegistry, MAX_INTERVAL};
pub use scheduler::{
    create_scheduler, DrainReport, InFlight, OverlapPolicy, ScheduleEntry, ScheduleSnapshot,
    Scheduler, SchedulerHandle, SchedulerSettings,
};
pub use shutdown::{wait_for_signal, ShutdownCoordinator, ShutdownReport};

use crate::resources::Resources;
use std::future::Future;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What happened over the life of one [`Orchestrator::run`].
#[derive(Debug)]
pub struct RunSummary {
    pub bootstrap: BootstrapReport,
    /// False when shutdown was requested before the bootstrap pass finished.
    pub reached_steady_state: bool,
    /// Final state of every schedule entry. Empty if scheduling never began.
    pub schedule: Vec<ScheduleSnapshot>,
    pub shutdown: ShutdownReport,
}

impl RunSummary {
    /// Periodic launches of `name`, not counting the bootstrap run.
    pub fn launches(&self, name: &str) -> u64 {
        self.schedule
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.launches)
            .unwrap_or(0)
    }
}

pub struct Orchestrator {
    resources: Resources,
    registry: JobRegistry,
    settings: SchedulerSettings,
    lifecycle: Lifecycle,
    job_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(resources: Resources, registry: JobRegistry, settings: SchedulerSettings) -> Self {
        Self {
            resources,
            registry,
            settings,
            lifecycle: Lifecycle::new(),
            job_token: CancellationToken::new(),
        }
    }

    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.lifecycle.subscribe()
    }

    /// Run until `shutdown` resolves. Handles are closed exactly once before
    /// this returns.
    pub async fn run<F>(self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        let Self {
            resources,
            registry,
            settings,
            lifecycle,
            job_token,
        } = self;

        let coordinator = ShutdownCoordinator::new(settings.shutdown_grace, job_token.clone());
        let ctx = JobContext::new(job_token, resources.store(), resources.platform());
        tokio::pin!(shutdown);

        let mut bootstrap = BootstrapPass::start(&registry, &ctx);
        let interrupted = tokio::select! {
            _ = bootstrap.wait() => false,
            _ = &mut shutdown => true,
        };

        if interrupted {
            transition(&lifecycle, Phase::ShuttingDown);
            info!("Shutdown requested during first run");
            coordinator.request_cancellation();

            let grace = coordinator.grace();
            if tokio::time::timeout(grace, bootstrap.wait()).await.is_err() {
                warn!("First run still going after {:?}", grace);
            }
            let report = bootstrap.abandon();
            let detached = report.unfinished().len();

            let handles_closed = coordinator.release(&resources);
            transition(&lifecycle, Phase::Stopped);
            return RunSummary {
                bootstrap: report,
                reached_steady_state: false,
                schedule: Vec::new(),
                shutdown: ShutdownReport {
                    drained: DrainReport {
                        completed: 0,
                        detached,
                    },
                    handles_closed,
                },
            };
        }
        let report = bootstrap.finish();

        transition(&lifecycle, Phase::SteadyState);
        info!("Starting scheduler!");
        let (scheduler, handle) = create_scheduler(&registry, &settings, ctx);
        let scheduler_task = tokio::spawn(scheduler.run());

        (&mut shutdown).await;

        transition(&lifecycle, Phase::ShuttingDown);
        let shutdown_report = coordinator
            .shutdown(&handle, scheduler_task, &resources)
            .await;
        transition(&lifecycle, Phase::Stopped);

        RunSummary {
            bootstrap: report,
            reached_steady_state: true,
            schedule: handle.snapshot(),
            shutdown: shutdown_report,
        }
    }
}

fn transition(lifecycle: &Lifecycle, to: Phase) {
    if let Err(e) = lifecycle.advance(to) {
        error!("{}", e);
    }
}

/// Startup sequence: open the handles, register the jobs, then run.
///
/// A failure to open is returned before anything is registered. A failure to
/// register closes the freshly opened handles first. Either way no job runs.
pub async fn run_service<O, OF, R, S>(
    open: O,
    register: R,
    settings: SchedulerSettings,
    shutdown: S,
) -> Result<RunSummary>
where
    O: FnOnce() -> OF,
    OF: Future<Output = Result<Resources>>,
    R: FnOnce(&Resources) -> Result<JobRegistry>,
    S: Future<Output = ()>,
{
    info!("Opening shared resources");
    let resources = open().await?;

    info!("Adding jobs...");
    let registry = match register(&resources) {
        Ok(registry) => registry,
        Err(e) => {
            resources.close_all();
            return Err(e);
        }
    };
    info!(
        "Registered {} jobs: {}",
        registry.len(),
        registry.names().join(", ")
    );

    Ok(Orchestrator::new(resources, registry, settings)
        .run(shutdown)
        .await)
}
