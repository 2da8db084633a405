//! First pass over every registered job, before periodic scheduling starts.

use super::context::JobContext;
use super::job::{self, JobError, RunResult};
use super::registry::JobRegistry;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Result of the bootstrap pass, one entry per finished job in registration
/// order.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    results: Vec<(String, RunResult)>,
    /// Jobs still running when the pass was abandoned.
    unfinished: Vec<String>,
}

impl BootstrapReport {
    pub fn get(&self, name: &str) -> Option<&RunResult> {
        self.results
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, result)| result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RunResult)> {
        self.results.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Names of the jobs left running by [`BootstrapPass::abandon`].
    pub fn unfinished(&self) -> &[String] {
        &self.unfinished
    }
}

/// A bootstrap pass in progress: one task per registered job.
pub struct BootstrapPass {
    names: Vec<String>,
    results: Vec<Option<RunResult>>,
    running: JoinSet<(usize, RunResult)>,
    started: Instant,
}

impl BootstrapPass {
    /// Spawn every registered job once, concurrently.
    pub fn start(registry: &JobRegistry, ctx: &JobContext) -> Self {
        info!("Doing first run of {} jobs", registry.len());
        let mut running = JoinSet::new();
        let mut names = Vec::with_capacity(registry.len());

        for (index, descriptor) in registry.iter().enumerate() {
            let descriptor = Arc::clone(descriptor);
            let ctx = ctx.clone();
            names.push(descriptor.name().to_string());
            running.spawn(async move {
                let job = descriptor.job();
                (index, job::invoke(job.as_ref(), &ctx).await)
            });
        }

        Self {
            results: names.iter().map(|_| None).collect(),
            names,
            running,
            started: Instant::now(),
        }
    }

    /// Wait until every job has finished. Cancel safe: results collected
    /// before the future is dropped are kept.
    pub async fn wait(&mut self) {
        while let Some(joined) = self.running.join_next().await {
            match joined {
                Ok((index, result)) => self.record(index, result),
                Err(e) => error!("First run task failed: {}", e),
            }
        }
    }

    fn record(&mut self, index: usize, result: RunResult) {
        let Some(name) = self.names.get(index) else {
            return;
        };
        match &result {
            Ok(()) => info!(job = %name, "First run completed"),
            Err(JobError::Cancelled) => warn!(job = %name, "First run cancelled"),
            Err(e) => error!(job = %name, "First run failed: {}", e),
        }
        self.results[index] = Some(result);
    }

    /// Report after [`wait`](Self::wait) returned. A job whose task ended
    /// without a result is reported as panicked.
    pub fn finish(mut self) -> BootstrapReport {
        let report = self.report(|| {
            Some(Err(JobError::Panicked(
                "task ended without a result".to_string(),
            )))
        });
        info!(
            "First run finished in {:?}: {} succeeded, {} failed",
            self.started.elapsed(),
            report.succeeded(),
            report.failed()
        );
        report
    }

    /// Report what finished so far and leave the other runs in the background.
    pub fn abandon(mut self) -> BootstrapReport {
        let report = self.report(|| None);
        if !report.unfinished.is_empty() {
            warn!(
                "Leaving {} first run(s) behind: {}",
                report.unfinished.len(),
                report.unfinished.join(", ")
            );
        }
        report
    }

    fn report(&mut self, missing: impl Fn() -> Option<RunResult>) -> BootstrapReport {
        self.running.detach_all();
        let mut report = BootstrapReport::default();
        for (name, result) in self.names.drain(..).zip(self.results.drain(..)) {
            match result.or_else(&missing) {
                Some(result) => report.results.push((name, result)),
                None => report.unfinished.push(name),
            }
        }
        report
    }
}

impl Drop for BootstrapPass {
    fn drop(&mut self) {
        // Dropping a JoinSet aborts its tasks; a first run is never aborted.
        self.running.detach_all();
    }
}

/// Run every registered job exactly once, concurrently, and wait for all of
/// them. A failing or panicking job does not affect its siblings.
pub async fn run_once_all(registry: &JobRegistry, ctx: &JobContext) -> BootstrapReport {
    let mut pass = BootstrapPass::start(registry, ctx);
    pass.wait().await;
    pass.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::job::Job;
    use crate::resources::Resources;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct SleepyJob {
        delay: Duration,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Job for SleepyJob {
        async fn run(&self, _ctx: &JobContext) -> RunResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(JobError::failed("upstream returned 500"))
            } else {
                Ok(())
            }
        }
    }

    struct PanickingJob;

    #[async_trait]
    impl Job for PanickingJob {
        async fn run(&self, _ctx: &JobContext) -> RunResult {
            panic!("dataset missing field");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_job_runs_once_concurrently() {
        let resources = Resources::in_memory().unwrap();
        let ctx = JobContext::for_resources(&resources);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut registry = JobRegistry::for_resources(&resources);
        for (name, secs, fail) in [("a", 10, false), ("b", 10, true), ("c", 10, false)] {
            registry
                .register(
                    name,
                    Duration::from_secs(60),
                    Arc::new(SleepyJob {
                        delay: Duration::from_secs(secs),
                        calls: calls.clone(),
                        fail,
                    }),
                )
                .unwrap();
        }
        registry
            .register("d", Duration::from_secs(60), Arc::new(PanickingJob))
            .unwrap();

        let started = Instant::now();
        let report = run_once_all(&registry, &ctx).await;

        // Concurrent: three 10s jobs complete in 10s, not 30s.
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.len(), 4);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 2);
        assert!(report.get("b").unwrap().is_err());
        assert!(matches!(report.get("d"), Some(Err(JobError::Panicked(_)))));

        let names: Vec<_> = report.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    /// Sleeps, then raises `done`. Ignores cancellation.
    struct StragglerJob {
        delay: Duration,
        done: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Job for StragglerJob {
        async fn run(&self, _ctx: &JobContext) -> RunResult {
            tokio::time::sleep(self.delay).await;
            self.done.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_pass_keeps_finished_results() {
        let resources = Resources::in_memory().unwrap();
        let ctx = JobContext::for_resources(&resources);
        let quick_done = Arc::new(AtomicBool::new(false));
        let slow_done = Arc::new(AtomicBool::new(false));

        let mut registry = JobRegistry::for_resources(&resources);
        registry
            .register(
                "hololive_upcoming",
                Duration::from_secs(240),
                Arc::new(StragglerJob {
                    delay: Duration::from_secs(1),
                    done: quick_done.clone(),
                }),
            )
            .unwrap();
        registry
            .register(
                "channel_stats",
                Duration::from_secs(21600),
                Arc::new(StragglerJob {
                    delay: Duration::from_secs(3600),
                    done: slow_done.clone(),
                }),
            )
            .unwrap();

        let mut pass = BootstrapPass::start(&registry, &ctx);
        let waited = tokio::time::timeout(Duration::from_secs(10), pass.wait()).await;
        assert!(waited.is_err());
        let report = pass.abandon();

        assert_eq!(report.len(), 1);
        assert!(report.get("hololive_upcoming").unwrap().is_ok());
        assert!(report.get("channel_stats").is_none());
        assert_eq!(report.unfinished(), ["channel_stats".to_string()]);
        assert!(quick_done.load(Ordering::SeqCst));

        // Left behind, not aborted.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(slow_done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let resources = Resources::in_memory().unwrap();
        let ctx = JobContext::for_resources(&resources);
        let registry = JobRegistry::for_resources(&resources);

        let report = run_once_all(&registry, &ctx).await;
        assert!(report.is_empty());
    }
}
