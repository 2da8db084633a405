//! Steady-state scheduling.
//!
//! Every registered job gets a [`ScheduleEntry`]. The scheduler sleeps until the
//! earliest `next_fire`, launches every due job into a [`JoinSet`] without
//! waiting for it, and advances the entry by exactly one interval from the
//! previous slot (fixed rate). Completions are collected in the same loop and
//! recorded on the entry.
//!
//! When a slot is observed more than one interval late, the missed slots are
//! coalesced: the job fires once and `next_fire` jumps to the first slot after
//! now, so the original phase is kept.

use super::context::JobContext;
use super::error::OrchestratorError;
use super::job::{self, JobError, RunOutcome, RunResult};
use super::registry::{JobDescriptor, JobRegistry};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What to do when a job is due while a previous run of it is still going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Launch anyway. Runs of the same job may overlap.
    #[default]
    Allow,
    /// Skip the tick and log it.
    Skip,
}

impl OverlapPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapPolicy::Allow => "allow",
            OverlapPolicy::Skip => "skip",
        }
    }
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverlapPolicy {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(OverlapPolicy::Allow),
            "skip" => Ok(OverlapPolicy::Skip),
            other => Err(OrchestratorError::config(format!(
                "Unknown overlap policy {:?}, expected \"allow\" or \"skip\"",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// How long shutdown waits for in-flight runs before closing handles.
    pub shutdown_grace: Duration,
    pub overlap: OverlapPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(30),
            overlap: OverlapPolicy::Allow,
        }
    }
}

/// Point-in-time copy of a [`ScheduleEntry`].
#[derive(Debug, Clone)]
pub struct ScheduleSnapshot {
    pub name: String,
    pub interval: Duration,
    pub next_fire: Instant,
    /// Slot of the most recent launch.
    pub last_fire: Option<Instant>,
    pub launches: u64,
    /// Ticks dropped by [`OverlapPolicy::Skip`].
    pub skipped: u64,
    /// Overdue slots folded into a single run.
    pub coalesced: u64,
    pub in_flight: usize,
    pub last_outcome: RunOutcome,
}

/// How far ahead a deadline that cannot be represented is parked.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `base + offset`, or a deadline far enough ahead to never fire when the
/// sum does not fit in an `Instant`.
fn deadline_after(base: Instant, offset: Duration) -> Instant {
    base.checked_add(offset)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

/// Runtime state of one job. Only the scheduler mutates it.
pub struct ScheduleEntry {
    descriptor: Arc<JobDescriptor>,
    next_fire: Instant,
    last_fire: Option<Instant>,
    launches: u64,
    skipped: u64,
    coalesced: u64,
    running: Arc<AtomicUsize>,
    last_outcome: RunOutcome,
}

impl ScheduleEntry {
    /// First periodic slot is one interval after `start`; the bootstrap pass
    /// stands in for the slot at `start` itself.
    pub fn new(descriptor: Arc<JobDescriptor>, start: Instant) -> Self {
        let next_fire = deadline_after(start, descriptor.interval());
        Self {
            descriptor,
            next_fire,
            last_fire: None,
            launches: 0,
            skipped: 0,
            coalesced: 0,
            running: Arc::new(AtomicUsize::new(0)),
            last_outcome: RunOutcome::NeverRun,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn next_fire(&self) -> Instant {
        self.next_fire
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_fire <= now
    }

    pub fn in_flight(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Move past the current slot. Returns how many later slots were already
    /// in the past and got coalesced.
    pub fn advance(&mut self, now: Instant) -> u64 {
        let interval = self.descriptor.interval();
        let mut next = deadline_after(self.next_fire, interval);
        let mut dropped = 0;

        if next <= now {
            let behind = now.duration_since(next);
            let slots = behind.as_nanos() / interval.as_nanos() + 1;
            let slots = u32::try_from(slots).unwrap_or(u32::MAX);
            next = match interval.checked_mul(slots) {
                Some(skip) => deadline_after(next, skip),
                None => deadline_after(now, FAR_FUTURE),
            };
            dropped = u64::from(slots);
        }

        self.next_fire = next;
        self.coalesced += dropped;
        dropped
    }

    pub fn snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            name: self.descriptor.name().to_string(),
            interval: self.descriptor.interval(),
            next_fire: self.next_fire,
            last_fire: self.last_fire,
            launches: self.launches,
            skipped: self.skipped,
            coalesced: self.coalesced,
            in_flight: self.in_flight(),
            last_outcome: self.last_outcome.clone(),
        }
    }
}

/// Decrements the entry's in-flight counter when the run ends, however it ends.
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Completion {
    index: usize,
    tick: u64,
    result: RunResult,
    elapsed: Duration,
}

type Published = Arc<RwLock<Vec<ScheduleSnapshot>>>;

fn publish(published: &Published, entries: &[ScheduleEntry]) {
    let snapshot = entries.iter().map(ScheduleEntry::snapshot).collect();
    match published.write() {
        Ok(mut guard) => *guard = snapshot,
        Err(poisoned) => *poisoned.into_inner() = snapshot,
    }
}

fn record_completion(entries: &mut [ScheduleEntry], joined: Result<Completion, JoinError>) {
    let completion = match joined {
        Ok(completion) => completion,
        Err(e) => {
            error!("Scheduled job task failed: {}", e);
            return;
        }
    };

    let Some(entry) = entries.get_mut(completion.index) else {
        return;
    };
    entry.last_outcome = RunOutcome::from(&completion.result);

    let name = entry.name();
    match &completion.result {
        Ok(()) => info!(
            job = %name,
            tick = completion.tick,
            "Job completed successfully in {:?}",
            completion.elapsed
        ),
        Err(JobError::Cancelled) => info!(
            job = %name,
            tick = completion.tick,
            "Job was cancelled after {:?}",
            completion.elapsed
        ),
        Err(e) => error!(
            job = %name,
            tick = completion.tick,
            "Job failed after {:?}: {}",
            completion.elapsed,
            e
        ),
    }
}

/// Handle for stopping the scheduler and reading its state.
#[derive(Clone)]
pub struct SchedulerHandle {
    stop_token: CancellationToken,
    published: Published,
}

impl SchedulerHandle {
    /// Stop launching new ticks. Runs already launched are left alone.
    pub fn stop(&self) {
        if !self.stop_token.is_cancelled() {
            info!("Stopping scheduler");
            self.stop_token.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_token.is_cancelled()
    }

    /// Entries as of the last scheduler iteration, in registration order.
    pub fn snapshot(&self) -> Vec<ScheduleSnapshot> {
        match self.published.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn launches(&self, name: &str) -> Option<u64> {
        self.snapshot()
            .into_iter()
            .find(|s| s.name == name)
            .map(|s| s.launches)
    }
}

pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
    overlap: OverlapPolicy,
    context: JobContext,
    running: JoinSet<Completion>,
    stop_token: CancellationToken,
    published: Published,
}

/// Create a scheduler for every job of `registry`, starting now.
pub fn create_scheduler(
    registry: &JobRegistry,
    settings: &SchedulerSettings,
    context: JobContext,
) -> (Scheduler, SchedulerHandle) {
    let start = Instant::now();
    let entries = registry
        .iter()
        .map(|descriptor| ScheduleEntry::new(Arc::clone(descriptor), start))
        .collect::<Vec<_>>();

    let published: Published = Arc::new(RwLock::new(Vec::new()));
    publish(&published, &entries);

    let stop_token = CancellationToken::new();
    let scheduler = Scheduler {
        entries,
        overlap: settings.overlap,
        context,
        running: JoinSet::new(),
        stop_token: stop_token.clone(),
        published: Arc::clone(&published),
    };
    let handle = SchedulerHandle {
        stop_token,
        published,
    };

    (scheduler, handle)
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Scheduler {
    /// Main scheduler loop. Returns once stopped, handing over the runs that
    /// are still in flight.
    pub async fn run(mut self) -> InFlight {
        info!(
            "Starting scheduler with {} jobs (overlap: {})",
            self.entries.len(),
            self.overlap
        );

        loop {
            let deadline = self.entries.iter().map(ScheduleEntry::next_fire).min();
            if let Some(deadline) = deadline {
                debug!(
                    "Scheduler sleeping for {:?} until next scheduled job",
                    deadline.saturating_duration_since(Instant::now())
                );
            }

            tokio::select! {
                biased;
                _ = self.stop_token.cancelled() => {
                    info!("Scheduler received stop request");
                    break;
                }
                Some(joined) = self.running.join_next(), if !self.running.is_empty() => {
                    record_completion(&mut self.entries, joined);
                    publish(&self.published, &self.entries);
                }
                _ = sleep_until_or_forever(deadline) => {
                    self.fire_due(Instant::now());
                }
            }
        }

        publish(&self.published, &self.entries);
        info!(
            "Scheduler stopped with {} run(s) still in flight",
            self.running.len()
        );
        InFlight {
            running: std::mem::take(&mut self.running),
            entries: std::mem::take(&mut self.entries),
            published: Arc::clone(&self.published),
        }
    }

    fn fire_due(&mut self, now: Instant) {
        for index in 0..self.entries.len() {
            let entry = &mut self.entries[index];
            if !entry.is_due(now) {
                continue;
            }

            let slot = entry.next_fire;
            let coalesced = entry.advance(now);
            if coalesced > 0 {
                warn!(
                    job = %entry.name(),
                    "Job is {} tick(s) behind schedule, coalescing into one run",
                    coalesced
                );
            }

            if self.overlap == OverlapPolicy::Skip && entry.in_flight() > 0 {
                entry.skipped += 1;
                info!(
                    job = %entry.name(),
                    "Skipping tick, previous run still in progress"
                );
                continue;
            }

            self.launch(index, slot, now);
        }

        publish(&self.published, &self.entries);
    }

    fn launch(&mut self, index: usize, slot: Instant, now: Instant) {
        let entry = &mut self.entries[index];
        entry.launches += 1;
        entry.last_fire = Some(slot);
        entry.last_outcome = RunOutcome::InProgress;

        let tick = entry.launches;
        debug!(
            job = %entry.name(),
            tick,
            "Launching job ({:?} after its slot, {} already running)",
            now.saturating_duration_since(slot),
            entry.in_flight()
        );

        let guard = RunningGuard::new(&entry.running);
        let job = entry.descriptor.job();
        let ctx = JobContext {
            cancellation_token: self.context.cancellation_token.child_token(),
            ..self.context.clone()
        };

        self.running.spawn(async move {
            let _guard = guard;
            let started = Instant::now();
            let result = job::invoke(job.as_ref(), &ctx).await;
            Completion {
                index,
                tick,
                result,
                elapsed: started.elapsed(),
            }
        });
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Dropping a JoinSet aborts its tasks; stopping must not.
        self.running.detach_all();
    }
}

/// Runs still executing when the scheduler stopped.
pub struct InFlight {
    running: JoinSet<Completion>,
    entries: Vec<ScheduleEntry>,
    published: Published,
}

/// Outcome of [`InFlight::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Runs that finished within the grace period.
    pub completed: usize,
    /// Runs left running in the background.
    pub detached: usize,
}

impl InFlight {
    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Wait up to `grace` for the remaining runs, then detach whatever is
    /// still going. Nothing is aborted.
    pub async fn drain(mut self, grace: Duration) -> DrainReport {
        let mut report = DrainReport::default();
        if self.running.is_empty() {
            return report;
        }

        info!(
            "Waiting up to {:?} for {} in-flight run(s)",
            grace,
            self.running.len()
        );
        let deadline = Instant::now() + grace;
        while let Ok(Some(joined)) =
            tokio::time::timeout_at(deadline, self.running.join_next()).await
        {
            record_completion(&mut self.entries, joined);
            report.completed += 1;
        }

        report.detached = self.running.len();
        if report.detached > 0 {
            warn!(
                "{} run(s) still in flight after {:?}, leaving them behind",
                report.detached, grace
            );
            self.running.detach_all();
        }
        publish(&self.published, &self.entries);
        report
    }

    pub fn snapshot(&self) -> Vec<ScheduleSnapshot> {
        self.entries.iter().map(ScheduleEntry::snapshot).collect()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.running.detach_all();
    }
}
