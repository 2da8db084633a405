use super::error::{OrchestratorError, Result};
use super::job::Job;
use crate::resources::{ResourceKind, Resources};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Longest accepted interval (100 years). Anything longer cannot be turned
/// into a deadline on every platform.
pub const MAX_INTERVAL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Static registration record: a job body bound to its name, its interval and
/// the handles it needs. Never mutated once registered.
pub struct JobDescriptor {
    name: String,
    interval: Duration,
    resources: Vec<ResourceKind>,
    job: Arc<dyn Job>,
}

impl JobDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn resources(&self) -> &[ResourceKind] {
        &self.resources
    }

    pub fn job(&self) -> Arc<dyn Job> {
        Arc::clone(&self.job)
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("resources", &self.resources)
            .finish()
    }
}

/// Registered jobs, enumerated in registration order.
pub struct JobRegistry {
    descriptors: Vec<Arc<JobDescriptor>>,
    index: HashMap<String, usize>,
    available: Vec<ResourceKind>,
}

impl JobRegistry {
    /// Empty registry accepting jobs that only need the `available` handles.
    pub fn new(available: &[ResourceKind]) -> Self {
        Self {
            descriptors: Vec::new(),
            index: HashMap::new(),
            available: available.to_vec(),
        }
    }

    pub fn for_resources(resources: &Resources) -> Self {
        Self::new(resources.kinds())
    }

    /// Register a job under `name`.
    ///
    /// Fails if the name is taken, if `interval` is zero or longer than
    /// [`MAX_INTERVAL`], or if the job needs a
    /// handle this process does not open. A rejected job leaves the registry
    /// untouched.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        job: Arc<dyn Job>,
    ) -> Result<()> {
        let name = name.into();

        if self.index.contains_key(&name) {
            return Err(OrchestratorError::DuplicateJob(name));
        }
        if interval.is_zero() || interval > MAX_INTERVAL {
            return Err(OrchestratorError::InvalidInterval { name, interval });
        }
        let resources = job.resources().to_vec();
        if let Some(missing) = resources.iter().find(|r| !self.available.contains(r)) {
            return Err(OrchestratorError::config(format!(
                "Job {} requires the {} handle, which is not available",
                name, missing
            )));
        }

        info!(
            "Registering job: {} (every {:?}, uses {:?})",
            name, interval, resources
        );
        self.index.insert(name.clone(), self.descriptors.len());
        self.descriptors.push(Arc::new(JobDescriptor {
            name,
            interval,
            resources,
            job,
        }));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<JobDescriptor>> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<JobDescriptor>> {
        self.descriptors.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Shortest registered interval, if any job is registered.
    pub fn shortest_interval(&self) -> Option<Duration> {
        self.descriptors.iter().map(|d| d.interval).min()
    }
}
