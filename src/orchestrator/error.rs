use std::time::Duration;
use thiserror::Error;

/// Startup-phase errors. Any of these aborts the process before the
/// scheduler is constructed.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Missing or malformed configuration value, or a required dataset file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A resource handle could not be opened.
    #[error("Failed to open {resource}: {message}")]
    Connection {
        resource: &'static str,
        message: String,
    },

    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Invalid interval {interval:?} for job {name}: must be greater than zero and at most {max:?}", max = crate::orchestrator::MAX_INTERVAL)]
    InvalidInterval { name: String, interval: Duration },
}

impl OrchestratorError {
    pub fn config(message: impl Into<String>) -> Self {
        OrchestratorError::Config(message.into())
    }

    pub fn connection(resource: &'static str, err: impl std::fmt::Display) -> Self {
        OrchestratorError::Connection {
            resource,
            message: err.to_string(),
        }
    }

    /// True for errors raised while opening resources.
    pub fn is_connection(&self) -> bool {
        matches!(self, OrchestratorError::Connection { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
