//! Platform API client shared by the collector jobs.

mod client;

pub use client::{PlatformClient, PlatformSettings};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Platform client is closed")]
    Closed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl PlatformError {
    /// Worth another attempt: transport failures, throttling and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            PlatformError::Status { status, .. } => *status == 429 || *status >= 500,
            PlatformError::Closed | PlatformError::Decode { .. } => false,
        }
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;
