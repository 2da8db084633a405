mod file_config;

pub use file_config::{FileConfig, IntervalsConfig, PlatformConfig, SchedulerConfig};

use crate::orchestrator::{OrchestratorError, OverlapPolicy, SchedulerSettings, MAX_INTERVAL};
use crate::platform::PlatformSettings;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

/// Store connection string that selects an in-memory database.
pub const IN_MEMORY_STORE: &str = ":memory:";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub base_path: Option<PathBuf>,
    pub store_uri: Option<String>,
    pub store_name: Option<String>,
    pub youtube_api_key: Option<String>,
    pub bilibili_api_url: Option<String>,
    pub youtube_api_url: Option<String>,
    pub jetri_api_url: Option<String>,
    pub request_timeout_sec: Option<u64>,
    pub shutdown_grace_sec: Option<u64>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_path: PathBuf,
    pub store_uri: String,
    pub store_name: String,
    pub log_file: Option<PathBuf>,

    pub platform: PlatformSettings,
    pub intervals: JobIntervals,
    pub scheduler: SchedulerSettings,
}

/// Recurrence of each job family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIntervals {
    pub bili_channels: Duration,
    pub bili_upcoming: Duration,
    pub bili_live: Duration,
    pub yt_feed: Duration,
    pub yt_live: Duration,
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            bili_channels: minutes(6 * 60),
            bili_upcoming: minutes(4),
            bili_live: minutes(2),
            yt_feed: minutes(2),
            yt_live: minutes(1),
        }
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(
        cli: &CliConfig,
        file_config: Option<FileConfig>,
    ) -> Result<Self, OrchestratorError> {
        let file = file_config.unwrap_or_default();

        let base_path = file
            .base_path
            .map(PathBuf::from)
            .or_else(|| cli.base_path.clone())
            .ok_or_else(|| {
                OrchestratorError::config(
                    "base_path must be specified via --base-path or in config file",
                )
            })?;
        if !base_path.is_dir() {
            return Err(OrchestratorError::config(format!(
                "Base path is not an existing directory: {:?}",
                base_path
            )));
        }

        let store_uri = file
            .store_uri
            .or_else(|| cli.store_uri.clone())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                OrchestratorError::config(
                    "store_uri must be specified via --store-uri or in config file",
                )
            })?;

        let store_name = file
            .store_name
            .or_else(|| cli.store_name.clone())
            .unwrap_or_else(|| "vtbili".to_string());
        if !valid_store_name(&store_name) {
            return Err(OrchestratorError::config(format!(
                "Invalid store name {:?}: only letters, digits, '_' and '-' are allowed",
                store_name
            )));
        }

        let youtube_api_key = file
            .youtube_api_key
            .or_else(|| cli.youtube_api_key.clone())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                OrchestratorError::config(
                    "A YouTube API key must be provided via --youtube-api-key, YT_API_KEY or the config file",
                )
            })?;

        let platform_file = file.platform.unwrap_or_default();
        let defaults = PlatformSettings::default();
        let request_timeout_sec = platform_file
            .request_timeout_sec
            .or(cli.request_timeout_sec)
            .unwrap_or(defaults.request_timeout_sec);
        if request_timeout_sec == 0 {
            return Err(OrchestratorError::config(
                "request_timeout_sec must be greater than zero",
            ));
        }
        let platform = PlatformSettings {
            bilibili_api_url: platform_file
                .bilibili_api_url
                .or_else(|| cli.bilibili_api_url.clone())
                .unwrap_or(defaults.bilibili_api_url),
            youtube_api_url: platform_file
                .youtube_api_url
                .or_else(|| cli.youtube_api_url.clone())
                .unwrap_or(defaults.youtube_api_url),
            jetri_api_url: platform_file
                .jetri_api_url
                .or_else(|| cli.jetri_api_url.clone())
                .unwrap_or(defaults.jetri_api_url),
            youtube_api_key,
            request_timeout_sec,
            verify_on_open: platform_file
                .verify_on_open
                .unwrap_or(defaults.verify_on_open),
            max_attempts: platform_file.max_attempts.unwrap_or(defaults.max_attempts),
            retry_backoff: platform_file
                .retry_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_backoff),
        };

        let intervals = resolve_intervals(file.intervals.unwrap_or_default())?;

        let scheduler_file = file.scheduler.unwrap_or_default();
        let scheduler_defaults = SchedulerSettings::default();
        let overlap = match scheduler_file.overlap {
            Some(s) => s.parse::<OverlapPolicy>()?,
            None => scheduler_defaults.overlap,
        };
        let scheduler = SchedulerSettings {
            shutdown_grace: scheduler_file
                .shutdown_grace_sec
                .or(cli.shutdown_grace_sec)
                .map(Duration::from_secs)
                .unwrap_or(scheduler_defaults.shutdown_grace),
            overlap,
        };

        let log_file = file
            .log_file
            .map(PathBuf::from)
            .or_else(|| cli.log_file.clone());

        Ok(Self {
            base_path,
            store_uri,
            store_name,
            log_file,
            platform,
            intervals,
            scheduler,
        })
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.base_path.join("dataset")
    }

    /// Database file backing the store, or `None` for an in-memory store.
    pub fn store_location(&self) -> Option<PathBuf> {
        if self.store_uri == IN_MEMORY_STORE {
            return None;
        }
        let dir = self
            .store_uri
            .strip_prefix("sqlite://")
            .unwrap_or(&self.store_uri);
        Some(PathBuf::from(dir).join(format!("{}.db", self.store_name)))
    }
}

fn valid_store_name(name: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_-]+$")
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

fn resolve_intervals(file: IntervalsConfig) -> Result<JobIntervals, OrchestratorError> {
    let defaults = JobIntervals::default();
    let pick = |key: &str, value: Option<i64>, default: Duration| match value {
        None => Ok(default),
        Some(m) if m > 0 => u64::try_from(m)
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
            .filter(|interval| *interval <= MAX_INTERVAL)
            .ok_or_else(|| {
                OrchestratorError::config(format!(
                    "Interval {} of {} minutes is longer than the maximum of {:?}",
                    key, m, MAX_INTERVAL
                ))
            }),
        Some(m) => Err(OrchestratorError::config(format!(
            "Interval {} must be a positive number of minutes, got {}",
            key, m
        ))),
    };

    Ok(JobIntervals {
        bili_channels: pick("bili_channels", file.bili_channels, defaults.bili_channels)?,
        bili_upcoming: pick("bili_upcoming", file.bili_upcoming, defaults.bili_upcoming)?,
        bili_live: pick("bili_live", file.bili_live, defaults.bili_live)?,
        yt_feed: pick("yt_feed", file.yt_feed, defaults.yt_feed)?,
        yt_live: pick("yt_live", file.yt_live, defaults.yt_live)?,
    })
}
