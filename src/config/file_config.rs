use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub base_path: Option<String>,
    pub store_uri: Option<String>,
    pub store_name: Option<String>,
    pub youtube_api_key: Option<String>,
    pub log_file: Option<String>,

    // Sections
    pub platform: Option<PlatformConfig>,
    pub intervals: Option<IntervalsConfig>,
    pub scheduler: Option<SchedulerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PlatformConfig {
    pub bilibili_api_url: Option<String>,
    pub youtube_api_url: Option<String>,
    pub jetri_api_url: Option<String>,
    pub request_timeout_sec: Option<u64>,
    pub verify_on_open: Option<bool>,
    pub max_attempts: Option<u32>,
    pub retry_backoff_secs: Option<u64>,
}

/// Per-job intervals, in minutes. Signed so that a negative value is reported
/// as an invalid interval rather than a parse error.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IntervalsConfig {
    pub bili_channels: Option<i64>,
    pub bili_upcoming: Option<i64>,
    pub bili_live: Option<i64>,
    pub yt_feed: Option<i64>,
    pub yt_live: Option<i64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub shutdown_grace_sec: Option<u64>,
    /// "allow" or "skip"
    pub overlap: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config = FileConfig::parse(
            r#"
            base_path = "/srv/vtbili"
            store_uri = "/srv/vtbili/db"
            store_name = "vtbili"
            youtube_api_key = "AIza-test"

            [platform]
            jetri_api_url = "http://jetri.local"
            verify_on_open = false

            [intervals]
            bili_channels = 360
            yt_live = 1

            [scheduler]
            shutdown_grace_sec = 10
            overlap = "skip"
            "#,
        )
        .unwrap();

        assert_eq!(config.base_path.as_deref(), Some("/srv/vtbili"));
        assert_eq!(config.youtube_api_key.as_deref(), Some("AIza-test"));
        let platform = config.platform.unwrap();
        assert_eq!(platform.jetri_api_url.as_deref(), Some("http://jetri.local"));
        assert_eq!(platform.verify_on_open, Some(false));
        let intervals = config.intervals.unwrap();
        assert_eq!(intervals.bili_channels, Some(360));
        assert_eq!(intervals.yt_live, Some(1));
        assert!(intervals.bili_live.is_none());
        assert_eq!(config.scheduler.unwrap().overlap.as_deref(), Some("skip"));
    }

    #[test]
    fn test_parse_empty_file() {
        let config = FileConfig::parse("").unwrap();
        assert!(config.base_path.is_none());
        assert!(config.intervals.is_none());
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        assert!(FileConfig::parse("[intervals]\nyt_live = \"soon\"").is_err());
    }
}
