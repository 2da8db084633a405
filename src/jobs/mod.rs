//! Collector jobs and their registration table.

mod channel_stats;
mod heartbeat;
mod upcoming;
mod youtube;

pub use channel_stats::ChannelStatsJob;
pub use heartbeat::RoomHeartbeatJob;
pub use upcoming::{DatasetUpcomingJob, GroupUpcomingJob};
pub use youtube::{YoutubeFeedJob, YoutubeLiveJob};

use crate::config::AppConfig;
use crate::datasets::Datasets;
use crate::orchestrator::{JobRegistry, Result};
use crate::resources::{ResourceKind, Resources};
use anyhow::Context;
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Store collections written by the jobs.
pub mod collections {
    pub const BILI_UPCOMING: &str = "bili_upcoming";
    pub const BILI_CHANNELS: &str = "bili_channels";
    pub const YT_FEEDS: &str = "yt_feeds";
    pub const YT_LIVE: &str = "yt_live";

    pub fn bili_live(group: &str) -> String {
        format!("bili_live_{}", group)
    }
}

/// Every collector job needs both handles.
pub(crate) const STORE_AND_PLATFORM: &[ResourceKind] = &[ResourceKind::Store, ResourceKind::Platform];

/// Build the registry of all collector jobs.
pub fn register_all(
    config: &AppConfig,
    datasets: &Datasets,
    resources: &Resources,
) -> Result<JobRegistry> {
    let intervals = &config.intervals;
    info!(
        "With intervals: BiliBili live/upcoming/channels {:?}/{:?}/{:?}, YouTube feed/live {:?}/{:?}",
        intervals.bili_live,
        intervals.bili_upcoming,
        intervals.bili_channels,
        intervals.yt_feed,
        intervals.yt_live
    );

    let api_key = &config.platform.youtube_api_key;
    let mut registry = JobRegistry::for_resources(resources);

    registry.register(
        "hololive_upcoming",
        intervals.bili_upcoming,
        Arc::new(GroupUpcomingJob::new("hololive")),
    )?;
    registry.register(
        "nijisanji_upcoming",
        intervals.bili_upcoming,
        Arc::new(GroupUpcomingJob::new("nijisanji")),
    )?;
    registry.register(
        "others_upcoming",
        intervals.bili_upcoming,
        Arc::new(DatasetUpcomingJob::new(datasets.bili_other.clone())),
    )?;
    registry.register(
        "channel_stats",
        intervals.bili_channels,
        Arc::new(ChannelStatsJob::new(datasets.bili_all.clone())),
    )?;
    registry.register(
        "youtube_feeds",
        intervals.yt_feed,
        Arc::new(YoutubeFeedJob::new(datasets.yt_other.clone(), api_key.clone())),
    )?;
    registry.register(
        "youtube_live",
        intervals.yt_live,
        Arc::new(YoutubeLiveJob::new(api_key.clone())),
    )?;
    registry.register(
        "hololive_heartbeat",
        intervals.bili_live,
        Arc::new(RoomHeartbeatJob::new(
            "hololive",
            Arc::clone(&datasets.ytbili_mapping),
        )),
    )?;
    registry.register(
        "nijisanji_heartbeat",
        intervals.bili_live,
        Arc::new(RoomHeartbeatJob::new(
            "nijisanji",
            Arc::clone(&datasets.ytbili_mapping),
        )),
    )?;

    Ok(registry)
}

pub(crate) async fn read_dataset(path: &Path) -> anyhow::Result<JsonValue> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read dataset {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse dataset {:?}", path))
}

const ID_KEYS: &[&str] = &["id", "uid", "mid", "channel_id", "channel"];

/// Creator ids listed by a dataset: an array of ids, an array of objects
/// carrying one of the usual id keys, or an object keyed by id.
pub(crate) fn extract_ids(dataset: &JsonValue) -> Vec<String> {
    match dataset {
        JsonValue::Array(items) => items.iter().filter_map(id_of).collect(),
        JsonValue::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

fn id_of(item: &JsonValue) -> Option<String> {
    match item {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Object(obj) => ID_KEYS
            .iter()
            .filter_map(|key| obj.get(*key))
            .find_map(|value| match value {
                JsonValue::Object(_) | JsonValue::Array(_) => None,
                other => id_of(other),
            }),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::orchestrator::JobContext;
    use crate::platform::{PlatformClient, PlatformSettings};
    use crate::store::{SqliteVideoStore, VideoStore};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Context over an in-memory store and a client pointed at `url`.
    pub fn context_for(url: &str) -> JobContext {
        let settings = PlatformSettings {
            bilibili_api_url: url.to_string(),
            youtube_api_url: url.to_string(),
            jetri_api_url: url.to_string(),
            youtube_api_key: "client-key".to_string(),
            request_timeout_sec: 5,
            verify_on_open: false,
            max_attempts: 1,
            retry_backoff: Duration::ZERO,
        };
        let store: Arc<dyn VideoStore> = Arc::new(SqliteVideoStore::open_in_memory().unwrap());
        JobContext::new(
            CancellationToken::new(),
            store,
            Arc::new(PlatformClient::new(&settings).unwrap()),
        )
    }
}
