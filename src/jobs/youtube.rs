use super::{collections, extract_ids, read_dataset, STORE_AND_PLATFORM};
use crate::orchestrator::{Job, JobContext, JobError, RunResult};
use crate::resources::ResourceKind;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const SEARCH_PATH: &str = "/search";
const VIDEOS_PATH: &str = "/videos";
/// YouTube Data API limit on ids per `videos` request.
const VIDEOS_PER_REQUEST: usize = 50;

/// Latest uploads of the channels listed in the YouTube dataset.
pub struct YoutubeFeedJob {
    dataset: PathBuf,
    api_key: String,
}

impl YoutubeFeedJob {
    pub fn new(dataset: PathBuf, api_key: String) -> Self {
        Self { dataset, api_key }
    }
}

#[async_trait]
impl Job for YoutubeFeedJob {
    fn resources(&self) -> &'static [ResourceKind] {
        STORE_AND_PLATFORM
    }

    async fn run(&self, ctx: &JobContext) -> RunResult {
        let dataset = read_dataset(&self.dataset).await?;
        let channels = extract_ids(&dataset);
        let url = ctx.platform.youtube_url(SEARCH_PATH);

        let mut failed = 0;
        for channel in &channels {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let query = [
                ("part", "snippet".to_string()),
                ("channelId", channel.clone()),
                ("order", "date".to_string()),
                ("type", "video".to_string()),
                ("maxResults", "10".to_string()),
                ("key", self.api_key.clone()),
            ];
            match ctx.platform.get_json(&url, &query).await {
                Ok(feed) => ctx
                    .store
                    .upsert_document(collections::YT_FEEDS, channel, &feed)
                    .map_err(JobError::failed)?,
                Err(e) => {
                    warn!("Failed to fetch feed for {}: {}", channel, e);
                    failed += 1;
                }
            }
        }

        info!(
            "Refreshed {} YouTube feeds ({} failed)",
            channels.len() - failed,
            failed
        );
        if failed > 0 && failed == channels.len() {
            return Err(JobError::ExecutionFailed(format!(
                "Feed request failed for all {} channels",
                failed
            )));
        }
        Ok(())
    }
}

/// Live and upcoming broadcasts among the videos found by the feed job.
pub struct YoutubeLiveJob {
    api_key: String,
}

impl YoutubeLiveJob {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

/// `items[].id.videoId` of a search response.
fn video_ids(feed: &JsonValue) -> Vec<String> {
    feed["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["id"]["videoId"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn is_broadcasting(video: &JsonValue) -> bool {
    matches!(
        video["snippet"]["liveBroadcastContent"].as_str(),
        Some("live") | Some("upcoming")
    )
}

#[async_trait]
impl Job for YoutubeLiveJob {
    fn resources(&self) -> &'static [ResourceKind] {
        STORE_AND_PLATFORM
    }

    async fn run(&self, ctx: &JobContext) -> RunResult {
        let feeds = ctx
            .store
            .list_documents(collections::YT_FEEDS)
            .map_err(JobError::failed)?;
        let mut ids = feeds.iter().flat_map(|d| video_ids(&d.body)).collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        debug!("Checking {} videos for live status", ids.len());

        let url = ctx.platform.youtube_url(VIDEOS_PATH);
        let mut live = Vec::new();
        for chunk in ids.chunks(VIDEOS_PER_REQUEST) {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let query = [
                ("part", "snippet,liveStreamingDetails".to_string()),
                ("id", chunk.join(",")),
                ("key", self.api_key.clone()),
            ];
            let response = ctx
                .platform
                .get_json(&url, &query)
                .await
                .context("Failed to fetch video details")?;
            let items = response["items"].as_array().cloned().unwrap_or_default();
            live.extend(
                items
                    .into_iter()
                    .filter(is_broadcasting)
                    .filter_map(|video| Some((video["id"].as_str()?.to_string(), video))),
            );
        }

        let written = ctx
            .store
            .replace_collection(collections::YT_LIVE, &live)
            .map_err(JobError::failed)?;
        info!("{} YouTube broadcasts live or upcoming", written);
        Ok(())
    }
}
