use super::{collections, STORE_AND_PLATFORM};
use crate::datasets::YtBiliMapping;
use crate::orchestrator::{Job, JobContext, JobError, RunResult};
use crate::resources::ResourceKind;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

const JETRI_LIVE_PATH: &str = "/live";
const ROOM_INFO_PATH: &str = "/room/v1/Room/get_info";

/// Live BiliBili rooms of one agency.
///
/// Jetri lists the agency's channels that are live on YouTube; the mapping
/// turns each into a BiliBili room, whose status is then fetched. The group's
/// live collection is replaced as a whole on every run.
pub struct RoomHeartbeatJob {
    group: &'static str,
    mapping: Arc<YtBiliMapping>,
}

impl RoomHeartbeatJob {
    pub fn new(group: &'static str, mapping: Arc<YtBiliMapping>) -> Self {
        Self { group, mapping }
    }
}

fn live_channels(response: &JsonValue) -> Vec<String> {
    response["live"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    entry["channel"]
                        .as_str()
                        .or_else(|| entry["channel_id"].as_str())
                })
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn room_is_live(info: &JsonValue) -> bool {
    info["data"]["live_status"].as_i64() == Some(1)
}

#[async_trait]
impl Job for RoomHeartbeatJob {
    fn resources(&self) -> &'static [ResourceKind] {
        STORE_AND_PLATFORM
    }

    async fn run(&self, ctx: &JobContext) -> RunResult {
        let jetri = ctx
            .platform
            .get_json(
                &ctx.platform.jetri_url(JETRI_LIVE_PATH),
                &[("group", self.group.to_string())],
            )
            .await
            .with_context(|| format!("Failed to fetch live channels for {}", self.group))?;

        let rooms = live_channels(&jetri)
            .into_iter()
            .filter_map(|channel| match self.mapping.room_id(&channel) {
                Some(room) => Some(room),
                None => {
                    debug!("No BiliBili room mapped for {}", channel);
                    None
                }
            })
            .collect::<Vec<_>>();

        let url = ctx.platform.bilibili_url(ROOM_INFO_PATH);
        let mut live = Vec::new();
        for room in rooms {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            match ctx.platform.get_json(&url, &[("room_id", room.clone())]).await {
                Ok(info) if room_is_live(&info) => live.push((room, info)),
                Ok(_) => {}
                Err(e) => warn!("Failed to fetch room {}: {}", room, e),
            }
        }

        let written = ctx
            .store
            .replace_collection(&collections::bili_live(self.group), &live)
            .map_err(JobError::failed)?;
        info!("{} {} rooms live on BiliBili", written, self.group);
        Ok(())
    }
}
