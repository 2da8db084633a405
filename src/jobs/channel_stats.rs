use super::{collections, extract_ids, read_dataset, STORE_AND_PLATFORM};
use crate::orchestrator::{Job, JobContext, JobError, RunResult};
use crate::resources::ResourceKind;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{info, warn};

const STAT_PATH: &str = "/x/relation/stat";

/// Follower statistics for every creator listed in the BiliBili datasets.
///
/// A creator whose request fails is skipped and keeps its previous document.
/// The run fails only if no creator could be refreshed.
pub struct ChannelStatsJob {
    datasets: Vec<PathBuf>,
}

impl ChannelStatsJob {
    pub fn new(datasets: Vec<PathBuf>) -> Self {
        Self { datasets }
    }
}

#[async_trait]
impl Job for ChannelStatsJob {
    fn resources(&self) -> &'static [ResourceKind] {
        STORE_AND_PLATFORM
    }

    async fn run(&self, ctx: &JobContext) -> RunResult {
        let mut ids = BTreeSet::new();
        for path in &self.datasets {
            let dataset = read_dataset(path).await?;
            ids.extend(extract_ids(&dataset));
        }
        if ids.is_empty() {
            info!("No BiliBili creators listed, nothing to update");
            return Ok(());
        }

        let url = ctx.platform.bilibili_url(STAT_PATH);
        let mut updated = 0;
        let mut failed = 0;
        for id in &ids {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let stats = match ctx.platform.get_json(&url, &[("vmid", id.clone())]).await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!("Failed to fetch stats for channel {}: {}", id, e);
                    failed += 1;
                    continue;
                }
            };
            ctx.store
                .upsert_document(collections::BILI_CHANNELS, id, &stats)
                .map_err(JobError::failed)?;
            updated += 1;
        }

        info!(
            "Updated stats for {} channels ({} failed)",
            updated, failed
        );
        if updated == 0 {
            return Err(JobError::ExecutionFailed(format!(
                "Stats request failed for all {} channels",
                failed
            )));
        }
        Ok(())
    }
}
