use super::{collections, extract_ids, read_dataset, STORE_AND_PLATFORM};
use crate::orchestrator::{Job, JobContext, JobError, RunResult};
use crate::resources::ResourceKind;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use tracing::debug;

const UPCOMING_PATH: &str = "/vtuber/upcoming";

/// Upcoming BiliBili streams for one agency.
pub struct GroupUpcomingJob {
    group: &'static str,
}

impl GroupUpcomingJob {
    pub fn new(group: &'static str) -> Self {
        Self { group }
    }
}

#[async_trait]
impl Job for GroupUpcomingJob {
    fn resources(&self) -> &'static [ResourceKind] {
        STORE_AND_PLATFORM
    }

    async fn run(&self, ctx: &JobContext) -> RunResult {
        let url = ctx.platform.bilibili_url(UPCOMING_PATH);
        let body = ctx
            .platform
            .get_json(&url, &[("group", self.group.to_string())])
            .await
            .with_context(|| format!("Failed to fetch upcoming streams for {}", self.group))?;

        ctx.store
            .upsert_document(collections::BILI_UPCOMING, self.group, &body)
            .map_err(JobError::failed)?;
        debug!("Stored upcoming streams for {}", self.group);
        Ok(())
    }
}

/// Upcoming BiliBili streams for the creators listed in a dataset file.
pub struct DatasetUpcomingJob {
    dataset: PathBuf,
}

impl DatasetUpcomingJob {
    pub fn new(dataset: PathBuf) -> Self {
        Self { dataset }
    }
}

#[async_trait]
impl Job for DatasetUpcomingJob {
    fn resources(&self) -> &'static [ResourceKind] {
        STORE_AND_PLATFORM
    }

    async fn run(&self, ctx: &JobContext) -> RunResult {
        let dataset = read_dataset(&self.dataset).await?;
        let ids = extract_ids(&dataset);
        if ids.is_empty() {
            debug!("No creators listed in {:?}", self.dataset);
            ctx.store
                .upsert_document(collections::BILI_UPCOMING, "other", &json!({ "upcoming": [] }))
                .map_err(JobError::failed)?;
            return Ok(());
        }
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let url = ctx.platform.bilibili_url(UPCOMING_PATH);
        let body = ctx
            .platform
            .get_json(&url, &[("uids", ids.join(","))])
            .await
            .context("Failed to fetch upcoming streams for other creators")?;

        ctx.store
            .upsert_document(collections::BILI_UPCOMING, "other", &body)
            .map_err(JobError::failed)?;
        debug!("Stored upcoming streams for {} other creators", ids.len());
        Ok(())
    }
}
