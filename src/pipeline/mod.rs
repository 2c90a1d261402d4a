//! Pipeline orchestrator: directory sync → chunked rating harvest → detail
//! enrichment.
//!
//! Idempotent by construction: every write is an upsert keyed on a stable
//! external identifier (username, slug, username+slug), so partial, repeated,
//! and out-of-order runs converge on the same stored state. Ratings are
//! durable before the run log is closed, so a downstream ranking snapshot
//! job never reads a run that claims completion it doesn't have.
//!
//! Failure containment lives below this level — per page, per member, per
//! film, per sub-fetch. The orchestrator itself only fails when the store or
//! the rendering engine cannot be reached at startup.

mod details;
mod members;
mod ratings;

pub use ratings::{MemberHarvest, harvest_member};

use crate::config::AppConfig;
use crate::scraper::RatingSite;
use crate::storage::Repository;
use crate::utils::Timer;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub struct Pipeline {
    config: AppConfig,
    site: Arc<dyn RatingSite>,
    repo: Arc<Repository>,
}

impl Pipeline {
    pub fn new(config: AppConfig, site: Arc<dyn RatingSite>, repo: Arc<Repository>) -> Self {
        Self { config, site, repo }
    }

    pub async fn run(&self) -> Result<PipelineStats> {
        let run_id = self.repo.begin_harvest_run().unwrap_or(0);

        info!("=== Step 1: Syncing member directory ===");
        let discovered = {
            let _t = Timer::start("Member directory sync");
            members::sync_members(&*self.site, &self.repo, &self.config.storage.assets_dir)
                .await?
        };

        // Harvest every member the store knows, not just this walk's finds: a
        // directory walk cut short by a page failure must not hide members
        // discovered on earlier runs.
        let usernames = self.repo.list_members()?;
        info!(
            "=== Step 2: Harvesting ratings ({} members, chunks of {}) ===",
            usernames.len(),
            self.config.pipeline.member_chunk_size
        );
        let harvest = {
            let _t = Timer::start("Rating harvest");
            ratings::harvest_all(&self.site, &self.repo, &self.config, &usernames).await
        };

        info!("=== Step 3: Enriching film details ===");
        let enrich = {
            let _t = Timer::start("Detail enrichment");
            details::enrich_all(&self.site, &self.repo, &self.config).await?
        };

        let stats = PipelineStats {
            members_synced: discovered.len(),
            members_harvested: harvest.members,
            ratings_upserted: harvest.ratings,
            films_enriched: enrich.films,
            errors: harvest.errors + enrich.errors,
        };

        let error_summary = if stats.errors > 0 {
            Some(format!("{} unit errors", stats.errors))
        } else {
            None
        };
        self.repo
            .finish_harvest_run(
                run_id,
                stats.members_synced,
                stats.ratings_upserted,
                stats.films_enriched,
                error_summary.as_deref(),
            )
            .ok();

        info!(
            "=== Done: {} members | {} ratings | {} films enriched | {} errors ===",
            stats.members_harvested, stats.ratings_upserted, stats.films_enriched, stats.errors
        );

        Ok(stats)
    }
}

#[derive(Debug)]
pub struct PipelineStats {
    pub members_synced: usize,
    pub members_harvested: usize,
    pub ratings_upserted: usize,
    pub films_enriched: usize,
    pub errors: usize,
}
