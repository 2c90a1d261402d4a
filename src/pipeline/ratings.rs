use crate::config::{AppConfig, SiteConfig};
use crate::models::RatingsPage;
use crate::scraper::{RatingSite, cleaner};
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::Utc;
use rand::RngExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct MemberHarvest {
    pub pages: u32,
    pub ratings: usize,
}

#[derive(Debug, Default)]
pub struct HarvestTotals {
    pub members: usize,
    pub ratings: usize,
    pub errors: usize,
}

/// Harvest all members in fixed-width chunks: every member inside a chunk
/// runs concurrently, chunks run back to back. One member's failure never
/// reaches a sibling.
pub async fn harvest_all(
    site: &Arc<dyn RatingSite>,
    repo: &Arc<Repository>,
    config: &AppConfig,
    usernames: &[String],
) -> HarvestTotals {
    let mut totals = HarvestTotals::default();
    let chunk_width = config.pipeline.member_chunk_size.max(1);

    for chunk in usernames.chunks(chunk_width) {
        let mut handles = Vec::new();
        for username in chunk {
            let site = Arc::clone(site);
            let repo = Arc::clone(repo);
            let site_cfg = config.site.clone();
            let username = username.clone();

            handles.push((
                username.clone(),
                tokio::spawn(async move {
                    harvest_member(&*site, &repo, &site_cfg, &username).await
                }),
            ));
        }

        for (username, handle) in handles {
            match handle.await {
                Ok(Ok(h)) => {
                    totals.members += 1;
                    totals.ratings += h.ratings;
                    info!("{}: {} ratings over {} pages", username, h.ratings, h.pages);
                }
                Ok(Err(e)) => {
                    warn!("{}: {:#}", username, e);
                    totals.errors += 1;
                }
                Err(e) => {
                    error!("Task panic for {}: {}", username, e);
                    totals.errors += 1;
                }
            }
        }
    }

    totals
}

/// Walk every page of one member's rated listing in increasing page order
/// (page N+1 only exists via page N's pagination control). Page 1 failing is
/// the member's unit failure; a later page failing is logged and skipped so
/// the remaining pages still run.
pub async fn harvest_member(
    site: &dyn RatingSite,
    repo: &Repository,
    config: &SiteConfig,
    username: &str,
) -> Result<MemberHarvest> {
    let first = site
        .ratings_page(username, 1)
        .await
        .with_context(|| format!("ratings page 1 for {username}"))?;

    let Some(first) = first else {
        debug!("{username}: no rated films");
        return Ok(MemberHarvest {
            pages: 0,
            ratings: 0,
        });
    };

    let total_pages = first.total_pages.max(1);
    let mut ratings = store_page(repo, username, &first);

    for page_no in 2..=total_pages {
        polite_delay(config).await;
        match site.ratings_page(username, page_no).await {
            Ok(Some(page)) => ratings += store_page(repo, username, &page),
            Ok(None) => {
                debug!("{username}: listing ended early at page {page_no}");
                break;
            }
            Err(e) => {
                warn!("{username}: page {page_no} failed, skipping: {e:#}");
            }
        }
    }

    Ok(MemberHarvest {
        pages: total_pages,
        ratings,
    })
}

/// Store one page of rows; a bad row is skipped, never fatal to the page.
fn store_page(repo: &Repository, username: &str, page: &RatingsPage) -> usize {
    let now = Utc::now().naive_utc();
    let mut stored = 0;
    for row in &page.rows {
        let Some(rated) = cleaner::film_row_to_rated(row) else {
            continue; // cleaner already warned
        };
        if let Err(e) = repo.upsert_film_stub(&rated.film, now) {
            warn!("{username}/{}: {e:#}", rated.film.slug);
            continue;
        }
        if let Err(e) = repo.upsert_rating(username, &rated.film.slug, rated.rating, now) {
            warn!("{username}/{}: {e:#}", rated.film.slug);
            continue;
        }
        stored += 1;
    }
    stored
}

async fn polite_delay(config: &SiteConfig) {
    let jitter = if config.jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=config.jitter_ms)
    };
    tokio::time::sleep(Duration::from_millis(config.page_delay_ms + jitter)).await;
}
