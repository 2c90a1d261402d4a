use crate::models::RawMemberRow;
use crate::scraper::{RatingSite, cleaner};
use crate::storage::Repository;
use crate::utils;
use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use tracing::{info, warn};

/// Walk every page of the tracked-members directory, upserting identity and
/// stats per row and best-effort downloading avatars. A page failure ends
/// the walk early; members already seen stay valid.
pub async fn sync_members(
    site: &dyn RatingSite,
    repo: &Repository,
    assets_dir: &Path,
) -> Result<Vec<String>> {
    let mut found = Vec::new();

    let first = match site.directory_page(1).await {
        Ok(page) => page,
        Err(e) => {
            warn!("directory page 1 failed, skipping sync: {e:#}");
            return Ok(found);
        }
    };
    let Some(first) = first else {
        warn!("directory listing is empty");
        return Ok(found);
    };

    let total_pages = first.total_pages.max(1);
    info!("Directory: {} pages", total_pages);
    sync_page(site, repo, assets_dir, &first.rows, &mut found).await;

    for page_no in 2..=total_pages {
        match site.directory_page(page_no).await {
            Ok(Some(page)) => sync_page(site, repo, assets_dir, &page.rows, &mut found).await,
            Ok(None) => break,
            Err(e) => {
                warn!("directory page {page_no} failed, stopping walk early: {e:#}");
                break;
            }
        }
    }

    info!("Directory sync: {} members", found.len());
    Ok(found)
}

async fn sync_page(
    site: &dyn RatingSite,
    repo: &Repository,
    assets_dir: &Path,
    rows: &[RawMemberRow],
    found: &mut Vec<String>,
) {
    let now = Utc::now().naive_utc();
    for row in rows {
        let Some(member) = cleaner::member_row_to_member(row, now) else {
            warn!("directory row without a username, skipping");
            continue;
        };
        if let Err(e) = repo.upsert_member(&member) {
            warn!("{}: {e:#}", member.username);
            continue;
        }
        if let Some(url) = &member.avatar_url {
            let dest = assets_dir
                .join("avatars")
                .join(format!("{}.{}", member.username, utils::asset_ext(url)));
            // The member row is already durable; a missing image is cosmetic.
            if let Err(e) = site.download_asset(url, &dest).await {
                warn!("avatar for {}: {e:#}", member.username);
            }
        }
        found.push(member.username);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DirectoryPage;
    use crate::scraper::mock::{MockSite, directory_of};
    use std::sync::atomic::Ordering;

    fn repo() -> Repository {
        let r = Repository::open_in_memory().unwrap();
        r.run_migrations().unwrap();
        r
    }

    fn two_page_directory() -> Vec<DirectoryPage> {
        let mut first = directory_of(&["alice", "bob"]);
        first.total_pages = 2;
        let mut second = directory_of(&["carol"]);
        second.total_pages = 2;
        vec![first, second]
    }

    #[tokio::test]
    async fn walks_every_directory_page() {
        let mut mock = MockSite::default();
        mock.directory = two_page_directory();
        let repo = repo();

        let found = sync_members(&mock, &repo, Path::new("assets")).await.unwrap();

        assert_eq!(found, vec!["alice", "bob", "carol"]);
        assert_eq!(mock.directory_fetches.load(Ordering::SeqCst), 2);
        assert_eq!(repo.member_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn page_failure_ends_walk_but_keeps_earlier_members() {
        let mut mock = MockSite::default();
        mock.directory = two_page_directory();
        mock.failing_directory_pages.insert(2);
        let repo = repo();

        let found = sync_members(&mock, &repo, Path::new("assets")).await.unwrap();

        assert_eq!(found, vec!["alice", "bob"]);
        assert_eq!(repo.member_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn avatar_download_failure_does_not_drop_the_member() {
        let mut page = directory_of(&["alice"]);
        page.rows[0].avatar_url = Some("https://img.example/alice.jpg".into());
        let mut mock = MockSite::default();
        mock.directory = vec![page];
        mock.fail_downloads = true;
        let repo = repo();

        let found = sync_members(&mock, &repo, Path::new("assets")).await.unwrap();

        assert_eq!(found, vec!["alice"]);
        assert_eq!(repo.member_count().unwrap(), 1);
    }
}
