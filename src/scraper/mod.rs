pub mod browser;
pub mod cleaner;
pub mod parsers;
pub mod retry;

use crate::config::SiteConfig;
use crate::models::{DirectoryPage, FilmPageData, LocaleDetails, RatingsPage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use self::browser::{FetchError, RenderedPage, RenderingEngine, WaitPolicy};
use self::retry::RetryPolicy;

// ── Site trait ────────────────────────────────────────────────────────────────

/// The remote rating site as the pipeline sees it. The real implementation
/// drives the shared rendering engine; tests substitute a scripted mock.
#[async_trait]
pub trait RatingSite: Send + Sync {
    /// One page of the tracked-members directory. `Ok(None)` past the last page.
    async fn directory_page(&self, page: u32) -> Result<Option<DirectoryPage>>;

    /// One page of a member's rated-films listing. `Ok(None)` past the last page.
    async fn ratings_page(&self, username: &str, page: u32) -> Result<Option<RatingsPage>>;

    async fn film_page(&self, slug: &str) -> Result<FilmPageData>;
    async fn film_directors(&self, slug: &str) -> Result<Vec<String>>;
    async fn film_genres(&self, slug: &str) -> Result<Vec<String>>;
    async fn film_locale(&self, slug: &str) -> Result<LocaleDetails>;

    /// Download an image asset to `dest`. Callers treat failures as best-effort.
    async fn download_asset(&self, url: &str, dest: &Path) -> Result<()>;
}

// ── Letterboxd-shaped implementation ─────────────────────────────────────────

pub struct LetterboxdSite {
    engine: RenderingEngine,
    assets: reqwest::Client,
    config: SiteConfig,
    listing_retry: RetryPolicy,
    detail_retry: RetryPolicy,
}

impl LetterboxdSite {
    pub fn new(engine: RenderingEngine, config: &SiteConfig) -> Result<Self> {
        let assets = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.navigation_timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build asset HTTP client")?;

        let base = Duration::from_millis(config.retry_base_delay_ms);
        let jitter = Duration::from_millis(config.jitter_ms);

        Ok(Self {
            engine,
            assets,
            listing_retry: RetryPolicy::new(config.listing_attempts, base, jitter),
            detail_retry: RetryPolicy::new(config.detail_attempts, base, jitter),
            config: config.clone(),
        })
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn directory_url(&self, page: u32) -> String {
        format!(
            "{}/{}/following/page/{}/",
            self.base(),
            self.config.directory_account,
            page
        )
    }

    /// The listing is filtered to the 0.5–5 star range at the source, so
    /// every row carries a rating class.
    fn ratings_url(&self, username: &str, page: u32) -> String {
        format!("{}/{}/films/rated/.5-5/page/{}/", self.base(), username, page)
    }

    fn film_url(&self, slug: &str, tab: &str) -> String {
        if tab.is_empty() {
            format!("{}/film/{}/", self.base(), slug)
        } else {
            format!("{}/film/{}/{}/", self.base(), slug, tab)
        }
    }

    /// Asset srcs are usually absolute CDN URLs, but protocol-relative and
    /// path-relative forms show up too; resolve them against the site base.
    fn absolute_url(&self, href: &str) -> Result<Url> {
        match Url::parse(href) {
            Ok(u) => Ok(u),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = Url::parse(self.base())
                    .with_context(|| format!("invalid base url {:?}", self.config.base_url))?;
                base.join(href)
                    .with_context(|| format!("cannot resolve {href:?}"))
            }
            Err(e) => Err(e).with_context(|| format!("cannot parse {href:?}")),
        }
    }

    /// Navigate with the given retry schedule; the final failure is wrapped
    /// with the attempt count for the unit's log line.
    async fn fetch_rendered(
        &self,
        url: &str,
        wait: WaitPolicy,
        policy: RetryPolicy,
    ) -> Result<RenderedPage, FetchError> {
        debug!("GET {url}");
        policy
            .run(|| self.engine.goto(url, &wait))
            .await
            .map_err(|last| FetchError::exhausted(url, policy.max_attempts, last))
    }

    /// Detail sub-pages render server-side; one snapshot is enough.
    async fn fetch_detail_html(&self, url: &str, wait_selector: &str) -> Result<String, FetchError> {
        let page = self
            .fetch_rendered(
                url,
                WaitPolicy::Selector(wait_selector.to_string()),
                self.detail_retry,
            )
            .await?;
        let html = page.content().await;
        page.close().await;
        html
    }

    /// Listing attributes render client-side: re-snapshot the live page with
    /// a linearly-growing delay until every row is complete or the bounded
    /// poll is exhausted. Exhaustion yields partial rows plus a warning.
    async fn polled_rating_rows(&self, page: &RenderedPage) -> Result<Option<RatingsPage>> {
        let still_rendering =
            |listing: &RatingsPage| listing.rows.iter().any(|r| r.title.is_none() || r.year.is_none());

        let mut parsed = parsers::parse_ratings_page(&page.content().await?)?;
        let mut attempt = 0;
        while let Some(listing) = &parsed {
            if !still_rendering(listing) || attempt >= self.config.attribute_poll_attempts {
                break;
            }
            attempt += 1;
            debug!("attempt {attempt}: rows still rendering on {}", page.url());
            sleep(Duration::from_millis(
                self.config.attribute_poll_delay_ms * attempt as u64,
            ))
            .await;
            parsed = parsers::parse_ratings_page(&page.content().await?)?;
        }

        if let Some(listing) = &parsed {
            for row in listing.rows.iter().filter(|r| r.title.is_none() || r.year.is_none()) {
                warn!(
                    "attributes never rendered for {:?} on {}",
                    row.slug,
                    page.url()
                );
            }
        }

        Ok(parsed)
    }
}

#[async_trait]
impl RatingSite for LetterboxdSite {
    async fn directory_page(&self, page_no: u32) -> Result<Option<DirectoryPage>> {
        let url = self.directory_url(page_no);
        let page = self
            .fetch_rendered(&url, WaitPolicy::NetworkIdle, self.listing_retry)
            .await
            .with_context(|| format!("directory page {page_no}"))?;
        let html = page.content().await;
        page.close().await;
        parsers::parse_directory_page(&html?)
    }

    async fn ratings_page(&self, username: &str, page_no: u32) -> Result<Option<RatingsPage>> {
        let url = self.ratings_url(username, page_no);
        let page = self
            .fetch_rendered(&url, WaitPolicy::NetworkIdle, self.listing_retry)
            .await
            .with_context(|| format!("ratings page {page_no} for {username}"))?;
        let rows = self.polled_rating_rows(&page).await;
        page.close().await;
        rows
    }

    async fn film_page(&self, slug: &str) -> Result<FilmPageData> {
        let html = self
            .fetch_detail_html(&self.film_url(slug, ""), "#film-page-wrapper")
            .await?;
        Ok(parsers::parse_film_page(&html))
    }

    async fn film_directors(&self, slug: &str) -> Result<Vec<String>> {
        let html = self
            .fetch_detail_html(&self.film_url(slug, "crew"), "#tab-crew")
            .await?;
        Ok(parsers::parse_directors(&html))
    }

    async fn film_genres(&self, slug: &str) -> Result<Vec<String>> {
        let html = self
            .fetch_detail_html(&self.film_url(slug, "genres"), "#tab-genres")
            .await?;
        Ok(parsers::parse_genres(&html))
    }

    async fn film_locale(&self, slug: &str) -> Result<LocaleDetails> {
        let html = self
            .fetch_detail_html(&self.film_url(slug, "details"), "#tab-details")
            .await?;
        Ok(parsers::parse_locale(&html))
    }

    async fn download_asset(&self, url: &str, dest: &Path) -> Result<()> {
        let target = self.absolute_url(url)?;
        let url = target.as_str();
        let bytes = self
            .detail_retry
            .run_if(
                || async move {
                    let resp = self.assets.get(url).send().await.map_err(|e| {
                        FetchError::Request {
                            url: url.to_string(),
                            message: e.to_string(),
                        }
                    })?;
                    let status = resp.status();
                    if !status.is_success() {
                        return Err(FetchError::Status {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    }
                    resp.bytes().await.map_err(|e| FetchError::Request {
                        url: url.to_string(),
                        message: e.to_string(),
                    })
                },
                |e: &FetchError| !e.is_terminal(),
            )
            .await
            .with_context(|| format!("downloading asset {url}"))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("writing {}", dest.display()))?;
        Ok(())
    }
}

// ── Scripted mock for pipeline tests ─────────────────────────────────────────

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::models::{RawFilmRow, RawMemberRow};
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted in-memory site: page sequences per member, per-slug detail
    /// payloads, failure injection, and fetch counters.
    #[derive(Default)]
    pub struct MockSite {
        pub directory: Vec<DirectoryPage>,
        pub ratings: HashMap<String, Vec<RatingsPage>>,
        /// Directory pages whose fetch errors.
        pub failing_directory_pages: HashSet<u32>,
        /// Members whose every listing fetch errors.
        pub failing_members: HashSet<String>,
        pub fail_downloads: bool,
        pub film_pages: HashMap<String, FilmPageData>,
        pub directors: HashMap<String, Vec<String>>,
        pub genres: HashMap<String, Vec<String>>,
        pub locales: HashMap<String, LocaleDetails>,
        pub fail_film_page: HashSet<String>,
        pub fail_directors: HashSet<String>,
        pub fail_genres: HashSet<String>,
        pub fail_locale: HashSet<String>,
        pub directory_fetches: AtomicUsize,
        pub ratings_fetches: AtomicUsize,
        pub downloads: Mutex<Vec<PathBuf>>,
    }

    pub fn directory_of(usernames: &[&str]) -> DirectoryPage {
        DirectoryPage {
            rows: usernames
                .iter()
                .map(|u| RawMemberRow {
                    username: Some(u.to_string()),
                    display_name: Some(u.to_string()),
                    avatar_url: None,
                    watched_count: Some("10 films".into()),
                })
                .collect(),
            total_pages: 1,
        }
    }

    /// Rows as (slug, title, year, rating code).
    pub fn ratings_page_of(
        rows: &[(&str, &str, Option<&str>, u32)],
        total_pages: u32,
    ) -> RatingsPage {
        RatingsPage {
            rows: rows
                .iter()
                .map(|(slug, title, year, code)| RawFilmRow {
                    slug: Some(slug.to_string()),
                    title: Some(title.to_string()),
                    year: year.map(str::to_string),
                    rating_class: Some(format!("rated-{code}")),
                })
                .collect(),
            total_pages,
        }
    }

    #[async_trait]
    impl RatingSite for MockSite {
        async fn directory_page(&self, page: u32) -> Result<Option<DirectoryPage>> {
            self.directory_fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing_directory_pages.contains(&page) {
                anyhow::bail!("simulated outage for directory page {page}");
            }
            Ok(self.directory.get(page as usize - 1).cloned())
        }

        async fn ratings_page(&self, username: &str, page: u32) -> Result<Option<RatingsPage>> {
            self.ratings_fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing_members.contains(username) {
                anyhow::bail!("simulated outage for {username}");
            }
            Ok(self
                .ratings
                .get(username)
                .and_then(|pages| pages.get(page as usize - 1))
                .cloned())
        }

        async fn film_page(&self, slug: &str) -> Result<FilmPageData> {
            if self.fail_film_page.contains(slug) {
                anyhow::bail!("film page down for {slug}");
            }
            Ok(self.film_pages.get(slug).cloned().unwrap_or_default())
        }

        async fn film_directors(&self, slug: &str) -> Result<Vec<String>> {
            if self.fail_directors.contains(slug) {
                anyhow::bail!("crew page down for {slug}");
            }
            Ok(self.directors.get(slug).cloned().unwrap_or_default())
        }

        async fn film_genres(&self, slug: &str) -> Result<Vec<String>> {
            if self.fail_genres.contains(slug) {
                anyhow::bail!("genres page down for {slug}");
            }
            Ok(self.genres.get(slug).cloned().unwrap_or_default())
        }

        async fn film_locale(&self, slug: &str) -> Result<LocaleDetails> {
            if self.fail_locale.contains(slug) {
                anyhow::bail!("details page down for {slug}");
            }
            Ok(self.locales.get(slug).cloned().unwrap_or_default())
        }

        async fn download_asset(&self, _url: &str, dest: &Path) -> Result<()> {
            if self.fail_downloads {
                anyhow::bail!("simulated download failure");
            }
            self.downloads
                .lock()
                .expect("downloads mutex poisoned")
                .push(dest.to_path_buf());
            Ok(())
        }
    }
}
