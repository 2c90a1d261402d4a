use crate::config::AppConfig;
use crate::models::FilmDetails;
use crate::scraper::RatingSite;
use crate::storage::Repository;
use crate::utils;
use anyhow::Result;
use chrono::Utc;
use rand::RngExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
pub struct EnrichTotals {
    pub films: usize,
    pub errors: usize,
}

/// Enrich every film the selection policy picked, in fixed-width batches:
/// full concurrency within a batch, a short randomized pause between
/// batches. Detail pages are light, so the fan-out is wider than the
/// member harvest's.
pub async fn enrich_all(
    site: &Arc<dyn RatingSite>,
    repo: &Arc<Repository>,
    config: &AppConfig,
) -> Result<EnrichTotals> {
    let now = Utc::now().naive_utc();
    let slugs = repo.films_needing_details(now, config.pipeline.lookback_days)?;
    info!("{} films selected for enrichment", slugs.len());

    let mut totals = EnrichTotals::default();
    let batch_width = config.pipeline.detail_batch_size.max(1);

    for (i, batch) in slugs.chunks(batch_width).enumerate() {
        if i > 0 {
            batch_delay(config).await;
        }

        let mut handles = Vec::new();
        for slug in batch {
            let site = Arc::clone(site);
            let repo = Arc::clone(repo);
            let assets_dir = config.storage.assets_dir.clone();
            let slug = slug.clone();

            handles.push((
                slug.clone(),
                tokio::spawn(async move { enrich_film(&*site, &repo, &assets_dir, &slug).await }),
            ));
        }

        for (slug, handle) in handles {
            match handle.await {
                Ok(Ok(())) => totals.films += 1,
                Ok(Err(e)) => {
                    warn!("{}: {:#}", slug, e);
                    totals.errors += 1;
                }
                Err(e) => {
                    error!("Task panic for {}: {}", slug, e);
                    totals.errors += 1;
                }
            }
        }
    }

    Ok(totals)
}

/// Four independent sub-fetches against the film's sub-pages. Each is
/// individually contained: a failure leaves its fields unset and the merge
/// still writes whatever did resolve.
pub async fn enrich_film(
    site: &dyn RatingSite,
    repo: &Repository,
    assets_dir: &Path,
    slug: &str,
) -> Result<()> {
    let (page, directors, genres, locale) = tokio::join!(
        site.film_page(slug),
        site.film_directors(slug),
        site.film_genres(slug),
        site.film_locale(slug),
    );

    let mut details = FilmDetails::default();
    let mut poster_url = None;

    match page {
        Ok(p) => {
            poster_url = p.poster_url;
            details.tmdb = p.tmdb;
            details.synopsis = p.synopsis;
            details.year = p.year;
        }
        Err(e) => warn!("{slug}: film page: {e:#}"),
    }
    match directors {
        Ok(d) => details.directors = Some(d),
        Err(e) => warn!("{slug}: crew: {e:#}"),
    }
    match genres {
        Ok(g) => details.genres = Some(g),
        Err(e) => warn!("{slug}: genres: {e:#}"),
    }
    match locale {
        Ok(l) => {
            details.countries = Some(l.countries);
            details.languages = Some(l.languages);
            details.runtime = l.runtime;
        }
        Err(e) => warn!("{slug}: locale: {e:#}"),
    }

    if let Some(url) = &poster_url {
        let dest = assets_dir
            .join("posters")
            .join(format!("{}.{}", slug, utils::asset_ext(url)));
        if let Err(e) = site.download_asset(url, &dest).await {
            warn!("poster for {slug}: {e:#}");
        }
    }

    repo.update_film_details(slug, &details, Utc::now().naive_utc())
}

async fn batch_delay(config: &AppConfig) {
    let jitter = if config.site.jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=config.site.jitter_ms)
    };
    tokio::time::sleep(Duration::from_millis(
        config.pipeline.batch_delay_ms + jitter,
    ))
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FilmPageData, FilmStub, LocaleDetails};
    use crate::scraper::mock::MockSite;
    use chrono::NaiveDate;

    fn repo_with_stub(slug: &str) -> Arc<Repository> {
        let r = Repository::open_in_memory().unwrap();
        r.run_migrations().unwrap();
        let created = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        r.upsert_film_stub(
            &FilmStub {
                slug: slug.to_string(),
                title: slug.to_string(),
                year: None,
            },
            created,
        )
        .unwrap();
        Arc::new(r)
    }

    #[tokio::test]
    async fn one_surviving_sub_fetch_still_merges() {
        let mut mock = MockSite::default();
        mock.genres
            .insert("foo-1999".into(), vec!["Drama".into(), "Crime".into()]);
        mock.fail_film_page.insert("foo-1999".into());
        mock.fail_directors.insert("foo-1999".into());
        mock.fail_locale.insert("foo-1999".into());
        let repo = repo_with_stub("foo-1999");

        enrich_film(&mock, &repo, Path::new("assets"), "foo-1999")
            .await
            .unwrap();

        let film = repo.film_by_slug("foo-1999").unwrap().unwrap();
        assert_eq!(film.genres.as_deref(), Some("Drama; Crime"));
        assert_eq!(film.tmdb, None);
        assert_eq!(film.synopsis, None);
        assert_eq!(film.runtime, None);
        assert_eq!(film.directors, None);
        assert_eq!(film.countries, None);
        assert_eq!(film.languages, None);
    }

    #[tokio::test]
    async fn full_enrichment_merges_all_fields_and_downloads_poster() {
        let mut mock = MockSite::default();
        mock.film_pages.insert(
            "foo-1999".into(),
            FilmPageData {
                poster_url: Some("https://img.example/foo.jpg".into()),
                tmdb: Some("https://www.themoviedb.org/movie/603/".into()),
                synopsis: Some("A film.".into()),
                year: Some(1999),
            },
        );
        mock.directors.insert("foo-1999".into(), vec!["Someone".into()]);
        mock.genres.insert("foo-1999".into(), vec!["Drama".into()]);
        mock.locales.insert(
            "foo-1999".into(),
            LocaleDetails {
                countries: vec!["USA".into()],
                languages: vec!["English".into()],
                runtime: Some(136),
            },
        );
        let repo = repo_with_stub("foo-1999");

        enrich_film(&mock, &repo, Path::new("assets"), "foo-1999")
            .await
            .unwrap();

        let film = repo.film_by_slug("foo-1999").unwrap().unwrap();
        assert_eq!(film.year, Some(1999));
        assert_eq!(film.runtime, Some(136));
        assert_eq!(film.directors.as_deref(), Some("Someone"));
        assert_eq!(film.countries.as_deref(), Some("USA"));

        let downloads = mock.downloads.lock().unwrap();
        assert_eq!(downloads.len(), 1);
        assert!(downloads[0].ends_with("posters/foo-1999.jpg"));
    }

    #[tokio::test]
    async fn batches_cover_every_selected_film() {
        let mut mock = MockSite::default();
        mock.genres.insert("a".into(), vec!["Drama".into()]);
        mock.genres.insert("b".into(), vec!["Comedy".into()]);
        mock.genres.insert("c".into(), vec!["Horror".into()]);
        let site: Arc<dyn RatingSite> = Arc::new(mock);

        let repo = repo_with_stub("a");
        let created = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        for slug in ["b", "c"] {
            repo.upsert_film_stub(
                &FilmStub {
                    slug: slug.to_string(),
                    title: slug.to_string(),
                    year: None,
                },
                created,
            )
            .unwrap();
        }

        let mut config = AppConfig::default();
        config.pipeline.detail_batch_size = 2;
        config.pipeline.batch_delay_ms = 0;
        config.site.jitter_ms = 0;

        let totals = enrich_all(&site, &repo, &config).await.unwrap();
        assert_eq!(totals.films, 3);
        assert_eq!(totals.errors, 0);

        for slug in ["a", "b", "c"] {
            assert!(repo.film_by_slug(slug).unwrap().unwrap().genres.is_some());
        }
    }
}
