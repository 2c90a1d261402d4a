use crate::models::{FilmDetails, FilmStub, Member};
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS members (
    username      VARCHAR PRIMARY KEY,
    display_name  VARCHAR NOT NULL DEFAULT '',
    watched_count BIGINT,
    avatar_url    VARCHAR,
    scraped_at    TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS films (
    slug        VARCHAR PRIMARY KEY,
    title       VARCHAR NOT NULL,
    year        INTEGER,
    tmdb        VARCHAR,
    synopsis    VARCHAR,
    runtime     INTEGER,
    directors   VARCHAR,
    genres      VARCHAR,
    countries   VARCHAR,
    languages   VARCHAR,
    created_at  TIMESTAMP NOT NULL,
    scraped_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS ratings (
    username    VARCHAR NOT NULL,
    slug        VARCHAR NOT NULL,
    rating      DOUBLE  NOT NULL,
    updated_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (username, slug)
);

CREATE TABLE IF NOT EXISTS harvest_runs (
    id                INTEGER PRIMARY KEY,
    started_at        TIMESTAMP NOT NULL,
    finished_at       TIMESTAMP,
    status            VARCHAR NOT NULL DEFAULT 'running',
    members_synced    INTEGER DEFAULT 0,
    ratings_upserted  INTEGER DEFAULT 0,
    films_enriched    INTEGER DEFAULT 0,
    error_msg         VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ratings_slug     ON ratings (slug);
CREATE INDEX IF NOT EXISTS idx_ratings_username ON ratings (username);
CREATE INDEX IF NOT EXISTS idx_films_created    ON films (created_at);
"#;

const LIST_SEPARATOR: &str = "; ";

// ── Repository ────────────────────────────────────────────────────────────────

/// Handle on the embedded store, shared by every concurrent harvest unit.
/// Statements are short-lived, so contention is just the inner mutex.
pub struct Repository {
    conn: Mutex<Connection>,
}

/// One films row as stored, list columns still in their joined form.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFilm {
    pub slug: String,
    pub title: String,
    pub year: Option<i32>,
    pub tmdb: Option<String>,
    pub synopsis: Option<String>,
    pub runtime: Option<i32>,
    pub directors: Option<String>,
    pub genres: Option<String>,
    pub countries: Option<String>,
    pub languages: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: String,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection mutex poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Members ───────────────────────────────────────────────────────────────

    /// Insert-or-refresh by username: display name and watched counter are
    /// last write wins; the avatar URL survives a row that missed its image.
    pub fn upsert_member(&self, m: &Member) -> Result<()> {
        self.conn()?
            .execute(
                r#"INSERT INTO members (username, display_name, watched_count, avatar_url, scraped_at)
                   VALUES (?, ?, ?, ?, ?)
                   ON CONFLICT (username) DO UPDATE SET
                       display_name  = excluded.display_name,
                       watched_count = excluded.watched_count,
                       avatar_url    = COALESCE(excluded.avatar_url, members.avatar_url),
                       scraped_at    = excluded.scraped_at"#,
                params![
                    m.username,
                    m.display_name,
                    m.watched_count,
                    m.avatar_url,
                    m.scraped_at
                ],
            )
            .with_context(|| format!("upsert member {}", m.username))?;
        Ok(())
    }

    pub fn list_members(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT username FROM members ORDER BY username")?;
        let members: Vec<String> = stmt
            .query_map([], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(members)
    }

    pub fn member_by_username(&self, username: &str) -> Result<Option<Member>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT username, display_name, watched_count, avatar_url, scraped_at
             FROM members WHERE username = ?",
        )?;
        let mut rows = stmt.query_map(params![username], |r| {
            Ok(Member {
                username: r.get(0)?,
                display_name: r.get(1)?,
                watched_count: r.get(2)?,
                avatar_url: r.get(3)?,
                scraped_at: r.get(4)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    // ── Films ─────────────────────────────────────────────────────────────────

    /// First sighting creates the stub; a re-sighting never overwrites the
    /// stored title or year.
    pub fn upsert_film_stub(&self, film: &FilmStub, now: NaiveDateTime) -> Result<()> {
        self.conn()?
            .execute(
                r#"INSERT INTO films (slug, title, year, created_at, scraped_at)
                   VALUES (?, ?, ?, ?, ?)
                   ON CONFLICT (slug) DO NOTHING"#,
                params![film.slug, film.title, film.year, now, now],
            )
            .with_context(|| format!("upsert film {}", film.slug))?;
        Ok(())
    }

    /// Opportunistic merge: only attributes resolved this pass overwrite;
    /// a NULL parameter keeps whatever the row already holds.
    pub fn update_film_details(
        &self,
        slug: &str,
        details: &FilmDetails,
        now: NaiveDateTime,
    ) -> Result<()> {
        let join = |v: &Option<Vec<String>>| v.as_ref().map(|v| v.join(LIST_SEPARATOR));
        let directors = join(&details.directors);
        let genres = join(&details.genres);
        let countries = join(&details.countries);
        let languages = join(&details.languages);

        self.conn()?
            .execute(
                r#"UPDATE films SET
                       tmdb       = COALESCE(?, tmdb),
                       synopsis   = COALESCE(?, synopsis),
                       year       = COALESCE(?, year),
                       runtime    = COALESCE(?, runtime),
                       directors  = COALESCE(?, directors),
                       genres     = COALESCE(?, genres),
                       countries  = COALESCE(?, countries),
                       languages  = COALESCE(?, languages),
                       scraped_at = ?
                   WHERE slug = ?"#,
                params![
                    details.tmdb,
                    details.synopsis,
                    details.year,
                    details.runtime,
                    directors,
                    genres,
                    countries,
                    languages,
                    now,
                    slug
                ],
            )
            .with_context(|| format!("update film details {slug}"))?;
        Ok(())
    }

    /// Enrichment selection: recently created films regardless of
    /// completeness, plus any film with an unset descriptive attribute.
    pub fn films_needing_details(
        &self,
        now: NaiveDateTime,
        lookback_days: i64,
    ) -> Result<Vec<String>> {
        let cutoff = now - chrono::Duration::days(lookback_days);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT slug FROM films
               WHERE created_at >= ?
                  OR tmdb IS NULL OR synopsis IS NULL OR year IS NULL OR runtime IS NULL
                  OR directors IS NULL OR genres IS NULL OR countries IS NULL OR languages IS NULL
               ORDER BY created_at DESC, slug"#,
        )?;
        let slugs: Vec<String> = stmt
            .query_map(params![cutoff], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(slugs)
    }

    pub fn film_by_slug(&self, slug: &str) -> Result<Option<StoredFilm>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT slug, title, year, tmdb, synopsis, runtime,
                      directors, genres, countries, languages
               FROM films WHERE slug = ?"#,
        )?;
        let mut rows = stmt.query_map(params![slug], |r| {
            Ok(StoredFilm {
                slug: r.get(0)?,
                title: r.get(1)?,
                year: r.get(2)?,
                tmdb: r.get(3)?,
                synopsis: r.get(4)?,
                runtime: r.get(5)?,
                directors: r.get(6)?,
                genres: r.get(7)?,
                countries: r.get(8)?,
                languages: r.get(9)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    // ── Ratings ───────────────────────────────────────────────────────────────

    /// Idempotent upsert with write suppression: an unchanged score leaves
    /// the row untouched, so re-harvests never churn the timestamp.
    pub fn upsert_rating(
        &self,
        username: &str,
        slug: &str,
        rating: f64,
        now: NaiveDateTime,
    ) -> Result<()> {
        self.conn()?
            .execute(
                r#"INSERT INTO ratings (username, slug, rating, updated_at)
                   VALUES (?, ?, ?, ?)
                   ON CONFLICT (username, slug) DO UPDATE SET
                       rating     = excluded.rating,
                       updated_at = excluded.updated_at
                   WHERE ratings.rating <> excluded.rating"#,
                params![username, slug, rating, now],
            )
            .with_context(|| format!("upsert rating {username}/{slug}"))?;
        Ok(())
    }

    pub fn rating_for(&self, username: &str, slug: &str) -> Result<Option<(f64, NaiveDateTime)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT rating, updated_at FROM ratings WHERE username = ? AND slug = ?")?;
        let mut rows =
            stmt.query_map(params![username, slug], |r| Ok((r.get(0)?, r.get(1)?)))?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    // ── Counts ────────────────────────────────────────────────────────────────

    pub fn member_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM members")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn film_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM films")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn rating_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM ratings")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Harvest run log ───────────────────────────────────────────────────────

    pub fn begin_harvest_run(&self) -> Result<i64> {
        let conn = self.conn()?;
        let id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(id), 0) + 1 FROM harvest_runs",
            [],
            |r| r.get(0),
        )?;
        conn.execute(
            "INSERT INTO harvest_runs (id, started_at, status) VALUES (?, ?, 'running')",
            params![id, Utc::now().naive_utc()],
        )?;
        Ok(id)
    }

    pub fn finish_harvest_run(
        &self,
        run_id: i64,
        members: usize,
        ratings: usize,
        films: usize,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn()?.execute(
            r#"UPDATE harvest_runs SET
               finished_at = ?, status = ?,
               members_synced = ?, ratings_upserted = ?, films_enriched = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                members as i64,
                ratings as i64,
                films as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_run(&self) -> Result<Option<RunSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT started_at, finished_at, status FROM harvest_runs ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], |r| {
            Ok(RunSummary {
                started_at: r.get(0)?,
                finished_at: r.get(1)?,
                status: r.get(2)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
