use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Member ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub username: String,
    pub display_name: String,
    pub watched_count: Option<i64>,
    pub avatar_url: Option<String>,
    pub scraped_at: NaiveDateTime,
}

// ── Film ──────────────────────────────────────────────────────────────────────

/// Minimal film row created the first time any rating listing mentions a slug.
/// Title and year are never overwritten on a re-sighting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilmStub {
    pub slug: String,
    pub title: String,
    pub year: Option<i32>,
}

/// Attributes resolved by the detail sub-fetches. Every field is optional: a
/// sub-fetch that failed this pass leaves its fields unset, and the merge
/// keeps whatever the store already has for them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilmDetails {
    pub tmdb: Option<String>,
    pub synopsis: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<i32>,
    pub directors: Option<Vec<String>>,
    pub genres: Option<Vec<String>>,
    pub countries: Option<Vec<String>>,
    pub languages: Option<Vec<String>>,
}

// ── Rating ────────────────────────────────────────────────────────────────────

/// One decoded row of a member's rated-films listing: the film it references
/// plus the star score on the half-star scale (0.5–5.0).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatedFilm {
    pub film: FilmStub,
    pub rating: f64,
}

// ── Extracted pages ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DirectoryPage {
    pub rows: Vec<RawMemberRow>,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RatingsPage {
    pub rows: Vec<RawFilmRow>,
    pub total_pages: u32,
}

/// Film-page sub-fetch: poster asset, external cross-reference, synopsis.
#[derive(Debug, Clone, Default)]
pub struct FilmPageData {
    pub poster_url: Option<String>,
    pub tmdb: Option<String>,
    pub synopsis: Option<String>,
    pub year: Option<i32>,
}

/// Details-page sub-fetch: production countries, spoken languages, runtime.
#[derive(Debug, Clone, Default)]
pub struct LocaleDetails {
    pub countries: Vec<String>,
    pub languages: Vec<String>,
    pub runtime: Option<i32>,
}

// ── Raw listing rows ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RawMemberRow {
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub watched_count: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawFilmRow {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub year: Option<String>,
    /// CSS class carrying the encoded score, e.g. "rated-8".
    pub rating_class: Option<String>,
}
