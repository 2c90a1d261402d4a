use crate::models::{FilmStub, Member, RatedFilm, RawFilmRow, RawMemberRow};
use chrono::NaiveDateTime;
use tracing::warn;

// ── Field parsers ─────────────────────────────────────────────────────────────

/// Decode the site's star-rating class. The code counts half-stars, so
/// "rated-10" → 5.0 stars, "rated-7" → 3.5, "rated-1" → 0.5.
pub fn decode_rating(class: &str) -> Option<f64> {
    let code: u32 = class.strip_prefix("rated-")?.trim().parse().ok()?;
    if code == 0 || code > 10 {
        return None;
    }
    Some(code as f64 / 2.0)
}

pub fn parse_year(s: &str) -> Option<i32> {
    let year: i32 = s.trim().parse().ok()?;
    (1850..=2150).contains(&year).then_some(year)
}

/// Watched-count text like "1,204 films" → 1204.
pub fn parse_count(s: &str) -> Option<i64> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Runtime from footer text like "136 mins   More at IMDb".
pub fn parse_runtime(s: &str) -> Option<i32> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        if token.starts_with("min") && i > 0 {
            let digits: String = tokens[i - 1].chars().filter(|c| c.is_ascii_digit()).collect();
            return digits.parse().ok();
        }
    }
    None
}

// ── Row conversions ───────────────────────────────────────────────────────────

/// A row without a slug is unusable and dropped. A row whose title never
/// rendered keeps the slug as a placeholder title. A row without a decodable
/// rating class is dropped — the listing is filtered to rated films, so this
/// only happens on markup drift.
pub fn film_row_to_rated(row: &RawFilmRow) -> Option<RatedFilm> {
    let slug = row.slug.as_deref().map(str::trim).filter(|s| !s.is_empty())?;

    let rating = match row.rating_class.as_deref().and_then(decode_rating) {
        Some(r) => r,
        None => {
            warn!("{}: no decodable rating class, dropping row", slug);
            return None;
        }
    };

    let title = match row.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => t.to_string(),
        None => {
            warn!("{}: title never rendered, using slug as placeholder", slug);
            slug.to_string()
        }
    };

    Some(RatedFilm {
        film: FilmStub {
            slug: slug.to_string(),
            title,
            year: row.year.as_deref().and_then(parse_year),
        },
        rating,
    })
}

pub fn member_row_to_member(row: &RawMemberRow, now: NaiveDateTime) -> Option<Member> {
    let username = row
        .username
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())?;

    let display_name = row
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(username);

    Some(Member {
        username: username.to_string(),
        display_name: display_name.to_string(),
        watched_count: row.watched_count.as_deref().and_then(parse_count),
        avatar_url: row.avatar_url.clone(),
        scraped_at: now,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
