use crate::models::{DirectoryPage, FilmPageData, LocaleDetails, RatingsPage, RawFilmRow, RawMemberRow};
use crate::scraper::cleaner;
use anyhow::Result;
use scraper::{Html, Selector};

fn sel(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("selector {css:?}: {e:?}"))
}

// ── Pagination ────────────────────────────────────────────────────────────────

/// Total page count from the pagination control; 1 when the control is
/// absent (single-page result).
pub fn parse_total_pages(html: &str) -> u32 {
    total_pages_of(&Html::parse_document(html))
}

fn total_pages_of(doc: &Html) -> u32 {
    let Ok(last_sel) = Selector::parse("div.pagination ul li:last-child a") else {
        return 1;
    };
    doc.select(&last_sel)
        .next()
        .map(|a| a.text().collect::<String>())
        .and_then(|t| t.trim().parse().ok())
        .unwrap_or(1)
}

// ── Member directory page ─────────────────────────────────────────────────────

/// Rows of one tracked-members listing page. `None` means the listing table
/// is absent — the normal end-of-pagination signal, not an error.
pub fn parse_directory_page(html: &str) -> Result<Option<DirectoryPage>> {
    let doc = Html::parse_document(html);

    let container = sel("table.person-table")?;
    if doc.select(&container).next().is_none() {
        return Ok(None);
    }

    let row_sel = sel("table.person-table tbody tr")?;
    let name_sel = sel("a.name")?;
    let avatar_sel = sel("a.avatar img")?;
    let metadata_sel = sel("small.metadata a")?;

    let mut rows = Vec::new();
    for tr in doc.select(&row_sel) {
        let name = tr.select(&name_sel).next();

        let username = name
            .and_then(|a| a.value().attr("href"))
            .map(|href| href.trim_matches('/').to_string())
            .filter(|s| !s.is_empty());
        let display_name = name
            .map(|a| a.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());
        let avatar_url = tr
            .select(&avatar_sel)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string);
        let watched_count = tr
            .select(&metadata_sel)
            .next()
            .map(|a| a.text().collect::<String>().trim().to_string());

        rows.push(RawMemberRow {
            username,
            display_name,
            avatar_url,
            watched_count,
        });
    }

    Ok(Some(DirectoryPage {
        rows,
        total_pages: total_pages_of(&doc),
    }))
}

// ── Rated-films listing page ──────────────────────────────────────────────────

/// Rows of one rated-films listing page. `None` means the poster list is
/// absent — end of pagination. Attribute fields stay `None` while the page
/// is still rendering them; callers poll by re-snapshotting.
pub fn parse_ratings_page(html: &str) -> Result<Option<RatingsPage>> {
    let doc = Html::parse_document(html);

    let container = sel("ul.poster-list")?;
    if doc.select(&container).next().is_none() {
        return Ok(None);
    }

    let row_sel = sel("li.poster-container")?;
    let poster_sel = sel("div.film-poster")?;
    let rating_sel = sel("p.poster-viewingdata span")?;

    let mut rows = Vec::new();
    for li in doc.select(&row_sel) {
        let poster = li.select(&poster_sel).next();
        let attr =
            |name: &str| poster.and_then(|p| p.value().attr(name)).map(str::to_string);

        let rating_class = li
            .select(&rating_sel)
            .flat_map(|span| span.value().classes())
            .find(|cls| cls.starts_with("rated-"))
            .map(str::to_string);

        rows.push(RawFilmRow {
            slug: attr("data-film-slug"),
            title: attr("data-film-name"),
            year: attr("data-film-release-year"),
            rating_class,
        });
    }

    Ok(Some(RatingsPage {
        rows,
        total_pages: total_pages_of(&doc),
    }))
}

// ── Film detail sub-pages ─────────────────────────────────────────────────────

/// Main film page: poster asset URL, external cross-reference, synopsis,
/// release year. Absent fields stay `None`; the merge keeps stored values.
pub fn parse_film_page(html: &str) -> FilmPageData {
    let doc = Html::parse_document(html);
    let mut data = FilmPageData::default();

    if let Ok(meta) = Selector::parse(r#"meta[property="og:image"]"#) {
        data.poster_url = doc
            .select(&meta)
            .next()
            .and_then(|m| m.value().attr("content"))
            .map(str::to_string);
    }
    if let Ok(tmdb) = Selector::parse(r#"a[data-track-action="TMDb"]"#) {
        data.tmdb = doc
            .select(&tmdb)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);
    }
    if let Ok(synopsis) = Selector::parse("div.truncate p") {
        data.synopsis = doc
            .select(&synopsis)
            .next()
            .map(|p| p.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());
    }
    if let Ok(year) = Selector::parse("div.releaseyear a") {
        data.year = doc
            .select(&year)
            .next()
            .and_then(|a| cleaner::parse_year(&a.text().collect::<String>()));
    }

    data
}

pub fn parse_directors(html: &str) -> Vec<String> {
    collect_anchor_texts(&Html::parse_document(html), r#"a[href^="/director/"]"#)
}

pub fn parse_genres(html: &str) -> Vec<String> {
    collect_anchor_texts(&Html::parse_document(html), r#"a[href^="/films/genre/"]"#)
}

/// Details page: production countries, spoken languages, runtime footer.
pub fn parse_locale(html: &str) -> LocaleDetails {
    let doc = Html::parse_document(html);

    let runtime = Selector::parse("p.text-link.text-footer")
        .ok()
        .and_then(|footer| {
            doc.select(&footer)
                .next()
                .and_then(|p| cleaner::parse_runtime(&p.text().collect::<String>()))
        });

    LocaleDetails {
        countries: collect_anchor_texts(&doc, r#"a[href^="/films/country/"]"#),
        languages: collect_anchor_texts(&doc, r#"a[href^="/films/language/"]"#),
        runtime,
    }
}

/// Anchor texts in document order, deduplicated (the site repeats the
/// primary language in its spoken-languages block).
fn collect_anchor_texts(doc: &Html, css: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(css) else {
        return Vec::new();
    };
    let mut texts: Vec<String> = Vec::new();
    for el in doc.select(&selector) {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() && !texts.contains(&text) {
            texts.push(text);
        }
    }
    texts
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const DIRECTORY_PAGE: &str = r#"
        <html><body>
        <table class="person-table">
          <tbody>
            <tr>
              <td class="table-person">
                <a href="/alice/" class="avatar"><img src="https://img.example/alice.jpg"/></a>
                <h3 class="title-3"><a href="/alice/" class="name">Alice L.</a></h3>
                <small class="metadata"><a href="/alice/films/">1,204 films</a></small>
              </td>
            </tr>
            <tr>
              <td class="table-person">
                <h3 class="title-3"><a href="/bob/" class="name">Bob</a></h3>
              </td>
            </tr>
          </tbody>
        </table>
        <div class="pagination"><ul>
          <li><a href="/page/1/">1</a></li>
          <li><a href="/page/2/">2</a></li>
          <li class="paginate-page"><a href="/page/3/">3</a></li>
        </ul></div>
        </body></html>
    "#;

    const RATINGS_PAGE: &str = r#"
        <html><body>
        <ul class="poster-list -p70 film-list">
          <li class="poster-container">
            <div class="film-poster" data-film-slug="foo-1999"
                 data-film-name="Foo" data-film-release-year="1999"></div>
            <p class="poster-viewingdata"><span class="rating rated-8"></span></p>
          </li>
          <li class="poster-container">
            <div class="film-poster" data-film-slug="bar"></div>
            <p class="poster-viewingdata"><span class="rating rated-10"></span></p>
          </li>
        </ul>
        </body></html>
    "#;

    const FILM_PAGE: &str = r#"
        <html><head>
        <meta property="og:image" content="https://img.example/foo-poster.jpg"/>
        </head><body>
        <div class="releaseyear"><a href="/films/year/1999/">1999</a></div>
        <div class="truncate"><p>A film about a thing.</p></div>
        <a href="https://www.themoviedb.org/movie/603/" data-track-action="TMDb">TMDb</a>
        </body></html>
    "#;

    const DETAILS_PAGE: &str = r#"
        <html><body>
        <div id="tab-details">
          <a href="/films/country/usa/">USA</a>
          <a href="/films/country/france/">France</a>
          <a href="/films/language/english/">English</a>
          <a href="/films/language/english/">English</a>
        </div>
        <p class="text-link text-footer">136&nbsp;mins &nbsp; More at <a>IMDb</a></p>
        </body></html>
    "#;

    #[test]
    fn directory_rows_and_pagination() {
        let page = parse_directory_page(DIRECTORY_PAGE).unwrap().unwrap();
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.rows.len(), 2);

        let alice = &page.rows[0];
        assert_eq!(alice.username.as_deref(), Some("alice"));
        assert_eq!(alice.display_name.as_deref(), Some("Alice L."));
        assert_eq!(alice.avatar_url.as_deref(), Some("https://img.example/alice.jpg"));
        assert_eq!(alice.watched_count.as_deref(), Some("1,204 films"));

        let bob = &page.rows[1];
        assert_eq!(bob.username.as_deref(), Some("bob"));
        assert_eq!(bob.avatar_url, None);
        assert_eq!(bob.watched_count, None);
    }

    #[test]
    fn missing_directory_container_ends_pagination() {
        let page = parse_directory_page("<html><body><p>nothing here</p></body></html>").unwrap();
        assert!(page.is_none());
    }

    #[test]
    fn rating_rows_with_partial_attributes() {
        let page = parse_ratings_page(RATINGS_PAGE).unwrap().unwrap();
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.rows.len(), 2);

        let full = &page.rows[0];
        assert_eq!(full.slug.as_deref(), Some("foo-1999"));
        assert_eq!(full.title.as_deref(), Some("Foo"));
        assert_eq!(full.year.as_deref(), Some("1999"));
        assert_eq!(full.rating_class.as_deref(), Some("rated-8"));

        // Attributes that have not rendered yet stay None.
        let partial = &page.rows[1];
        assert_eq!(partial.slug.as_deref(), Some("bar"));
        assert_eq!(partial.title, None);
        assert_eq!(partial.year, None);
        assert_eq!(partial.rating_class.as_deref(), Some("rated-10"));
    }

    #[test]
    fn missing_poster_list_ends_pagination() {
        let page = parse_ratings_page("<html><body></body></html>").unwrap();
        assert!(page.is_none());
    }

    #[test]
    fn film_page_fields() {
        let data = parse_film_page(FILM_PAGE);
        assert_eq!(data.poster_url.as_deref(), Some("https://img.example/foo-poster.jpg"));
        assert_eq!(data.tmdb.as_deref(), Some("https://www.themoviedb.org/movie/603/"));
        assert_eq!(data.synopsis.as_deref(), Some("A film about a thing."));
        assert_eq!(data.year, Some(1999));
    }

    #[test]
    fn locale_lists_deduplicate() {
        let locale = parse_locale(DETAILS_PAGE);
        assert_eq!(locale.countries, vec!["USA", "France"]);
        assert_eq!(locale.languages, vec!["English"]);
        assert_eq!(locale.runtime, Some(136));
    }

    #[test]
    fn pagination_defaults_to_one_page() {
        assert_eq!(parse_total_pages("<html><body></body></html>"), 1);
    }
}
