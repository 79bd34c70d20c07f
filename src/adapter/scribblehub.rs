//! Scribble Hub adapter. The chapter list is read through the "show all chapters" AJAX call,
//! with paginated `?toc=N` series pages as a fallback. Scribble Hub lists newest-first, so the
//! adapter declares reversal and returns links in the site's order.

use crate::adapter::error::ScraperError;
use crate::adapter::{
    check_response, element_to_text, parse_selector, strip_title_site_suffix, PoliteClient, Site,
    SiteAdapter,
};
use crate::model::ChapterContent;
use reqwest::Url;
use scraper::Html;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::time::Duration;

const SCRIBBLEHUB_BASE: &str = "https://www.scribblehub.com";
const SCRIBBLEHUB_AJAX_URL: &str = "https://www.scribblehub.com/wp-admin/admin-ajax.php";
const TITLE_SUFFIXES: &[&str] = &[" | Scribble Hub", " - Scribble Hub"];
/// Guard against pagination loops on malformed pages.
const MAX_TOC_PAGES: u32 = 500;

/// Scribble Hub adapter. Holds the run's session.
pub struct ScribbleHubAdapter<'a> {
    client: &'a mut PoliteClient,
}

/// Extract series ID from URL path /series/{id}/{slug}/.
fn extract_series_id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let after_series = parsed.path().strip_prefix("/series/")?;
    let id = after_series.split('/').next()?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(id.to_string())
}

/// Require a series URL (path contains /series/; reject /read/.../chapter/).
fn ensure_series_url(url: &str) -> Result<String, ScraperError> {
    let parsed = Url::parse(url).map_err(|e| ScraperError::InvalidUrl {
        input: url.to_string(),
        reason: e.to_string(),
    })?;
    let path = parsed.path();
    if path.contains("/read/") && path.contains("/chapter/") {
        return Err(ScraperError::ParseStoryPage {
            message: "Expected a series (index) URL, not a chapter URL. Use the series page, e.g. https://www.scribblehub.com/series/862913/hp-the-arcane-thief-litrpg/".to_string(),
        });
    }
    if !path.contains("/series/") {
        return Err(ScraperError::ParseStoryPage {
            message: "Expected a series URL containing /series/{id}/{slug}/.".to_string(),
        });
    }
    Ok(url.to_string())
}

/// Parse one TOC fragment: li.toc_w (order attr) > a.toc_a (href). Returns (order, full_url)
/// in document order; order is 0 when the attribute is missing.
fn parse_toc_page(html: &str, base: &Url) -> Result<Vec<(u32, String)>, ScraperError> {
    let doc = Html::parse_document(html);
    let ol_sel = parse_selector("ol.toc_ol")?;
    let li_sel = parse_selector("li.toc_w")?;
    let a_sel = parse_selector("a.toc_a")?;

    let ol = doc
        .select(&ol_sel)
        .next()
        .ok_or_else(|| ScraperError::ChapterListParse {
            reason: "ol.toc_ol not found".to_string(),
        })?;

    let mut entries = Vec::new();
    for li in ol.select(&li_sel) {
        let order = li
            .value()
            .attr("order")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);
        let Some(href) = li
            .select(&a_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|h| !h.is_empty())
        else {
            continue;
        };
        let full_url = base
            .join(href)
            .map_err(|e| ScraperError::ChapterListParse {
                reason: e.to_string(),
            })?
            .to_string();
        entries.push((order, full_url));
    }
    Ok(entries)
}

/// Parse toc=N from a URL or query string. Returns 1 if missing.
fn parse_toc_page_from_url(url: &str) -> u32 {
    let query = url.split('?').nth(1).unwrap_or("");
    for param in query.split('&') {
        if let Some(rest) = param.trim().strip_prefix("toc=") {
            let n = rest.split(['#', '&']).next().unwrap_or("").trim();
            if let Ok(num) = n.parse::<u32>() {
                return num;
            }
        }
    }
    1
}

/// Next TOC page from `#pagination-mesh-toc a.page-link.next`, or any pagination link whose
/// toc=N is the current page plus one (the "next" class is sometimes missing).
fn next_toc_page_url(html: &str, series_base: &Url, current_page_url: Option<&str>) -> Option<String> {
    let doc = Html::parse_document(html);
    let current_page = current_page_url.map(parse_toc_page_from_url).unwrap_or(1);

    let next_sel = parse_selector("#pagination-mesh-toc a.page-link.next").ok()?;
    if let Some(href) = doc
        .select(&next_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
    {
        if !href.is_empty() && href != "#" {
            if let Ok(u) = series_base.join(href) {
                return Some(u.to_string());
            }
        }
    }

    let fallback_sel = parse_selector("#pagination-mesh-toc a[href*=\"toc=\"]").ok()?;
    doc.select(&fallback_sel)
        .filter_map(|a| a.value().attr("href"))
        .filter(|h| !h.is_empty() && *h != "#")
        .find(|h| parse_toc_page_from_url(h) == current_page + 1)
        .and_then(|h| series_base.join(h).ok())
        .map(|u| u.to_string())
}

/// Newest-first link list: sorted by descending `order` when every entry carries one, otherwise
/// left in document order. Duplicate URLs keep their first occurrence.
fn merge_toc_entries(mut entries: Vec<(u32, String)>) -> Vec<String> {
    if entries.iter().all(|(order, _)| *order > 0) {
        entries.sort_by_key(|(order, _)| Reverse(*order));
    }
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|(_, url)| seen.insert(url.clone()))
        .map(|(_, url)| url)
        .collect()
}

/// Full TOC through the AJAX "Show All Chapters" endpoint (wi_getreleases_pagination, pagenum=-1).
/// None when the series ID cannot be read from the URL.
fn fetch_full_toc_via_ajax(
    client: &mut PoliteClient,
    series_url: &str,
    base: &Url,
) -> Option<Result<Vec<(u32, String)>, ScraperError>> {
    let mypostid = extract_series_id_from_url(series_url)?;
    let response = match client.post_form(
        SCRIBBLEHUB_AJAX_URL,
        &[
            ("action", "wi_getreleases_pagination"),
            ("pagenum", "-1"),
            ("mypostid", &mypostid),
        ],
    ) {
        Ok(r) => r,
        Err(e) => {
            return Some(Err(ScraperError::Network {
                url: SCRIBBLEHUB_AJAX_URL.to_string(),
                source: e,
            }))
        }
    };
    Some(
        check_response(response, SCRIBBLEHUB_AJAX_URL, Some("TOC AJAX"))
            .and_then(|html| parse_toc_page(&html, base)),
    )
}

/// Full TOC: AJAX first, then paginated series pages.
fn fetch_full_toc(
    client: &mut PoliteClient,
    series_url: &str,
    first_page_html: &str,
) -> Result<Vec<String>, ScraperError> {
    let base = Url::parse(SCRIBBLEHUB_BASE).map_err(|e| ScraperError::ChapterListParse {
        reason: e.to_string(),
    })?;

    match fetch_full_toc_via_ajax(client, series_url, &base) {
        Some(Ok(entries)) if !entries.is_empty() => return Ok(merge_toc_entries(entries)),
        Some(Ok(_)) => tracing::debug!(series_url, "AJAX TOC was empty; paging instead"),
        Some(Err(e)) => tracing::debug!(series_url, error = %e, "AJAX TOC failed; paging instead"),
        None => {}
    }

    let series_base = Url::parse(series_url).map_err(|e| ScraperError::ChapterListParse {
        reason: e.to_string(),
    })?;
    let mut all_entries = parse_toc_page(first_page_html, &base)?;
    let mut next = next_toc_page_url(first_page_html, &series_base, Some(series_url));
    let mut pages = 1;
    while let Some(next_url) = next {
        pages += 1;
        if pages > MAX_TOC_PAGES {
            break;
        }
        let response = client
            .get_with_retry(&next_url)
            .map_err(|e| ScraperError::Network {
                url: next_url.clone(),
                source: e,
            })?;
        let html = check_response(response, &next_url, Some("TOC page"))?;
        all_entries.extend(parse_toc_page(&html, &base)?);
        next = next_toc_page_url(&html, &series_base, Some(&next_url));
    }

    let links = merge_toc_entries(all_entries);
    if links.is_empty() {
        return Err(ScraperError::EmptyChapterList);
    }
    Ok(links)
}

/// Parse a chapter page: title from .chapter-title or <title>; body from #chp_raw.
/// Scribble Hub has no consistent author-note container, so notes are always None.
fn parse_chapter_page(html: &str, url: &str) -> Result<ChapterContent, ScraperError> {
    let doc = Html::parse_document(html);

    let chapter_title_sel = parse_selector(".chapter-title")?;
    let title_sel = parse_selector("title")?;
    let title = doc
        .select(&chapter_title_sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            doc.select(&title_sel)
                .next()
                .map(|e| strip_title_site_suffix(&e.text().collect::<String>(), TITLE_SUFFIXES))
                .filter(|s| !s.is_empty())
        })
        .ok_or_else(|| ScraperError::ParseChapter {
            url: url.to_string(),
            reason: "no chapter title".to_string(),
        })?;

    let chp_raw_sel = parse_selector("#chp_raw")?;
    let content = doc
        .select(&chp_raw_sel)
        .next()
        .ok_or_else(|| ScraperError::ParseChapter {
            url: url.to_string(),
            reason: "missing #chp_raw".to_string(),
        })?;

    Ok(ChapterContent {
        title,
        body: element_to_text(content),
        notes: None,
    })
}

impl<'a> ScribbleHubAdapter<'a> {
    pub fn new(client: &'a mut PoliteClient) -> Self {
        Self { client }
    }
}

impl SiteAdapter for ScribbleHubAdapter<'_> {
    fn site(&self) -> Site {
        Site::ScribbleHub
    }

    fn list_chapter_links(&mut self, entry_url: &str) -> Result<Vec<String>, ScraperError> {
        let series_url = ensure_series_url(entry_url)?;
        let response = self
            .client
            .get_with_retry(&series_url)
            .map_err(|e| ScraperError::Network {
                url: series_url.clone(),
                source: e,
            })?;
        let html = check_response(response, &series_url, Some("story page"))?;
        fetch_full_toc(self.client, &series_url, &html)
    }

    fn fetch_chapter(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<ChapterContent, ScraperError> {
        let response = self
            .client
            .get_with_timeout(url, timeout)
            .map_err(|e| ScraperError::Network {
                url: url.to_string(),
                source: e,
            })?;
        let html = check_response(response, url, Some("chapter"))?;
        parse_chapter_page(&html, url)
    }
}
