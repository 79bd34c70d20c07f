//! Royal Road adapter. Chapter links come from the `window.chapters` script on the fiction page,
//! already in chronological order; chapter pages yield title, body, and author's notes.
//!
//! Cloudflare: cookie jar and browser-like User-Agent are used; captcha is not handled.

use crate::adapter::error::ScraperError;
use crate::adapter::{
    check_response, element_to_text, parse_selector, strip_title_site_suffix, PoliteClient, Site,
    SiteAdapter,
};
use crate::model::ChapterContent;
use reqwest::Url;
use scraper::Html;
use serde::Deserialize;
use std::time::Duration;

const ROYALROAD_BASE: &str = "https://www.royalroad.com";
const TITLE_SUFFIXES: &[&str] = &[" _ Royal Road", " - Royal Road", " | Royal Road"];

/// Royal Road adapter. Holds the run's session.
pub struct RoyalRoadAdapter<'a> {
    client: &'a mut PoliteClient,
}

/// Shape of one entry in window.chapters.
#[derive(Debug, Deserialize)]
struct WindowChapter {
    url: String,
    #[serde(default)]
    order: u32,
}

/// Require a fiction URL (no /chapter/ in path).
fn ensure_fiction_url(url: &str) -> Result<String, ScraperError> {
    let parsed = Url::parse(url).map_err(|e| ScraperError::InvalidUrl {
        input: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.path().contains("/chapter/") {
        return Err(ScraperError::ParseStoryPage {
            message: "Expected a fiction (index) URL, not a chapter URL. Use the story page, e.g. https://www.royalroad.com/fiction/21220/mother-of-learning".to_string(),
        });
    }
    Ok(url.to_string())
}

/// Extract chapter URLs from the window.chapters array, sorted by `order`.
/// Relative URLs resolve against ROYALROAD_BASE.
fn parse_chapter_links(html: &str) -> Result<Vec<String>, ScraperError> {
    let needle = "window.chapters = ";
    let start = html
        .find(needle)
        .ok_or_else(|| ScraperError::ChapterListParse {
            reason: "window.chapters not found".to_string(),
        })?;
    let after_assign = start + needle.len();
    let array_slice = extract_json_array_with_strings(&html[after_assign..]).ok_or_else(|| {
        ScraperError::ChapterListParse {
            reason: "could not extract window.chapters array".to_string(),
        }
    })?;
    let mut chapters: Vec<WindowChapter> =
        serde_json::from_str(array_slice).map_err(|e| ScraperError::ChapterListParse {
            reason: e.to_string(),
        })?;
    chapters.sort_by_key(|c| c.order);
    let base = Url::parse(ROYALROAD_BASE).map_err(|e| ScraperError::ChapterListParse {
        reason: e.to_string(),
    })?;
    let links = chapters
        .into_iter()
        .map(|ch| {
            base.join(ch.url.trim_start_matches('/'))
                .map(|u| u.to_string())
                .map_err(|e| ScraperError::ChapterListParse {
                    reason: e.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if links.is_empty() {
        return Err(ScraperError::EmptyChapterList);
    }
    Ok(links)
}

/// Find the matching closing bracket for the first '[' in s, skipping content inside JSON strings.
fn extract_json_array_with_strings(s: &str) -> Option<&str> {
    let start = s.find('[')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (byte_offset, c) in s[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + byte_offset + 1]);
                }
            }
            '"' => in_string = true,
            _ => {}
        }
    }
    None
}

/// Parse a chapter page: title from h1 (og:title / <title> fallback), body from .chapter-content,
/// notes from every .author-note.
fn parse_chapter_page(html: &str, url: &str) -> Result<ChapterContent, ScraperError> {
    let doc = Html::parse_document(html);

    let h1_sel = parse_selector("h1")?;
    let og_title_sel = parse_selector("meta[property=\"og:title\"]")?;
    let title_sel = parse_selector("title")?;
    let title = doc
        .select(&h1_sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            doc.select(&og_title_sel)
                .next()
                .and_then(|e| e.value().attr("content"))
                .map(|s| strip_title_site_suffix(s, TITLE_SUFFIXES))
                .filter(|s| !s.is_empty())
        })
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

    let content_sel = parse_selector(".chapter-content")?;
    let content = doc
        .select(&content_sel)
        .next()
        .ok_or_else(|| ScraperError::ParseChapter {
            url: url.to_string(),
            reason: "missing .chapter-content".to_string(),
        })?;
    let body = element_to_text(content);

    let note_sel = parse_selector(".author-note")?;
    let notes: Vec<String> = doc
        .select(&note_sel)
        .map(element_to_text)
        .filter(|n| !n.is_empty())
        .collect();
    let notes = if notes.is_empty() {
        None
    } else {
        Some(notes.join("\n\n"))
    };

    Ok(ChapterContent { title, body, notes })
}

impl<'a> RoyalRoadAdapter<'a> {
    pub fn new(client: &'a mut PoliteClient) -> Self {
        Self { client }
    }
}

impl SiteAdapter for RoyalRoadAdapter<'_> {
    fn site(&self) -> Site {
        Site::RoyalRoad
    }

    fn list_chapter_links(&mut self, entry_url: &str) -> Result<Vec<String>, ScraperError> {
        let fiction_url = ensure_fiction_url(entry_url)?;
        let response = self
            .client
            .get_with_retry(&fiction_url)
            .map_err(|e| ScraperError::Network {
                url: fiction_url.clone(),
                source: e,
            })?;
        let html = check_response(response, &fiction_url, Some("story page"))?;
        parse_chapter_links(&html)
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
