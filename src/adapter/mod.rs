//! Site adapters. Static site registry, the adapter capability trait, the shared HTTP session,
//! and the Royal Road / Scribble Hub implementations.

mod client;
mod error;

pub mod royalroad;
pub mod scribblehub;

pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::ScraperError;

use crate::model::ChapterContent;
use reqwest::Url;
use scraper::{ElementRef, Selector};
use std::time::Duration;

/// Supported fiction site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    RoyalRoad,
    ScribbleHub,
}

/// Domain fragment -> site. Populated at compile time; new sites are added here.
const REGISTRY: &[(&str, Site)] = &[
    ("royalroad.com", Site::RoyalRoad),
    ("scribblehub.com", Site::ScribbleHub),
];

impl Site {
    /// Domain fragment matched against story and chapter URLs.
    pub fn domain(self) -> &'static str {
        REGISTRY
            .iter()
            .find(|(_, site)| *site == self)
            .map(|(domain, _)| *domain)
            .unwrap_or("")
    }

    /// True if the site lists chapters newest-first.
    pub fn reverse_chapters(self) -> bool {
        match self {
            Site::RoyalRoad => false,
            Site::ScribbleHub => true,
        }
    }
}

/// Resolve which adapter handles a story or chapter URL by its host.
pub fn resolve_site(url_input: &str) -> Result<Site, ScraperError> {
    let url = Url::parse(url_input).map_err(|e| ScraperError::InvalidUrl {
        input: url_input.to_string(),
        reason: e.to_string(),
    })?;
    let host = url.host_str().ok_or_else(|| ScraperError::InvalidUrl {
        input: url_input.to_string(),
        reason: "URL has no host".to_string(),
    })?;
    REGISTRY
        .iter()
        .find(|(domain, _)| host.contains(domain))
        .map(|(_, site)| *site)
        .ok_or_else(|| ScraperError::AdapterNotFound {
            url: url_input.to_string(),
        })
}

/// Capability every site adapter provides to the reconciler and the fetch engine.
///
/// An adapter borrows the run's single [PoliteClient] session for its whole lifetime.
pub trait SiteAdapter {
    fn site(&self) -> Site;

    /// True if [list_chapter_links](SiteAdapter::list_chapter_links) returns newest-first.
    fn reverse_chapters(&self) -> bool {
        self.site().reverse_chapters()
    }

    /// Every chapter URL of the story, in the order the site presents them.
    fn list_chapter_links(&mut self, entry_url: &str) -> Result<Vec<String>, ScraperError>;

    /// One attempt at fetching a chapter page within `timeout`.
    fn fetch_chapter(&mut self, url: &str, timeout: Duration)
        -> Result<ChapterContent, ScraperError>;
}

/// Build the adapter for `site` on top of the given session.
pub fn adapter_for<'a>(site: Site, client: &'a mut PoliteClient) -> Box<dyn SiteAdapter + 'a> {
    match site {
        Site::RoyalRoad => Box::new(royalroad::RoyalRoadAdapter::new(client)),
        Site::ScribbleHub => Box::new(scribblehub::ScribbleHubAdapter::new(client)),
    }
}

/// Strip a known site suffix from the end of a page title (e.g. " | Scribble Hub") so that
/// titles containing " - " or " | " themselves are preserved.
pub fn strip_title_site_suffix(s: &str, suffixes: &[&str]) -> String {
    let mut t = s.trim();
    for suffix in suffixes {
        if t.ends_with(suffix) {
            t = t[..t.len() - suffix.len()].trim();
            break;
        }
    }
    t.to_string()
}

/// Parse a CSS selector or return a parse error (avoids panics from Selector::parse).
pub(crate) fn parse_selector(sel: &str) -> Result<Selector, ScraperError> {
    Selector::parse(sel).map_err(|e| ScraperError::ParseStoryPage {
        message: format!("invalid selector {:?}: {}", sel, e),
    })
}

/// Check response status and read the body as text.
pub(crate) fn check_response(
    response: reqwest::blocking::Response,
    url: &str,
    context: Option<&str>,
) -> Result<String, ScraperError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ScraperError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
            context: context.map(String::from),
        });
    }
    response.text().map_err(|e| ScraperError::BodyRead {
        url: url.to_string(),
        source: e,
    })
}

/// Plain text of a content container: one paragraph per `<p>`, separated by blank lines.
/// Containers without paragraphs fall back to their whole text.
pub(crate) fn element_to_text(el: ElementRef<'_>) -> String {
    let paragraphs: Vec<String> = match Selector::parse("p") {
        Ok(p_sel) => el
            .select(&p_sel)
            .map(|p| p.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        Err(_) => Vec::new(),
    };
    if paragraphs.is_empty() {
        el.text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    } else {
        paragraphs.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn strip_title_site_suffix_removes_trailing_suffix_only() {
        assert_eq!(
            strip_title_site_suffix(
                "Chapter 1 - The Beginning | Scribble Hub",
                &[" | Scribble Hub", " - Scribble Hub"]
            ),
            "Chapter 1 - The Beginning"
        );
        assert_eq!(
            strip_title_site_suffix(
                "1. Good Morning - Brother - Book _ Royal Road",
                &[" _ Royal Road", " - Royal Road", " | Royal Road"]
            ),
            "1. Good Morning - Brother - Book"
        );
    }

    #[test]
    fn site_detection_royalroad() -> Result<(), ScraperError> {
        let site = resolve_site("https://www.royalroad.com/fiction/123/slug")?;
        assert_eq!(site, Site::RoyalRoad);
        assert!(!site.reverse_chapters());
        Ok(())
    }

    #[test]
    fn site_detection_scribblehub() -> Result<(), ScraperError> {
        let site = resolve_site("https://www.scribblehub.com/series/1/slug/")?;
        assert_eq!(site, Site::ScribbleHub);
        assert!(site.reverse_chapters());
        Ok(())
    }

    #[test]
    fn site_detection_unknown_host_is_adapter_not_found() -> Result<(), String> {
        let result = resolve_site("https://example.com/foo");
        match &result {
            Err(ScraperError::AdapterNotFound { url }) if url == "https://example.com/foo" => {
                Ok(())
            }
            _ => Err(format!("expected AdapterNotFound, got {:?}", result)),
        }
    }

    #[test]
    fn site_detection_invalid_url_errors() -> Result<(), String> {
        let result = resolve_site("not-a-url");
        match &result {
            Err(ScraperError::InvalidUrl { input, .. }) if input == "not-a-url" => Ok(()),
            _ => Err(format!("expected InvalidUrl, got {:?}", result)),
        }
    }

    #[test]
    fn site_domain_comes_from_registry() {
        assert_eq!(Site::RoyalRoad.domain(), "royalroad.com");
        assert_eq!(Site::ScribbleHub.domain(), "scribblehub.com");
    }

    #[test]
    fn element_to_text_separates_paragraphs() -> Result<(), ScraperError> {
        let doc = Html::parse_fragment(
            "<div class=\"c\"><p> One. </p><p></p><p>Two <em>words</em>.</p></div>",
        );
        let sel = parse_selector("div.c")?;
        let el = doc.select(&sel).next().ok_or(ScraperError::EmptyChapterList)?;
        assert_eq!(element_to_text(el), "One.\n\nTwo words.");
        Ok(())
    }
}
