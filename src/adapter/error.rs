//! Shared error type for site adapters: site detection, HTTP, and page parsing.

use thiserror::Error;

/// Adapter error for link discovery and chapter fetching.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("No site adapter handles '{url}'. Supported: royalroad.com, scribblehub.com.")]
    AdapterNotFound { url: String },

    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus {
        status: u16,
        url: String,
        /// Optional context (e.g. "story page", "TOC page").
        context: Option<String>,
    },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    #[error("Could not parse story page: {message}")]
    ParseStoryPage { message: String },

    #[error("Could not parse chapter list on story page: {reason}")]
    ChapterListParse { reason: String },

    #[error("Story page has no chapters (possibly deleted or access restricted).")]
    EmptyChapterList,

    #[error("Could not parse chapter at {url}: {reason}")]
    ParseChapter { url: String, reason: String },
}

impl ScraperError {
    /// Timeouts and connection failures; the fetch engine logs these differently from markup errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScraperError::Network { source, .. } if source.is_timeout())
    }
}
