//! Data model shared by the link store, ledger, reconciler, fetch engine, and archive builder.
//!
//! A chapter URL is the natural key across every component; its position in a story's link
//! sequence encodes narrative order and is preserved end to end.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Content returned by a site adapter for one chapter page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterContent {
    pub title: String,
    /// Plain text; paragraphs separated by blank lines.
    pub body: String,
    /// Author's notes, when the site has them and they were found.
    pub notes: Option<String>,
}

/// Fetch state of one ledger line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Not fetched yet.
    Pending,
    /// Fetched; the title is the join key into the archive.
    Completed { title: String },
    /// Removed from the source site. Keeps the title it had so a revival restores it as-is.
    Dead { title: Option<String> },
}

/// One chapter URL in canonical (ledger) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub url: String,
    pub state: EntryState,
}

impl LedgerEntry {
    pub fn pending(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: EntryState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, EntryState::Pending)
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.state, EntryState::Dead { .. })
    }

    /// Title of a completed (live) entry. Dead entries resolve to nothing.
    pub fn completed_title(&self) -> Option<&str> {
        match &self.state {
            EntryState::Completed { title } => Some(title),
            _ => None,
        }
    }
}

/// A slice of a story's link sequence persisted as one file. `start`/`end` are 1-based, inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkChunk {
    pub start: usize,
    pub end: usize,
    pub urls: Vec<String>,
}

/// One `--- TITLE ---` block of the text archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveChapter {
    pub title: String,
    pub body: String,
}

fn default_chunk_size() -> usize {
    100
}

/// Registry entry for one tracked story. Field names match the on-disk `stories.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub story_url: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Archive file; relative paths resolve against the story directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub last_chapter_count: usize,
    #[serde(default)]
    pub last_scraped_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub is_complete: bool,
    /// Domain fragment of the adapter that handles this story.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl StoryRecord {
    pub fn new(story_url: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            story_url: story_url.into(),
            chunk_size: chunk_size.max(1),
            output_file: None,
            last_chapter_count: 0,
            last_scraped_date: None,
            is_complete: false,
            domain: None,
        }
    }
}
