//! Chapter-list ledger: one line per chapter URL in canonical order.
//!
//! Line grammar (kept human-editable):
//! - `URL` pending
//! - `✔ TITLE URL` completed
//! - `[DEAD LINK] ` followed by either form: removed from the site
//!
//! Lines are parsed into [LedgerEntry] on load; nothing outside this module looks at the markers.

use crate::model::{EntryState, LedgerEntry};
use crate::store::{read_optional, write_atomic, StoreError};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

const DONE_MARK: &str = "✔";
const DEAD_MARK: &str = "[DEAD LINK]";

fn completed_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^✔\s*(.*?)\s+(https?://\S+)\s*$").ok())
        .as_ref()
}

/// In-memory ledger for one story.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

/// Split a live (non-dead) line into its URL and optional completed title.
fn parse_live(line: &str) -> (String, Option<String>) {
    if let Some(caps) = completed_line().and_then(|re| re.captures(line)) {
        let title = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let url = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        return (url.to_string(), Some(title.to_string()));
    }
    let url = line.strip_prefix(DONE_MARK).unwrap_or(line).trim();
    (url.to_string(), None)
}

fn parse_line(line: &str) -> Option<LedgerEntry> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let entry = match line.strip_prefix(DEAD_MARK) {
        Some(rest) => {
            let (url, title) = parse_live(rest.trim());
            LedgerEntry {
                url,
                state: EntryState::Dead { title },
            }
        }
        None => {
            let (url, title) = parse_live(line);
            let state = match title {
                Some(title) => EntryState::Completed { title },
                None => EntryState::Pending,
            };
            LedgerEntry { url, state }
        }
    };
    if entry.url.is_empty() {
        return None;
    }
    Some(entry)
}

fn render_line(entry: &LedgerEntry) -> String {
    match &entry.state {
        EntryState::Pending => entry.url.clone(),
        EntryState::Completed { title } => format!("{} {} {}", DONE_MARK, title, entry.url),
        EntryState::Dead { title: None } => format!("{} {}", DEAD_MARK, entry.url),
        EntryState::Dead { title: Some(title) } => {
            format!("{} {} {} {}", DEAD_MARK, DONE_MARK, title, entry.url)
        }
    }
}

/// Titles live on one ledger line, so internal whitespace runs collapse to single spaces.
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Ledger {
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        Self { entries }
    }

    /// Parse ledger text. Blank lines are dropped; every other line yields an entry.
    pub fn parse(text: &str) -> Self {
        Self {
            entries: text.lines().filter_map(parse_line).collect(),
        }
    }

    /// Canonical text form, one line per entry.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&render_line(entry));
            out.push('\n');
        }
        out
    }

    /// Load from disk; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        Ok(read_optional(path)?
            .map(|text| Self::parse(&text))
            .unwrap_or_default())
    }

    /// Rewrite the whole ledger atomically.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_atomic(path, self.render().as_bytes())
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.url.as_str())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.iter().any(|e| e.url == url)
    }

    /// Append URLs as pending entries, skipping ones already present. Returns how many were added.
    pub fn append_pending<'a>(&mut self, urls: impl IntoIterator<Item = &'a str>) -> usize {
        let mut known: HashSet<String> = self.entries.iter().map(|e| e.url.clone()).collect();
        let before = self.entries.len();
        for url in urls {
            if known.insert(url.to_string()) {
                self.entries.push(LedgerEntry::pending(url));
            } else {
                tracing::debug!(url, "already in ledger; not appended");
            }
        }
        self.entries.len() - before
    }

    /// Flag live entries whose URL is in `urls` as dead, in place. Returns how many changed.
    pub fn mark_dead(&mut self, urls: &[String]) -> usize {
        let targets: HashSet<&str> = urls.iter().map(String::as_str).collect();
        let mut changed = 0;
        for entry in &mut self.entries {
            if entry.is_dead() || !targets.contains(entry.url.as_str()) {
                continue;
            }
            let title = entry.completed_title().map(String::from);
            entry.state = EntryState::Dead { title };
            changed += 1;
        }
        changed
    }

    /// Restore dead entries whose URL is in `urls`, in place: completed if they had a title,
    /// pending otherwise. Returns how many changed.
    pub fn revive(&mut self, urls: &[String]) -> usize {
        let targets: HashSet<&str> = urls.iter().map(String::as_str).collect();
        let mut changed = 0;
        for entry in &mut self.entries {
            let EntryState::Dead { title } = &mut entry.state else {
                continue;
            };
            if !targets.contains(entry.url.as_str()) {
                continue;
            }
            entry.state = match title.take() {
                Some(title) => EntryState::Completed { title },
                None => EntryState::Pending,
            };
            changed += 1;
        }
        changed
    }

    /// Return completed entries whose title has no body (`has_body` false) to pending so they
    /// are fetched again. Returns the URLs that changed.
    pub fn requeue_missing(&mut self, has_body: impl Fn(&str) -> bool) -> Vec<String> {
        let mut requeued = Vec::new();
        for entry in &mut self.entries {
            let missing = match &entry.state {
                EntryState::Completed { title } => !has_body(title),
                _ => false,
            };
            if missing {
                entry.state = EntryState::Pending;
                requeued.push(entry.url.clone());
            }
        }
        requeued
    }

    pub fn dead_urls(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_dead())
            .map(|e| e.url.clone())
            .collect()
    }

    /// Positions of entries that still need fetching, in ledger order.
    pub fn pending_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_pending())
            .map(|(i, _)| i)
            .collect()
    }

    /// Mark the entry at `index` completed with `title`.
    pub fn complete(&mut self, index: usize, title: &str) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.state = EntryState::Completed {
                title: normalize_title(title),
            };
        }
    }

    /// Completed titles in ledger order; pending and dead entries are skipped.
    pub fn ordered_titles(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(LedgerEntry::completed_title)
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// `title` normalized, suffixed with ` (2)`, ` (3)`, ... if another entry (live or dead)
    /// already carries it.
    pub fn unique_title(&self, title: &str) -> String {
        let base = normalize_title(title);
        let taken: HashSet<&str> = self
            .entries
            .iter()
            .filter_map(|e| match &e.state {
                EntryState::Completed { title } => Some(title.as_str()),
                EntryState::Dead { title } => title.as_deref(),
                EntryState::Pending => None,
            })
            .collect();
        if !taken.contains(base.as_str()) {
            return base;
        }
        (2..)
            .map(|n| format!("{} ({})", base, n))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or(base)
    }
}
