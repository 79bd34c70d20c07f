//! Text archive of a story: one block per chapter,
//!
//! ```text
//! --- TITLE ---
//!
//! BODY
//! ```
//!
//! Chapters are appended as they are fetched and the file is later rebuilt in ledger order.
//! The same format is used for the author-notes file.

use crate::model::ArchiveChapter;
use crate::store::{read_optional, write_atomic, StoreError};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

fn marker_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^---\s*(.*?)\s*---$").ok())
        .as_ref()
}

fn marker_title(line: &str) -> Option<&str> {
    marker_line()
        .and_then(|re| re.captures(line.trim_end()))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// A body line that would read as a marker once its leading spaces are removed. Such lines get
/// one extra leading space on write, removed again on read.
fn looks_like_marker(line: &str) -> bool {
    marker_title(line.trim_start_matches(' ')).is_some()
}

fn escape_line(line: &str) -> String {
    if looks_like_marker(line) {
        format!(" {}", line)
    } else {
        line.to_string()
    }
}

fn unescape_line(line: &str) -> &str {
    match line.strip_prefix(' ') {
        Some(rest) if looks_like_marker(line) => rest,
        _ => line,
    }
}

/// One delimited block.
pub fn render_block(title: &str, body: &str) -> String {
    let body = body
        .trim()
        .lines()
        .map(escape_line)
        .collect::<Vec<_>>()
        .join("\n");
    format!("\n--- {} ---\n\n{}\n", title, body)
}

/// Split archive text into its blocks, in file order. Text before the first marker is ignored.
pub fn parse_archive(text: &str) -> Vec<ArchiveChapter> {
    let mut chapters = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    for line in text.lines() {
        if let Some(title) = marker_title(line) {
            if let Some((title, lines)) = current.take() {
                chapters.push(finish(title, &lines));
            }
            current = Some((title.to_string(), Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(unescape_line(line));
        }
    }
    if let Some((title, lines)) = current {
        chapters.push(finish(title, &lines));
    }
    chapters
}

/// Titles that have a block in the archive at `path`; a missing file has none.
pub fn stored_titles(path: &Path) -> Result<HashSet<String>, StoreError> {
    Ok(read_optional(path)?
        .map(|text| parse_archive(&text).into_iter().map(|c| c.title).collect())
        .unwrap_or_default())
}

fn finish(title: String, lines: &[&str]) -> ArchiveChapter {
    ArchiveChapter {
        title,
        body: lines.join("\n").trim().to_string(),
    }
}

/// Title -> body. A title that appears twice keeps its last body.
pub fn chapter_map(text: &str) -> HashMap<String, String> {
    parse_archive(text)
        .into_iter()
        .map(|c| (c.title, c.body))
        .collect()
}

/// Append one block to the archive at `path`, creating it if needed.
pub fn append_chapter(path: &Path, title: &str, body: &str) -> Result<(), StoreError> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(render_block(title, body).as_bytes())
        .map_err(|e| StoreError::io(path, e))?;
    file.flush().map_err(|e| StoreError::io(path, e))
}

/// Outcome of [rebuild].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Blocks written.
    pub written: usize,
    /// Titles in the ledger with no block in the file.
    pub missing: Vec<String>,
}

/// Rewrite the archive at `path` from scratch: one block per title of `ordered_titles` that has a
/// body in the current file, in that order. Blocks whose title is not listed are dropped.
pub fn rebuild(path: &Path, ordered_titles: &[&str]) -> Result<RebuildReport, StoreError> {
    let existing = read_optional(path)?;
    let map = existing.as_deref().map(chapter_map).unwrap_or_default();
    if existing.is_some() && map.is_empty() {
        tracing::debug!(path = %path.display(), "no chapter blocks found in archive");
    }

    let mut out = String::new();
    let mut report = RebuildReport::default();
    for title in ordered_titles {
        match map.get(*title) {
            Some(body) => {
                out.push_str(&render_block(title, body));
                report.written += 1;
            }
            None => report.missing.push((*title).to_string()),
        }
    }

    if existing.is_none() && report.written == 0 {
        return Ok(report);
    }
    write_atomic(path, out.as_bytes())?;
    if !report.missing.is_empty() {
        tracing::warn!(
            path = %path.display(),
            missing = report.missing.len(),
            "completed chapters have no block in the archive"
        );
    }
    tracing::debug!(path = %path.display(), written = report.written, "archive rebuilt");
    Ok(report)
}
