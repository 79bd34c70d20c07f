//! Content fetch engine: fetch every pending ledger entry in ledger order, one at a time, with
//! escalating timeouts and backoff between attempts.
//!
//! After each chapter the body is appended to the archive and the ledger is saved, so an
//! interrupted run resumes at the next pending entry. A chapter that exhausts its attempts
//! goes to the failure list and the loop moves on. When the loop ends the archive (and notes
//! file) are rebuilt in ledger order.

use crate::adapter::{resolve_site, ScraperError, Site, SiteAdapter};
use crate::archive::{self, RebuildReport};
use crate::model::{ChapterContent, StoryRecord};
use crate::store::{write_atomic, Ledger, LinkStore, StoreError, StoryPaths, StoryRegistry};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Story '{name}' is not tracked")]
    UnknownStory { name: String },

    #[error("No chapter list at {path}; run an update for this story first")]
    MissingLedger { path: PathBuf },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Adapter(#[from] ScraperError),
}

/// Attempts per chapter and their timing. Attempt `n` (1-based) gets `n * timeout_unit`; the
/// wait after failed attempt `n` is `initial_backoff * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout_unit: Duration,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_unit: Duration::from_secs(20),
            initial_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.timeout_unit.saturating_mul(attempt.max(1))
    }

    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor)
    }
}

pub struct FetchOptions<'a> {
    pub retry: RetryPolicy,
    /// Append author's notes to the parallel notes file.
    pub save_notes: bool,
    /// Called with (chapters processed, chapters to process).
    pub progress: Option<&'a dyn Fn(u32, u32)>,
}

impl Default for FetchOptions<'_> {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            save_notes: false,
            progress: None,
        }
    }
}

/// End-of-run report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub succeeded: usize,
    /// Entries not attempted: already completed or dead.
    pub skipped: usize,
    /// URLs that exhausted their attempts, in ledger order.
    pub failed: Vec<String>,
    pub archive: RebuildReport,
}

/// Look up a tracked story and the site that serves it.
pub fn resolve_story(
    data_root: &Path,
    registry: &StoryRegistry,
    name: &str,
) -> Result<(StoryRecord, StoryPaths, Site), FetchError> {
    let record = registry
        .get(name)
        .cloned()
        .ok_or_else(|| FetchError::UnknownStory {
            name: name.to_string(),
        })?;
    let site = resolve_site(&record.story_url)?;
    let paths = StoryPaths::for_record(data_root, name, &record);
    Ok((record, paths, site))
}

/// One chapter, up to `policy.max_attempts` tries. Returns the last error when all fail.
pub fn fetch_with_retry(
    adapter: &mut dyn SiteAdapter,
    url: &str,
    policy: &RetryPolicy,
) -> Result<ChapterContent, ScraperError> {
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let timeout = policy.timeout_for(attempt);
        match adapter.fetch_chapter(url, timeout) {
            Ok(content) => return Ok(content),
            Err(e) if attempt >= max => return Err(e),
            Err(e) => {
                let wait = policy.backoff_after(attempt);
                tracing::warn!(
                    url,
                    attempt,
                    timeout_secs = timeout.as_secs(),
                    timed_out = e.is_timeout(),
                    error = %e,
                    "chapter fetch failed; retrying in {:?}",
                    wait
                );
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
                attempt += 1;
            }
        }
    }
}

/// Fetch every pending chapter of a story. Link chunks not yet in the ledger are merged first,
/// and completed chapters whose archive block is gone are queued again.
pub fn fetch_story(
    adapter: &mut dyn SiteAdapter,
    paths: &StoryPaths,
    options: &FetchOptions<'_>,
) -> Result<FetchSummary, FetchError> {
    LinkStore::for_story(paths).merge_into_ledger(&paths.ledger)?;
    if !paths.ledger.is_file() {
        return Err(FetchError::MissingLedger {
            path: paths.ledger.clone(),
        });
    }
    let mut ledger = Ledger::load(&paths.ledger)?;
    let stored = archive::stored_titles(&paths.archive)?;
    let requeued = ledger.requeue_missing(|title| stored.contains(title));
    if !requeued.is_empty() {
        tracing::warn!(
            story = %paths.name,
            count = requeued.len(),
            "completed chapters missing from the archive; downloading them again"
        );
        ledger.save(&paths.ledger)?;
    }
    let pending = ledger.pending_indices();
    let mut summary = FetchSummary {
        skipped: ledger.len() - pending.len(),
        ..FetchSummary::default()
    };
    let total = pending.len() as u32;
    tracing::info!(story = %paths.name, pending = total, skipped = summary.skipped, "fetching chapters");

    for (n, index) in pending.into_iter().enumerate() {
        let Some(url) = ledger.entries().get(index).map(|e| e.url.clone()) else {
            continue;
        };
        match fetch_with_retry(adapter, &url, &options.retry) {
            Ok(content) => {
                let title = chapter_title(&ledger, &content, index);
                archive::append_chapter(&paths.archive, &title, &content.body)?;
                if options.save_notes {
                    if let Some(notes) = content.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                        archive::append_chapter(&paths.notes, &title, notes)?;
                    }
                }
                ledger.complete(index, &title);
                ledger.save(&paths.ledger)?;
                summary.succeeded += 1;
                tracing::debug!(url = %url, title = %title, "chapter saved");
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "chapter failed after all attempts");
                summary.failed.push(url);
            }
        }
        if let Some(progress) = options.progress {
            progress(n as u32 + 1, total);
        }
    }

    record_failures(&paths.failed, &summary.failed)?;
    summary.archive = rebuild_outputs(paths, &ledger)?;
    tracing::info!(
        story = %paths.name,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed.len(),
        "fetch finished"
    );
    Ok(summary)
}

/// Ledger-unique title for a fetched chapter; untitled pages are named by position.
fn chapter_title(ledger: &Ledger, content: &ChapterContent, index: usize) -> String {
    let title = if content.title.trim().is_empty() {
        format!("Chapter {}", index + 1)
    } else {
        content.title.clone()
    };
    ledger.unique_title(&title)
}

/// Write the session's failed URLs, or remove the file when nothing failed.
fn record_failures(path: &Path, failed: &[String]) -> Result<(), StoreError> {
    if failed.is_empty() {
        return match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        };
    }
    let mut text = failed.join("\n");
    text.push('\n');
    write_atomic(path, text.as_bytes())
}

/// Rebuild the archive and the notes file in ledger order.
pub fn rebuild_outputs(paths: &StoryPaths, ledger: &Ledger) -> Result<RebuildReport, StoreError> {
    let titles = ledger.ordered_titles();
    let report = archive::rebuild(&paths.archive, &titles)?;
    if paths.notes.is_file() {
        let notes = archive::rebuild(&paths.notes, &titles)?;
        tracing::debug!(written = notes.written, "notes rebuilt");
    }
    Ok(report)
}

/// Rebuild a story's outputs from its saved ledger without fetching anything.
pub fn assemble_story(paths: &StoryPaths) -> Result<RebuildReport, FetchError> {
    if !paths.ledger.is_file() {
        return Err(FetchError::MissingLedger {
            path: paths.ledger.clone(),
        });
    }
    let ledger = Ledger::load(&paths.ledger)?;
    Ok(rebuild_outputs(paths, &ledger)?)
}
