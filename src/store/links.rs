//! Link store: a story's discovered chapter URLs, chunked into numbered text files
//! (`<name> <start>-<end>.txt`, one URL per line, 1-based inclusive range).
//!
//! Chunks are merged into the ledger incrementally; `_added_links_tracker.json` records which
//! chunk files have already been merged.

use crate::model::LinkChunk;
use crate::store::{read_optional, write_atomic, Ledger, StoreError, StoryPaths};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const TRACKER_FILE: &str = "_added_links_tracker.json";

fn chunk_name() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)-(\d+)\.txt$").ok()).as_ref()
}

/// Sort key for chunk files: numbered files by start position, then anything else by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ChunkKey {
    Numbered(u64, String),
    Unnumbered(String),
}

fn chunk_key(file_name: &str) -> ChunkKey {
    let start = chunk_name()
        .and_then(|re| re.captures(file_name))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok());
    match start {
        Some(n) => ChunkKey::Numbered(n, file_name.to_string()),
        None => {
            tracing::warn!(file = file_name, "chunk file name has no numeric range; ordering by name");
            ChunkKey::Unnumbered(file_name.to_string())
        }
    }
}

/// Result of merging chunk files into the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Newly merged chunk files, in merge order.
    pub merged_files: Vec<String>,
    /// URLs appended to the ledger.
    pub added: usize,
}

/// Chunk files of one story.
#[derive(Debug, Clone)]
pub struct LinkStore {
    dir: PathBuf,
    base_name: String,
}

impl LinkStore {
    pub fn new(dir: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_name: base_name.into(),
        }
    }

    pub fn for_story(paths: &StoryPaths) -> Self {
        Self::new(&paths.links_dir, &paths.name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn tracker_path(&self) -> PathBuf {
        self.dir.join(TRACKER_FILE)
    }

    pub fn chunk_file_name(&self, start: usize, end: usize) -> String {
        format!("{} {}-{}.txt", self.base_name, start, end)
    }

    /// Write `urls` as chunks of `chunk_size`, numbered from `start_offset + 1`.
    pub fn save_chunks(
        &self,
        urls: &[String],
        start_offset: usize,
        chunk_size: usize,
    ) -> Result<Vec<LinkChunk>, StoreError> {
        let chunk_size = chunk_size.max(1);
        let mut chunks = Vec::new();
        for (i, slice) in urls.chunks(chunk_size).enumerate() {
            let start = start_offset + i * chunk_size + 1;
            let chunk = LinkChunk {
                start,
                end: start + slice.len() - 1,
                urls: slice.to_vec(),
            };
            let path = self.dir.join(self.chunk_file_name(chunk.start, chunk.end));
            let mut text = chunk.urls.join("\n");
            text.push('\n');
            write_atomic(&path, text.as_bytes())?;
            tracing::debug!(file = %path.display(), count = chunk.urls.len(), "saved link chunk");
            chunks.push(chunk);
        }
        if !chunks.is_empty() {
            tracing::info!(
                links = urls.len(),
                files = chunks.len(),
                dir = %self.dir.display(),
                "saved link chunks"
            );
        }
        Ok(chunks)
    }

    /// Chunk file names in merge order. A missing directory has no chunks.
    pub fn chunk_files(&self) -> Result<Vec<String>, StoreError> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };
        let mut keyed = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".txt") && entry.path().is_file() {
                keyed.push(chunk_key(&name));
            }
        }
        keyed.sort();
        Ok(keyed
            .into_iter()
            .map(|k| match k {
                ChunkKey::Numbered(_, name) | ChunkKey::Unnumbered(name) => name,
            })
            .collect())
    }

    fn read_chunk(&self, file_name: &str) -> Result<Vec<String>, StoreError> {
        let text = read_optional(&self.dir.join(file_name))?.unwrap_or_default();
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Every stored URL in chunk order; repeated URLs keep their first position.
    pub fn read_all_links(&self) -> Result<Vec<String>, StoreError> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for file in self.chunk_files()? {
            for url in self.read_chunk(&file)? {
                if seen.insert(url.clone()) {
                    all.push(url);
                } else {
                    tracing::warn!(file = %file, url = %url, "duplicate link across chunk files ignored");
                }
            }
        }
        Ok(all)
    }

    /// Names of chunk files already merged. Missing or malformed tracker reads as empty.
    pub fn load_tracker(&self) -> BTreeSet<String> {
        let path = self.tracker_path();
        let text = match read_optional(&path) {
            Ok(Some(t)) => t,
            Ok(None) => return BTreeSet::new(),
            Err(e) => {
                tracing::warn!(error = %e, "merge tracker unreadable; treating as empty");
                return BTreeSet::new();
            }
        };
        match serde_json::from_str::<Vec<String>>(&text) {
            Ok(names) => names.into_iter().collect(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "merge tracker corrupt; treating as empty");
                BTreeSet::new()
            }
        }
    }

    fn save_tracker(&self, names: &BTreeSet<String>) -> Result<(), StoreError> {
        let list: Vec<&String> = names.iter().collect();
        let json = serde_json::to_string_pretty(&list).map_err(|e| StoreError::Serialize {
            what: "merge tracker",
            source: e,
        })?;
        write_atomic(&self.tracker_path(), json.as_bytes())
    }

    /// Chunk files the tracker does not list yet, in merge order.
    pub fn unmerged(&self) -> Result<Vec<String>, StoreError> {
        let processed = self.load_tracker();
        Ok(self
            .chunk_files()?
            .into_iter()
            .filter(|f| !processed.contains(f))
            .collect())
    }

    /// Append the URLs of `files` to `ledger` in memory, in order. Returns how many were new.
    pub fn append_to(&self, ledger: &mut Ledger, files: &[String]) -> Result<usize, StoreError> {
        let mut added = 0;
        for file in files {
            let urls = self.read_chunk(file)?;
            added += ledger.append_pending(urls.iter().map(String::as_str));
        }
        Ok(added)
    }

    /// Record `files` as merged. Call only after the ledger holding their URLs is saved.
    pub fn mark_merged(&self, files: &[String]) -> Result<(), StoreError> {
        if files.is_empty() {
            return Ok(());
        }
        let mut processed = self.load_tracker();
        processed.extend(files.iter().cloned());
        self.save_tracker(&processed)
    }

    /// Append URLs from chunk files not merged yet to the ledger at `ledger_path`, in chunk
    /// order, then record those files as merged. Running it again without new chunk files is
    /// a no-op.
    pub fn merge_into_ledger(&self, ledger_path: &Path) -> Result<MergeReport, StoreError> {
        let new_files = self.unmerged()?;
        if new_files.is_empty() {
            return Ok(MergeReport::default());
        }

        let mut ledger = Ledger::load(ledger_path)?;
        let added = self.append_to(&mut ledger, &new_files)?;
        ledger.save(ledger_path)?;
        self.mark_merged(&new_files)?;
        tracing::info!(files = new_files.len(), added, "merged link chunks into ledger");
        Ok(MergeReport {
            merged_files: new_files,
            added,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
        range.map(|i| format!("https://x.test/ch/{}", i)).collect()
    }

    #[test]
    fn save_chunks_names_by_range() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = LinkStore::new(dir.path(), "Story");
        let chunks = store.save_chunks(&urls(1..=5), 0, 2)?;
        assert_eq!(
            chunks.iter().map(|c| (c.start, c.end)).collect::<Vec<_>>(),
            vec![(1, 2), (3, 4), (5, 5)]
        );
        assert_eq!(
            store.chunk_files()?,
            vec!["Story 1-2.txt", "Story 3-4.txt", "Story 5-5.txt"]
        );
        Ok(())
    }

    #[test]
    fn incremental_crawls_reassemble_in_numeric_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = LinkStore::new(dir.path(), "S");
        // Three crawls: 9 links, then 3 more, then 100 more. Lexicographic order would put
        // "S 100-..." and "S 10-..." before "S 2-...".
        store.save_chunks(&urls(1..=9), 0, 1)?;
        store.save_chunks(&urls(10..=12), 9, 2)?;
        store.save_chunks(&urls(13..=112), 12, 50)?;
        assert_eq!(store.read_all_links()?, urls(1..=112));
        Ok(())
    }

    #[test]
    fn unnumbered_files_sort_after_numbered() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = LinkStore::new(dir.path(), "S");
        store.save_chunks(&urls(1..=2), 0, 10)?;
        std::fs::write(dir.path().join("extra links.txt"), "https://x.test/extra\n")?;
        std::fs::write(dir.path().join(TRACKER_FILE), "[]")?;
        assert_eq!(store.chunk_files()?, vec!["S 1-2.txt", "extra links.txt"]);
        let mut expected = urls(1..=2);
        expected.push("https://x.test/extra".to_string());
        assert_eq!(store.read_all_links()?, expected);
        Ok(())
    }

    #[test]
    fn merge_is_incremental_and_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = LinkStore::new(dir.path().join("links"), "S");
        let ledger_path = dir.path().join("chapter_list.txt");

        store.save_chunks(&urls(1..=4), 0, 2)?;
        let first = store.merge_into_ledger(&ledger_path)?;
        assert_eq!(first.merged_files, vec!["S 1-2.txt", "S 3-4.txt"]);
        assert_eq!(first.added, 4);
        let after_first = std::fs::read_to_string(&ledger_path)?;

        let second = store.merge_into_ledger(&ledger_path)?;
        assert_eq!(second, MergeReport::default());
        assert_eq!(std::fs::read_to_string(&ledger_path)?, after_first);

        store.save_chunks(&urls(5..=6), 4, 2)?;
        let third = store.merge_into_ledger(&ledger_path)?;
        assert_eq!(third.merged_files, vec!["S 5-6.txt"]);
        let ledger = Ledger::load(&ledger_path)?;
        assert_eq!(ledger.urls().map(String::from).collect::<Vec<_>>(), urls(1..=6));
        Ok(())
    }

    #[test]
    fn merge_keeps_existing_ledger_state() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = LinkStore::new(dir.path().join("links"), "S");
        let ledger_path = dir.path().join("chapter_list.txt");
        std::fs::write(&ledger_path, "✔ One https://x.test/ch/1\n")?;
        store.save_chunks(&urls(1..=2), 0, 5)?;
        let report = store.merge_into_ledger(&ledger_path)?;
        assert_eq!(report.added, 1);
        assert_eq!(
            std::fs::read_to_string(&ledger_path)?,
            "✔ One https://x.test/ch/1\nhttps://x.test/ch/2\n"
        );
        Ok(())
    }

    #[test]
    fn corrupt_tracker_reads_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = LinkStore::new(dir.path(), "S");
        std::fs::write(dir.path().join(TRACKER_FILE), "{not json")?;
        assert!(store.load_tracker().is_empty());
        Ok(())
    }
}
