//! Story registry: `stories.json` under the data root, keyed by project name.
//!
//! Each save first copies the previous file to `backups/stories_<timestamp>.json`; only the
//! newest [MAX_BACKUPS] copies are kept.

use crate::model::StoryRecord;
use crate::store::{read_optional, write_atomic, StoreError};
use chrono::{Local, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const REGISTRY_FILE: &str = "stories.json";
pub const BACKUP_DIR: &str = "backups";
pub const MAX_BACKUPS: usize = 10;

#[derive(Debug, Clone)]
pub struct StoryRegistry {
    path: PathBuf,
    backup_dir: PathBuf,
    stories: BTreeMap<String, StoryRecord>,
}

impl StoryRegistry {
    /// Empty registry rooted at `data_root`; nothing is read.
    pub fn empty(data_root: &Path) -> Self {
        Self {
            path: data_root.join(REGISTRY_FILE),
            backup_dir: data_root.join(BACKUP_DIR),
            stories: BTreeMap::new(),
        }
    }

    /// Load `stories.json`. Missing or malformed content reads as an empty registry;
    /// I/O errors other than not-found are returned so a later save cannot clobber the file.
    pub fn load(data_root: &Path) -> Result<Self, StoreError> {
        let mut registry = Self::empty(data_root);
        let Some(text) = read_optional(&registry.path)? else {
            tracing::debug!(path = %registry.path.display(), "no registry yet");
            return Ok(registry);
        };
        match serde_json::from_str::<BTreeMap<String, StoryRecord>>(&text) {
            Ok(stories) => registry.stories = stories,
            Err(e) => tracing::warn!(
                path = %registry.path.display(),
                error = %e,
                "registry is malformed; starting empty"
            ),
        }
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Back up the current file (if any), then write the registry atomically.
    pub fn save(&self) -> Result<(), StoreError> {
        self.backup()?;
        let json = serde_json::to_string_pretty(&self.stories).map_err(|e| StoreError::Serialize {
            what: "story registry",
            source: e,
        })?;
        write_atomic(&self.path, json.as_bytes())?;
        tracing::debug!(path = %self.path.display(), stories = self.stories.len(), "registry saved");
        Ok(())
    }

    fn backup(&self) -> Result<Option<PathBuf>, StoreError> {
        if !self.path.is_file() {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.backup_dir)
            .map_err(|e| StoreError::io(&self.backup_dir, e))?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let target = self.backup_dir.join(format!("stories_{}.json", stamp));
        std::fs::copy(&self.path, &target).map_err(|e| StoreError::io(&target, e))?;
        tracing::debug!(backup = %target.display(), "registry backed up");
        self.prune_backups()?;
        Ok(Some(target))
    }

    /// Delete all but the newest [MAX_BACKUPS] backups. Timestamped names sort by age.
    fn prune_backups(&self) -> Result<(), StoreError> {
        let read_dir =
            std::fs::read_dir(&self.backup_dir).map_err(|e| StoreError::io(&self.backup_dir, e))?;
        let mut backups = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| StoreError::io(&self.backup_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("stories_") && name.ends_with(".json") {
                backups.push(entry.path());
            }
        }
        if backups.len() <= MAX_BACKUPS {
            return Ok(());
        }
        backups.sort();
        let excess = backups.len() - MAX_BACKUPS;
        for old in &backups[..excess] {
            if let Err(e) = std::fs::remove_file(old) {
                tracing::warn!(backup = %old.display(), error = %e, "could not remove old registry backup");
            }
        }
        tracing::debug!(removed = excess, "old registry backups pruned");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stories.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&StoryRecord> {
        self.stories.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoryRecord)> {
        self.stories.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> Vec<String> {
        self.stories.keys().cloned().collect()
    }

    /// Stories still being followed (`is_complete == false`), by name.
    pub fn active(&self) -> Vec<String> {
        self.stories
            .iter()
            .filter(|(_, r)| !r.is_complete)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Insert or replace the record for `name`.
    pub fn upsert(&mut self, name: impl Into<String>, record: StoryRecord) {
        self.stories.insert(name.into(), record);
    }

    /// Record the outcome of a crawl. Returns false if `name` is not tracked.
    pub fn record_crawl(&mut self, name: &str, chapter_count: usize, at: NaiveDateTime) -> bool {
        match self.stories.get_mut(name) {
            Some(record) => {
                record.last_chapter_count = chapter_count;
                record.last_scraped_date = Some(at);
                true
            }
            None => false,
        }
    }

    /// Flip `is_complete`; returns the new value, or None if `name` is not tracked.
    pub fn toggle_complete(&mut self, name: &str) -> Option<bool> {
        let record = self.stories.get_mut(name)?;
        record.is_complete = !record.is_complete;
        Some(record.is_complete)
    }
}
