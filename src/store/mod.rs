//! Durable per-story state: link chunks, the chapter-list ledger, and the story registry.
//!
//! Whole-file rewrites go through [write_atomic]. Readers are permissive: a missing or
//! malformed file degrades to an empty default and is logged. Only I/O failures are errors.

pub mod ledger;
pub mod links;
pub mod registry;

pub use ledger::Ledger;
pub use links::LinkStore;
pub use registry::StoryRegistry;

use crate::model::StoryRecord;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LEDGER_FILE: &str = "chapter_list.txt";
pub const FAILED_FILE: &str = "failed_chapters.txt";
pub const LINKS_DIR: &str = "links";

/// Errors writing persisted state. Reads never fail on content, only on I/O.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Replace `path` with `contents` in one step: write a sibling temp file, then rename over it.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(contents).map_err(|e| StoreError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::Persist {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Read a file to a string; `Ok(None)` when it does not exist.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// On-disk locations of one story's files under the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryPaths {
    pub name: String,
    pub dir: PathBuf,
    pub links_dir: PathBuf,
    pub ledger: PathBuf,
    pub archive: PathBuf,
    pub notes: PathBuf,
    pub failed: PathBuf,
}

impl StoryPaths {
    /// Layout for `name`; `output_file` overrides the default `<name> Story.txt` archive.
    pub fn new(data_root: &Path, name: &str, output_file: Option<&Path>) -> Self {
        let dir = data_root.join(name);
        let archive = match output_file {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => dir.join(p),
            None => dir.join(format!("{} Story.txt", name)),
        };
        let notes = notes_path_for(&archive);
        Self {
            name: name.to_string(),
            links_dir: dir.join(LINKS_DIR),
            ledger: dir.join(LEDGER_FILE),
            failed: dir.join(FAILED_FILE),
            archive,
            notes,
            dir,
        }
    }

    pub fn for_record(data_root: &Path, name: &str, record: &StoryRecord) -> Self {
        Self::new(data_root, name, record.output_file.as_deref())
    }
}

/// `<stem> Author Notes.<ext>` next to the archive.
fn notes_path_for(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Story".to_string());
    let file_name = match archive.extension() {
        Some(ext) => format!("{} Author Notes.{}", stem, ext.to_string_lossy()),
        None => format!("{} Author Notes", stem),
    };
    archive.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_contents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("file.txt");
        write_atomic(&path, b"first")?;
        write_atomic(&path, b"second")?;
        assert_eq!(std::fs::read_to_string(&path)?, "second");
        let leftovers = std::fs::read_dir(dir.path().join("nested"))?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }

    #[test]
    fn read_optional_missing_is_none() -> Result<(), StoreError> {
        let path = std::env::temp_dir().join("novelsync_missing_file_for_test.txt");
        assert!(read_optional(&path)?.is_none());
        Ok(())
    }

    #[test]
    fn story_paths_default_layout() {
        let paths = StoryPaths::new(Path::new("data"), "World Keeper", None);
        assert_eq!(paths.ledger, PathBuf::from("data/World Keeper/chapter_list.txt"));
        assert_eq!(paths.links_dir, PathBuf::from("data/World Keeper/links"));
        assert_eq!(paths.archive, PathBuf::from("data/World Keeper/World Keeper Story.txt"));
        assert_eq!(
            paths.notes,
            PathBuf::from("data/World Keeper/World Keeper Story Author Notes.txt")
        );
    }

    #[test]
    fn story_paths_relative_output_override() {
        let paths = StoryPaths::new(Path::new("data"), "WK", Some(Path::new("wk.txt")));
        assert_eq!(paths.archive, PathBuf::from("data/WK/wk.txt"));
        assert_eq!(paths.notes, PathBuf::from("data/WK/wk Author Notes.txt"));
    }
}
