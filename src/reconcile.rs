//! Crawl reconciler: discover a story's live chapter links, diff them against what is stored,
//! and apply the result (new chunk files, dead marks, revivals, registry update).
//!
//! Planning never touches disk beyond reads; every write happens in the `apply_*` functions,
//! which callers run only when the user asked for it.

use crate::adapter::{ScraperError, SiteAdapter};
use crate::archive;
use crate::model::StoryRecord;
use crate::store::{Ledger, LinkStore, StoreError, StoryPaths, StoryRegistry};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("No adapter for story '{story}': {source}")]
    AdapterNotFound {
        story: String,
        #[source]
        source: ScraperError,
    },

    #[error("Could not retrieve chapter list for '{story}': {source}")]
    RetrievalFailure {
        story: String,
        #[source]
        source: ScraperError,
    },

    #[error("Story '{name}' is not tracked")]
    UnknownStory { name: String },

    #[error("Story '{name}' is already tracked")]
    AlreadyTracked { name: String },

    #[error("Invalid story name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Classification of a live link set against the stored one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDiff {
    /// Live but unknown, in live order.
    pub new: Vec<String>,
    /// Known and not yet dead, but absent from the live set, in stored order.
    pub removed: Vec<String>,
    /// Dead in the ledger and present again in the live set, in ledger order.
    pub revived: Vec<String>,
}

impl LinkDiff {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.removed.is_empty() && self.revived.is_empty()
    }
}

/// Pure diff. `known` is the stored sequence, `dead` the ledger's dead URLs.
pub fn diff_links(live: &[String], known: &[String], dead: &[String]) -> LinkDiff {
    let live_set: HashSet<&str> = live.iter().map(String::as_str).collect();
    let known_set: HashSet<&str> = known.iter().map(String::as_str).collect();
    let dead_set: HashSet<&str> = dead.iter().map(String::as_str).collect();
    LinkDiff {
        new: live
            .iter()
            .filter(|u| !known_set.contains(u.as_str()))
            .cloned()
            .collect(),
        removed: known
            .iter()
            .filter(|u| !live_set.contains(u.as_str()) && !dead_set.contains(u.as_str()))
            .cloned()
            .collect(),
        revived: dead
            .iter()
            .filter(|u| live_set.contains(u.as_str()))
            .cloned()
            .collect(),
    }
}

/// Ask the adapter for the live link list and normalize it to chronological order without
/// duplicates. An empty list counts as a retrieval failure.
pub fn discover_links(
    adapter: &mut dyn SiteAdapter,
    story: &str,
    entry_url: &str,
) -> Result<Vec<String>, CrawlError> {
    let mut links = adapter
        .list_chapter_links(entry_url)
        .map_err(|source| CrawlError::RetrievalFailure {
            story: story.to_string(),
            source,
        })?;
    if adapter.reverse_chapters() {
        links.reverse();
    }
    let mut seen = HashSet::new();
    links.retain(|u| seen.insert(u.clone()));
    if links.is_empty() {
        return Err(CrawlError::RetrievalFailure {
            story: story.to_string(),
            source: ScraperError::EmptyChapterList,
        });
    }
    tracing::debug!(story, links = links.len(), "discovered chapter links");
    Ok(links)
}

/// Stored link sequence: the chunk files, then any ledger URLs the chunks do not hold.
/// Returns the sequence and how many of its URLs come from chunk files.
fn known_links(links: &LinkStore, ledger: &Ledger) -> Result<(Vec<String>, usize), StoreError> {
    let mut known = links.read_all_links()?;
    let stored = known.len();
    let mut seen: HashSet<String> = known.iter().cloned().collect();
    for url in ledger.urls() {
        if seen.insert(url.to_string()) {
            known.push(url.to_string());
        }
    }
    Ok((known, stored))
}

/// Result of an update check for one story; nothing has been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub story: String,
    pub live_count: usize,
    pub known_count: usize,
    /// URLs held in chunk files; new chunk files are numbered after these.
    pub stored_count: usize,
    pub diff: LinkDiff,
}

impl UpdatePlan {
    pub fn has_changes(&self) -> bool {
        !self.diff.is_empty()
    }
}

/// Crawl `name` and diff the live links against its stored state.
pub fn plan_update(
    adapter: &mut dyn SiteAdapter,
    paths: &StoryPaths,
    record: &StoryRecord,
) -> Result<UpdatePlan, CrawlError> {
    let live = discover_links(adapter, &paths.name, &record.story_url)?;
    let links = LinkStore::for_story(paths);
    let ledger = Ledger::load(&paths.ledger)?;
    let (known, stored_count) = known_links(&links, &ledger)?;
    let diff = diff_links(&live, &known, &ledger.dead_urls());
    tracing::info!(
        story = %paths.name,
        live = live.len(),
        new = diff.new.len(),
        removed = diff.removed.len(),
        revived = diff.revived.len(),
        "update check"
    );
    Ok(UpdatePlan {
        story: paths.name.clone(),
        live_count: live.len(),
        known_count: known.len(),
        stored_count,
        diff,
    })
}

/// What [apply_update] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub chunk_files: usize,
    pub appended: usize,
    pub marked_dead: usize,
    pub revived: usize,
}

/// Persist an update plan. The ledger is loaded once and changed in memory: chunk files left
/// unmerged by an earlier run, the plan's new links, dead marks, and revivals. Then the writes
/// happen in recovery order:
///
/// 1. new chunk files (untracked until step 3, so a failure here leaves the ledger as it was
///    and the next run merges whatever was written);
/// 2. the ledger, in one atomic rewrite;
/// 3. the merge tracker (re-merging after a failure here appends nothing twice);
/// 4. the registry's count and timestamp.
pub fn apply_update(
    paths: &StoryPaths,
    plan: &UpdatePlan,
    registry: &mut StoryRegistry,
    now: NaiveDateTime,
) -> Result<ApplyReport, CrawlError> {
    let chunk_size = registry
        .get(&plan.story)
        .map(|r| r.chunk_size)
        .ok_or_else(|| CrawlError::UnknownStory {
            name: plan.story.clone(),
        })?;
    let mut report = ApplyReport::default();

    let links = LinkStore::for_story(paths);
    let mut ledger = Ledger::load(&paths.ledger)?;
    let stray = links.unmerged()?;
    report.appended = links.append_to(&mut ledger, &stray)?;
    report.appended += ledger.append_pending(plan.diff.new.iter().map(String::as_str));
    report.marked_dead = ledger.mark_dead(&plan.diff.removed);
    report.revived = ledger.revive(&plan.diff.revived);
    if report.revived > 0 {
        requeue_without_body(paths, &mut ledger)?;
    }

    let saved = links.save_chunks(&plan.diff.new, plan.stored_count, chunk_size)?;
    report.chunk_files = saved.len();
    let mut merged = stray;
    merged.extend(saved.iter().map(|c| links.chunk_file_name(c.start, c.end)));
    if report.appended > 0 || report.marked_dead > 0 || report.revived > 0 {
        ledger.save(&paths.ledger)?;
    }
    links.mark_merged(&merged)?;

    registry.record_crawl(&plan.story, plan.live_count, now);
    registry.save()?;
    tracing::info!(
        story = %plan.story,
        chunk_files = report.chunk_files,
        appended = report.appended,
        marked_dead = report.marked_dead,
        revived = report.revived,
        "update applied"
    );
    Ok(report)
}

/// Completed entries whose block is no longer in the archive go back to pending, so the next
/// fetch downloads them again.
fn requeue_without_body(paths: &StoryPaths, ledger: &mut Ledger) -> Result<(), StoreError> {
    let stored = archive::stored_titles(&paths.archive)?;
    let requeued = ledger.requeue_missing(|title| stored.contains(title));
    if !requeued.is_empty() {
        tracing::info!(
            story = %paths.name,
            count = requeued.len(),
            "chapters without an archive block queued for download"
        );
    }
    Ok(())
}

/// Dead ledger URLs that the live site lists again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevivalPlan {
    pub story: String,
    pub dead_count: usize,
    pub revived: Vec<String>,
}

/// Re-crawl a story and find dead entries that reappeared. A ledger with no dead entries is
/// answered without touching the network.
pub fn plan_revival(
    adapter: &mut dyn SiteAdapter,
    paths: &StoryPaths,
    record: &StoryRecord,
) -> Result<RevivalPlan, CrawlError> {
    let ledger = Ledger::load(&paths.ledger)?;
    let dead = ledger.dead_urls();
    if dead.is_empty() {
        return Ok(RevivalPlan {
            story: paths.name.clone(),
            dead_count: 0,
            revived: Vec::new(),
        });
    }
    let live = discover_links(adapter, &paths.name, &record.story_url)?;
    let revived = diff_links(&live, &[], &dead).revived;
    tracing::info!(story = %paths.name, dead = dead.len(), revived = revived.len(), "revival check");
    Ok(RevivalPlan {
        story: paths.name.clone(),
        dead_count: dead.len(),
        revived,
    })
}

/// Restore the plan's revived entries in place. A revived chapter whose block the archive no
/// longer holds is restored as pending. Returns how many entries were revived.
pub fn apply_revival(paths: &StoryPaths, plan: &RevivalPlan) -> Result<usize, CrawlError> {
    if plan.revived.is_empty() {
        return Ok(0);
    }
    let mut ledger = Ledger::load(&paths.ledger)?;
    let changed = ledger.revive(&plan.revived);
    requeue_without_body(paths, &mut ledger)?;
    ledger.save(&paths.ledger)?;
    Ok(changed)
}

/// Project name from a story URL: last path segment, separators to spaces, words capitalized.
pub fn default_story_name(story_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(story_url).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let name = segment
        .split(|c: char| c == '-' || c == '_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// A story name becomes a directory under the data root, so it must be one plain path
/// component.
pub fn validate_story_name(name: &str) -> Result<(), CrawlError> {
    let reason = if name.trim().is_empty() {
        Some("name is empty")
    } else if name.contains(|c: char| c == '/' || c == '\\') {
        Some("name contains a path separator")
    } else if name.contains("..") {
        Some("name contains '..'")
    } else if name.contains(char::is_control) {
        Some("name contains a control character")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CrawlError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Parameters for tracking a new story.
#[derive(Debug, Clone)]
pub struct NewStory {
    pub name: String,
    pub url: String,
    pub chunk_size: usize,
    pub output_file: Option<PathBuf>,
}

/// Start tracking a story: crawl it, store its links as chunk files, seed the ledger, and
/// register it. Returns the number of links found.
pub fn track_new_story(
    adapter: &mut dyn SiteAdapter,
    data_root: &Path,
    registry: &mut StoryRegistry,
    story: &NewStory,
    now: NaiveDateTime,
) -> Result<usize, CrawlError> {
    validate_story_name(&story.name)?;
    if registry.contains(&story.name) {
        return Err(CrawlError::AlreadyTracked {
            name: story.name.clone(),
        });
    }
    let live = discover_links(adapter, &story.name, &story.url)?;

    let mut record = StoryRecord::new(&story.url, story.chunk_size);
    record.output_file = story.output_file.clone();
    record.domain = Some(adapter.site().domain().to_string());
    record.last_chapter_count = live.len();
    record.last_scraped_date = Some(now);

    let paths = StoryPaths::for_record(data_root, &story.name, &record);
    let links = LinkStore::for_story(&paths);
    links.save_chunks(&live, 0, record.chunk_size)?;
    links.merge_into_ledger(&paths.ledger)?;

    registry.upsert(&story.name, record);
    registry.save()?;
    tracing::info!(story = %story.name, links = live.len(), "story tracked");
    Ok(live.len())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapter::Site;
    use crate::model::ChapterContent;
    use chrono::NaiveDate;
    use std::time::Duration;

    /// Adapter that serves a fixed link list.
    pub(crate) struct ListAdapter {
        pub links: Option<Vec<String>>,
        pub reverse: bool,
        pub calls: usize,
    }

    impl ListAdapter {
        pub(crate) fn new(links: &[&str]) -> Self {
            Self {
                links: Some(links.iter().map(|s| s.to_string()).collect()),
                reverse: false,
                calls: 0,
            }
        }

        fn failing() -> Self {
            Self {
                links: None,
                reverse: false,
                calls: 0,
            }
        }
    }

    impl SiteAdapter for ListAdapter {
        fn site(&self) -> Site {
            Site::RoyalRoad
        }

        fn reverse_chapters(&self) -> bool {
            self.reverse
        }

        fn list_chapter_links(&mut self, _entry_url: &str) -> Result<Vec<String>, ScraperError> {
            self.calls += 1;
            self.links.clone().ok_or(ScraperError::ChapterListParse {
                reason: "markup changed".to_string(),
            })
        }

        fn fetch_chapter(
            &mut self,
            url: &str,
            _timeout: Duration,
        ) -> Result<ChapterContent, ScraperError> {
            Err(ScraperError::ParseChapter {
                url: url.to_string(),
                reason: "not served".to_string(),
            })
        }
    }

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .unwrap_or_default()
    }

    fn tracked(dir: &Path, links: &[&str]) -> Result<(StoryRegistry, StoryPaths), CrawlError> {
        let mut registry = StoryRegistry::load(dir)?;
        let story = NewStory {
            name: "S".to_string(),
            url: "https://www.royalroad.com/fiction/1/s".to_string(),
            chunk_size: 2,
            output_file: None,
        };
        track_new_story(&mut ListAdapter::new(links), dir, &mut registry, &story, now())?;
        let record = registry.get("S").cloned().ok_or(CrawlError::UnknownStory {
            name: "S".to_string(),
        })?;
        let paths = StoryPaths::for_record(dir, "S", &record);
        Ok((registry, paths))
    }

    #[test]
    fn diff_reports_new_in_live_order() {
        let d = diff_links(&v(&["u1", "u2", "u3"]), &v(&["u1", "u2"]), &[]);
        assert_eq!(d.new, v(&["u3"]));
        assert!(d.removed.is_empty());
        assert!(d.revived.is_empty());

        let d = diff_links(&v(&["u4", "u1", "u3"]), &v(&["u1"]), &[]);
        assert_eq!(d.new, v(&["u4", "u3"]));
    }

    #[test]
    fn diff_removed_skips_already_dead_and_finds_revivals() {
        let known = v(&["u1", "u2", "u3"]);
        let dead = v(&["u2"]);
        let d = diff_links(&v(&["u1", "u3"]), &known, &dead);
        assert!(d.is_empty());

        let d = diff_links(&v(&["u1", "u2", "u3"]), &known, &dead);
        assert_eq!(d.revived, v(&["u2"]));
        assert!(d.new.is_empty() && d.removed.is_empty());

        let d = diff_links(&v(&["u1"]), &known, &dead);
        assert_eq!(d.removed, v(&["u3"]));
    }

    #[test]
    fn discover_reverses_and_dedupes() -> Result<(), CrawlError> {
        let mut adapter = ListAdapter::new(&["c3", "c2", "c2", "c1"]);
        adapter.reverse = true;
        assert_eq!(discover_links(&mut adapter, "S", "u")?, v(&["c1", "c2", "c3"]));
        Ok(())
    }

    #[test]
    fn discover_empty_or_failed_is_retrieval_failure() {
        let result = discover_links(&mut ListAdapter::new(&[]), "S", "u");
        assert!(matches!(result, Err(CrawlError::RetrievalFailure { .. })));
        let result = discover_links(&mut ListAdapter::failing(), "S", "u");
        assert!(matches!(result, Err(CrawlError::RetrievalFailure { .. })));
    }

    #[test]
    fn track_new_story_seeds_chunks_ledger_and_registry() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (registry, paths) = tracked(dir.path(), &["a", "b", "c"])?;
        let record = registry.get("S").ok_or("missing")?;
        assert_eq!(record.last_chapter_count, 3);
        assert_eq!(record.domain.as_deref(), Some("royalroad.com"));
        assert_eq!(LinkStore::for_story(&paths).chunk_files()?, vec!["S 1-2.txt", "S 3-3.txt"]);
        assert_eq!(std::fs::read_to_string(&paths.ledger)?, "a\nb\nc\n");
        assert!(StoryRegistry::load(dir.path())?.contains("S"));

        let mut registry = registry;
        let again = NewStory {
            name: "S".to_string(),
            url: "https://www.royalroad.com/fiction/1/s".to_string(),
            chunk_size: 2,
            output_file: None,
        };
        let result = track_new_story(&mut ListAdapter::new(&["a"]), dir.path(), &mut registry, &again, now());
        assert!(matches!(result, Err(CrawlError::AlreadyTracked { .. })));
        Ok(())
    }

    #[test]
    fn update_appends_new_links_after_stored_ones() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (mut registry, paths) = tracked(dir.path(), &["a", "b", "c"])?;
        let record = registry.get("S").cloned().ok_or("missing")?;

        let plan = plan_update(&mut ListAdapter::new(&["a", "b", "c", "d"]), &paths, &record)?;
        assert_eq!(plan.diff.new, v(&["d"]));
        assert_eq!(plan.stored_count, 3);

        let report = apply_update(&paths, &plan, &mut registry, now())?;
        assert_eq!(report.appended, 1);
        let files = LinkStore::for_story(&paths).chunk_files()?;
        assert_eq!(files, vec!["S 1-2.txt", "S 3-3.txt", "S 4-4.txt"]);
        assert_eq!(std::fs::read_to_string(&paths.ledger)?, "a\nb\nc\nd\n");
        assert_eq!(registry.get("S").map(|r| r.last_chapter_count), Some(4));
        Ok(())
    }

    #[test]
    fn update_marks_removed_dead_in_place_then_revives() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (mut registry, paths) = tracked(dir.path(), &["u1", "u2", "u3"])?;
        let record = registry.get("S").cloned().ok_or("missing")?;

        let plan = plan_update(&mut ListAdapter::new(&["u1", "u3"]), &paths, &record)?;
        assert_eq!(plan.diff.removed, v(&["u2"]));
        apply_update(&paths, &plan, &mut registry, now())?;
        assert_eq!(
            std::fs::read_to_string(&paths.ledger)?,
            "u1\n[DEAD LINK] u2\nu3\n"
        );

        let revival = plan_revival(&mut ListAdapter::new(&["u1", "u3"]), &paths, &record)?;
        assert!(revival.revived.is_empty());

        let revival = plan_revival(&mut ListAdapter::new(&["u1", "u2", "u3"]), &paths, &record)?;
        assert_eq!(revival.revived, v(&["u2"]));
        assert_eq!(apply_revival(&paths, &revival)?, 1);
        assert_eq!(std::fs::read_to_string(&paths.ledger)?, "u1\nu2\nu3\n");
        Ok(())
    }

    #[test]
    fn update_revives_link_that_reappears() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (mut registry, paths) = tracked(dir.path(), &["u1", "u2", "u3"])?;
        let record = registry.get("S").cloned().ok_or("missing")?;

        let plan = plan_update(&mut ListAdapter::new(&["u1", "u3"]), &paths, &record)?;
        apply_update(&paths, &plan, &mut registry, now())?;

        let plan = plan_update(&mut ListAdapter::new(&["u1", "u2", "u3"]), &paths, &record)?;
        assert_eq!(plan.diff.revived, v(&["u2"]));
        assert!(plan.diff.new.is_empty() && plan.diff.removed.is_empty());
        let report = apply_update(&paths, &plan, &mut registry, now())?;
        assert_eq!(report.revived, 1);
        assert_eq!(report.chunk_files, 0);
        assert_eq!(std::fs::read_to_string(&paths.ledger)?, "u1\nu2\nu3\n");
        Ok(())
    }

    #[test]
    fn revived_chapter_without_archive_block_is_queued_again() -> Result<(), Box<dyn std::error::Error>> {
        const U1: &str = "https://x.test/1";
        const U2: &str = "https://x.test/2";
        const U3: &str = "https://x.test/3";
        let dir = tempfile::tempdir()?;
        let (mut registry, paths) = tracked(dir.path(), &[U1, U2, U3])?;
        let record = registry.get("S").cloned().ok_or("missing")?;
        std::fs::write(
            &paths.ledger,
            format!("✔ One {U1}\n[DEAD LINK] ✔ Two {U2}\n[DEAD LINK] ✔ Three {U3}\n"),
        )?;
        archive::append_chapter(&paths.archive, "One", "one")?;
        archive::append_chapter(&paths.archive, "Three", "three")?;

        let plan = plan_revival(&mut ListAdapter::new(&[U1, U2]), &paths, &record)?;
        assert_eq!(apply_revival(&paths, &plan)?, 1);
        assert_eq!(
            std::fs::read_to_string(&paths.ledger)?,
            format!("✔ One {U1}\n{U2}\n[DEAD LINK] ✔ Three {U3}\n")
        );

        let plan = plan_update(&mut ListAdapter::new(&[U1, U2, U3]), &paths, &record)?;
        assert_eq!(plan.diff.revived, v(&[U3]));
        apply_update(&paths, &plan, &mut registry, now())?;
        assert_eq!(
            std::fs::read_to_string(&paths.ledger)?,
            format!("✔ One {U1}\n{U2}\n✔ Three {U3}\n")
        );
        Ok(())
    }

    #[test]
    fn failed_chunk_write_leaves_ledger_and_registry_unchanged() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (mut registry, paths) = tracked(dir.path(), &["a", "b", "c"])?;
        let record = registry.get("S").cloned().ok_or("missing")?;

        let plan = plan_update(&mut ListAdapter::new(&["a", "b", "d"]), &paths, &record)?;
        assert_eq!(plan.diff.new, v(&["d"]));
        assert_eq!(plan.diff.removed, v(&["c"]));

        // A directory where the new chunk file should go makes the rename fail.
        let blocker = paths.links_dir.join("S 4-4.txt");
        std::fs::create_dir(&blocker)?;
        let result = apply_update(&paths, &plan, &mut registry, now());
        assert!(matches!(result, Err(CrawlError::Store(_))));
        assert_eq!(std::fs::read_to_string(&paths.ledger)?, "a\nb\nc\n");
        assert_eq!(registry.get("S").map(|r| r.last_chapter_count), Some(3));
        assert!(!LinkStore::for_story(&paths).load_tracker().contains("S 4-4.txt"));

        std::fs::remove_dir(&blocker)?;
        apply_update(&paths, &plan, &mut registry, now())?;
        assert_eq!(std::fs::read_to_string(&paths.ledger)?, "a\nb\n[DEAD LINK] c\nd\n");
        assert!(LinkStore::for_story(&paths).load_tracker().contains("S 4-4.txt"));
        Ok(())
    }

    #[test]
    fn update_merges_chunk_files_left_unmerged() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (mut registry, paths) = tracked(dir.path(), &["a", "b"])?;
        let record = registry.get("S").cloned().ok_or("missing")?;
        // Chunk written by a run that stopped before the ledger save.
        LinkStore::for_story(&paths).save_chunks(&v(&["c"]), 2, 2)?;

        let plan = plan_update(&mut ListAdapter::new(&["a", "b", "c", "d"]), &paths, &record)?;
        assert_eq!(plan.diff.new, v(&["d"]));
        let report = apply_update(&paths, &plan, &mut registry, now())?;
        assert_eq!(report.appended, 2);
        assert_eq!(std::fs::read_to_string(&paths.ledger)?, "a\nb\nc\nd\n");
        assert!(LinkStore::for_story(&paths).unmerged()?.is_empty());
        Ok(())
    }

    #[test]
    fn story_names_must_be_one_path_component() -> Result<(), Box<dyn std::error::Error>> {
        for bad in ["../escape", "a/b", "a\\b", "..", "  ", "x\ny"] {
            assert!(
                matches!(validate_story_name(bad), Err(CrawlError::InvalidName { .. })),
                "{:?} accepted",
                bad
            );
        }
        validate_story_name("Mother Of Learning")?;
        validate_story_name("v1.2 Part 3")?;

        let dir = tempfile::tempdir()?;
        let mut registry = StoryRegistry::load(dir.path())?;
        let story = NewStory {
            name: "../outside".to_string(),
            url: "https://www.royalroad.com/fiction/1/s".to_string(),
            chunk_size: 2,
            output_file: None,
        };
        let mut adapter = ListAdapter::new(&["a"]);
        let result = track_new_story(&mut adapter, dir.path(), &mut registry, &story, now());
        assert!(matches!(result, Err(CrawlError::InvalidName { .. })));
        assert_eq!(adapter.calls, 0);
        assert!(registry.is_empty());
        Ok(())
    }

    #[test]
    fn retrieval_failure_leaves_state_untouched() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (_registry, paths) = tracked(dir.path(), &["a", "b"])?;
        let record = StoryRecord::new("https://www.royalroad.com/fiction/1/s", 2);
        let before = std::fs::read_to_string(&paths.ledger)?;
        let result = plan_update(&mut ListAdapter::failing(), &paths, &record);
        assert!(matches!(result, Err(CrawlError::RetrievalFailure { .. })));
        assert_eq!(std::fs::read_to_string(&paths.ledger)?, before);
        Ok(())
    }

    #[test]
    fn revival_without_dead_entries_skips_network() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (_registry, paths) = tracked(dir.path(), &["a"])?;
        let record = StoryRecord::new("https://www.royalroad.com/fiction/1/s", 2);
        let mut adapter = ListAdapter::failing();
        let plan = plan_revival(&mut adapter, &paths, &record)?;
        assert_eq!(plan.dead_count, 0);
        assert_eq!(adapter.calls, 0);
        Ok(())
    }

    #[test]
    fn default_name_from_url() {
        assert_eq!(
            default_story_name("https://www.royalroad.com/fiction/21220/mother-of-learning").as_deref(),
            Some("Mother Of Learning")
        );
        assert_eq!(
            default_story_name("https://www.scribblehub.com/series/123/the_last_story/").as_deref(),
            Some("The Last Story")
        );
        assert_eq!(default_story_name("not a url"), None);
    }
}
