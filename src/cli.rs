//! CLI parsing and orchestration. Loads config once, opens one HTTP session per run, and maps
//! errors to exit codes.

use crate::adapter::{adapter_for, resolve_site, PoliteClient, ScraperError};
use crate::config::{self, Overrides, Settings};
use crate::fetch::{self, FetchError, FetchOptions, FetchSummary};
use crate::reconcile::{
    apply_revival, apply_update, default_story_name, plan_revival, plan_update,
    track_new_story, validate_story_name, CrawlError, NewStory, UpdatePlan,
};
use crate::store::{StoreError, StoryPaths, StoryRegistry};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Crawl(#[from] CrawlError),

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Store(#[from] StoreError),

    /// Some stories of a batch failed; the rest were processed.
    #[error("{0}")]
    Incomplete(String),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Scraper(_) | CliRunError::Incomplete(_) => 2,
            CliRunError::Crawl(e) => match e {
                CrawlError::UnknownStory { .. }
                | CrawlError::AlreadyTracked { .. }
                | CrawlError::InvalidName { .. } => 1,
                CrawlError::AdapterNotFound { .. } | CrawlError::RetrievalFailure { .. } => 2,
                CrawlError::Store(_) => 3,
            },
            CliRunError::Fetch(e) => match e {
                FetchError::UnknownStory { .. } | FetchError::MissingLedger { .. } => 1,
                FetchError::Adapter(_) => 2,
                FetchError::Store(_) => 3,
            },
            CliRunError::Store(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "novelsync")]
#[command(about = "Keep local text archives of Royal Road and Scribble Hub stories in sync")]
#[command(
    after_help = "Config file keys (data_dir, chunk_size, user_agent, request_delay_secs, timeout_unit_secs, retry_attempts, initial_backoff_secs, save_notes) are read from ./novelsync.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Only warnings and errors; no progress bar.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Directory holding stories.json and the story folders (overrides config).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// HTTP User-Agent (overrides config).
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Delay between requests in seconds (overrides config; default 2).
    #[arg(long, global = true)]
    pub delay: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start tracking a story and save its chapter links.
    Add {
        /// Story URL (Royal Road fiction page or Scribble Hub series page).
        url: String,
        /// Project name. Default: derived from the URL.
        #[arg(long)]
        name: Option<String>,
        /// Links per chunk file (overrides config; default 100).
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Archive file name, relative to the story folder.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check stories for new, removed, or reappeared chapters.
    Update {
        /// Stories to check. Default: every story not marked complete.
        names: Vec<String>,
        /// Save the changes instead of only reporting them.
        #[arg(long)]
        apply: bool,
    },
    /// Restore dead chapter links that the site lists again.
    Revive {
        name: String,
        #[arg(long)]
        apply: bool,
    },
    /// Fetch every pending chapter and rebuild the archive.
    Fetch {
        name: String,
        /// Also keep author's notes (overrides config).
        #[arg(long)]
        notes: bool,
    },
    /// Rebuild the archive in chapter order without fetching.
    Assemble { name: String },
    /// List tracked stories.
    List,
    /// Mark a story complete, or active again.
    Toggle { name: String },
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let overrides = Overrides {
        data_dir: args.data_dir.clone(),
        chunk_size: match &args.command {
            Command::Add { chunk_size, .. } => *chunk_size,
            _ => None,
        },
        user_agent: args.user_agent.clone(),
        delay: args.delay,
        save_notes: matches!(args.command, Command::Fetch { notes: true, .. }),
    };
    let settings = Settings::resolve(config.as_ref(), &overrides);
    tracing::debug!(?settings, "settings resolved");
    run_with(args, &settings)
}

/// Run a parsed command against resolved settings.
pub fn run_with(args: &Args, settings: &Settings) -> Result<(), CliRunError> {
    match &args.command {
        Command::Add {
            url, name, output, ..
        } => add(settings, url, name.as_deref(), output.clone()),
        Command::Update { names, apply } => update(settings, names, *apply),
        Command::Revive { name, apply } => revive(settings, name, *apply),
        Command::Fetch { name, .. } => fetch_chapters(settings, name, args.quiet),
        Command::Assemble { name } => assemble(settings, name),
        Command::List => list(settings),
        Command::Toggle { name } => toggle(settings, name),
    }
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn open_session(settings: &Settings) -> Result<PoliteClient, CliRunError> {
    settings
        .client_builder()
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

fn add(
    settings: &Settings,
    url: &str,
    name: Option<&str>,
    output: Option<PathBuf>,
) -> Result<(), CliRunError> {
    let site = resolve_site(url).map_err(|e| match &e {
        ScraperError::InvalidUrl { input, reason } => CliRunError::InvalidInput(format!(
            "Expected a story URL. Example: https://www.royalroad.com/fiction/12345/... Invalid: {}: {}",
            input, reason
        )),
        ScraperError::AdapterNotFound { .. } => CliRunError::InvalidInput(e.to_string()),
        _ => CliRunError::Scraper(e),
    })?;
    let name = match name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => default_story_name(url).ok_or_else(|| {
            CliRunError::InvalidInput(format!("Cannot derive a name from {}; pass --name", url))
        })?,
    };
    validate_story_name(&name)?;

    let mut registry = StoryRegistry::load(&settings.data_dir)?;
    let mut client = open_session(settings)?;
    let mut adapter = adapter_for(site, &mut client);
    let story = NewStory {
        name: name.clone(),
        url: url.to_string(),
        chunk_size: settings.chunk_size,
        output_file: output,
    };
    let count = track_new_story(
        adapter.as_mut(),
        &settings.data_dir,
        &mut registry,
        &story,
        now(),
    )?;
    println!("Tracking '{}': {} chapters found", name, count);
    Ok(())
}

fn update(settings: &Settings, names: &[String], apply: bool) -> Result<(), CliRunError> {
    let mut registry = StoryRegistry::load(&settings.data_dir)?;
    let names = if names.is_empty() {
        registry.active()
    } else {
        names.to_vec()
    };
    if names.is_empty() {
        println!("No active stories to check.");
        return Ok(());
    }

    let mut client = open_session(settings)?;
    let mut failed = Vec::new();
    for name in &names {
        if let Err(e) = update_one(settings, &mut client, &mut registry, name, apply) {
            tracing::error!(story = %name, error = %e, "update check failed");
            eprintln!("{}: {}", name, e);
            failed.push(name.clone());
        }
    }
    if !apply {
        println!("Dry run; pass --apply to save these changes.");
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(CliRunError::Incomplete(format!(
            "{} of {} stories could not be checked: {}",
            failed.len(),
            names.len(),
            failed.join(", ")
        )))
    }
}

fn update_one(
    settings: &Settings,
    client: &mut PoliteClient,
    registry: &mut StoryRegistry,
    name: &str,
    apply: bool,
) -> Result<(), CrawlError> {
    let record = registry
        .get(name)
        .cloned()
        .ok_or_else(|| CrawlError::UnknownStory {
            name: name.to_string(),
        })?;
    let site = resolve_site(&record.story_url).map_err(|source| CrawlError::AdapterNotFound {
        story: name.to_string(),
        source,
    })?;
    let paths = StoryPaths::for_record(&settings.data_dir, name, &record);
    let mut adapter = adapter_for(site, client);
    let plan = plan_update(adapter.as_mut(), &paths, &record)?;
    print_plan(&plan);
    if apply {
        apply_update(&paths, &plan, registry, now())?;
    }
    Ok(())
}

fn print_plan(plan: &UpdatePlan) {
    println!(
        "{}: {} live, {} known; {} new, {} removed, {} revived",
        plan.story,
        plan.live_count,
        plan.known_count,
        plan.diff.new.len(),
        plan.diff.removed.len(),
        plan.diff.revived.len()
    );
    for url in &plan.diff.new {
        println!("  + {}", url);
    }
    for url in &plan.diff.removed {
        println!("  - {}", url);
    }
    for url in &plan.diff.revived {
        println!("  * {}", url);
    }
}

fn revive(settings: &Settings, name: &str, apply: bool) -> Result<(), CliRunError> {
    let registry = StoryRegistry::load(&settings.data_dir)?;
    let (record, paths, site) = fetch::resolve_story(&settings.data_dir, &registry, name)?;
    let mut client = open_session(settings)?;
    let mut adapter = adapter_for(site, &mut client);
    let plan = plan_revival(adapter.as_mut(), &paths, &record)?;
    if plan.dead_count == 0 {
        println!("{}: no dead links", name);
        return Ok(());
    }
    println!(
        "{}: {} dead, {} listed again",
        name,
        plan.dead_count,
        plan.revived.len()
    );
    for url in &plan.revived {
        println!("  * {}", url);
    }
    if apply {
        let restored = apply_revival(&paths, &plan)?;
        println!("Restored {} links", restored);
    } else if !plan.revived.is_empty() {
        println!("Dry run; pass --apply to restore them.");
    }
    Ok(())
}

fn fetch_chapters(settings: &Settings, name: &str, quiet: bool) -> Result<(), CliRunError> {
    let registry = StoryRegistry::load(&settings.data_dir)?;
    let (_record, paths, site) = fetch::resolve_story(&settings.data_dir, &registry, name)?;
    let mut client = open_session(settings)?;
    let mut adapter = adapter_for(site, &mut client);

    let progress_state: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
    let progress_cb = |n: u32, total: u32| {
        if total == 0 {
            return;
        }
        let mut state = progress_state.borrow_mut();
        let pb = state.get_or_insert_with(|| {
            let bar = indicatif::ProgressBar::new(total as u64);
            if let Ok(style) = indicatif::ProgressStyle::default_bar()
                .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
            {
                bar.set_style(
                    style
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                        .progress_chars("█▉▊▋▌▍▎▏ "),
                );
            }
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        pb.set_position(n as u64);
        pb.set_message(format!("Chapter {}/{}", n, total));
    };
    let progress: Option<&dyn Fn(u32, u32)> = if quiet { None } else { Some(&progress_cb) };

    let options = FetchOptions {
        retry: settings.retry,
        save_notes: settings.save_notes,
        progress,
    };
    let result = fetch::fetch_story(adapter.as_mut(), &paths, &options);

    if let Some(pb) = progress_state.borrow_mut().take() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let summary = result?;
    print_summary(name, &summary, &paths);
    Ok(())
}

fn print_summary(name: &str, summary: &FetchSummary, paths: &StoryPaths) {
    println!(
        "{}: {} saved, {} skipped, {} failed",
        name,
        summary.succeeded,
        summary.skipped,
        summary.failed.len()
    );
    println!(
        "Archive: {} ({} chapters)",
        paths.archive.display(),
        summary.archive.written
    );
    if !summary.failed.is_empty() {
        eprintln!("Failed chapters (listed in {}):", paths.failed.display());
        for url in &summary.failed {
            eprintln!("  {}", url);
        }
    }
}

fn assemble(settings: &Settings, name: &str) -> Result<(), CliRunError> {
    let registry = StoryRegistry::load(&settings.data_dir)?;
    let (_, paths, _) = fetch::resolve_story(&settings.data_dir, &registry, name)?;
    let report = fetch::assemble_story(&paths)?;
    println!(
        "Archive: {} ({} chapters)",
        paths.archive.display(),
        report.written
    );
    if !report.missing.is_empty() {
        eprintln!(
            "{} completed chapters are missing from the archive; fetch them again to restore:",
            report.missing.len()
        );
        for title in &report.missing {
            eprintln!("  {}", title);
        }
    }
    Ok(())
}

fn list(settings: &Settings) -> Result<(), CliRunError> {
    let registry = StoryRegistry::load(&settings.data_dir)?;
    if registry.is_empty() {
        println!("No stories tracked.");
        return Ok(());
    }
    for (name, record) in registry.iter() {
        let status = if record.is_complete { "complete" } else { "active" };
        let checked = record
            .last_scraped_date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}\t{}\t{} chapters\tchecked {}\t{}",
            name, status, record.last_chapter_count, checked, record.story_url
        );
    }
    Ok(())
}

fn toggle(settings: &Settings, name: &str) -> Result<(), CliRunError> {
    let mut registry = StoryRegistry::load(&settings.data_dir)?;
    let complete = registry
        .toggle_complete(name)
        .ok_or_else(|| CliRunError::InvalidInput(format!("Story '{}' is not tracked", name)))?;
    registry.save()?;
    println!(
        "{} is now {}",
        name,
        if complete { "complete" } else { "active" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoryRecord;

    fn settings_in(dir: &std::path::Path) -> Settings {
        Settings {
            data_dir: dir.to_path_buf(),
            ..Settings::default()
        }
    }

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(argv)
    }

    #[test]
    fn parse_subcommands_and_global_flags() -> Result<(), clap::Error> {
        let args = parse(&["novelsync", "update", "A", "B", "--apply", "-q"])?;
        assert!(args.quiet);
        match args.command {
            Command::Update { names, apply } => {
                assert_eq!(names, vec!["A", "B"]);
                assert!(apply);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = parse(&[
            "novelsync",
            "--data-dir",
            "novels",
            "add",
            "https://www.royalroad.com/fiction/1/x",
            "--chunk-size",
            "25",
        ])?;
        assert_eq!(args.data_dir, Some(PathBuf::from("novels")));
        assert!(matches!(
            args.command,
            Command::Add {
                chunk_size: Some(25),
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn fetch_requires_a_name() {
        assert!(parse(&["novelsync", "fetch"]).is_err());
    }

    #[test]
    fn exit_codes_by_layer() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Crawl(CrawlError::RetrievalFailure {
                story: "S".into(),
                source: ScraperError::EmptyChapterList,
            })
            .exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Fetch(FetchError::UnknownStory { name: "S".into() }).exit_code(),
            1
        );
        assert_eq!(
            CliRunError::Crawl(CrawlError::InvalidName {
                name: "a/b".into(),
                reason: "name contains a path separator",
            })
            .exit_code(),
            1
        );
        let store = StoreError::io(
            std::path::Path::new("x"),
            std::io::Error::new(std::io::ErrorKind::Other, "disk"),
        );
        assert_eq!(CliRunError::Store(store).exit_code(), 3);
    }

    #[test]
    fn toggle_and_list_without_network() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut registry = StoryRegistry::empty(dir.path());
        registry.upsert("A", StoryRecord::new("https://www.royalroad.com/fiction/1/a", 100));
        registry.save()?;
        let settings = settings_in(dir.path());

        run_with(&parse(&["novelsync", "toggle", "A"])?, &settings)?;
        let loaded = StoryRegistry::load(dir.path())?;
        assert!(loaded.active().is_empty());
        run_with(&parse(&["novelsync", "list"])?, &settings)?;

        let missing = run_with(&parse(&["novelsync", "toggle", "B"])?, &settings);
        assert!(matches!(missing, Err(CliRunError::InvalidInput(_))));
        Ok(())
    }

    #[test]
    fn update_with_no_active_stories_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        run_with(&parse(&["novelsync", "update"])?, &settings_in(dir.path()))?;
        Ok(())
    }

    #[test]
    fn assemble_unknown_story_is_input_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let result = run_with(&parse(&["novelsync", "assemble", "nope"])?, &settings_in(dir.path()));
        let code = result.err().map(|e| e.exit_code());
        assert_eq!(code, Some(1));
        Ok(())
    }

    #[test]
    fn add_rejects_unsupported_site() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let result = run_with(
            &parse(&["novelsync", "add", "https://example.com/story/1"])?,
            &settings_in(dir.path()),
        );
        assert!(matches!(result, Err(CliRunError::InvalidInput(_))));
        Ok(())
    }
}
