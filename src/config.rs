//! Optional config file loading. Search order: ./novelsync.toml, then
//! $XDG_CONFIG_HOME/novelsync/config.toml (or ~/.config/novelsync/config.toml).
//!
//! The file and the CLI flags are merged once into [Settings], which is passed by reference to
//! whatever needs it.

use crate::adapter::{PoliteClient, PoliteClientBuilder};
use crate::fetch::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 100;
const DEFAULT_DELAY_SECS: u64 = 2;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Root holding stories.json and one directory per story. Relative to CWD.
    pub data_dir: Option<PathBuf>,
    /// Links per chunk file for newly tracked stories (default 100).
    pub chunk_size: Option<usize>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Delay in seconds between requests.
    pub request_delay_secs: Option<u64>,
    /// Chapter fetch attempt n gets n times this many seconds (default 20).
    pub timeout_unit_secs: Option<u64>,
    /// Attempts per chapter (default 3).
    pub retry_attempts: Option<u32>,
    /// Wait before the second attempt, doubling after each further failure (default 2).
    pub initial_backoff_secs: Option<u64>,
    /// Keep author's notes in a separate file (default false).
    pub save_notes: Option<bool>,
}

/// Search order: (1) ./novelsync.toml, (2) $XDG_CONFIG_HOME/novelsync/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("novelsync.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("novelsync").join("config.toml"));
    }
    load_first(&paths)
}

/// First existing file of `paths`, parsed.
pub fn load_first(paths: &[PathBuf]) -> Result<Option<Config>, String> {
    for path in paths {
        if path.exists() {
            return load_file(path).map(Some);
        }
    }
    Ok(None)
}

pub fn load_file(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}

/// Values given on the command line; each wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub chunk_size: Option<usize>,
    pub user_agent: Option<String>,
    pub delay: Option<u64>,
    pub save_notes: bool,
}

/// Effective settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub chunk_size: usize,
    pub user_agent: Option<String>,
    pub request_delay_secs: u64,
    pub retry: RetryPolicy,
    pub save_notes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(None, &Overrides::default())
    }
}

impl Settings {
    pub fn resolve(config: Option<&Config>, overrides: &Overrides) -> Self {
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: config
                .and_then(|c| c.retry_attempts)
                .unwrap_or(defaults.max_attempts)
                .max(1),
            timeout_unit: config
                .and_then(|c| c.timeout_unit_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout_unit),
            initial_backoff: config
                .and_then(|c| c.initial_backoff_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.initial_backoff),
        };
        Self {
            data_dir: overrides
                .data_dir
                .clone()
                .or_else(|| config.and_then(|c| c.data_dir.clone()))
                .unwrap_or_else(|| PathBuf::from(".")),
            chunk_size: overrides
                .chunk_size
                .or_else(|| config.and_then(|c| c.chunk_size))
                .unwrap_or(DEFAULT_CHUNK_SIZE)
                .max(1),
            user_agent: overrides
                .user_agent
                .clone()
                .or_else(|| config.and_then(|c| c.user_agent.clone())),
            request_delay_secs: overrides
                .delay
                .or_else(|| config.and_then(|c| c.request_delay_secs))
                .unwrap_or(DEFAULT_DELAY_SECS),
            retry,
            save_notes: overrides.save_notes || config.and_then(|c| c.save_notes).unwrap_or(false),
        }
    }

    /// Session for a crawl or fetch run. Link discovery gets the longest chapter timeout.
    pub fn client_builder(&self) -> PoliteClientBuilder {
        let discovery_timeout = self.retry.timeout_for(self.retry.max_attempts);
        let mut builder = PoliteClient::builder()
            .delay_secs(self.request_delay_secs)
            .timeout_secs(discovery_timeout.as_secs().max(1))
            .retry_count(self.retry.max_attempts)
            .retry_backoff_secs(
                (1..self.retry.max_attempts)
                    .map(|n| self.retry.backoff_after(n).as_secs())
                    .collect(),
            );
        if let Some(ua) = &self.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        builder
    }
}
