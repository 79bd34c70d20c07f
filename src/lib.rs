//! novelsync: incremental crawler for Royal Road and Scribble Hub stories. Tracks chapter links
//! across runs, fetches pending chapters, and keeps an ordered plain-text archive per story.

pub mod adapter;
pub mod archive;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod store;

// Re-exports for CLI and consumers.
pub use adapter::{
    adapter_for, resolve_site, PoliteClient, PoliteClientBuilder, ScraperError, Site, SiteAdapter,
};
pub use config::Settings;
pub use fetch::{fetch_story, FetchError, FetchOptions, FetchSummary, RetryPolicy};
pub use reconcile::{CrawlError, LinkDiff};
pub use store::{Ledger, LinkStore, StoreError, StoryPaths, StoryRegistry};
