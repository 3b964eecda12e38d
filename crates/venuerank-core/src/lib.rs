use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub mod adapter;
pub mod cache;
pub mod config_file;
pub mod ledger;
pub mod lookup;
pub mod matcher;
pub mod pipeline;
pub mod queue;

// Re-export for convenience
pub use adapter::{AdapterRegistry, ChangeCallback, SiteAdapter, StaticAdapter};
pub use cache::LookupCache;
pub use ledger::{LedgerEntry, MemoryMarker, ProcessedMarker, RankStats, SiteManager};
pub use lookup::{DblpLookup, LookupBackend, LookupClient, LookupHit, MockLookup, title_similarity};
pub use matcher::{Confidence, MatchResult, MatcherParams, VenueMatcher};
pub use pipeline::{Pipeline, PipelineEvent};
pub use queue::{TaskContext, TaskQueue};
pub use venuerank_catalog::{CatalogEntry, Rank, VenueCatalog};

/// Where a paper's venue string came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueSource {
    /// Extracted from a comment field (e.g. an arXiv comment line).
    Comment,
    /// Resolved by the DBLP fallback lookup.
    Dblp,
    /// Extracted directly from page markup.
    Page,
    Unknown,
}

/// A paper record produced by a site adapter.
///
/// `id` is unique within the producing site. `venue`, `year`, and
/// `venue_source` may be upgraded once by a later lookup; everything else
/// is immutable after extraction.
#[derive(Debug, Clone)]
pub struct PaperInfo {
    pub id: String,
    pub title: String,
    pub year: Option<u16>,
    pub venue: Option<String>,
    pub venue_source: VenueSource,
}

impl PaperInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            year: None,
            venue: None,
            venue_source: VenueSource::Unknown,
        }
    }

    pub fn with_venue(mut self, venue: impl Into<String>, source: VenueSource) -> Self {
        self.venue = Some(venue.into());
        self.venue_source = source;
        self
    }
}

/// Result of an external bibliographic lookup by title.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    pub found: bool,
    pub venue: Option<String>,
    pub year: Option<u16>,
    pub url: Option<String>,
    pub error: Option<String>,
    pub timed_out: bool,
}

impl LookupResult {
    pub fn found(venue: impl Into<String>, year: Option<u16>, url: Option<String>) -> Self {
        Self {
            found: true,
            venue: Some(venue.into()),
            year,
            url,
            error: None,
            timed_out: false,
        }
    }

    pub fn not_found() -> Self {
        Self {
            found: false,
            venue: None,
            year: None,
            url: None,
            error: None,
            timed_out: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            found: false,
            venue: None,
            year: None,
            url: None,
            error: Some(message.into()),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            timed_out: true,
            ..Self::error(message)
        }
    }

    /// Whether this result is cacheable: the call itself succeeded
    /// (found or definitively not found). Errors and timeouts are not.
    pub fn is_cacheable(&self) -> bool {
        self.error.is_none() && !self.timed_out
    }
}

/// Errors surfaced by the fallible core operations: opening the persistent
/// cache and saving configuration. Backend-level lookup failures stay inside
/// [`LookupResult`] so they can be retried without unwinding the pipeline.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("cache error: {0}")]
    Cache(#[from] rusqlite::Error),
    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

/// Runtime configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Search endpoint queried by the fallback lookup.
    pub lookup_endpoint: String,
    /// Fixed per-request timeout for external lookups.
    pub lookup_timeout_secs: u64,
    /// Minimum token-overlap (Jaccard) similarity for accepting a hit.
    pub min_title_similarity: f64,
    /// Inter-request delay for batch lookups, in milliseconds.
    pub batch_delay_ms: u64,
    /// Maximum number of concurrently running lookup tasks.
    pub max_concurrent_lookups: usize,
    /// Minimum cleaned-string length for a partial venue match.
    pub min_partial_len: usize,
    /// Ranks for which a badge is mounted. Empty means all.
    pub show_ranks: Vec<Rank>,
    /// Sites where the pipeline runs at all. Empty means all.
    pub enabled_sites: Vec<String>,
    /// Sites eligible for the external lookup fallback when no venue
    /// string was extracted.
    pub lookup_sites: Vec<String>,
    /// Path to the persistent SQLite cache (optional; in-memory if unset).
    pub cache_path: Option<PathBuf>,
    /// Optional cache TTL. `None` means entries persist until explicit clear.
    pub cache_ttl_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookup_endpoint: "https://dblp.org/search/publ/api".to_string(),
            lookup_timeout_secs: 10,
            min_title_similarity: 0.5,
            batch_delay_ms: 200,
            max_concurrent_lookups: 2,
            min_partial_len: 4,
            show_ranks: vec![],
            enabled_sites: vec![],
            lookup_sites: vec!["arxiv".to_string()],
            cache_path: None,
            cache_ttl_secs: None,
        }
    }
}

impl Config {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Whether this site participates in the pipeline at all.
    pub fn site_enabled(&self, site: &str) -> bool {
        self.enabled_sites.is_empty()
            || self
                .enabled_sites
                .iter()
                .any(|s| s.eq_ignore_ascii_case(site))
    }

    /// Whether this site qualifies for the external lookup fallback.
    pub fn site_qualifies_for_lookup(&self, site: &str) -> bool {
        self.lookup_sites
            .iter()
            .any(|s| s.eq_ignore_ascii_case(site))
    }

    /// Whether a badge should be mounted for this rank.
    pub fn rank_shown(&self, rank: Rank) -> bool {
        self.show_ranks.is_empty() || self.show_ranks.contains(&rank)
    }
}

/// Build a [`LookupCache`] from configuration.
///
/// If `cache_path` is set, opens a persistent SQLite-backed cache, falling
/// back to in-memory on failure.
pub fn build_lookup_cache(config: &Config) -> std::sync::Arc<LookupCache> {
    let ttl = config.cache_ttl_secs.map(Duration::from_secs);
    if let Some(ref path) = config.cache_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match LookupCache::open(path, ttl) {
            Ok(cache) => {
                tracing::info!(path = %path.display(), "opened persistent lookup cache");
                return std::sync::Arc::new(cache);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open cache, falling back to in-memory");
            }
        }
    }
    std::sync::Arc::new(LookupCache::new(ttl))
}
