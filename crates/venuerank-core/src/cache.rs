//! Memoization cache for external lookup results.
//!
//! In-memory [`DashMap`] tier with an optional SQLite tier that persists
//! across process restarts. Keys are normalized (lowercased, whitespace
//! collapsed) so trivially different inputs share one slot.
//!
//! Only successful results are cached — found or definitively not-found.
//! Transient failures (network errors, timeouts) are never written, so the
//! next request retries instead of reading a poisoned entry.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, params};
use venuerank_catalog::normalize_key;

use crate::{CoreError, LookupResult};

/// What we store: a resolved venue or a not-found marker.
#[derive(Clone, Debug, PartialEq)]
enum CachedLookup {
    Found {
        venue: String,
        year: Option<u16>,
        url: Option<String>,
    },
    NotFound,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: CachedLookup,
    inserted_at: u64,
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn open_sqlite(path: &Path) -> Result<Connection, rusqlite::Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;
         CREATE TABLE IF NOT EXISTS lookup_cache (
             key         TEXT PRIMARY KEY,
             found       INTEGER NOT NULL,
             venue       TEXT,
             year        INTEGER,
             url         TEXT,
             inserted_at INTEGER NOT NULL
         );",
    )?;
    Ok(conn)
}

/// Key/value cache for lookup results.
///
/// No expiry in the base configuration: entries persist until an explicit
/// [`clear`](LookupCache::clear). An optional TTL can be supplied; expired
/// entries read as absent, preserving the absent-vs-previously-failed
/// distinction (failures were never stored to begin with).
pub struct LookupCache {
    entries: DashMap<String, CacheEntry>,
    sqlite: Option<Mutex<Connection>>,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LookupCache {
    /// In-memory-only cache.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            sqlite: None,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Persistent cache backed by a SQLite database at `path`.
    ///
    /// Expired entries (if a TTL is set) are evicted on open.
    pub fn open(path: &Path, ttl: Option<Duration>) -> Result<Self, CoreError> {
        let conn = open_sqlite(path)?;
        if let Some(ttl) = ttl {
            let cutoff = now_epoch().saturating_sub(ttl.as_secs());
            conn.execute("DELETE FROM lookup_cache WHERE inserted_at < ?1", params![
                cutoff
            ])?;
        }
        Ok(Self {
            entries: DashMap::new(),
            sqlite: Some(Mutex::new(conn)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn expired(&self, inserted_at: u64) -> bool {
        match self.ttl {
            Some(ttl) => now_epoch().saturating_sub(inserted_at) > ttl.as_secs(),
            None => false,
        }
    }

    /// Look up a cached result for the given title. The title is normalized
    /// before lookup. Returns `None` on miss (absent or expired).
    pub fn get(&self, title: &str) -> Option<LookupResult> {
        let key = normalize_key(title);

        if let Some(entry) = self.entries.get(&key) {
            if self.expired(entry.inserted_at) {
                drop(entry);
                self.entries.remove(&key);
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(title, "cache hit (memory)");
                return Some(cached_to_result(&entry.value));
            }
        }

        if let Some(ref sqlite) = self.sqlite
            && let Ok(conn) = sqlite.lock()
            && let Some(entry) = read_row(&conn, &key)
            && !self.expired(entry.inserted_at)
        {
            tracing::trace!(title, "cache hit (sqlite), promoting");
            let result = cached_to_result(&entry.value);
            self.entries.insert(key, entry);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(result);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(title, "cache miss");
        None
    }

    /// Insert a lookup result. Non-cacheable results (errors, timeouts) are
    /// rejected so transient failures stay retryable.
    pub fn insert(&self, title: &str, result: &LookupResult) {
        if !result.is_cacheable() {
            tracing::warn!(title, "refusing to cache a failed lookup");
            return;
        }

        let key = normalize_key(title);
        let value = match result.venue {
            Some(ref venue) if result.found => CachedLookup::Found {
                venue: venue.clone(),
                year: result.year,
                url: result.url.clone(),
            },
            _ => CachedLookup::NotFound,
        };
        let inserted_at = now_epoch();

        tracing::trace!(title, found = result.found, "cache insert");
        self.entries.insert(key.clone(), CacheEntry {
            value: value.clone(),
            inserted_at,
        });

        if let Some(ref sqlite) = self.sqlite
            && let Ok(conn) = sqlite.lock()
        {
            let (found, venue, year, url) = match &value {
                CachedLookup::Found { venue, year, url } => {
                    (1i32, Some(venue.as_str()), *year, url.as_deref())
                }
                CachedLookup::NotFound => (0i32, None, None, None),
            };
            let _ = conn.execute(
                "INSERT OR REPLACE INTO lookup_cache (key, found, venue, year, url, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![key, found, venue, year, url, inserted_at],
            );
        }
    }

    /// Remove all entries from both tiers.
    pub fn clear(&self) {
        self.entries.clear();
        if let Some(ref sqlite) = self.sqlite
            && let Ok(conn) = sqlite.lock()
        {
            let _ = conn.execute("DELETE FROM lookup_cache", []);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of entries in the in-memory tier.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total entries in the persistent tier (0 without SQLite backing).
    pub fn disk_len(&self) -> usize {
        if let Some(ref sqlite) = self.sqlite
            && let Ok(conn) = sqlite.lock()
        {
            conn.query_row("SELECT COUNT(*) FROM lookup_cache", [], |row| row.get(0))
                .unwrap_or(0)
        } else {
            0
        }
    }

    pub fn has_persistence(&self) -> bool {
        self.sqlite.is_some()
    }
}

fn read_row(conn: &Connection, key: &str) -> Option<CacheEntry> {
    conn.query_row(
        "SELECT found, venue, year, url, inserted_at FROM lookup_cache WHERE key = ?1",
        params![key],
        |row| {
            let found: i32 = row.get(0)?;
            let venue: Option<String> = row.get(1)?;
            let year: Option<u16> = row.get(2)?;
            let url: Option<String> = row.get(3)?;
            let inserted_at: u64 = row.get(4)?;
            let value = if found != 0 {
                CachedLookup::Found {
                    venue: venue.unwrap_or_default(),
                    year,
                    url,
                }
            } else {
                CachedLookup::NotFound
            };
            Ok(CacheEntry { value, inserted_at })
        },
    )
    .ok()
}

fn cached_to_result(cached: &CachedLookup) -> LookupResult {
    match cached {
        CachedLookup::Found { venue, year, url } => {
            LookupResult::found(venue.clone(), *year, url.clone())
        }
        CachedLookup::NotFound => LookupResult::not_found(),
    }
}

impl std::fmt::Debug for LookupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupCache")
            .field("entries", &self.entries.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .field("ttl", &self.ttl)
            .field("persistent", &self.has_persistence())
            .finish()
    }
}
