//! Curated venue catalog: conferences and journals mapped to CCF ranks.
//!
//! The catalog is a static lookup table built once at startup and queried
//! by exact name, abbreviation, or alias. Loading/refreshing the underlying
//! data is out of scope; a seed catalog is embedded for tests and the demo
//! CLI, and callers may construct a catalog from their own entries.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seed catalog shipped with the crate (JSON, parsed once on demand).
const EMBEDDED_CATALOG: &str = include_str!("../data/ccf_catalog.json");

/// CCF quality rank of a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rank {
    A,
    B,
    C,
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::A => write!(f, "A"),
            Rank::B => write!(f, "B"),
            Rank::C => write!(f, "C"),
        }
    }
}

/// A single catalog entry. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub abbr: String,
    pub name: String,
    pub rank: Rank,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to parse catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Normalize a venue key for index lookups: lowercase, collapse internal
/// whitespace to single spaces, trim.
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Static lookup table of known venues.
///
/// Three indexes are built over the entries: full name, abbreviation, and
/// alias. All indexes use [`normalize_key`] so lookups are case- and
/// whitespace-insensitive.
pub struct VenueCatalog {
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, usize>,
    by_abbr: HashMap<String, usize>,
    by_alias: HashMap<String, usize>,
}

impl VenueCatalog {
    /// Build a catalog from a list of entries.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        let mut by_name = HashMap::with_capacity(entries.len());
        let mut by_abbr = HashMap::with_capacity(entries.len());
        let mut by_alias = HashMap::new();

        for (i, entry) in entries.iter().enumerate() {
            by_name.insert(normalize_key(&entry.name), i);
            by_abbr.insert(normalize_key(&entry.abbr), i);
            for alias in &entry.aliases {
                by_alias.insert(normalize_key(alias), i);
            }
        }

        Self {
            entries,
            by_name,
            by_abbr,
            by_alias,
        }
    }

    /// Parse a catalog from a JSON array of entries.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
        Ok(Self::from_entries(entries))
    }

    /// The embedded seed catalog.
    pub fn builtin() -> Self {
        Self::from_json(EMBEDDED_CATALOG).expect("embedded catalog is valid JSON")
    }

    /// Look up an entry by exact abbreviation or full name.
    pub fn lookup_exact(&self, key: &str) -> Option<&CatalogEntry> {
        let norm = normalize_key(key);
        self.by_abbr
            .get(&norm)
            .or_else(|| self.by_name.get(&norm))
            .map(|&i| &self.entries[i])
    }

    /// Look up an entry by alias only (e.g. "NIPS" for NeurIPS).
    pub fn lookup_alias(&self, key: &str) -> Option<&CatalogEntry> {
        self.by_alias
            .get(&normalize_key(key))
            .map(|&i| &self.entries[i])
    }

    /// Whether any entry is known under this name, abbreviation, or alias.
    pub fn has(&self, key: &str) -> bool {
        let norm = normalize_key(key);
        self.by_abbr.contains_key(&norm)
            || self.by_name.contains_key(&norm)
            || self.by_alias.contains_key(&norm)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for VenueCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VenueCatalog")
            .field("entries", &self.entries.len())
            .field("aliases", &self.by_alias.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_collapses_whitespace_and_case() {
        assert_eq!(normalize_key("  IEEE   S&P  "), "ieee s&p");
        assert_eq!(normalize_key("CVPR"), "cvpr");
    }

    #[test]
    fn builtin_catalog_loads() {
        let catalog = VenueCatalog::builtin();
        assert!(!catalog.is_empty());
        assert!(catalog.len() >= 40);
    }

    #[test]
    fn lookup_by_abbreviation() {
        let catalog = VenueCatalog::builtin();
        let entry = catalog.lookup_exact("CVPR").unwrap();
        assert_eq!(entry.rank, Rank::A);
        // Case-insensitive
        assert!(catalog.lookup_exact("cvpr").is_some());
    }

    #[test]
    fn lookup_by_full_name() {
        let catalog = VenueCatalog::builtin();
        let entry = catalog
            .lookup_exact("International Conference on Machine Learning")
            .unwrap();
        assert_eq!(entry.abbr, "ICML");
    }

    #[test]
    fn lookup_by_alias() {
        let catalog = VenueCatalog::builtin();
        let entry = catalog.lookup_alias("NIPS").unwrap();
        assert_eq!(entry.abbr, "NeurIPS");
        // Aliases are not found via exact lookup
        assert!(catalog.lookup_exact("NIPS").is_none());
    }

    #[test]
    fn has_covers_all_indexes() {
        let catalog = VenueCatalog::builtin();
        assert!(catalog.has("SOSP"));
        assert!(catalog.has("ACM Symposium on Operating Systems Principles"));
        assert!(catalog.has("Oakland"));
        assert!(!catalog.has("Journal of Imaginary Results"));
    }

    #[test]
    fn from_entries_empty() {
        let catalog = VenueCatalog::from_entries(vec![]);
        assert!(catalog.is_empty());
        assert!(!catalog.has("CVPR"));
    }

    #[test]
    fn from_json_rejects_malformed() {
        assert!(VenueCatalog::from_json("{not json").is_err());
    }
}
