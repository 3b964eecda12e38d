//! Venue matcher: resolves a raw, possibly noisy venue string to a catalog
//! entry with a graded confidence tier.
//!
//! Tier order (first match wins): `Exact` > `Cleaned` > `Partial` >
//! `Acronym` > `None`. The cleaned form of the input is always reported
//! for display, whatever the outcome.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use venuerank_catalog::{CatalogEntry, VenueCatalog, normalize_key};

/// Announcement prefixes that precede the actual venue name in extracted
/// text, e.g. "Accepted to CVPR 2024".
static PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:accepted (?:to|at|by)|to appear (?:in|at)|appear(?:s|ed)? in|published (?:in|at)|in proceedings of(?: the)?|proceedings of(?: the)?|presented at|in)\s+",
    )
    .unwrap()
});

/// Leading article / ordinal noise: "the 38th International Conference...".
static ORDINAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:the\s+)?(?:\d{1,3}(?:st|nd|rd|th)\s+)?").unwrap());

/// Trailing year tokens: "CVPR 2024", "NeurIPS (2017)", "ICML, 2021".
static TRAILING_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:[,\s(]+(?:19|20)\d{2}\)?)+$").unwrap());

/// Volume / issue / page markers: "vol. 32", "no. 4", "pp. 1-10".
static VOL_ISSUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[,\s]+(?:vol(?:ume)?\.?|no\.?|issue|pp?\.?)\s*\d+(?:\s*[-–]\s*\d+)?").unwrap()
});

/// Graded certainty of a venue match. Variants are declared in ascending
/// order so `Exact` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    None,
    Acronym,
    Partial,
    Cleaned,
    Exact,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::None => "none",
            Confidence::Acronym => "acronym",
            Confidence::Partial => "partial",
            Confidence::Cleaned => "cleaned",
            Confidence::Exact => "exact",
        }
    }
}

/// Outcome of matching one venue string. Derived value; recomputed whenever
/// the input changes, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    pub entry: Option<CatalogEntry>,
    pub confidence: Confidence,
    pub original_venue: String,
    pub cleaned_venue: String,
}

impl MatchResult {
    /// The zero result used when no venue string is present at all.
    pub fn none(original: impl Into<String>) -> Self {
        let original = original.into();
        let cleaned = clean_venue(&normalize_key(&original));
        Self {
            matched: false,
            entry: None,
            confidence: Confidence::None,
            original_venue: original,
            cleaned_venue: cleaned,
        }
    }
}

/// Tunable matcher thresholds. Empirically chosen; kept configurable
/// rather than hard-coded.
#[derive(Debug, Clone)]
pub struct MatcherParams {
    /// Minimum cleaned-string length for a partial (substring) match.
    pub min_partial_len: usize,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self { min_partial_len: 4 }
    }
}

/// Strip announcement prefixes, ordinals, trailing years, volume/issue
/// markers, and edge punctuation from an already-normalized venue string.
pub fn clean_venue(normalized: &str) -> String {
    let s = PREFIX_RE.replace(normalized, "");
    let s = ORDINAL_RE.replace(&s, "");
    let s = VOL_ISSUE_RE.replace_all(&s, "");
    let s = TRAILING_YEAR_RE.replace(&s, "");
    s.trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves raw venue strings against a [`VenueCatalog`].
///
/// Pure: for a fixed catalog, `match_venue(s)` is a function of `s` alone.
pub struct VenueMatcher {
    catalog: Arc<VenueCatalog>,
    params: MatcherParams,
}

impl VenueMatcher {
    pub fn new(catalog: Arc<VenueCatalog>, params: MatcherParams) -> Self {
        Self { catalog, params }
    }

    pub fn catalog(&self) -> &VenueCatalog {
        &self.catalog
    }

    /// Resolve a raw venue string to a catalog entry with confidence tier.
    pub fn match_venue(&self, raw: &str) -> MatchResult {
        let normalized = normalize_key(raw);
        let cleaned = clean_venue(&normalized);

        let result = |confidence, entry: &CatalogEntry| MatchResult {
            matched: true,
            entry: Some(entry.clone()),
            confidence,
            original_venue: raw.to_string(),
            cleaned_venue: cleaned.clone(),
        };

        // Tier 1: normalized input equals an abbreviation or full name.
        if !normalized.is_empty()
            && let Some(entry) = self.catalog.lookup_exact(&normalized)
        {
            return result(Confidence::Exact, entry);
        }

        // Tier 2: equality after cleaning.
        if !cleaned.is_empty()
            && cleaned != normalized
            && let Some(entry) = self.catalog.lookup_exact(&cleaned)
        {
            return result(Confidence::Cleaned, entry);
        }

        // Tier 3: substring either direction against a name or alias.
        // Equality is excluded here so alias equality lands in the acronym
        // tier; the shorter side must meet the minimum length guard.
        if cleaned.len() >= self.params.min_partial_len
            && let Some(entry) = self.partial_match(&cleaned)
        {
            return result(Confidence::Partial, entry);
        }

        // Tier 4: cleaned string equals a known alias.
        if !cleaned.is_empty()
            && let Some(entry) = self.catalog.lookup_alias(&cleaned)
        {
            return result(Confidence::Acronym, entry);
        }

        MatchResult {
            matched: false,
            entry: None,
            confidence: Confidence::None,
            original_venue: raw.to_string(),
            cleaned_venue: cleaned,
        }
    }

    /// Whether any tier above `None` would apply, without building the
    /// full result. Used by adapters to validate self-extracted candidates.
    pub fn has(&self, raw: &str) -> bool {
        let normalized = normalize_key(raw);
        if normalized.is_empty() {
            return false;
        }
        if self.catalog.lookup_exact(&normalized).is_some() {
            return true;
        }
        let cleaned = clean_venue(&normalized);
        if cleaned.is_empty() {
            return false;
        }
        self.catalog.lookup_exact(&cleaned).is_some()
            || self.catalog.lookup_alias(&cleaned).is_some()
            || (cleaned.len() >= self.params.min_partial_len
                && self.partial_match(&cleaned).is_some())
    }

    fn partial_match(&self, cleaned: &str) -> Option<&CatalogEntry> {
        let min = self.params.min_partial_len;
        self.catalog.iter().find(|entry| {
            let name = normalize_key(&entry.name);
            if contains_strict(&name, cleaned, min) || contains_strict(cleaned, &name, min) {
                return true;
            }
            entry.aliases.iter().any(|alias| {
                let alias = normalize_key(alias);
                contains_strict(&alias, cleaned, min) || contains_strict(cleaned, &alias, min)
            })
        })
    }
}

/// Strict containment: `needle` appears inside `haystack`, is not equal to
/// it, and meets the minimum length guard.
fn contains_strict(haystack: &str, needle: &str, min_len: usize) -> bool {
    needle.len() >= min_len && needle != haystack && haystack.contains(needle)
}
