//! Per-site processing ledger: which papers have been seen, matched, and
//! badged, with at-most-once semantics across reruns.
//!
//! The ledger keeps two records per paper: an in-memory entry (fast path)
//! and a durable marker (survives the ledger being rebuilt, e.g. after a
//! page re-render). A paper is only admitted for processing when both say
//! it has not been handled yet.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::matcher::{MatchResult, VenueMatcher};
use crate::{LookupResult, PaperInfo, Rank, VenueSource};

/// Durable "already processed" markers keyed by opaque resource strings.
///
/// Implementations decide where the marker lives (memory, an attribute on
/// a rendered element, a file). `mark` must be idempotent.
pub trait ProcessedMarker: Send + Sync {
    fn is_marked(&self, resource: &str) -> bool;
    fn mark(&self, resource: &str);
    fn unmark(&self, resource: &str);
}

/// In-process marker store. Durable only for the life of the process;
/// useful as a default and in tests.
#[derive(Default)]
pub struct MemoryMarker {
    marked: DashSet<String>,
}

impl MemoryMarker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessedMarker for MemoryMarker {
    fn is_marked(&self, resource: &str) -> bool {
        self.marked.contains(resource)
    }

    fn mark(&self, resource: &str) {
        self.marked.insert(resource.to_string());
    }

    fn unmark(&self, resource: &str) {
        self.marked.remove(resource);
    }
}

/// A paper tracked by the ledger.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub info: PaperInfo,
    pub match_result: MatchResult,
    /// Set once a badge decision has been finalized for this paper.
    pub processed: bool,
}

/// Rank tally across all papers in a ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankStats {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    /// Papers with no catalog match (including papers with no venue at all).
    pub unknown: usize,
}

impl RankStats {
    pub fn total(&self) -> usize {
        self.a + self.b + self.c + self.unknown
    }
}

impl std::fmt::Display for RankStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "A: {}, B: {}, C: {}, unknown: {}",
            self.a, self.b, self.c, self.unknown
        )
    }
}

/// Ledger for one site.
pub struct SiteManager {
    site: String,
    matcher: Arc<VenueMatcher>,
    marker: Arc<dyn ProcessedMarker>,
    papers: DashMap<String, LedgerEntry>,
}

impl SiteManager {
    pub fn new(
        site: impl Into<String>,
        matcher: Arc<VenueMatcher>,
        marker: Arc<dyn ProcessedMarker>,
    ) -> Self {
        Self {
            site: site.into(),
            matcher,
            marker,
            papers: DashMap::new(),
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    fn resource_key(&self, id: &str) -> String {
        format!("{}/{}", self.site, id)
    }

    /// Admit a paper for processing. Returns `false` when the paper was
    /// already seen, either in this ledger or via a durable marker from an
    /// earlier run. On admission the venue (if any) is matched immediately.
    pub fn observe(&self, paper: PaperInfo) -> bool {
        if self.papers.contains_key(&paper.id) {
            return false;
        }
        if self.marker.is_marked(&self.resource_key(&paper.id)) {
            tracing::debug!(site = %self.site, id = %paper.id, "skipping: durable marker set");
            return false;
        }

        let match_result = match paper.venue {
            Some(ref venue) => self.matcher.match_venue(venue),
            None => MatchResult::none(String::new()),
        };
        self.papers.insert(paper.id.clone(), LedgerEntry {
            info: paper,
            match_result,
            processed: false,
        });
        true
    }

    /// Finalize a paper: set the in-memory flag and the durable marker.
    /// Idempotent.
    pub fn mark_processed(&self, id: &str) {
        if let Some(mut entry) = self.papers.get_mut(id) {
            entry.processed = true;
        }
        self.marker.mark(&self.resource_key(id));
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.papers
            .get(id)
            .map(|e| e.processed)
            .unwrap_or_else(|| self.marker.is_marked(&self.resource_key(id)))
    }

    /// Upgrade a paper with a successful lookup result. The upgrade applies
    /// only when the paper has no venue yet, so repeated application (e.g.
    /// a duplicate task slipping through) changes nothing. Returns the new
    /// match result when an upgrade happened.
    pub fn apply_lookup(&self, id: &str, result: &LookupResult) -> Option<MatchResult> {
        if !result.found {
            return None;
        }
        let venue = result.venue.as_deref()?;

        let mut entry = self.papers.get_mut(id)?;
        if entry.info.venue.is_some() {
            return None;
        }

        entry.info.venue = Some(venue.to_string());
        entry.info.venue_source = VenueSource::Dblp;
        if entry.info.year.is_none() {
            entry.info.year = result.year;
        }
        entry.match_result = self.matcher.match_venue(venue);
        tracing::debug!(site = %self.site, id, venue, "venue resolved via lookup");
        Some(entry.match_result.clone())
    }

    pub fn get(&self, id: &str) -> Option<LedgerEntry> {
        self.papers.get(id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }

    /// Forget all in-memory state. With `strip_markers`, durable markers
    /// for known papers are removed too, so the next run reprocesses them.
    pub fn reset(&self, strip_markers: bool) {
        if strip_markers {
            for entry in self.papers.iter() {
                self.marker.unmark(&self.resource_key(entry.key()));
            }
        }
        self.papers.clear();
    }

    /// Tally ranks across all papers. Only papers with a catalog match
    /// count toward A/B/C; everything else is unknown.
    pub fn stats(&self) -> RankStats {
        let mut stats = RankStats::default();
        for entry in self.papers.iter() {
            match entry.match_result.entry.as_ref().map(|e| e.rank) {
                Some(Rank::A) => stats.a += 1,
                Some(Rank::B) => stats.b += 1,
                Some(Rank::C) => stats.c += 1,
                None => stats.unknown += 1,
            }
        }
        stats
    }
}

impl std::fmt::Debug for SiteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteManager")
            .field("site", &self.site)
            .field("papers", &self.papers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use venuerank_catalog::VenueCatalog;

    fn manager() -> SiteManager {
        manager_with(Arc::new(MemoryMarker::new()))
    }

    fn manager_with(marker: Arc<dyn ProcessedMarker>) -> SiteManager {
        let matcher = Arc::new(VenueMatcher::new(
            Arc::new(VenueCatalog::builtin()),
            Default::default(),
        ));
        SiteManager::new("arxiv", matcher, marker)
    }

    #[test]
    fn observe_admits_once() {
        let mgr = manager();
        let paper = PaperInfo::new("2301.00001", "Some Paper")
            .with_venue("CVPR 2023", VenueSource::Comment);
        assert!(mgr.observe(paper.clone()));
        assert!(!mgr.observe(paper));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn observe_matches_venue_on_admission() {
        let mgr = manager();
        mgr.observe(PaperInfo::new("p1", "T").with_venue("NeurIPS 2017", VenueSource::Comment));
        let entry = mgr.get("p1").unwrap();
        assert!(entry.match_result.matched);
        assert_eq!(entry.match_result.entry.unwrap().abbr, "NeurIPS");
    }

    #[test]
    fn durable_marker_survives_ledger_rebuild() {
        let marker: Arc<dyn ProcessedMarker> = Arc::new(MemoryMarker::new());
        let mgr = manager_with(Arc::clone(&marker));
        assert!(mgr.observe(PaperInfo::new("p1", "T")));
        mgr.mark_processed("p1");

        // Fresh ledger, same marker store: the paper is not re-admitted
        let rebuilt = manager_with(marker);
        assert!(!rebuilt.observe(PaperInfo::new("p1", "T")));
        assert!(rebuilt.is_processed("p1"));
    }

    #[test]
    fn mark_processed_is_idempotent() {
        let mgr = manager();
        mgr.observe(PaperInfo::new("p1", "T"));
        mgr.mark_processed("p1");
        mgr.mark_processed("p1");
        assert!(mgr.is_processed("p1"));
    }

    #[test]
    fn apply_lookup_upgrades_once() {
        let mgr = manager();
        mgr.observe(PaperInfo::new("p1", "Attention Is All You Need"));

        let result = LookupResult::found("NeurIPS", Some(2017), None);
        let matched = mgr.apply_lookup("p1", &result).unwrap();
        assert!(matched.matched);

        let entry = mgr.get("p1").unwrap();
        assert_eq!(entry.info.venue.as_deref(), Some("NeurIPS"));
        assert_eq!(entry.info.year, Some(2017));
        assert_eq!(entry.info.venue_source, VenueSource::Dblp);

        // Second application is a no-op
        let again = LookupResult::found("ICML", Some(2020), None);
        assert!(mgr.apply_lookup("p1", &again).is_none());
        assert_eq!(mgr.get("p1").unwrap().info.venue.as_deref(), Some("NeurIPS"));
    }

    #[test]
    fn apply_lookup_ignores_not_found_and_unknown_ids() {
        let mgr = manager();
        mgr.observe(PaperInfo::new("p1", "T"));
        assert!(mgr.apply_lookup("p1", &LookupResult::not_found()).is_none());
        assert!(
            mgr.apply_lookup("ghost", &LookupResult::found("CVPR", None, None))
                .is_none()
        );
    }

    #[test]
    fn apply_lookup_never_overwrites_extracted_venue() {
        let mgr = manager();
        mgr.observe(PaperInfo::new("p1", "T").with_venue("ICLR 2024", VenueSource::Comment));
        let result = LookupResult::found("CVPR", None, None);
        assert!(mgr.apply_lookup("p1", &result).is_none());
        assert_eq!(mgr.get("p1").unwrap().info.venue_source, VenueSource::Comment);
    }

    #[test]
    fn reset_keeps_markers_by_default() {
        let marker: Arc<dyn ProcessedMarker> = Arc::new(MemoryMarker::new());
        let mgr = manager_with(Arc::clone(&marker));
        mgr.observe(PaperInfo::new("p1", "T"));
        mgr.mark_processed("p1");

        mgr.reset(false);
        assert!(mgr.is_empty());
        // Marker still blocks re-admission
        assert!(!mgr.observe(PaperInfo::new("p1", "T")));
    }

    #[test]
    fn reset_with_strip_reprocesses() {
        let mgr = manager();
        mgr.observe(PaperInfo::new("p1", "T"));
        mgr.mark_processed("p1");

        mgr.reset(true);
        assert!(mgr.observe(PaperInfo::new("p1", "T")));
    }

    #[test]
    fn stats_count_matched_ranks() {
        let mgr = manager();
        mgr.observe(PaperInfo::new("a1", "T").with_venue("CVPR", VenueSource::Comment));
        mgr.observe(PaperInfo::new("a2", "T").with_venue("NeurIPS 2017", VenueSource::Comment));
        mgr.observe(PaperInfo::new("b1", "T").with_venue("EMNLP", VenueSource::Comment));
        mgr.observe(PaperInfo::new("c1", "T").with_venue("WACV", VenueSource::Comment));
        mgr.observe(PaperInfo::new("u1", "T").with_venue("Workshop on Things", VenueSource::Page));
        mgr.observe(PaperInfo::new("u2", "No Venue Paper"));

        let stats = mgr.stats();
        assert_eq!(stats.a, 2);
        assert_eq!(stats.b, 1);
        assert_eq!(stats.c, 1);
        assert_eq!(stats.unknown, 2);
        assert_eq!(stats.total(), 6);
    }
}
