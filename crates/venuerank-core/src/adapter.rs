//! Site adapters: per-site extraction of paper listings.
//!
//! An adapter knows how to recognize its site's URLs, pull the current set
//! of papers from a listing, and point the pipeline at the place where a
//! badge belongs. Sites with dynamically updated listings notify the
//! pipeline through a change callback so a rescan can be scheduled.

use std::sync::{Arc, Mutex};

use crate::PaperInfo;

pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Extraction interface for one site.
pub trait SiteAdapter: Send + Sync {
    /// Short site identifier (e.g. "arxiv"), used for config filtering
    /// and marker keys.
    fn name(&self) -> &str;

    /// Whether this adapter handles the given listing URL.
    fn is_match(&self, url: &str) -> bool;

    /// The papers currently present in the listing.
    fn papers(&self) -> Vec<PaperInfo>;

    /// Where a badge for this paper should be mounted, as a site-specific
    /// locator. `None` means the paper has no stable mount point right now.
    fn insertion_point(&self, paper: &PaperInfo) -> Option<String>;

    /// Register a callback invoked whenever the listing content changes.
    fn observe_changes(&self, callback: ChangeCallback);

    /// Stop change notifications and release any observation resources.
    fn disconnect(&self);
}

/// Ordered adapter collection. Detection picks the first adapter whose
/// `is_match` accepts the URL, so registration order is precedence order.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SiteAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SiteAdapter>) {
        self.adapters.push(adapter);
    }

    /// Select the adapter for a URL. At most one adapter handles any given
    /// page; earlier registrations win when patterns overlap.
    pub fn detect(&self, url: &str) -> Option<Arc<dyn SiteAdapter>> {
        self.adapters.iter().find(|a| a.is_match(url)).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SiteAdapter>> {
        self.adapters.iter()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// A fixed-content adapter over an in-memory paper list.
///
/// Backs the CLI's file-based annotation and doubles as the test adapter:
/// `push_papers` mutates the listing and fires change callbacks the way a
/// live site would.
pub struct StaticAdapter {
    name: String,
    url_patterns: Vec<String>,
    papers: Mutex<Vec<PaperInfo>>,
    callbacks: Mutex<Vec<ChangeCallback>>,
}

impl StaticAdapter {
    pub fn new(name: impl Into<String>, url_patterns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            url_patterns,
            papers: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_papers(self, papers: Vec<PaperInfo>) -> Self {
        *self.papers.lock().unwrap_or_else(|e| e.into_inner()) = papers;
        self
    }

    /// Append papers to the listing and notify observers.
    pub fn push_papers(&self, new: Vec<PaperInfo>) {
        {
            let mut papers = self.papers.lock().unwrap_or_else(|e| e.into_inner());
            papers.extend(new);
        }
        let callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        for cb in callbacks.iter() {
            cb();
        }
    }
}

impl SiteAdapter for StaticAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_match(&self, url: &str) -> bool {
        self.url_patterns.iter().any(|p| url.contains(p.as_str()))
    }

    fn papers(&self) -> Vec<PaperInfo> {
        self.papers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn insertion_point(&self, paper: &PaperInfo) -> Option<String> {
        Some(format!("{}#{}", self.name, paper.id))
    }

    fn observe_changes(&self, callback: ChangeCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    fn disconnect(&self) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn arxiv_adapter() -> Arc<StaticAdapter> {
        Arc::new(StaticAdapter::new("arxiv", vec![
            "arxiv.org/list".into(),
            "arxiv.org/abs".into(),
        ]))
    }

    #[test]
    fn detect_picks_first_matching_adapter() {
        let mut registry = AdapterRegistry::new();
        registry.register(arxiv_adapter());
        registry.register(Arc::new(StaticAdapter::new("scholar", vec![
            "scholar.google.com".into(),
        ])));

        let adapter = registry.detect("https://arxiv.org/list/cs.CV/recent").unwrap();
        assert_eq!(adapter.name(), "arxiv");
        let adapter = registry
            .detect("https://scholar.google.com/citations?user=x")
            .unwrap();
        assert_eq!(adapter.name(), "scholar");
        assert!(registry.detect("https://example.com").is_none());
    }

    #[test]
    fn overlapping_patterns_resolve_by_order() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StaticAdapter::new("specific", vec![
            "arxiv.org/list/cs".into(),
        ])));
        registry.register(Arc::new(StaticAdapter::new("general", vec![
            "arxiv.org".into(),
        ])));

        let adapter = registry.detect("https://arxiv.org/list/cs.LG/recent").unwrap();
        assert_eq!(adapter.name(), "specific");
        let adapter = registry.detect("https://arxiv.org/abs/1706.03762").unwrap();
        assert_eq!(adapter.name(), "general");
    }

    #[test]
    fn static_adapter_serves_papers() {
        let adapter = StaticAdapter::new("test", vec![]).with_papers(vec![
            PaperInfo::new("p1", "First"),
            PaperInfo::new("p2", "Second"),
        ]);
        assert_eq!(adapter.papers().len(), 2);
        let point = adapter.insertion_point(&PaperInfo::new("p1", "First"));
        assert_eq!(point.as_deref(), Some("test#p1"));
    }

    #[test]
    fn change_callbacks_fire_and_disconnect() {
        let adapter = arxiv_adapter();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        adapter.observe_changes(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        adapter.push_papers(vec![PaperInfo::new("p1", "New Paper")]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.papers().len(), 1);

        adapter.disconnect();
        adapter.push_papers(vec![PaperInfo::new("p2", "Another")]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
