//! Pipeline orchestration: scan a site listing, match venues against the
//! catalog, fall back to external lookup for venue-less papers, and decide
//! badge mounts exactly once per paper.
//!
//! Progress is reported through a callback enum so frontends (CLI, future
//! UI surfaces) can render events without the core knowing about them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::adapter::SiteAdapter;
use crate::cache::LookupCache;
use crate::ledger::{MemoryMarker, ProcessedMarker, RankStats, SiteManager};
use crate::lookup::{DblpLookup, LookupBackend, LookupClient};
use crate::matcher::{Confidence, MatcherParams, VenueMatcher};
use crate::queue::TaskQueue;
use crate::{Config, Rank, build_lookup_cache};
use venuerank_catalog::VenueCatalog;

/// Progress events emitted during scanning and lookup resolution.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ScanStarted {
        site: String,
        total: usize,
    },
    /// A badge decision was finalized for a matched paper.
    BadgeMounted {
        id: String,
        abbr: String,
        rank: Rank,
        confidence: Confidence,
        insertion_point: String,
    },
    /// The paper had a venue string but nothing in the catalog matched.
    VenueUnmatched {
        id: String,
        venue: String,
    },
    LookupQueued {
        id: String,
        title: String,
    },
    LookupResolved {
        id: String,
        venue: Option<String>,
        matched: bool,
    },
    LookupFailed {
        id: String,
        error: String,
    },
    ChangeDetected {
        site: String,
    },
}

type ProgressFn = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

pub struct Pipeline {
    config: Arc<Config>,
    adapter: Arc<dyn SiteAdapter>,
    manager: Arc<SiteManager>,
    lookup: Arc<LookupClient>,
    queue: Arc<TaskQueue>,
    progress: ProgressFn,
    dirty: Arc<AtomicBool>,
    change_notify: Arc<Notify>,
}

impl Pipeline {
    /// Pipeline with the embedded catalog, the DBLP backend, and in-process
    /// markers.
    pub fn new(adapter: Arc<dyn SiteAdapter>, config: Config) -> Self {
        Self::with_parts(
            adapter,
            config,
            Arc::new(VenueCatalog::builtin()),
            Arc::new(DblpLookup::default()),
            Arc::new(MemoryMarker::new()),
        )
    }

    /// Fully injected constructor, used by tests and embedders.
    pub fn with_parts(
        adapter: Arc<dyn SiteAdapter>,
        config: Config,
        catalog: Arc<VenueCatalog>,
        backend: Arc<dyn LookupBackend>,
        marker: Arc<dyn ProcessedMarker>,
    ) -> Self {
        let config = Arc::new(config);
        let matcher = Arc::new(VenueMatcher::new(catalog, MatcherParams {
            min_partial_len: config.min_partial_len,
        }));
        let cache = build_lookup_cache(&config);
        let lookup = Arc::new(LookupClient::new(backend, cache, &config));
        let queue = Arc::new(TaskQueue::new(config.max_concurrent_lookups));
        let manager = Arc::new(SiteManager::new(
            adapter.name().to_string(),
            matcher,
            marker,
        ));
        Self {
            config,
            adapter,
            manager,
            lookup,
            queue,
            progress: Arc::new(|_| {}),
            dirty: Arc::new(AtomicBool::new(false)),
            change_notify: Arc::new(Notify::new()),
        }
    }

    /// Set the progress callback. Replaces any previous callback.
    pub fn set_progress(&mut self, progress: impl Fn(PipelineEvent) + Send + Sync + 'static) {
        self.progress = Arc::new(progress);
    }

    pub fn manager(&self) -> &Arc<SiteManager> {
        &self.manager
    }

    pub fn cache(&self) -> &Arc<LookupCache> {
        self.lookup.cache()
    }

    pub fn stats(&self) -> RankStats {
        self.manager.stats()
    }

    /// Scan the adapter's current listing. New papers are matched and
    /// badged; venue-less papers on lookup-eligible sites are queued for
    /// external resolution. Already-processed papers are untouched.
    ///
    /// Returns the number of newly admitted papers.
    pub fn scan(&self) -> usize {
        let site = self.adapter.name().to_string();
        if !self.config.site_enabled(&site) {
            tracing::debug!(site, "site disabled, skipping scan");
            return 0;
        }

        let papers = self.adapter.papers();
        (self.progress)(PipelineEvent::ScanStarted {
            site: site.clone(),
            total: papers.len(),
        });
        tracing::info!(site, papers = papers.len(), "scanning listing");

        let mut admitted = 0;
        for paper in papers {
            let id = paper.id.clone();
            if self.manager.observe(paper) {
                admitted += 1;
            }
            let Some(entry) = self.manager.get(&id) else {
                continue; // blocked by a durable marker from an earlier run
            };
            if entry.processed {
                continue;
            }

            if entry.match_result.matched {
                self.mount_badge(&id);
            } else if entry.info.venue.is_none() {
                self.queue_lookup(&entry.info.id, &entry.info.title);
            } else {
                // Venue present but unknown to the catalog: nothing to
                // badge, and that will not change without new data.
                (self.progress)(PipelineEvent::VenueUnmatched {
                    id: id.clone(),
                    venue: entry.info.venue.clone().unwrap_or_default(),
                });
                self.manager.mark_processed(&id);
            }
        }
        admitted
    }

    /// Finalize the badge decision for a matched paper. Papers whose rank
    /// is filtered out are marked processed without a badge; papers with no
    /// stable insertion point stay unprocessed for a later scan.
    fn mount_badge(&self, id: &str) {
        let Some(entry) = self.manager.get(id) else {
            return;
        };
        let Some(catalog_entry) = entry.match_result.entry else {
            return;
        };

        if !self.config.rank_shown(catalog_entry.rank) {
            self.manager.mark_processed(id);
            return;
        }
        let Some(insertion_point) = self.adapter.insertion_point(&entry.info) else {
            tracing::debug!(id, "no insertion point yet, deferring");
            return;
        };

        (self.progress)(PipelineEvent::BadgeMounted {
            id: id.to_string(),
            abbr: catalog_entry.abbr.clone(),
            rank: catalog_entry.rank,
            confidence: entry.match_result.confidence,
            insertion_point,
        });
        self.manager.mark_processed(id);
    }

    /// Queue an external lookup for a venue-less paper. Deduplicated by
    /// paper id: a rescan while the lookup is still in flight is a no-op.
    fn queue_lookup(&self, id: &str, title: &str) {
        if !self.config.site_qualifies_for_lookup(self.adapter.name()) {
            self.manager.mark_processed(id);
            return;
        }
        if title.trim().is_empty() {
            self.manager.mark_processed(id);
            return;
        }

        let lookup = Arc::clone(&self.lookup);
        let manager = Arc::clone(&self.manager);
        let config = Arc::clone(&self.config);
        let adapter = Arc::clone(&self.adapter);
        let progress = Arc::clone(&self.progress);
        let id_owned = id.to_string();
        let title_owned = title.to_string();

        let queued = self.queue.enqueue(id.to_string(), move |ctx| async move {
            let result = lookup.lookup(&title_owned).await;
            if !ctx.is_current() {
                tracing::debug!(id = %id_owned, "discarding lookup result from stale epoch");
                return;
            }

            if let Some(ref error) = result.error {
                progress(PipelineEvent::LookupFailed {
                    id: id_owned.clone(),
                    error: error.clone(),
                });
                return; // not cached, retried on a later scan
            }

            let match_result = manager.apply_lookup(&id_owned, &result);
            progress(PipelineEvent::LookupResolved {
                id: id_owned.clone(),
                venue: result.venue.clone(),
                matched: match_result.as_ref().is_some_and(|m| m.matched),
            });

            match match_result {
                Some(m) if m.matched => {
                    let entry = match m.entry {
                        Some(e) => e,
                        None => return,
                    };
                    if !config.rank_shown(entry.rank) {
                        manager.mark_processed(&id_owned);
                        return;
                    }
                    let info = match manager.get(&id_owned) {
                        Some(e) => e.info,
                        None => return,
                    };
                    if let Some(insertion_point) = adapter.insertion_point(&info) {
                        progress(PipelineEvent::BadgeMounted {
                            id: id_owned.clone(),
                            abbr: entry.abbr.clone(),
                            rank: entry.rank,
                            confidence: m.confidence,
                            insertion_point,
                        });
                        manager.mark_processed(&id_owned);
                    }
                }
                _ => {
                    // Definitive miss (not-found, or venue unknown to the
                    // catalog): no badge, done with this paper.
                    manager.mark_processed(&id_owned);
                }
            }
        });

        if queued {
            (self.progress)(PipelineEvent::LookupQueued {
                id: id.to_string(),
                title: title.to_string(),
            });
        }
    }

    /// Start watching the adapter for listing changes. Changes set a dirty
    /// flag and wake [`wait_for_change`](Pipeline::wait_for_change).
    pub fn watch(&self) {
        let dirty = Arc::clone(&self.dirty);
        let notify = Arc::clone(&self.change_notify);
        let progress = Arc::clone(&self.progress);
        let site = self.adapter.name().to_string();
        self.adapter.observe_changes(Arc::new(move || {
            dirty.store(true, Ordering::SeqCst);
            progress(PipelineEvent::ChangeDetected { site: site.clone() });
            notify.notify_one();
        }));
    }

    /// Wait until the adapter reports a listing change since the last call.
    pub async fn wait_for_change(&self) {
        if self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        self.change_notify.notified().await;
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Invalidate queued and in-flight lookups (e.g. on navigation away
    /// from the listing). In-flight results are discarded, never applied.
    pub fn invalidate(&self) {
        self.queue.invalidate();
    }

    /// Drop all ledger state. With `strip_markers`, durable markers are
    /// removed too, so the next scan starts from scratch.
    pub fn reset(&self, strip_markers: bool) {
        self.queue.invalidate();
        self.manager.reset(strip_markers);
    }

    /// Wait for all queued lookups to settle. Test and shutdown aid.
    pub async fn drain(&self) {
        self.queue.wait_idle().await;
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.adapter.disconnect();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("site", &self.adapter.name())
            .field("papers", &self.manager.len())
            .finish()
    }
}
