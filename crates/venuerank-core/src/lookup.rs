//! External bibliographic lookup: resolve a paper title to its publication
//! venue via the DBLP search API.
//!
//! The backend trait keeps the HTTP layer swappable (and mockable); the
//! [`LookupClient`] owns the policy: cache consultation, title-similarity
//! filtering, the fixed per-request timeout, and inter-request spacing for
//! batches.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::cache::LookupCache;
use crate::{Config, LookupResult};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A candidate publication returned by a search backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupHit {
    pub title: String,
    pub venue: Option<String>,
    pub year: Option<u16>,
    pub url: Option<String>,
}

/// A search backend that can look up publications by title.
pub trait LookupBackend: Send + Sync {
    /// The canonical name of this backend (e.g. "DBLP").
    fn name(&self) -> &str;

    /// Search for publications matching the given title. Returns candidate
    /// hits in backend order; relevance filtering happens in the client.
    fn search<'a>(
        &'a self,
        title: &'a str,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LookupHit>, String>> + Send + 'a>>;
}

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").unwrap());

fn title_words(title: &str) -> HashSet<String> {
    let lowered = title.to_lowercase();
    WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Token-overlap (Jaccard) similarity between two titles.
///
/// Titles are lowercased and split into alphanumeric words; the score is
/// |intersection| / |union| of the word sets. Word order and punctuation
/// do not matter. Returns 0.0 when either side has no words.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let wa = title_words(a);
    let wb = title_words(b);
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count();
    let union = wa.len() + wb.len() - intersection;
    intersection as f64 / union as f64
}

/// Online DBLP search backend.
///
/// Queries the public `search/publ/api` endpoint and normalizes the JSON
/// response, which is loose about shapes: `hit` may be absent, a single
/// object, or an array; `venue` may be a string or an array of strings;
/// `year` arrives as a string.
pub struct DblpLookup {
    endpoint: String,
}

impl Default for DblpLookup {
    fn default() -> Self {
        Self {
            endpoint: Config::default().lookup_endpoint,
        }
    }
}

impl DblpLookup {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

/// Extract hits from a DBLP search response body.
fn parse_dblp_hits(data: &serde_json::Value) -> Vec<LookupHit> {
    let hit = &data["result"]["hits"]["hit"];
    let hits: Vec<&serde_json::Value> = match hit {
        serde_json::Value::Array(arr) => arr.iter().collect(),
        serde_json::Value::Object(_) => vec![hit],
        _ => vec![],
    };

    hits.iter()
        .filter_map(|h| {
            let info = &h["info"];
            let title = info["title"].as_str()?;
            let venue = match &info["venue"] {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Array(arr) => {
                    arr.iter().find_map(|v| v.as_str().map(String::from))
                }
                _ => None,
            };
            let year = info["year"].as_str().and_then(|y| y.parse::<u16>().ok());
            let url = info["url"].as_str().map(String::from);
            Some(LookupHit {
                title: title.to_string(),
                venue,
                year,
                url,
            })
        })
        .collect()
}

impl LookupBackend for DblpLookup {
    fn name(&self) -> &str {
        "DBLP"
    }

    fn search<'a>(
        &'a self,
        title: &'a str,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LookupHit>, String>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!(
                "{}?q={}&format=json&h=10",
                self.endpoint,
                urlencoding::encode(title)
            );

            let resp = client
                .get(&url)
                .header("Accept", "application/json")
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| e.to_string())?;

            let status = resp.status();
            if status.as_u16() == 429 {
                return Err("rate limited (429)".into());
            }
            if !status.is_success() {
                return Err(format!("HTTP {}", status));
            }

            let data: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
            Ok(parse_dblp_hits(&data))
        })
    }
}

/// Title-to-venue resolver combining a search backend with the cache.
///
/// Policy lives here:
/// - blank titles are rejected without a network call and never cached;
/// - cache hits short-circuit the backend entirely;
/// - hits must clear the similarity threshold or the result is not-found;
/// - only successful results are written back to the cache;
/// - batch lookups are spaced by the configured inter-request delay.
pub struct LookupClient {
    backend: Arc<dyn LookupBackend>,
    client: reqwest::Client,
    cache: Arc<LookupCache>,
    timeout: Duration,
    min_similarity: f64,
    limiter: Option<DirectLimiter>,
}

impl LookupClient {
    pub fn new(backend: Arc<dyn LookupBackend>, cache: Arc<LookupCache>, config: &Config) -> Self {
        let limiter = Quota::with_period(config.batch_delay()).map(RateLimiter::direct);
        Self {
            backend,
            client: reqwest::Client::new(),
            cache,
            timeout: config.lookup_timeout(),
            min_similarity: config.min_title_similarity,
            limiter,
        }
    }

    pub fn cache(&self) -> &Arc<LookupCache> {
        &self.cache
    }

    /// Resolve a single title. Consults the cache first; on a miss, queries
    /// the backend under the fixed timeout and caches any successful result.
    pub async fn lookup(&self, title: &str) -> LookupResult {
        if title.trim().is_empty() {
            tracing::debug!("rejecting blank title without lookup");
            return LookupResult::error("empty title");
        }

        if let Some(cached) = self.cache.get(title) {
            return cached;
        }

        let result = self.query_backend(title).await;
        if result.is_cacheable() {
            self.cache.insert(title, &result);
        }
        result
    }

    /// Resolve a batch of titles in order, spacing backend requests by the
    /// configured delay. Cache hits and blank titles consume no delay slot.
    pub async fn lookup_batch(&self, titles: &[String]) -> Vec<LookupResult> {
        let mut results = Vec::with_capacity(titles.len());
        for title in titles {
            if title.trim().is_empty() {
                results.push(LookupResult::error("empty title"));
                continue;
            }
            if let Some(cached) = self.cache.get(title) {
                results.push(cached);
                continue;
            }

            if let Some(ref limiter) = self.limiter {
                limiter.until_ready().await;
            }
            let result = self.query_backend(title).await;
            if result.is_cacheable() {
                self.cache.insert(title, &result);
            }
            results.push(result);
        }
        results
    }

    async fn query_backend(&self, title: &str) -> LookupResult {
        let fut = self.backend.search(title, &self.client, self.timeout);
        let hits = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                tracing::warn!(backend = self.backend.name(), title, error = %e, "lookup failed");
                return LookupResult::error(e);
            }
            Err(_) => {
                tracing::warn!(backend = self.backend.name(), title, "lookup timed out");
                return LookupResult::timeout(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        };

        let best = hits
            .into_iter()
            .map(|hit| (title_similarity(title, &hit.title), hit))
            .filter(|(score, _)| *score >= self.min_similarity)
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((score, hit)) => {
                tracing::debug!(title, matched = %hit.title, score, "lookup hit");
                match hit.venue {
                    Some(venue) => LookupResult::found(venue, hit.year, hit.url),
                    // A matching record without venue metadata resolves nothing.
                    None => LookupResult::not_found(),
                }
            }
            None => {
                tracing::debug!(title, "no hit above similarity threshold");
                LookupResult::not_found()
            }
        }
    }
}

/// A scripted [`LookupBackend`] for tests.
///
/// Returns responses in sequence (repeating the last when exhausted) and
/// counts calls so tests can assert on cache behavior.
pub struct MockLookup {
    responses: std::sync::Mutex<Vec<Result<Vec<LookupHit>, String>>>,
    fallback: Result<Vec<LookupHit>, String>,
    delay: Option<Duration>,
    call_count: std::sync::atomic::AtomicUsize,
}

impl MockLookup {
    pub fn new(response: Result<Vec<LookupHit>, String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// One hit whose title matches exactly, carrying the given venue.
    pub fn single_hit(title: &str, venue: &str, year: Option<u16>) -> Self {
        Self::new(Ok(vec![LookupHit {
            title: title.to_string(),
            venue: Some(venue.to_string()),
            year,
            url: None,
        }]))
    }

    pub fn with_sequence(mut responses: Vec<Result<Vec<LookupHit>, String>>) -> Self {
        assert!(!responses.is_empty(), "sequence must not be empty");
        responses.reverse();
        let fallback = responses.first().cloned().unwrap();
        Self {
            responses: std::sync::Mutex::new(responses),
            fallback,
            delay: None,
            call_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl LookupBackend for MockLookup {
    fn name(&self) -> &str {
        "mock"
    }

    fn search<'a>(
        &'a self,
        _title: &'a str,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LookupHit>, String>> + Send + 'a>> {
        self.call_count
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let response = {
            let mut seq = self.responses.lock().unwrap();
            seq.pop().unwrap_or_else(|| self.fallback.clone())
        };
        let delay = self.delay;
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── title_similarity ───────────────────────────────────────────

    #[test]
    fn identical_titles_score_one() {
        assert_eq!(
            title_similarity("Attention Is All You Need", "Attention Is All You Need"),
            1.0
        );
    }

    #[test]
    fn punctuation_and_case_ignored() {
        assert_eq!(
            title_similarity("Attention Is All You Need", "attention is all you need."),
            1.0
        );
    }

    #[test]
    fn disjoint_titles_score_zero() {
        assert_eq!(
            title_similarity("Deep Residual Learning", "Marine Biology Survey"),
            0.0
        );
    }

    #[test]
    fn partial_overlap_scores_between() {
        // {deep, learning} vs {deep, learning, for, vision}: 2/4
        let score = title_similarity("Deep Learning", "Deep Learning for Vision");
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_title_scores_zero() {
        assert_eq!(title_similarity("", "Deep Learning"), 0.0);
        assert_eq!(title_similarity("...", "Deep Learning"), 0.0);
    }

    // ── DBLP response parsing ──────────────────────────────────────

    #[test]
    fn parse_hits_array() {
        let data = serde_json::json!({
            "result": { "hits": { "hit": [
                { "info": { "title": "Attention Is All You Need.",
                            "venue": "NeurIPS", "year": "2017",
                            "url": "https://dblp.org/rec/conf/nips/VaswaniSPUJGKP17" } },
                { "info": { "title": "Some Other Paper", "venue": ["CVPR", "Workshop"], "year": "2020" } }
            ]}}
        });
        let hits = parse_dblp_hits(&data);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].venue.as_deref(), Some("NeurIPS"));
        assert_eq!(hits[0].year, Some(2017));
        assert!(hits[0].url.is_some());
        // Array-shaped venue takes the first entry
        assert_eq!(hits[1].venue.as_deref(), Some("CVPR"));
    }

    #[test]
    fn parse_hits_single_object() {
        let data = serde_json::json!({
            "result": { "hits": { "hit":
                { "info": { "title": "Lonely Paper", "venue": "ICML", "year": "2021" } }
            }}
        });
        let hits = parse_dblp_hits(&data);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].venue.as_deref(), Some("ICML"));
    }

    #[test]
    fn parse_hits_absent() {
        let data = serde_json::json!({ "result": { "hits": { "@total": "0" } } });
        assert!(parse_dblp_hits(&data).is_empty());
    }

    #[test]
    fn parse_hits_missing_fields() {
        let data = serde_json::json!({
            "result": { "hits": { "hit": [
                { "info": { "title": "No Venue Paper" } },
                { "info": { "venue": "CVPR" } }
            ]}}
        });
        let hits = parse_dblp_hits(&data);
        // Second hit lacks a title and is dropped
        assert_eq!(hits.len(), 1);
        assert!(hits[0].venue.is_none());
        assert!(hits[0].year.is_none());
    }

    // ── LookupClient ───────────────────────────────────────────────

    fn client_with(backend: Arc<dyn LookupBackend>, config: &Config) -> LookupClient {
        LookupClient::new(backend, Arc::new(LookupCache::default()), config)
    }

    #[tokio::test]
    async fn found_result_is_cached() {
        let mock = Arc::new(MockLookup::single_hit(
            "Attention Is All You Need",
            "NeurIPS",
            Some(2017),
        ));
        let client = client_with(mock.clone(), &Config::default());

        let first = client.lookup("Attention Is All You Need").await;
        assert!(first.found);
        assert_eq!(first.venue.as_deref(), Some("NeurIPS"));
        assert_eq!(first.year, Some(2017));

        let second = client.lookup("Attention Is All You Need").await;
        assert_eq!(second, first);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn not_found_is_cached() {
        let mock = Arc::new(MockLookup::new(Ok(vec![])));
        let client = client_with(mock.clone(), &Config::default());

        let first = client.lookup("Unknown Paper Title Here").await;
        assert!(!first.found);
        assert!(first.is_cacheable());

        client.lookup("Unknown Paper Title Here").await;
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let mock = Arc::new(MockLookup::with_sequence(vec![
            Err("connection refused".into()),
            Ok(vec![LookupHit {
                title: "Flaky Paper Title".into(),
                venue: Some("CVPR".into()),
                year: None,
                url: None,
            }]),
        ]));
        let client = client_with(mock.clone(), &Config::default());

        let first = client.lookup("Flaky Paper Title").await;
        assert!(first.error.is_some());
        assert!(!first.is_cacheable());

        // Retry reaches the backend again and succeeds
        let second = client.lookup("Flaky Paper Title").await;
        assert!(second.found);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn blank_title_short_circuits() {
        let mock = Arc::new(MockLookup::new(Ok(vec![])));
        let client = client_with(mock.clone(), &Config::default());

        let result = client.lookup("   ").await;
        assert!(result.error.is_some());
        assert_eq!(mock.call_count(), 0);
        assert!(client.cache().is_empty());
    }

    #[tokio::test]
    async fn low_similarity_hit_is_rejected() {
        let mock = Arc::new(MockLookup::single_hit(
            "A Completely Different Publication About Fish",
            "OCEANS",
            None,
        ));
        let client = client_with(mock.clone(), &Config::default());

        let result = client.lookup("Deep Residual Learning for Images").await;
        assert!(!result.found);
        assert!(result.is_cacheable());
    }

    #[tokio::test]
    async fn best_of_multiple_hits_wins() {
        let mock = Arc::new(MockLookup::new(Ok(vec![
            LookupHit {
                title: "Deep Learning for Image Recognition and More".into(),
                venue: Some("WRONG".into()),
                year: None,
                url: None,
            },
            LookupHit {
                title: "Deep Residual Learning for Image Recognition".into(),
                venue: Some("CVPR".into()),
                year: Some(2016),
                url: None,
            },
        ])));
        let client = client_with(mock, &Config::default());

        let result = client
            .lookup("Deep Residual Learning for Image Recognition")
            .await;
        assert!(result.found);
        assert_eq!(result.venue.as_deref(), Some("CVPR"));
    }

    #[tokio::test]
    async fn hit_without_venue_resolves_nothing() {
        let mock = Arc::new(MockLookup::new(Ok(vec![LookupHit {
            title: "Venueless Preprint Paper".into(),
            venue: None,
            year: Some(2023),
            url: None,
        }])));
        let client = client_with(mock, &Config::default());

        let result = client.lookup("Venueless Preprint Paper").await;
        assert!(!result.found);
        assert!(result.is_cacheable());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let mock = Arc::new(
            MockLookup::single_hit("Slow Paper Title Words", "CVPR", None)
                .with_delay(Duration::from_secs(30)),
        );
        let client = client_with(mock.clone(), &Config::default());

        let result = client.lookup("Slow Paper Title Words").await;
        assert!(result.timed_out);
        assert!(!result.is_cacheable());

        // A later attempt reaches the backend again
        client.lookup("Slow Paper Title Words").await;
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn batch_spaces_requests() {
        let mock = Arc::new(MockLookup::new(Ok(vec![])));
        let config = Config {
            batch_delay_ms: 50,
            ..Config::default()
        };
        let client = client_with(mock.clone(), &config);

        let titles = vec![
            "First Batch Paper Title".to_string(),
            "Second Batch Paper Title".to_string(),
            "Third Batch Paper Title".to_string(),
        ];
        let start = std::time::Instant::now();
        let results = client.lookup_batch(&titles).await;
        assert_eq!(results.len(), 3);
        assert_eq!(mock.call_count(), 3);
        // Three spaced requests need at least two inter-request gaps
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn batch_skips_delay_for_cached() {
        let mock = Arc::new(MockLookup::single_hit(
            "Cached Batch Paper Title",
            "ICML",
            None,
        ));
        let config = Config {
            batch_delay_ms: 50,
            ..Config::default()
        };
        let client = client_with(mock.clone(), &config);

        client.lookup("Cached Batch Paper Title").await;
        assert_eq!(mock.call_count(), 1);

        let titles = vec!["Cached Batch Paper Title".to_string(); 5];
        let results = client.lookup_batch(&titles).await;
        assert!(results.iter().all(|r| r.found));
        assert_eq!(mock.call_count(), 1);
    }
}
