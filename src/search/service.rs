//! The single serve-time entry point: query text in, ranked chunks out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::error::{LoadResult, SearchError, SearchResult};
use crate::indexing::KnowledgeBase;
use crate::search::{
    MetricsSnapshot, RateDecision, RateLimiter, RetryPolicy, SearchCache, SearchMetrics,
};
use crate::types::SearchHit;
use crate::vector::{EmbeddingGenerator, VectorError, create_embedding_generator, embed_in_batches};

/// Serve-time tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOptions {
    pub default_k: usize,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub rate_limit_requests: usize,
    pub rate_limit_window: Duration,
    pub retry: RetryPolicy,
    pub nprobe: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ServiceOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let search = &settings.search;
        Self {
            default_k: search.default_k,
            cache_ttl: search.cache_ttl(),
            cache_max_entries: search.cache_max_entries,
            rate_limit_requests: search.rate_limit_requests,
            rate_limit_window: search.rate_limit_window(),
            retry: RetryPolicy::new(search.retry_max_attempts, search.retry_base_delay()),
            nprobe: settings.index.nprobe,
        }
    }
}

/// Owns the loaded knowledge base, embedder, cache, rate windows and
/// metrics for the lifetime of the process.
pub struct SearchService {
    kb: KnowledgeBase,
    embedder: Arc<dyn EmbeddingGenerator>,
    cache: SearchCache,
    limiter: RateLimiter,
    retry: RetryPolicy,
    metrics: SearchMetrics,
    default_k: usize,
}

impl std::fmt::Debug for SearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchService")
            .field("chunks", &self.kb.len())
            .field("topology", &self.kb.index().topology())
            .field("embedder", &self.embedder.model_name())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl SearchService {
    /// Loads the knowledge base under `settings.index_path` and the
    /// configured embedder.
    ///
    /// # Errors
    /// Any missing, corrupt or misaligned file, an embedder that fails to
    /// initialize, or an embedder incompatible with the index.
    pub fn open(settings: &Settings) -> LoadResult<Self> {
        let kb = KnowledgeBase::load(&settings.index_path)?;
        let embedder = create_embedding_generator(
            &settings.embedding.model,
            settings.embedding.cache_dir.clone(),
            settings.embedding.show_download_progress,
        )?;
        Self::new(kb, embedder, ServiceOptions::from_settings(settings))
    }

    /// Wraps an already loaded knowledge base.
    pub fn new(
        kb: KnowledgeBase,
        embedder: Arc<dyn EmbeddingGenerator>,
        options: ServiceOptions,
    ) -> LoadResult<Self> {
        kb.check_embedder(embedder.as_ref())?;

        Ok(Self {
            kb: kb.with_nprobe(options.nprobe),
            embedder,
            cache: SearchCache::new(options.cache_ttl, options.cache_max_entries),
            limiter: RateLimiter::new(options.rate_limit_requests, options.rate_limit_window),
            retry: options.retry,
            metrics: SearchMetrics::new(),
            default_k: options.default_k,
        })
    }

    /// Returns up to `k` chunks most relevant to `query`, best first.
    ///
    /// # Errors
    /// - `EmptyQuery` for blank input, before any other effect
    /// - `RateLimited` when `caller_id` is over its budget
    /// - `SearchFailed` when embedding or index search failed on every attempt
    pub fn search(&self, query: &str, k: usize, caller_id: &str) -> SearchResult<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        if let RateDecision::Limited { retry_after } = self.limiter.check(caller_id) {
            self.metrics.record_rate_limited();
            return Err(SearchError::RateLimited {
                caller_id: caller_id.to_string(),
                retry_after,
            });
        }

        let started = Instant::now();
        if let Some(hits) = self.cache.get(query, k) {
            tracing::debug!(k, hits = hits.len(), "cache hit");
            self.metrics.record_cache_hit(started.elapsed());
            return Ok(hits);
        }

        match self.retry.run(|_| self.search_uncached(query.trim(), k)) {
            Ok(hits) => {
                self.cache.put(query, k, hits.clone());
                self.metrics.record_cache_miss(started.elapsed());
                tracing::debug!(k, hits = hits.len(), "cache miss, searched index");
                Ok(hits)
            }
            Err(exhausted) => {
                self.metrics.record_error();
                Err(SearchError::SearchFailed {
                    attempts: exhausted.attempts,
                    reason: exhausted.last_error.to_string(),
                })
            }
        }
    }

    /// [`search`](Self::search) with the configured default `k`.
    pub fn search_default(&self, query: &str, caller_id: &str) -> SearchResult<Vec<SearchHit>> {
        self.search(query, self.default_k, caller_id)
    }

    fn search_uncached(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, VectorError> {
        let embedding = embed_in_batches(self.embedder.as_ref(), &[query], 1)?
            .pop()
            .ok_or(VectorError::EmbeddingCountMismatch {
                expected: 1,
                actual: 0,
            })?;

        let ranked = self.kb.index().search(&embedding, k)?;
        Ok(ranked
            .into_iter()
            .filter_map(|(position, score)| {
                let chunk = self.kb.chunk(position)?;
                Some(SearchHit {
                    position,
                    text: chunk.tagged_text(),
                    score,
                })
            })
            .collect())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Zeros the counters and returns their values from before the reset.
    pub fn reset_metrics(&self) -> MetricsSnapshot {
        self.metrics.reset()
    }

    /// Sweeps expired cache entries and idle rate-limit windows.
    pub fn purge_expired_cache(&self) -> usize {
        let idle = self.limiter.purge_idle();
        if idle > 0 {
            tracing::debug!(idle, "dropped idle rate-limit windows");
        }
        self.cache.purge_expired()
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::indexing::{BuildOptions, IndexBuilder};
    use crate::types::KnowledgeRecord;
    use crate::vector::{HashingEmbeddingGenerator, VectorDimension};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn knowledge_base() -> KnowledgeBase {
        let records = vec![
            KnowledgeRecord::new("Row 1")
                .with_field("disease", "Tomato leaf curl virus")
                .with_field("symptoms", "Tomato plant leaves curling upward and yellowing"),
            KnowledgeRecord::new("Row 2")
                .with_field("disease", "Early blight")
                .with_field("symptoms", "Brown concentric rings on lower leaves"),
            KnowledgeRecord::new("Row 3")
                .with_field("disease", "Powdery mildew")
                .with_field("symptoms", "White powder on squash leaves"),
            KnowledgeRecord::new("Row 4")
                .with_field("disease", "Root rot")
                .with_field("symptoms", "Wilting despite wet soil"),
        ];
        IndexBuilder::new(
            Arc::new(HashingEmbeddingGenerator::default()),
            BuildOptions::default(),
        )
        .build(&records)
        .unwrap()
    }

    fn options() -> ServiceOptions {
        ServiceOptions {
            retry: RetryPolicy::new(3, Duration::ZERO),
            ..ServiceOptions::default()
        }
    }

    fn service() -> SearchService {
        SearchService::new(
            knowledge_base(),
            Arc::new(HashingEmbeddingGenerator::default()),
            options(),
        )
        .unwrap()
    }

    /// Fails a set number of times before delegating.
    struct FlakyEmbedder {
        failures_left: AtomicU32,
        inner: HashingEmbeddingGenerator,
    }

    impl EmbeddingGenerator for FlakyEmbedder {
        fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(VectorError::EmbeddingFailed("backend timeout".to_string()));
            }
            self.inner.generate_embeddings(texts)
        }
        fn dimension(&self) -> VectorDimension {
            self.inner.dimension()
        }
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
    }

    fn flaky_service(failures: u32) -> SearchService {
        let embedder = FlakyEmbedder {
            failures_left: AtomicU32::new(failures),
            inner: HashingEmbeddingGenerator::default(),
        };
        SearchService::new(knowledge_base(), Arc::new(embedder), options()).unwrap()
    }

    #[test]
    fn test_service_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SearchService>();
    }

    #[test]
    fn test_ranked_results() {
        let service = service();
        let hits = service
            .search("my tomato plant has curling leaves", 3, "tester")
            .unwrap();

        assert_eq!(hits.len(), 3);
        assert!(hits[0].text.starts_with("[Source: Row 1]"));
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_k_larger_than_corpus_is_clamped() {
        let hits = service().search("leaves", 50, "tester").unwrap();
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn test_empty_query_has_no_side_effects() {
        let service = service();
        assert!(matches!(
            service.search("   \t ", 3, "tester"),
            Err(SearchError::EmptyQuery)
        ));

        let metrics = service.metrics();
        assert_eq!(metrics.total_searches, 0);
        assert_eq!(metrics.errors, 0);
        assert_eq!(metrics.rate_limited_requests, 0);
        assert!(service.cache().is_empty());
    }

    #[test]
    fn test_second_search_hits_cache() {
        let service = service();
        let first = service.search("Brown rings on leaves", 2, "tester").unwrap();
        let second = service.search("  brown RINGS on leaves ", 2, "tester").unwrap();

        assert_eq!(first, second);
        let metrics = service.metrics();
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.total_searches, 2);
    }

    #[test]
    fn test_concurrent_searches_share_one_cache_entry() {
        const THREADS: usize = 8;
        let service = service();

        let results: Vec<Vec<SearchHit>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    let service = &service;
                    scope.spawn(move || {
                        service
                            .search("white powder on squash", 2, &format!("worker-{i}"))
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.len(), THREADS);
        assert!(results.iter().all(|hits| hits == &results[0]));
        assert!(results[0][0].text.starts_with("[Source: Row 3]"));

        let metrics = service.metrics();
        assert_eq!(metrics.total_searches, THREADS as u64);
        assert_eq!(metrics.cache_hits + metrics.cache_misses, THREADS as u64);
        assert!(metrics.cache_misses >= 1);
        assert_eq!(metrics.errors, 0);
        assert_eq!(service.cache().len(), 1);
    }

    #[test]
    fn test_rate_limit_is_a_distinct_outcome() {
        let service = SearchService::new(
            knowledge_base(),
            Arc::new(HashingEmbeddingGenerator::default()),
            ServiceOptions {
                rate_limit_requests: 2,
                ..options()
            },
        )
        .unwrap();

        assert!(service.search("wilting", 1, "field-7").is_ok());
        assert!(service.search("wilting", 1, "field-7").is_ok());
        let third = service.search("wilting", 1, "field-7");
        assert!(matches!(
            third,
            Err(SearchError::RateLimited { ref caller_id, .. }) if caller_id == "field-7"
        ));
        // Other callers are unaffected
        assert!(service.search("wilting", 1, "field-8").is_ok());
        assert_eq!(service.metrics().rate_limited_requests, 1);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let service = flaky_service(2);
        let hits = service.search("squash powder", 1, "tester").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(service.metrics().errors, 0);
    }

    #[test]
    fn test_exhausted_retries_surface_and_count() {
        let service = flaky_service(10);
        let result = service.search("squash powder", 1, "tester");

        assert!(matches!(
            result,
            Err(SearchError::SearchFailed { attempts: 3, .. })
        ));
        let metrics = service.metrics();
        assert_eq!(metrics.errors, 1);
        assert_eq!(metrics.total_searches, 0);
        assert!(service.cache().is_empty());
    }

    #[test]
    fn test_reset_metrics_returns_previous() {
        let service = service();
        service.search("root rot", 1, "tester").unwrap();

        let previous = service.reset_metrics();
        assert_eq!(previous.total_searches, 1);
        assert_eq!(service.metrics().total_searches, 0);
    }

    #[test]
    fn test_incompatible_embedder_rejected() {
        let narrow = HashingEmbeddingGenerator::new(VectorDimension::new(32).unwrap());
        let result = SearchService::new(knowledge_base(), Arc::new(narrow), options());
        assert!(matches!(result, Err(LoadError::EmbedderMismatch { .. })));
    }

    #[test]
    fn test_open_without_index_is_unavailable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let settings = Settings {
            index_path: temp_dir.path().join("missing"),
            ..Settings::default()
        };
        assert!(matches!(
            SearchService::open(&settings),
            Err(LoadError::IndexUnavailable { .. })
        ));
    }
}
