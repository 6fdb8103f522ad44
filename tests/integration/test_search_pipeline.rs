//! Build → load → search through the public API.

use std::sync::Arc;
use std::time::Duration;

use kbsearch::search::RetryPolicy;
use kbsearch::vector::{HashingEmbeddingGenerator, IndexTopology};
use kbsearch::{
    BuildOptions, IndexBuilder, KnowledgeBase, SearchError, SearchService, ServiceOptions,
    load_records, run_benchmark, validate_knowledge_base,
};

use crate::common::{DISEASE_RECORDS, DISEASE_RECORDS_CSV, TestWorkspace, synthetic_records};

fn build_workspace(records: &str) -> TestWorkspace {
    let workspace = TestWorkspace::new();
    let path = workspace.add_file("records.jsonl", records);
    let records = load_records(&path).unwrap();

    IndexBuilder::new(
        Arc::new(HashingEmbeddingGenerator::default()),
        BuildOptions::from_settings(&workspace.settings),
    )
    .build_to(&records, workspace.index_path())
    .unwrap();
    workspace
}

#[test]
fn test_tomato_question_returns_ranked_hits() {
    let workspace = build_workspace(DISEASE_RECORDS);
    let service = SearchService::open(&workspace.settings).unwrap();

    let hits = service
        .search("my tomato plant has curling leaves", 3, "grower-1")
        .unwrap();

    assert_eq!(hits.len(), 3);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(
        hits[0].text.starts_with("[Source: tomato-leaf-curl]"),
        "unexpected top hit: {}",
        hits[0].text
    );
}

#[test]
fn test_csv_export_indexes_like_json_lines() {
    let workspace = TestWorkspace::new();
    let jsonl = load_records(&workspace.add_file("records.jsonl", DISEASE_RECORDS)).unwrap();
    let csv = load_records(&workspace.add_file("records.csv", DISEASE_RECORDS_CSV)).unwrap();
    assert_eq!(csv, jsonl);

    IndexBuilder::new(
        Arc::new(HashingEmbeddingGenerator::default()),
        BuildOptions::from_settings(&workspace.settings),
    )
    .build_to(&csv, workspace.index_path())
    .unwrap();

    let service = SearchService::open(&workspace.settings).unwrap();
    let hits = service
        .search("my tomato plant has curling leaves", 1, "grower-1")
        .unwrap();
    assert!(hits[0].text.starts_with("[Source: tomato-leaf-curl]"));
}

#[test]
fn test_persisted_lengths_agree() {
    let workspace = build_workspace(DISEASE_RECORDS);
    let kb = KnowledgeBase::load(workspace.index_path()).unwrap();

    assert_eq!(kb.len(), 6);
    assert_eq!(kb.index().len(), kb.chunks().len());
    assert_eq!(kb.manifest().chunk_count, kb.len());
    assert_eq!(kb.manifest().record_count, 6);
    assert_eq!(kb.index().topology(), IndexTopology::Flat);
    assert!(validate_knowledge_base(&kb).is_valid());
}

#[test]
fn test_repeat_query_is_served_from_cache() {
    let workspace = build_workspace(DISEASE_RECORDS);
    let service = SearchService::open(&workspace.settings).unwrap();

    let first = service.search("grey lesions on rice", 2, "grower-1").unwrap();
    let second = service.search("Grey  lesions on RICE", 2, "grower-1").unwrap();

    assert_eq!(first, second);
    let metrics = service.metrics();
    assert_eq!(metrics.cache_misses, 1);
    assert_eq!(metrics.cache_hits, 1);
}

#[test]
fn test_expired_entry_is_recomputed() {
    let workspace = build_workspace(DISEASE_RECORDS);
    let kb = KnowledgeBase::load(workspace.index_path()).unwrap();
    let service = SearchService::new(
        kb,
        Arc::new(HashingEmbeddingGenerator::default()),
        ServiceOptions {
            cache_ttl: Duration::from_millis(50),
            retry: RetryPolicy::new(3, Duration::ZERO),
            ..ServiceOptions::from_settings(&workspace.settings)
        },
    )
    .unwrap();

    let first = service.search("white powder on squash", 2, "grower-1").unwrap();
    std::thread::sleep(Duration::from_millis(120));
    let second = service.search("white powder on squash", 2, "grower-1").unwrap();

    assert_eq!(first, second);
    let metrics = service.metrics();
    assert_eq!(metrics.cache_misses, 2);
    assert_eq!(metrics.cache_hits, 0);
}

#[test]
fn test_rate_limit_rejects_then_recovers() {
    let workspace = build_workspace(DISEASE_RECORDS);
    let kb = KnowledgeBase::load(workspace.index_path()).unwrap();
    let service = SearchService::new(
        kb,
        Arc::new(HashingEmbeddingGenerator::default()),
        ServiceOptions {
            rate_limit_requests: 3,
            rate_limit_window: Duration::from_millis(200),
            ..ServiceOptions::from_settings(&workspace.settings)
        },
    )
    .unwrap();

    for _ in 0..3 {
        assert!(service.search("stem rust", 1, "grower-2").is_ok());
    }
    match service.search("stem rust", 1, "grower-2") {
        Err(SearchError::RateLimited { retry_after, .. }) => {
            assert!(retry_after <= Duration::from_millis(200));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }

    std::thread::sleep(Duration::from_millis(250));
    assert!(service.search("stem rust", 1, "grower-2").is_ok());
    assert_eq!(service.metrics().rate_limited_requests, 1);
}

#[test]
fn test_metrics_reset_returns_previous_counts() {
    let workspace = build_workspace(DISEASE_RECORDS);
    let service = SearchService::open(&workspace.settings).unwrap();
    service.search("wilting peppers", 1, "grower-3").unwrap();
    service.search("wilting peppers", 1, "grower-3").unwrap();

    let previous = service.reset_metrics();
    assert_eq!(previous.total_searches, 2);
    assert!((previous.cache_hit_rate - 0.5).abs() < 1e-9);

    let current = service.metrics();
    assert_eq!(current.total_searches, 0);
    assert_eq!(current.cache_hit_rate, 0.0);
}

#[test]
fn test_inverted_file_round_trip() {
    let mut workspace = TestWorkspace::new();
    workspace.settings.index.flat_threshold = 50;

    let path = workspace.add_file("notes.jsonl", &synthetic_records(200));
    let records = load_records(&path).unwrap();
    let summary = IndexBuilder::new(
        Arc::new(HashingEmbeddingGenerator::default()),
        BuildOptions::from_settings(&workspace.settings),
    )
    .build_to(&records, workspace.index_path())
    .unwrap();
    assert_eq!(summary.topology, IndexTopology::InvertedFile { nlist: 14 });

    let service = SearchService::open(&workspace.settings).unwrap();
    assert_eq!(
        service.knowledge_base().index().topology(),
        IndexTopology::InvertedFile { nlist: 14 }
    );
    assert!(validate_knowledge_base(service.knowledge_base()).is_valid());

    let hits = service.search("cassava drought", 10, "agronomist").unwrap();
    assert_eq!(hits.len(), 10);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn test_benchmark_over_loaded_service() {
    let workspace = build_workspace(DISEASE_RECORDS);
    let service = SearchService::open(&workspace.settings).unwrap();

    let report = run_benchmark(&service, &["tomato whiteflies", "copper fungicide"], 2);
    assert_eq!(report.successful_queries, 2);
    assert_eq!(report.index_size, 6);
    assert!(report.latency.is_some());
}
