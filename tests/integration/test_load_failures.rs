//! A knowledge base that cannot be trusted must not be served.

use std::fs;
use std::sync::Arc;

use kbsearch::vector::{
    HashingEmbeddingGenerator, IndexManifest, KnowledgeBasePaths, VectorDimension, save_chunk_list,
};
use kbsearch::{
    BuildError, BuildOptions, IndexBuilder, KnowledgeBase, LoadError, SearchService,
    ServiceOptions, TextChunk, load_records,
};

use crate::common::{DISEASE_RECORDS, TestWorkspace};

fn built_workspace() -> TestWorkspace {
    let workspace = TestWorkspace::new();
    let path = workspace.add_file("records.jsonl", DISEASE_RECORDS);
    let records = load_records(&path).unwrap();
    IndexBuilder::new(
        Arc::new(HashingEmbeddingGenerator::default()),
        BuildOptions::default(),
    )
    .build_to(&records, workspace.index_path())
    .unwrap();
    workspace
}

#[test]
fn test_missing_index_is_unavailable() {
    let workspace = TestWorkspace::new();
    let result = SearchService::open(&workspace.settings);
    assert!(matches!(result, Err(LoadError::IndexUnavailable { .. })));
}

#[test]
fn test_missing_chunk_list_is_unavailable() {
    let workspace = built_workspace();
    let paths = KnowledgeBasePaths::new(workspace.index_path());
    fs::remove_file(&paths.chunks).unwrap();

    match KnowledgeBase::load(workspace.index_path()) {
        Err(LoadError::IndexUnavailable { path }) => assert_eq!(path, paths.chunks),
        other => panic!("expected IndexUnavailable, got {other:?}"),
    }
}

#[test]
fn test_truncated_chunk_list_is_size_mismatch() {
    let workspace = built_workspace();
    let paths = KnowledgeBasePaths::new(workspace.index_path());
    let build_id = IndexManifest::load(&paths.manifest).unwrap().build_id;
    let chunks = vec![TextChunk::new("only-one", "A single orphaned chunk")];
    save_chunk_list(&paths.chunks, &chunks, build_id).unwrap();

    let result = KnowledgeBase::load(workspace.index_path());
    assert!(matches!(
        result,
        Err(LoadError::SizeMismatch {
            index_len: 6,
            chunk_count: 1
        })
    ));
}

#[test]
fn test_garbage_index_is_corrupted() {
    let workspace = built_workspace();
    let paths = KnowledgeBasePaths::new(workspace.index_path());
    fs::write(&paths.index, b"not an index at all").unwrap();

    let result = KnowledgeBase::load(workspace.index_path());
    assert!(matches!(result, Err(LoadError::Corrupted { .. })));
}

#[test]
fn test_index_swapped_from_another_build_is_corrupted() {
    let workspace = built_workspace();
    let other = built_workspace();
    let paths = KnowledgeBasePaths::new(workspace.index_path());
    let other_paths = KnowledgeBasePaths::new(other.index_path());

    // Same records, same vector count: only the build id tells them apart
    fs::copy(&other_paths.index, &paths.index).unwrap();

    match KnowledgeBase::load(workspace.index_path()) {
        Err(e @ LoadError::Corrupted { .. }) => {
            assert_eq!(e.status_code(), "INDEX_CORRUPTED");
        }
        other => panic!("expected Corrupted, got {other:?}"),
    }
    assert!(SearchService::open(&workspace.settings).is_err());
}

#[test]
fn test_chunk_list_swapped_from_another_build_is_corrupted() {
    let workspace = built_workspace();
    let other = built_workspace();
    let paths = KnowledgeBasePaths::new(workspace.index_path());
    fs::copy(KnowledgeBasePaths::new(other.index_path()).chunks, &paths.chunks).unwrap();

    match KnowledgeBase::load(workspace.index_path()) {
        Err(LoadError::Corrupted { path, .. }) => assert_eq!(path, paths.chunks),
        other => panic!("expected Corrupted, got {other:?}"),
    }
}

#[test]
fn test_embedder_with_other_dimension_is_rejected() {
    let workspace = built_workspace();
    let kb = KnowledgeBase::load(workspace.index_path()).unwrap();
    let embedder = HashingEmbeddingGenerator::new(VectorDimension::new(64).unwrap());

    let result = SearchService::new(kb, Arc::new(embedder), ServiceOptions::default());
    match result {
        Err(e @ LoadError::EmbedderMismatch { .. }) => {
            assert!(!e.recovery_suggestions().is_empty());
        }
        other => panic!("expected EmbedderMismatch, got {other:?}"),
    }
}

#[test]
fn test_records_without_text_abort_the_build() {
    let workspace = TestWorkspace::new();
    let path = workspace.add_file("empty.jsonl", "{\"id\": 1, \"note\": \"short\"}\n");
    let records = load_records(&path).unwrap();

    let result = IndexBuilder::new(
        Arc::new(HashingEmbeddingGenerator::default()),
        BuildOptions::default(),
    )
    .build_to(&records, workspace.index_path());

    assert!(matches!(result, Err(BuildError::EmptyKnowledgeBase)));
    assert!(KnowledgeBasePaths::new(workspace.index_path()).first_missing().is_some());
}

#[test]
fn test_rebuild_replaces_previous_knowledge_base() {
    let workspace = built_workspace();
    let path = workspace.add_file(
        "smaller.jsonl",
        r#"{"id": "only", "advice": "Mulch retains soil moisture in summer"}"#,
    );
    let records = load_records(&path).unwrap();
    IndexBuilder::new(
        Arc::new(HashingEmbeddingGenerator::default()),
        BuildOptions::default(),
    )
    .build_to(&records, workspace.index_path())
    .unwrap();

    let kb = KnowledgeBase::load(workspace.index_path()).unwrap();
    assert_eq!(kb.len(), 1);
    assert_eq!(kb.chunks()[0].source, "only");
}
