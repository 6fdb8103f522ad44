//! Error types for the knowledge-base retrieval core
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages. Build-time errors abort the
//! build; load-time errors block serving; search errors are returned to the
//! caller as distinct outcomes.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::vector::{VectorError, VectorStorageError};

/// Errors reading knowledge records from tabular input
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Failed to read records file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse records in '{path}' at line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Record {index} in '{path}' is not a JSON object")]
    NotAnObject { path: PathBuf, index: usize },
}

/// Errors building and persisting a knowledge base
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Records(#[from] RecordError),

    #[error("Knowledge base is empty: no record produced a chunk")]
    EmptyKnowledgeBase,

    #[error("Embedding failed: {0}")]
    Embedding(#[from] VectorError),

    #[error("Failed to persist knowledge base to '{path}': {source}")]
    Persist {
        path: PathBuf,
        source: VectorStorageError,
    },

    #[error("Built knowledge base is inconsistent: {reason}")]
    Inconsistent { reason: String },
}

impl BuildError {
    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> String {
        match self {
            Self::Records(_) => "RECORDS_ERROR",
            Self::EmptyKnowledgeBase => "EMPTY_KNOWLEDGE_BASE",
            Self::Embedding(_) => "EMBEDDING_ERROR",
            Self::Persist { .. } => "PERSISTENCE_ERROR",
            Self::Inconsistent { .. } => "INCONSISTENT_BUILD",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Records(_) => vec![
                "Records must be a JSON array of objects or one JSON object per line",
                "Check the file path and read permissions",
            ],
            Self::EmptyKnowledgeBase => vec![
                "Ensure records contain text fields longer than the minimum record length",
                "Lower 'chunking.min_record_chars' if records are intentionally short",
            ],
            Self::Embedding(_) => vec![
                "Check 'embedding.model' names a supported model",
                "Set 'embedding.model = \"hashing\"' to build without downloading a model",
            ],
            Self::Persist { .. } => vec![
                "Check disk space and permissions in the index directory",
                "The previous index, if any, was left untouched",
            ],
            Self::Inconsistent { .. } => vec![
                "Check the embedding backend returns one vector per input",
                "Run the build again with RUST_LOG=debug for details",
            ],
        }
    }
}

/// Errors loading a persisted knowledge base
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Knowledge base not available: '{path}' does not exist")]
    IndexUnavailable { path: PathBuf },

    #[error(
        "Index holds {index_len} vectors but the chunk list holds {chunk_count} chunks"
    )]
    SizeMismatch { index_len: usize, chunk_count: usize },

    #[error("Knowledge base file '{path}' is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error(
        "Index was built with '{index_model}' ({index_dimension} dimensions) but the configured embedder is '{embedder_model}' ({embedder_dimension} dimensions)"
    )]
    EmbedderMismatch {
        index_model: String,
        index_dimension: usize,
        embedder_model: String,
        embedder_dimension: usize,
    },

    #[error("Failed to initialize embedder: {0}")]
    Embedder(#[from] VectorError),
}

impl LoadError {
    /// Maps a storage failure on `path` into the matching load error.
    pub fn from_storage(path: impl Into<PathBuf>, error: VectorStorageError) -> Self {
        let path = path.into();
        match error {
            VectorStorageError::Missing(path) => Self::IndexUnavailable { path },
            other => Self::Corrupted {
                path,
                reason: other.to_string(),
            },
        }
    }

    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> String {
        match self {
            Self::IndexUnavailable { .. } => "INDEX_UNAVAILABLE",
            Self::SizeMismatch { .. } => "SIZE_MISMATCH",
            Self::Corrupted { .. } => "INDEX_CORRUPTED",
            Self::EmbedderMismatch { .. } => "EMBEDDER_MISMATCH",
            Self::Embedder(_) => "EMBEDDER_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::IndexUnavailable { .. } => vec![
                "Run 'kbsearch build <records>' to create the knowledge base",
                "Check 'index_path' in .kbsearch/settings.toml",
            ],
            Self::SizeMismatch { .. } | Self::Corrupted { .. } => vec![
                "Run 'kbsearch build <records>' to rebuild from scratch",
                "Check for disk errors or concurrent writers in the index directory",
            ],
            Self::EmbedderMismatch { .. } => vec![
                "Set 'embedding.model' to the model recorded in the manifest",
                "Or rebuild the index with the configured model",
            ],
            Self::Embedder(_) => vec![
                "Check network access for the first model download",
                "Check 'embedding.cache_dir' is writable",
            ],
        }
    }
}

/// Errors returned by `SearchService::search`
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error(
        "Rate limit exceeded for '{caller_id}', retry after {:.1}s",
        .retry_after.as_secs_f64()
    )]
    RateLimited {
        caller_id: String,
        retry_after: Duration,
    },

    #[error("Search failed after {attempts} attempt(s): {reason}")]
    SearchFailed { attempts: u32, reason: String },
}

impl SearchError {
    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> String {
        match self {
            Self::EmptyQuery => "EMPTY_QUERY",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::SearchFailed { .. } => "SEARCH_FAILED",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::EmptyQuery => vec!["Provide a non-empty question"],
            Self::RateLimited { .. } => vec!["Wait for the retry-after interval and try again"],
            Self::SearchFailed { .. } => vec![
                "Run 'kbsearch validate' to check the knowledge base",
                "Try the search again, transient failures are retried automatically",
            ],
        }
    }
}

/// Result type alias for record loading
pub type RecordResult<T> = Result<T, RecordError>;

/// Result type alias for index builds
pub type BuildResult<T> = Result<T, BuildError>;

/// Result type alias for knowledge-base loading
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type alias for searches
pub type SearchResult<T> = Result<T, SearchError>;
