//! Retrieval core for a domain knowledge base.
//!
//! Records are chunked, embedded and stored in a vector index that picks an
//! exact flat scan or an inverted file by corpus size. A [`SearchService`]
//! answers nearest-neighbor queries over the loaded index with caching,
//! per-caller rate limiting, bounded retries and metrics.

pub mod chunking;
pub mod config;
pub mod display;
pub mod error;
pub mod indexing;
pub mod records;
pub mod search;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use chunking::{ChunkingOptions, chunk_records, chunk_text};
pub use config::Settings;
pub use error::{
    BuildError, BuildResult, LoadError, LoadResult, RecordError, RecordResult, SearchError,
    SearchResult,
};
pub use indexing::{
    BuildOptions, BuildSummary, IndexBuilder, IntegrityReport, KnowledgeBase,
    validate_knowledge_base,
};
pub use records::{load_records, parse_records};
pub use search::{
    BenchmarkReport, MetricsSnapshot, SearchService, ServiceOptions, run_benchmark,
};
pub use types::{KnowledgeRecord, SearchHit, TextChunk};
pub use vector::{EmbeddingGenerator, IndexTopology, Score, VectorIndex};
