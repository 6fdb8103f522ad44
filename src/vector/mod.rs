//! Vector embedding, indexing and storage for knowledge-base retrieval.
//!
//! # Architecture
//! Chunk texts are embedded into L2-normalized vectors and held in a
//! [`VectorIndex`]. Small corpora use an exact flat scan; larger ones use an
//! inverted file (IVF) trained with K-means so a query only scans the lists
//! nearest to it. Indexes are persisted in a compact binary format and
//! memory-mapped on load.
//!
//! A vector's row in the index equals its chunk's position in the chunk
//! list. Nothing else links the two.

mod clustering;
mod embedding;
mod index;
mod storage;
mod types;

// Re-export core types for public API
pub use clustering::{
    ClusteringError, DEFAULT_MAX_ITERATIONS, KMeansOptions, KMeansResult,
    assign_to_nearest_centroid, cosine_similarity, kmeans_clustering, normalize_vector,
    rank_centroids,
};
pub use embedding::{
    EmbeddingGenerator, FastEmbedGenerator, HASHING_MODEL_NAME, HashingEmbeddingGenerator,
    create_embedding_generator, embed_in_batches, embed_in_batches_with_progress, parse_embedding_model,
};
pub use index::{DEFAULT_FLAT_THRESHOLD, DEFAULT_MAX_NLIST, IndexTopology, VectorIndex};
pub use storage::{
    CHUNKS_FILE_NAME, INDEX_FILE_NAME, IndexManifest, KnowledgeBasePaths, MANIFEST_FILE_NAME,
    STORAGE_VERSION, StagedFile, StoredChunkList, StoredIndex, VectorStorageError, decode_index,
    encode_index, load_chunk_list, load_index, save_chunk_list, save_index, stage_chunk_list,
    stage_index,
};
pub use types::{ClusterId, Score, VECTOR_DIMENSION_384, VectorDimension, VectorError};
