//! Embedding generation for chunks and queries.
//!
//! The [`EmbeddingGenerator`] trait is the seam between the retrieval core
//! and whatever model produces vectors. Two implementations ship here:
//!
//! - [`FastEmbedGenerator`]: fastembed ONNX models (AllMiniLML6V2 by default)
//! - [`HashingEmbeddingGenerator`]: deterministic feature hashing, no model
//!   download, used for offline builds and tests
//!
//! Callers go through [`embed_in_batches`], which bounds peak memory,
//! normalizes every vector and checks that the model returned one vector
//! per input in order.

use crate::vector::clustering::normalize_vector;
use crate::vector::{VectorDimension, VectorError};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Model name that selects [`HashingEmbeddingGenerator`].
pub const HASHING_MODEL_NAME: &str = "hashing";

/// Trait for generating embeddings from text.
///
/// Implementations must be thread-safe; a single generator is shared by
/// every concurrent search.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts.
    ///
    /// # Returns
    /// A vector of embeddings, one for each input text in input order.
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Name recorded in the index manifest.
    fn model_name(&self) -> &str;
}

/// Embeds `texts` in sub-batches of at most `batch_size`.
///
/// Output order matches input order and values do not depend on
/// `batch_size`. Any failing sub-batch fails the whole call. Each vector is
/// L2-normalized and checked against the generator's dimension.
pub fn embed_in_batches(
    generator: &dyn EmbeddingGenerator,
    texts: &[&str],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, VectorError> {
    embed_in_batches_with_progress(generator, texts, batch_size, |_| {})
}

/// Same as [`embed_in_batches`], calling `on_batch(n)` after each sub-batch of `n` texts.
pub fn embed_in_batches_with_progress(
    generator: &dyn EmbeddingGenerator,
    texts: &[&str],
    batch_size: usize,
    mut on_batch: impl FnMut(usize),
) -> Result<Vec<Vec<f32>>, VectorError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let dimension = generator.dimension();
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        let embeddings = generator.generate_embeddings(batch)?;
        if embeddings.len() != batch.len() {
            return Err(VectorError::EmbeddingCountMismatch {
                expected: batch.len(),
                actual: embeddings.len(),
            });
        }

        for mut embedding in embeddings {
            dimension.validate_vector(&embedding)?;
            normalize_vector(&mut embedding);
            all_embeddings.push(embedding);
        }
        on_batch(batch.len());
    }

    Ok(all_embeddings)
}

/// Maps a configured model name to a fastembed model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name {
        "AllMiniLML6V2" | "all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" | "all-MiniLM-L12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" | "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" | "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" | "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        other => Err(VectorError::UnknownModel(other.to_string())),
    }
}

/// Creates the generator selected by `model_name`.
///
/// [`HASHING_MODEL_NAME`] selects [`HashingEmbeddingGenerator`]; any other
/// name must be a supported fastembed model.
pub fn create_embedding_generator(
    model_name: &str,
    cache_dir: PathBuf,
    show_download_progress: bool,
) -> Result<Arc<dyn EmbeddingGenerator>, VectorError> {
    if model_name.eq_ignore_ascii_case(HASHING_MODEL_NAME) {
        return Ok(Arc::new(HashingEmbeddingGenerator::default()));
    }
    Ok(Arc::new(FastEmbedGenerator::new(
        model_name,
        cache_dir,
        show_download_progress,
    )?))
}

/// FastEmbed implementation.
///
/// The default AllMiniLML6V2 model produces 384-dimensional embeddings.
/// The dimension of other models is probed once at construction.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
    model_name: String,
}

impl std::fmt::Debug for FastEmbedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedGenerator")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("model", &"<TextEmbedding>")
            .finish()
    }
}

impl FastEmbedGenerator {
    /// Create a generator for the named model.
    ///
    /// # Errors
    /// Returns an error if the name is unknown or the model fails to
    /// initialize or download.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let model = parse_embedding_model(model_name)?;

        tracing::info!(model = model_name, cache_dir = %cache_dir.display(), "loading embedding model");
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        // Probe the output dimension with a throwaway embedding
        let probe = text_model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| VectorError::EmbeddingFailed(format!("Failed to probe model: {e}")))?;
        let dimension = probe
            .first()
            .map(|v| v.len())
            .ok_or_else(|| VectorError::EmbeddingFailed("Model returned no probe vector".into()))?;

        Ok(Self {
            model: Mutex::new(text_model),
            dimension: VectorDimension::new(dimension)?,
            model_name: model_name.to_string(),
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Deterministic bag-of-words embedder based on feature hashing.
///
/// Each lowercase alphanumeric token is hashed with FNV-1a into one of
/// `dimension` buckets with a hash-derived sign. Texts sharing vocabulary
/// land close together, which is enough for exact-match style retrieval
/// and for exercising the index without a model download.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingGenerator {
    dimension: VectorDimension,
}

impl Default for HashingEmbeddingGenerator {
    fn default() -> Self {
        Self::new(VectorDimension::dimension_384())
    }
}

impl HashingEmbeddingGenerator {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut embedding = vec![0.0f32; dim];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a_hash(token.to_lowercase().as_bytes());
            let bucket = (hash % dim as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        normalize_vector(&mut embedding);
        embedding
    }
}

impl EmbeddingGenerator for HashingEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        HASHING_MODEL_NAME
    }
}

/// FNV-1a hash function for good distribution
fn fnv1a_hash(data: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
