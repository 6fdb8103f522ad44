//! Type-safe wrappers and core types for vector search functionality.
//!
//! Newtypes here keep dimensions, cluster ids and relevance scores from
//! being confused with plain integers and floats at the index boundary.

use serde::Serialize;
use std::num::NonZeroU32;
use thiserror::Error;

/// Standard vector dimension for the default embedding model (all-MiniLM-L6-v2).
pub const VECTOR_DIMENSION_384: usize = 384;

/// Type-safe wrapper for cluster IDs in inverted-file indexing.
///
/// Clusters are identified by non-zero IDs to prevent confusion
/// with uninitialized or error states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterId(NonZeroU32);

impl ClusterId {
    /// Creates a new `ClusterId` from a non-zero u32.
    ///
    /// Returns `None` if the provided ID is zero.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Creates a `ClusterId` from a zero-based list index.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add(index as u32))
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// Returns the zero-based list index this cluster occupies.
    #[must_use]
    pub fn index(&self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Type-safe wrapper for relevance scores.
///
/// Scores are normalized to the range [0.0, 1.0] where:
/// - 1.0 indicates identical direction
/// - 0.5 indicates orthogonal vectors
/// - 0.0 indicates opposite direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns an error if the score is not in the range [0.0, 1.0] or is NaN.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score must be in range [0.0, 1.0]",
            });
        }
        Ok(Self(value))
    }

    /// Maps a cosine similarity in [-1, 1] onto a relevance score.
    ///
    /// `(1 + cos) / 2` is strictly increasing, so ranking by score is ranking
    /// by similarity. Rounding noise just outside the range is clamped and
    /// NaN maps to zero.
    #[must_use]
    pub fn from_similarity(similarity: f32) -> Self {
        if similarity.is_nan() {
            return Self::zero();
        }
        Self(((1.0 + similarity) / 2.0).clamp(0.0, 1.0))
    }

    /// Creates a score of 0.0.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    /// Creates a score of 1.0.
    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Construction rejects NaN, so total_cmp agrees with numeric order.
        self.0.total_cmp(&other.0)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Ensures runtime validation of vector dimensions to prevent
/// mismatches between the embedding model and a loaded index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates a standard 384-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur during vector operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid score value: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingFailed(String),

    #[error(
        "Embedding count mismatch: sent {expected} texts, model returned {actual} vectors\nSuggestion: Check the embedding backend for dropped inputs"
    )]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error(
        "Unknown embedding model '{0}'\nSuggestion: Use one of AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MultilingualE5Small or hashing"
    )]
    UnknownModel(String),

    #[error(
        "Clustering failed: {0}\nSuggestion: Ensure sufficient vectors are available for clustering (minimum: k clusters)"
    )]
    ClusteringFailed(String),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with the current version"
    )]
    VersionMismatch { expected: u32, actual: u32 },
}
