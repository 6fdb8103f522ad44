//! K-means training for the inverted-file index.
//!
//! Centroids become the index's list heads: every chunk vector is filed
//! under its most similar centroid, and a query scans the lists whose
//! centroids rank highest. Similarity is cosine, centroids are kept at unit
//! length, and seeding is K-means++ from [`KMeansOptions::seed`] so
//! rebuilding the same records yields the same lists.

use crate::vector::types::{ClusterId, VectorError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

/// Default maximum number of iterations for K-means clustering.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Tuning knobs for a clustering run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeansOptions {
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: 42,
        }
    }
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each a unit vector of the input dimension.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector, in input order.
    pub assignments: Vec<ClusterId>,

    /// Number of iterations until convergence.
    pub iterations: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are generated before clustering"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,

    #[error(
        "Failed to initialize centroids\nSuggestion: Check that vectors contain valid floating-point values"
    )]
    InitializationFailed,

    #[error("Vector operation error: {0}")]
    VectorError(#[from] VectorError),
}

/// Partitions `vectors` into `k` lists for the inverted-file index.
///
/// Stops when no assignment changes or the centroids barely move, and after
/// `options.max_iterations` rounds at the latest. `k` must lie in
/// `1..=vectors.len()`.
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[&[f32]],
    k: usize,
    options: &KMeansOptions,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, k, &mut rng)?;
    let mut assignments = vec![ClusterId::from_index(0); vectors.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;

        // Assignment step
        let centroid_refs: Vec<&[f32]> = centroids.iter().map(|c| c.as_slice()).collect();
        let new_assignments: Vec<ClusterId> = vectors
            .par_iter()
            .map(|vector| assign_to_nearest_centroid(vector, &centroid_refs))
            .collect();

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= options.max_iterations {
            break;
        }

        // Update step
        let new_centroids = update_centroids(vectors, &assignments, k, &mut rng);
        let centroid_movement = calculate_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if centroid_movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    if iterations >= options.max_iterations {
        // Still usable: the assignments match the final centroids.
        tracing::warn!(
            "K-means did not fully converge after {} iterations",
            options.max_iterations
        );
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Assigns a vector to the nearest centroid based on cosine similarity.
pub fn assign_to_nearest_centroid(vector: &[f32], centroids: &[&[f32]]) -> ClusterId {
    let mut best_similarity = f32::NEG_INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let similarity = cosine_similarity(vector, centroid);
        if similarity > best_similarity {
            best_similarity = similarity;
            best_cluster = i;
        }
    }

    ClusterId::from_index(best_cluster)
}

/// Ranks centroids by similarity to `vector`, most similar first.
///
/// Returns zero-based list indices.
pub fn rank_centroids(vector: &[f32], centroids: &[Vec<f32>]) -> Vec<usize> {
    let mut ranked: Vec<(usize, f32)> = centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(vector, c)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().map(|(i, _)| i).collect()
}

/// Updates centroids as the normalized mean of their assigned vectors.
fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[ClusterId],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, cluster_id) in vectors.iter().zip(assignments.iter()) {
        let cluster_idx = cluster_id.index();

        for (acc, &value) in new_centroids[cluster_idx].iter_mut().zip(vector.iter()) {
            *acc += value;
        }
        cluster_sizes[cluster_idx] += 1;
    }

    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            // Empty cluster: reseed from a random input vector
            let random_idx = rng.random_range(0..vectors.len());
            *centroid = normalize_vector_copy(vectors[random_idx]);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            normalize_vector(centroid);
        }
    }

    new_centroids
}

/// Computes cosine similarity between two vectors.
///
/// Returns a value in [-1, 1], where 1 is most similar. Zero vectors
/// have similarity 0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Initializes centroids using the K-means++ algorithm.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[&[f32]],
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let mut centroids = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(normalize_vector_copy(vectors[first_idx]));

    // Squared cosine distance of every vector to its nearest chosen centroid
    let mut distances: Vec<f32> = vectors
        .iter()
        .map(|v| {
            let d = 1.0 - cosine_similarity(v, &centroids[0]);
            d * d
        })
        .collect();

    for _ in 1..k {
        let total_distance: f32 = distances.iter().sum();

        let next_idx = if total_distance < EPSILON {
            // All points coincide with existing centroids; fall back to
            // distinct input positions so we still produce k centroids.
            centroids.len() % vectors.len()
        } else {
            let target = rng.random::<f32>() * total_distance;
            let mut cumulative = 0.0;
            let mut chosen = vectors.len() - 1;
            for (i, &distance) in distances.iter().enumerate() {
                cumulative += distance;
                if cumulative >= target {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        let centroid = normalize_vector_copy(vectors[next_idx]);
        for (distance, vector) in distances.iter_mut().zip(vectors.iter()) {
            let d = 1.0 - cosine_similarity(vector, &centroid);
            *distance = distance.min(d * d);
        }
        centroids.push(centroid);
    }

    if centroids.len() != k {
        return Err(ClusteringError::InitializationFailed);
    }

    Ok(centroids)
}

/// Calculates the mean movement of centroids between iterations.
fn calculate_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(old_c, new_c)| 1.0 - cosine_similarity(old_c, new_c))
        .sum::<f32>()
        / old.len() as f32
}

/// Normalizes a vector in-place to unit length.
///
/// Vectors with a norm below epsilon are left as-is.
pub fn normalize_vector(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Creates a normalized copy of a vector.
fn normalize_vector_copy(vector: &[f32]) -> Vec<f32> {
    let mut normalized = vector.to_vec();
    normalize_vector(&mut normalized);
    normalized
}
