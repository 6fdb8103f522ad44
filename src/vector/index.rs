//! Read-only similarity index over chunk embeddings.
//!
//! Two topologies share one type:
//! - **Flat**: exhaustive cosine scan, exact, used for small corpora
//! - **Inverted file**: vectors bucketed under k-means centroids, only the
//!   nearest buckets are scanned
//!
//! Vectors are stored row-major in insertion order, so a vector's row is
//! its chunk position. That correspondence is the only link between a hit
//! and its text and is never reordered.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::vector::clustering::{
    KMeansOptions, assign_to_nearest_centroid, cosine_similarity, kmeans_clustering,
    rank_centroids,
};
use crate::vector::{Score, VectorDimension, VectorError};

/// Corpus sizes below this use an exact flat index.
pub const DEFAULT_FLAT_THRESHOLD: usize = 1000;

/// Upper bound on inverted lists regardless of corpus size.
pub const DEFAULT_MAX_NLIST: usize = 100;

/// Index layout chosen at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexTopology {
    Flat,
    InvertedFile { nlist: usize },
}

impl IndexTopology {
    /// Picks the topology for a corpus of `n` vectors.
    ///
    /// `n < flat_threshold` gives `Flat`; otherwise
    /// `InvertedFile { nlist: min(max_nlist, floor(sqrt(n))) }`.
    #[must_use]
    pub fn for_corpus_size(n: usize, flat_threshold: usize, max_nlist: usize) -> Self {
        if n < flat_threshold {
            return Self::Flat;
        }
        let nlist = ((n as f64).sqrt().floor() as usize).clamp(1, max_nlist.max(1));
        Self::InvertedFile { nlist: nlist.min(n.max(1)) }
    }

    /// Short name used in logs and reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::InvertedFile { .. } => "ivf",
        }
    }
}

impl std::fmt::Display for IndexTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => write!(f, "flat"),
            Self::InvertedFile { nlist } => write!(f, "ivf(nlist={nlist})"),
        }
    }
}

/// Inverted-file structure: centroids plus the positions filed under each.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InvertedLists {
    pub(crate) centroids: Vec<Vec<f32>>,
    pub(crate) lists: Vec<Vec<u32>>,
}

/// Loaded, immutable vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: VectorDimension,
    /// Row-major vectors; row `i` belongs to chunk `i`.
    vectors: Vec<f32>,
    inverted: Option<InvertedLists>,
    nprobe: usize,
}

impl VectorIndex {
    /// Builds an exact flat index from vectors in chunk order.
    pub fn build_flat(
        dimension: VectorDimension,
        vectors: &[Vec<f32>],
    ) -> Result<Self, VectorError> {
        let mut data = Vec::with_capacity(vectors.len() * dimension.get());
        for vector in vectors {
            dimension.validate_vector(vector)?;
            data.extend_from_slice(vector);
        }

        Ok(Self {
            dimension,
            vectors: data,
            inverted: None,
            nprobe: 1,
        })
    }

    /// Trains `nlist` centroids on `vectors` and files every vector under
    /// its nearest centroid, preserving chunk order within each list.
    pub fn build_inverted_file(
        dimension: VectorDimension,
        vectors: &[Vec<f32>],
        nlist: usize,
        options: &KMeansOptions,
    ) -> Result<Self, VectorError> {
        let mut index = Self::build_flat(dimension, vectors)?;
        if vectors.is_empty() {
            return Ok(index);
        }

        let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
        let nlist = nlist.clamp(1, refs.len());
        let trained = kmeans_clustering(&refs, nlist, options)
            .map_err(|e| VectorError::ClusteringFailed(e.to_string()))?;

        // Re-assign against the final centroids so search and storage agree
        let centroid_refs: Vec<&[f32]> = trained.centroids.iter().map(|c| c.as_slice()).collect();
        let mut lists = vec![Vec::new(); trained.centroids.len()];
        for (position, vector) in refs.iter().enumerate() {
            let cluster = assign_to_nearest_centroid(vector, &centroid_refs);
            lists[cluster.index()].push(position as u32);
        }

        tracing::debug!(
            nlist,
            iterations = trained.iterations,
            "trained inverted-file index"
        );

        index.inverted = Some(InvertedLists {
            centroids: trained.centroids,
            lists,
        });
        Ok(index)
    }

    /// Reassembles an index from persisted parts.
    pub(crate) fn from_parts(
        dimension: VectorDimension,
        vectors: Vec<f32>,
        inverted: Option<InvertedLists>,
    ) -> Self {
        Self {
            dimension,
            vectors,
            inverted,
            nprobe: 1,
        }
    }

    /// Sets how many inverted lists a search scans at minimum.
    #[must_use]
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe.max(1);
        self
    }

    /// Number of indexed vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len() / self.dimension.get()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    #[must_use]
    pub fn topology(&self) -> IndexTopology {
        match &self.inverted {
            None => IndexTopology::Flat,
            Some(inv) => IndexTopology::InvertedFile {
                nlist: inv.centroids.len(),
            },
        }
    }

    /// Row `position`, if it exists.
    #[must_use]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let dim = self.dimension.get();
        self.vectors.get(position * dim..(position + 1) * dim)
    }

    pub(crate) fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    pub(crate) fn inverted_lists(&self) -> Option<&InvertedLists> {
        self.inverted.as_ref()
    }

    /// Searches for the `k` nearest vectors to `query`.
    ///
    /// Returns `(position, score)` pairs sorted by descending score, at most
    /// `min(k, len)` of them. Positions outside `[0, len)` coming from a
    /// damaged inverted list are dropped.
    #[must_use = "Search results should be mapped back to chunks"]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, Score)>, VectorError> {
        self.dimension.validate_vector(query)?;

        let n = self.len();
        let k = k.min(n);
        if k == 0 {
            return Ok(Vec::new());
        }

        let candidates: Vec<usize> = match &self.inverted {
            None => (0..n).collect(),
            Some(inverted) => self.probe_lists(inverted, query, k),
        };

        let mut scored: Vec<(usize, Score)> = candidates
            .par_iter()
            .filter_map(|&position| {
                let Some(vector) = self.vector(position) else {
                    tracing::warn!(position, len = n, "dropping out-of-range index position");
                    return None;
                };
                Some((position, Score::from_similarity(cosine_similarity(query, vector))))
            })
            .collect();

        // Ties break on position so results are stable across runs
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Collects candidates from at least `nprobe` lists, widening to the
    /// next-nearest lists until `k` candidates are available.
    fn probe_lists(&self, inverted: &InvertedLists, query: &[f32], k: usize) -> Vec<usize> {
        let mut candidates = Vec::new();
        for (probed, list_idx) in rank_centroids(query, &inverted.centroids)
            .into_iter()
            .enumerate()
        {
            if probed >= self.nprobe && candidates.len() >= k {
                break;
            }
            if let Some(list) = inverted.lists.get(list_idx) {
                candidates.extend(list.iter().map(|&p| p as usize));
            }
        }
        candidates
    }
}
