//! Integrity checks over a loaded knowledge base.

use serde::Serialize;

use crate::indexing::KnowledgeBase;
use crate::vector::IndexTopology;

/// Vectors whose norm is further than this from 1 are reported.
const NORM_TOLERANCE: f32 = 1e-3;

/// Number of neighbours requested by the probe search.
const PROBE_K: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    SizeMismatch { index_len: usize, chunk_count: usize },
    EmptyChunks { count: usize },
    UnnormalizedVectors { count: usize },
    InvalidProbePosition { position: usize },
    ProbeSearchFailed { reason: String },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SizeMismatch {
                index_len,
                chunk_count,
            } => write!(f, "Size mismatch: {chunk_count} chunks vs {index_len} vectors"),
            Self::EmptyChunks { count } => write!(f, "Found {count} empty text chunks"),
            Self::UnnormalizedVectors { count } => {
                write!(f, "Found {count} vectors that are not unit length")
            }
            Self::InvalidProbePosition { position } => {
                write!(f, "Index search returned invalid position {position}")
            }
            Self::ProbeSearchFailed { reason } => write!(f, "Index search test failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub index_size: usize,
    pub chunk_count: usize,
    pub dimension: usize,
    pub topology: IndexTopology,
    pub model_name: String,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

impl std::fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Index size:  {}", self.index_size)?;
        writeln!(f, "Chunks:      {}", self.chunk_count)?;
        writeln!(f, "Dimension:   {}", self.dimension)?;
        writeln!(f, "Topology:    {}", self.topology)?;
        writeln!(f, "Model:       {}", self.model_name)?;
        if self.is_valid() {
            write!(f, "Status:      valid")
        } else {
            write!(f, "Status:      {} issue(s)", self.issues.len())?;
            for issue in &self.issues {
                write!(f, "\n  - {issue}")?;
            }
            Ok(())
        }
    }
}

/// Checks alignment, chunk contents, vector norms and a probe search.
pub fn validate_knowledge_base(kb: &KnowledgeBase) -> IntegrityReport {
    let index = kb.index();
    let mut issues = Vec::new();

    if index.len() != kb.chunks().len() {
        issues.push(IntegrityIssue::SizeMismatch {
            index_len: index.len(),
            chunk_count: kb.chunks().len(),
        });
    }

    let empty = kb
        .chunks()
        .iter()
        .filter(|c| c.body.trim().is_empty())
        .count();
    if empty > 0 {
        issues.push(IntegrityIssue::EmptyChunks { count: empty });
    }

    let unnormalized = (0..index.len())
        .filter_map(|p| index.vector(p))
        .filter(|v| {
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            (norm - 1.0).abs() > NORM_TOLERANCE
        })
        .count();
    if unnormalized > 0 {
        issues.push(IntegrityIssue::UnnormalizedVectors {
            count: unnormalized,
        });
    }

    if let Some(probe) = probe_query(kb) {
        match index.search(&probe, PROBE_K) {
            Ok(hits) => issues.extend(
                hits.into_iter()
                    .filter(|(position, _)| *position >= kb.chunks().len())
                    .map(|(position, _)| IntegrityIssue::InvalidProbePosition { position }),
            ),
            Err(e) => issues.push(IntegrityIssue::ProbeSearchFailed {
                reason: e.to_string(),
            }),
        }
    }

    let report = IntegrityReport {
        index_size: index.len(),
        chunk_count: kb.chunks().len(),
        dimension: index.dimension().get(),
        topology: index.topology(),
        model_name: kb.manifest().model_name.clone(),
        issues,
    };

    if report.is_valid() {
        tracing::info!(vectors = report.index_size, "knowledge base passed integrity checks");
    } else {
        tracing::warn!(issues = report.issues.len(), "knowledge base has integrity issues");
    }
    report
}

/// Mean of all vectors, so the probe lands inside the populated region.
fn probe_query(kb: &KnowledgeBase) -> Option<Vec<f32>> {
    let index = kb.index();
    if index.is_empty() {
        return None;
    }
    let mut probe = vec![0.0f32; index.dimension().get()];
    for vector in (0..index.len()).filter_map(|p| index.vector(p)) {
        for (acc, value) in probe.iter_mut().zip(vector) {
            *acc += value;
        }
    }
    Some(probe)
}
