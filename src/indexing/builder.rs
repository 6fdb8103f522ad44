//! Offline knowledge-base construction.
//!
//! records → chunks → embeddings → index → staged files → rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::chunking::{ChunkingOptions, chunk_records};
use crate::config::Settings;
use crate::display::create_progress_bar;
use crate::error::{BuildError, BuildResult};
use crate::indexing::KnowledgeBase;
use crate::types::{KnowledgeRecord, TextChunk};
use crate::vector::{
    EmbeddingGenerator, IndexManifest, IndexTopology, KMeansOptions, VectorIndex,
    embed_in_batches_with_progress,
};

/// Knobs for one build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub chunking: ChunkingOptions,
    pub batch_size: usize,
    pub flat_threshold: usize,
    pub max_nlist: usize,
    pub kmeans: KMeansOptions,
    /// Draw an indicatif bar while embedding
    pub show_progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl BuildOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chunking: settings.chunking.options(),
            batch_size: settings.embedding.batch_size,
            flat_threshold: settings.index.flat_threshold,
            max_nlist: settings.index.max_nlist,
            kmeans: settings.index.kmeans_options(),
            show_progress: false,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

/// What a finished build produced.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub record_count: usize,
    pub chunk_count: usize,
    pub topology: IndexTopology,
    pub dimension: usize,
    pub model_name: String,
    pub index_path: PathBuf,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl std::fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Records:    {}", self.record_count)?;
        writeln!(f, "Chunks:     {}", self.chunk_count)?;
        writeln!(f, "Index:      {}", self.topology)?;
        writeln!(f, "Model:      {} ({} dimensions)", self.model_name, self.dimension)?;
        writeln!(f, "Location:   {}", self.index_path.display())?;
        write!(f, "Elapsed:    {:.2}s", self.elapsed.as_secs_f64())
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Builds a knowledge base with one embedder.
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingGenerator>,
    options: BuildOptions,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingGenerator>, options: BuildOptions) -> Self {
        Self { embedder, options }
    }

    /// Chunks, embeds and indexes `records` in memory.
    ///
    /// # Errors
    /// `EmptyKnowledgeBase` when no record yields a chunk; embedding errors
    /// abort the whole build.
    pub fn build(&self, records: &[KnowledgeRecord]) -> BuildResult<KnowledgeBase> {
        let chunks = chunk_records(records, &self.options.chunking);
        if chunks.is_empty() {
            return Err(BuildError::EmptyKnowledgeBase);
        }
        tracing::info!(
            records = records.len(),
            chunks = chunks.len(),
            "chunked knowledge records"
        );

        let vectors = self.embed_chunks(&chunks)?;
        let index = self.build_index(&vectors)?;

        let record_count = count_sources(&chunks);
        let manifest = IndexManifest::new(self.embedder.model_name(), &index, chunks.len())
            .with_record_count(record_count);

        KnowledgeBase::new(index, chunks, manifest).map_err(|e| BuildError::Inconsistent {
            reason: e.to_string(),
        })
    }

    /// Builds and persists to `dir`, replacing any previous knowledge base.
    pub fn build_to(
        &self,
        records: &[KnowledgeRecord],
        dir: impl AsRef<Path>,
    ) -> BuildResult<BuildSummary> {
        let started = Instant::now();
        let dir = dir.as_ref();

        let kb = self.build(records)?;
        kb.save(dir)?;

        let summary = BuildSummary {
            record_count: kb.manifest().record_count,
            chunk_count: kb.len(),
            topology: kb.index().topology(),
            dimension: kb.index().dimension().get(),
            model_name: kb.manifest().model_name.clone(),
            index_path: dir.to_path_buf(),
            elapsed: started.elapsed(),
        };
        tracing::info!(
            chunks = summary.chunk_count,
            topology = %summary.topology,
            build_id = %format!("{:016x}", kb.manifest().build_id),
            path = %dir.display(),
            "knowledge base written"
        );
        Ok(summary)
    }

    fn embed_chunks(&self, chunks: &[TextChunk]) -> BuildResult<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(TextChunk::tagged_text).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let progress = self
            .options
            .show_progress
            .then(|| create_progress_bar(refs.len() as u64, "Embedding chunks"));

        let vectors = embed_in_batches_with_progress(
            self.embedder.as_ref(),
            &refs,
            self.options.batch_size,
            |n| {
                if let Some(pb) = &progress {
                    pb.inc(n as u64);
                }
            },
        );

        if let Some(pb) = &progress {
            pb.finish_with_message("Embedded");
        }
        Ok(vectors?)
    }

    fn build_index(&self, vectors: &[Vec<f32>]) -> BuildResult<VectorIndex> {
        let dimension = self.embedder.dimension();
        let topology = IndexTopology::for_corpus_size(
            vectors.len(),
            self.options.flat_threshold,
            self.options.max_nlist,
        );
        tracing::info!(vectors = vectors.len(), %topology, "building index");

        let index = match topology {
            IndexTopology::Flat => VectorIndex::build_flat(dimension, vectors)?,
            IndexTopology::InvertedFile { nlist } => {
                VectorIndex::build_inverted_file(dimension, vectors, nlist, &self.options.kmeans)?
            }
        };
        Ok(index)
    }
}

fn count_sources(chunks: &[TextChunk]) -> usize {
    let mut count = 0;
    let mut previous: Option<&str> = None;
    for chunk in chunks {
        if previous != Some(chunk.source.as_str()) {
            count += 1;
            previous = Some(&chunk.source);
        }
    }
    count
}
