//! A loaded knowledge base: vector index plus the parallel chunk list.

use std::path::Path;

use crate::error::{BuildError, BuildResult, LoadError, LoadResult};
use crate::types::TextChunk;
use crate::vector::{
    EmbeddingGenerator, IndexManifest, KnowledgeBasePaths, VectorIndex,
    load_chunk_list, load_index, stage_chunk_list, stage_index,
};

/// Index and chunk list that always have the same length.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    index: VectorIndex,
    chunks: Vec<TextChunk>,
    manifest: IndexManifest,
}

impl KnowledgeBase {
    /// Pairs an index with its chunks.
    ///
    /// # Errors
    /// `SizeMismatch` when the index and chunk list differ in length.
    pub fn new(
        index: VectorIndex,
        chunks: Vec<TextChunk>,
        manifest: IndexManifest,
    ) -> LoadResult<Self> {
        if index.len() != chunks.len() {
            return Err(LoadError::SizeMismatch {
                index_len: index.len(),
                chunk_count: chunks.len(),
            });
        }
        Ok(Self {
            index,
            chunks,
            manifest,
        })
    }

    /// Loads the three knowledge-base files from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> LoadResult<Self> {
        let paths = KnowledgeBasePaths::new(dir);
        if let Some(missing) = paths.first_missing() {
            return Err(LoadError::IndexUnavailable {
                path: missing.to_path_buf(),
            });
        }

        let manifest = IndexManifest::load(&paths.manifest)
            .map_err(|e| LoadError::from_storage(&paths.manifest, e))?;
        let stored_index =
            load_index(&paths.index).map_err(|e| LoadError::from_storage(&paths.index, e))?;
        let stored_chunks = load_chunk_list(&paths.chunks)
            .map_err(|e| LoadError::from_storage(&paths.chunks, e))?;
        let index_build = stored_index.build_id;
        let chunks_build = stored_chunks.build_id;

        let kb = Self::new(stored_index.index, stored_chunks.chunks, manifest)?;
        kb.check_build_id(&paths.index, index_build)?;
        kb.check_build_id(&paths.chunks, chunks_build)?;
        kb.check_manifest(&paths)?;

        tracing::info!(
            vectors = kb.len(),
            topology = %kb.index.topology(),
            model = %kb.manifest.model_name,
            "loaded knowledge base"
        );
        Ok(kb)
    }

    /// Rejects a file written by a different build than the manifest.
    fn check_build_id(&self, path: &Path, build_id: u64) -> LoadResult<()> {
        if build_id == self.manifest.build_id {
            return Ok(());
        }
        Err(LoadError::Corrupted {
            path: path.to_path_buf(),
            reason: format!(
                "written by build {build_id:016x}, manifest belongs to build {:016x}",
                self.manifest.build_id
            ),
        })
    }

    fn check_manifest(&self, paths: &KnowledgeBasePaths) -> LoadResult<()> {
        let manifest = &self.manifest;
        let reason = if manifest.vector_count != self.index.len()
            || manifest.chunk_count != self.chunks.len()
        {
            Some(format!(
                "manifest records {} vectors and {} chunks, files hold {} and {}",
                manifest.vector_count,
                manifest.chunk_count,
                self.index.len(),
                self.chunks.len()
            ))
        } else if manifest.dimension != self.index.dimension().get() {
            Some(format!(
                "manifest dimension {} does not match index dimension {}",
                manifest.dimension,
                self.index.dimension()
            ))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(LoadError::Corrupted {
                path: paths.manifest.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Stages all three files, then renames them into place.
    ///
    /// Nothing is renamed unless every file was written. The manifest is
    /// committed last.
    pub fn save(&self, dir: impl AsRef<Path>) -> BuildResult<()> {
        let paths = KnowledgeBasePaths::new(dir);
        let persist = |path: &Path| {
            let path = path.to_path_buf();
            move |source| BuildError::Persist { path, source }
        };

        let build_id = self.manifest.build_id;
        let index =
            stage_index(&paths.index, &self.index, build_id).map_err(persist(&paths.index))?;
        let chunks = stage_chunk_list(&paths.chunks, &self.chunks, build_id)
            .map_err(persist(&paths.chunks))?;
        let manifest = self
            .manifest
            .stage(&paths.manifest)
            .map_err(persist(&paths.manifest))?;

        index.commit().map_err(persist(&paths.index))?;
        chunks.commit().map_err(persist(&paths.chunks))?;
        manifest.commit().map_err(persist(&paths.manifest))?;
        Ok(())
    }

    /// Fails when `embedder` cannot produce vectors comparable to the index.
    pub fn check_embedder(&self, embedder: &dyn EmbeddingGenerator) -> LoadResult<()> {
        let same_dimension = embedder.dimension() == self.index.dimension();
        let same_model =
            canonical_model_name(embedder.model_name()) == canonical_model_name(&self.manifest.model_name);

        if same_dimension && same_model {
            return Ok(());
        }
        Err(LoadError::EmbedderMismatch {
            index_model: self.manifest.model_name.clone(),
            index_dimension: self.index.dimension().get(),
            embedder_model: embedder.model_name().to_string(),
            embedder_dimension: embedder.dimension().get(),
        })
    }

    /// Sets the minimum number of inverted lists scanned per query.
    #[must_use]
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.index = self.index.with_nprobe(nprobe);
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn chunks(&self) -> &[TextChunk] {
        &self.chunks
    }

    pub fn chunk(&self, position: usize) -> Option<&TextChunk> {
        self.chunks.get(position)
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// `all-MiniLM-L6-v2` and `AllMiniLML6V2` name the same model.
fn canonical_model_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
