//! On-disk layout of a built knowledge base.
//!
//! Three files live side by side under the index directory:
//! - `knowledge_base.idx`: binary vector index, memory-mapped on load
//! - `knowledge_base.chunks.json`: ordered chunk list, position == vector row
//! - `knowledge_base.manifest.json`: model, dimension and counts
//!
//! All three carry the build id of the build that wrote them. Files from
//! different builds never load together.
//!
//! # Index File Format
//!
//! All integers and floats are little-endian.
//! - Header (32 bytes): magic `KBIX`, version, topology (0 flat, 1 ivf),
//!   dimension, vector count, nlist, build id (u64)
//! - Vectors: `count * dimension` f32 in chunk order
//! - Centroids: `nlist * dimension` f32
//! - List lengths: `nlist` u32, followed by every list's positions as u32
//!
//! Writers stage into `*.tmp` siblings and rename into place with
//! [`StagedFile::commit`], so readers never observe a half-written file.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use memmap2::MmapOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TextChunk;
use crate::vector::index::{IndexTopology, InvertedLists, VectorIndex};
use crate::vector::types::{VectorDimension, VectorError};

/// Current index file format version.
pub const STORAGE_VERSION: u32 = 2;

/// Size of the index header in bytes.
const HEADER_SIZE: usize = 32;

/// Magic bytes identifying index files.
const MAGIC_BYTES: &[u8; 4] = b"KBIX";

const BYTES_PER_F32: usize = 4;
const BYTES_PER_U32: usize = 4;
const BYTES_PER_U64: usize = 8;

const TOPOLOGY_FLAT: u32 = 0;
const TOPOLOGY_IVF: u32 = 1;

pub const INDEX_FILE_NAME: &str = "knowledge_base.idx";
pub const CHUNKS_FILE_NAME: &str = "knowledge_base.chunks.json";
pub const MANIFEST_FILE_NAME: &str = "knowledge_base.manifest.json";

/// Errors specific to knowledge-base storage.
#[derive(Error, Debug)]
pub enum VectorStorageError {
    #[error("File not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Paths of the three files that make up a persisted knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBasePaths {
    pub index: PathBuf,
    pub chunks: PathBuf,
    pub manifest: PathBuf,
}

impl KnowledgeBasePaths {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            index: dir.join(INDEX_FILE_NAME),
            chunks: dir.join(CHUNKS_FILE_NAME),
            manifest: dir.join(MANIFEST_FILE_NAME),
        }
    }

    /// First of the three files that does not exist, if any.
    #[must_use]
    pub fn first_missing(&self) -> Option<&Path> {
        [&self.index, &self.chunks, &self.manifest]
            .into_iter()
            .find(|p| !p.exists())
            .map(PathBuf::as_path)
    }
}

/// JSON sidecar describing a persisted index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Version of the index file format
    pub version: u32,

    /// Name of the embedding model that produced the vectors
    pub model_name: String,

    pub dimension: usize,

    pub topology: IndexTopology,

    pub vector_count: usize,

    pub chunk_count: usize,

    /// Number of source records that produced at least one chunk
    #[serde(default)]
    pub record_count: usize,

    /// Shared with the index header and the chunk list of the same build
    pub build_id: u64,

    pub created_at: DateTime<Utc>,
}

impl IndexManifest {
    pub fn new(model_name: impl Into<String>, index: &VectorIndex, chunk_count: usize) -> Self {
        Self {
            version: STORAGE_VERSION,
            model_name: model_name.into(),
            dimension: index.dimension().get(),
            topology: index.topology(),
            vector_count: index.len(),
            chunk_count,
            record_count: 0,
            build_id: rand::random(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_record_count(mut self, record_count: usize) -> Self {
        self.record_count = record_count;
        self
    }

    pub fn load(path: &Path) -> Result<Self, VectorStorageError> {
        let json = read_existing(path)?;
        let manifest: Self = serde_json::from_slice(&json)?;

        if manifest.version > STORAGE_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: STORAGE_VERSION,
                actual: manifest.version,
            }
            .into());
        }
        Ok(manifest)
    }

    pub fn stage(&self, path: &Path) -> Result<StagedFile, VectorStorageError> {
        StagedFile::write(path, &serde_json::to_vec_pretty(self)?)
    }
}

/// A fully written temporary file waiting to be renamed over its target.
///
/// Dropping without committing removes the temporary file.
#[derive(Debug)]
pub struct StagedFile {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Writes `bytes` to `<target>.tmp` and syncs it to disk.
    pub fn write(target: &Path, bytes: &[u8]) -> Result<Self, VectorStorageError> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut tmp_name = target.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;

        Ok(Self {
            tmp,
            target: target.to_path_buf(),
            committed: false,
        })
    }

    /// Atomically replaces the target with the staged content.
    pub fn commit(mut self) -> Result<(), VectorStorageError> {
        std::fs::rename(&self.tmp, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

/// An index file's contents together with the build that wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredIndex {
    pub build_id: u64,
    pub index: VectorIndex,
}

/// The chunk list file's contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunkList {
    pub build_id: u64,
    pub chunks: Vec<TextChunk>,
}

#[derive(Serialize)]
struct ChunkListRef<'a> {
    build_id: u64,
    chunks: &'a [TextChunk],
}

/// Serializes an index into the binary format.
#[must_use]
pub fn encode_index(index: &VectorIndex, build_id: u64) -> Vec<u8> {
    let dim = index.dimension().get();
    let inverted = index.inverted_lists();
    let nlist = inverted.map_or(0, |inv| inv.centroids.len());
    let filed: usize = inverted.map_or(0, |inv| inv.lists.iter().map(Vec::len).sum());

    let mut bytes = Vec::with_capacity(
        HEADER_SIZE
            + (index.raw_vectors().len() + nlist * dim) * BYTES_PER_F32
            + (nlist + filed) * BYTES_PER_U32,
    );

    bytes.extend_from_slice(MAGIC_BYTES);
    bytes.extend_from_slice(&STORAGE_VERSION.to_le_bytes());
    let topology = if inverted.is_some() {
        TOPOLOGY_IVF
    } else {
        TOPOLOGY_FLAT
    };
    bytes.extend_from_slice(&topology.to_le_bytes());
    bytes.extend_from_slice(&(dim as u32).to_le_bytes());
    bytes.extend_from_slice(&(index.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(nlist as u32).to_le_bytes());
    bytes.extend_from_slice(&build_id.to_le_bytes());

    for value in index.raw_vectors() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    if let Some(inv) = inverted {
        for value in inv.centroids.iter().flatten() {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        for list in &inv.lists {
            bytes.extend_from_slice(&(list.len() as u32).to_le_bytes());
        }
        for position in inv.lists.iter().flatten() {
            bytes.extend_from_slice(&position.to_le_bytes());
        }
    }

    bytes
}

/// Parses an index from the binary format.
pub fn decode_index(bytes: &[u8]) -> Result<StoredIndex, VectorStorageError> {
    let mut reader = ByteReader::new(bytes);

    if bytes.len() < HEADER_SIZE {
        return Err(VectorStorageError::InvalidFormat(
            "File too small to contain header".to_string(),
        ));
    }
    if reader.take(4)? != MAGIC_BYTES {
        return Err(VectorStorageError::InvalidFormat(
            "Invalid magic bytes".to_string(),
        ));
    }

    let version = reader.u32()?;
    if version != STORAGE_VERSION {
        return Err(VectorError::VersionMismatch {
            expected: STORAGE_VERSION,
            actual: version,
        }
        .into());
    }

    let topology = reader.u32()?;
    let dimension = VectorDimension::new(reader.u32()? as usize)?;
    let count = reader.u32()? as usize;
    let nlist = reader.u32()? as usize;
    let build_id = reader.u64()?;
    let dim = dimension.get();

    let vectors = reader.f32s(count * dim)?;

    let inverted = match topology {
        TOPOLOGY_FLAT => {
            if nlist != 0 {
                return Err(VectorStorageError::InvalidFormat(format!(
                    "Flat index declares {nlist} inverted lists"
                )));
            }
            None
        }
        TOPOLOGY_IVF => {
            if nlist == 0 {
                return Err(VectorStorageError::InvalidFormat(
                    "Inverted-file index without lists".to_string(),
                ));
            }
            let centroids = reader
                .f32s(nlist * dim)?
                .chunks_exact(dim)
                .map(<[f32]>::to_vec)
                .collect();
            let lengths = reader.u32s(nlist)?;
            let mut lists = Vec::with_capacity(nlist);
            for len in lengths {
                lists.push(reader.u32s(len as usize)?);
            }
            Some(InvertedLists { centroids, lists })
        }
        other => {
            return Err(VectorStorageError::InvalidFormat(format!(
                "Unknown topology tag {other}"
            )));
        }
    };

    if reader.remaining() != 0 {
        return Err(VectorStorageError::InvalidFormat(format!(
            "{} trailing bytes after index data",
            reader.remaining()
        )));
    }

    Ok(StoredIndex {
        build_id,
        index: VectorIndex::from_parts(dimension, vectors, inverted),
    })
}

/// Writes an index file atomically.
pub fn save_index(
    path: &Path,
    index: &VectorIndex,
    build_id: u64,
) -> Result<(), VectorStorageError> {
    stage_index(path, index, build_id)?.commit()
}

pub fn stage_index(
    path: &Path,
    index: &VectorIndex,
    build_id: u64,
) -> Result<StagedFile, VectorStorageError> {
    StagedFile::write(path, &encode_index(index, build_id))
}

/// Memory-maps and parses an index file.
pub fn load_index(path: &Path) -> Result<StoredIndex, VectorStorageError> {
    if !path.exists() {
        return Err(VectorStorageError::Missing(path.to_path_buf()));
    }

    let file = File::open(path)?;
    if (file.metadata()?.len() as usize) < HEADER_SIZE {
        return Err(VectorStorageError::InvalidFormat(
            "File too small to contain header".to_string(),
        ));
    }

    // SAFETY: the index is written once via rename and never modified in place.
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    decode_index(&mmap)
}

/// Writes the ordered chunk list atomically.
pub fn save_chunk_list(
    path: &Path,
    chunks: &[TextChunk],
    build_id: u64,
) -> Result<(), VectorStorageError> {
    stage_chunk_list(path, chunks, build_id)?.commit()
}

pub fn stage_chunk_list(
    path: &Path,
    chunks: &[TextChunk],
    build_id: u64,
) -> Result<StagedFile, VectorStorageError> {
    StagedFile::write(path, &serde_json::to_vec(&ChunkListRef { build_id, chunks })?)
}

pub fn load_chunk_list(path: &Path) -> Result<StoredChunkList, VectorStorageError> {
    let json = read_existing(path)?;
    Ok(serde_json::from_slice(&json)?)
}

fn read_existing(path: &Path) -> Result<Vec<u8>, VectorStorageError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(VectorStorageError::Missing(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Bounds-checked little-endian cursor.
struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], VectorStorageError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                VectorStorageError::InvalidFormat(format!(
                    "Truncated file: need {len} bytes at offset {}, have {}",
                    self.offset,
                    self.remaining()
                ))
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, VectorStorageError> {
        let b = self.take(BYTES_PER_U32)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, VectorStorageError> {
        let b = self.take(BYTES_PER_U64)?;
        let mut buf = [0u8; BYTES_PER_U64];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn u32s(&mut self, count: usize) -> Result<Vec<u32>, VectorStorageError> {
        let len = count.checked_mul(BYTES_PER_U32).ok_or_else(overflow)?;
        Ok(self
            .take(len)?
            .chunks_exact(BYTES_PER_U32)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn f32s(&mut self, count: usize) -> Result<Vec<f32>, VectorStorageError> {
        let len = count.checked_mul(BYTES_PER_F32).ok_or_else(overflow)?;
        Ok(self
            .take(len)?
            .chunks_exact(BYTES_PER_F32)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

fn overflow() -> VectorStorageError {
    VectorStorageError::InvalidFormat("Declared sizes overflow".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::KMeansOptions;
    use tempfile::TempDir;

    fn sample_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let mut v: Vec<f32> = (0..dim).map(|j| ((i * 7 + j * 3) % 11) as f32 - 5.0).collect();
                v[i % dim] += 10.0;
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                v.iter().map(|x| x / norm).collect()
            })
            .collect()
    }

    #[test]
    fn test_flat_index_survives_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(INDEX_FILE_NAME);

        let dim = VectorDimension::new(12).unwrap();
        let index = VectorIndex::build_flat(dim, &sample_vectors(30, 12)).unwrap();
        save_index(&path, &index, 0x5eed).unwrap();

        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded.build_id, 0x5eed);
        assert_eq!(loaded.index, index);
        assert_eq!(loaded.index.topology(), IndexTopology::Flat);
    }

    #[test]
    fn test_inverted_index_survives_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(INDEX_FILE_NAME);

        let dim = VectorDimension::new(12).unwrap();
        let index =
            VectorIndex::build_inverted_file(dim, &sample_vectors(60, 12), 6, &KMeansOptions::default())
                .unwrap();
        save_index(&path, &index, u64::MAX).unwrap();

        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded.build_id, u64::MAX);
        assert_eq!(loaded.index, index);
        assert!(!temp_dir.path().join("knowledge_base.idx.tmp").exists());
    }

    #[test]
    fn test_rejects_damaged_files() {
        let dim = VectorDimension::new(4).unwrap();
        let index = VectorIndex::build_flat(dim, &sample_vectors(3, 4)).unwrap();
        let bytes = encode_index(&index, 7);

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            decode_index(&bad_magic),
            Err(VectorStorageError::InvalidFormat(_))
        ));

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        assert!(matches!(
            decode_index(&bad_version),
            Err(VectorStorageError::Vector(VectorError::VersionMismatch { .. }))
        ));

        assert!(matches!(
            decode_index(&bytes[..bytes.len() - 2]),
            Err(VectorStorageError::InvalidFormat(_))
        ));

        let mut trailing = bytes.clone();
        trailing.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            decode_index(&trailing),
            Err(VectorStorageError::InvalidFormat(_))
        ));

        assert!(decode_index(&bytes[..10]).is_err());
    }

    #[test]
    fn test_missing_files_are_reported() {
        let temp_dir = TempDir::new().unwrap();
        let paths = KnowledgeBasePaths::new(temp_dir.path());

        assert_eq!(paths.first_missing(), Some(paths.index.as_path()));
        assert!(matches!(
            load_index(&paths.index),
            Err(VectorStorageError::Missing(_))
        ));
        assert!(matches!(
            load_chunk_list(&paths.chunks),
            Err(VectorStorageError::Missing(_))
        ));
    }

    #[test]
    fn test_chunk_list_and_manifest_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let paths = KnowledgeBasePaths::new(temp_dir.path());

        let chunks = vec![
            TextChunk::new("Row 1", "Early blight causes concentric rings on leaves"),
            TextChunk::new("Row 2", "Leaf curl is spread by whiteflies"),
        ];
        let dim = VectorDimension::new(4).unwrap();
        let index = VectorIndex::build_flat(dim, &sample_vectors(2, 4)).unwrap();
        let manifest = IndexManifest::new("hashing", &index, chunks.len()).with_record_count(2);

        save_chunk_list(&paths.chunks, &chunks, manifest.build_id).unwrap();
        let stored = load_chunk_list(&paths.chunks).unwrap();
        assert_eq!(stored.chunks, chunks);
        assert_eq!(stored.build_id, manifest.build_id);
        manifest.stage(&paths.manifest).unwrap().commit().unwrap();

        let loaded = IndexManifest::load(&paths.manifest).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.vector_count, 2);
        assert_eq!(loaded.topology, IndexTopology::Flat);
    }

    #[test]
    fn test_header_carries_build_id() {
        let dim = VectorDimension::new(4).unwrap();
        let index = VectorIndex::build_flat(dim, &sample_vectors(3, 4)).unwrap();

        let bytes = encode_index(&index, 0x0102_0304_0506_0708);
        assert_eq!(&bytes[24..32], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(decode_index(&bytes).unwrap().build_id, 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_manifests_get_distinct_build_ids() {
        let dim = VectorDimension::new(4).unwrap();
        let index = VectorIndex::build_flat(dim, &sample_vectors(2, 4)).unwrap();

        let first = IndexManifest::new("hashing", &index, 2);
        let second = IndexManifest::new("hashing", &index, 2);
        assert_ne!(first.build_id, second.build_id);
    }

    #[test]
    fn test_uncommitted_stage_leaves_no_trace() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("knowledge_base.chunks.json");

        {
            let staged = StagedFile::write(&target, b"[]").unwrap();
            assert!(temp_dir.path().join("knowledge_base.chunks.json.tmp").exists());
            drop(staged);
        }

        assert!(!target.exists());
        assert!(!temp_dir.path().join("knowledge_base.chunks.json.tmp").exists());
    }
}
