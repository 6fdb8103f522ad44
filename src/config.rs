//! Configuration module for the knowledge-base retrieval core.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `KB_` and use double underscores
//! to separate nested levels:
//! - `KB_SEARCH__CACHE_TTL_SECS=60` sets `search.cache_ttl_secs`
//! - `KB_EMBEDDING__MODEL=hashing` sets `embedding.model`
//! - `KB_INDEX_PATH=/srv/kb` sets `index_path`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunking::{
    ChunkingOptions, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_MIN_RECORD_CHARS,
};
use crate::vector::{
    DEFAULT_FLAT_THRESHOLD, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_NLIST, KMeansOptions,
};

/// Directory holding the settings file and, by default, the index.
pub const CONFIG_DIR: &str = ".kbsearch";

const SETTINGS_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "KB_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the persisted knowledge base
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Global debug mode
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Words carried over from the previous chunk
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Records shorter than this are skipped
    #[serde(default = "default_min_record_chars")]
    pub min_record_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// fastembed model name, or "hashing" for the offline embedder
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Texts per embedding call during builds
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Where downloaded model files are cached
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default)]
    pub show_download_progress: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Corpora smaller than this use an exact flat index
    #[serde(default = "default_flat_threshold")]
    pub flat_threshold: usize,

    /// Upper bound on inverted lists
    #[serde(default = "default_max_nlist")]
    pub max_nlist: usize,

    /// Minimum inverted lists scanned per query
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    #[serde(default = "default_kmeans_max_iterations")]
    pub kmeans_max_iterations: usize,

    /// Seed for centroid initialization
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// 0 means unbounded
    #[serde(default)]
    pub cache_max_entries: usize,

    /// Requests allowed per caller within one window
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,

    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Backoff before the second attempt; doubles for each later one
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("index")
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}
fn default_min_record_chars() -> usize {
    DEFAULT_MIN_RECORD_CHARS
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("kbsearch").join("models"))
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("models"))
}
fn default_flat_threshold() -> usize {
    DEFAULT_FLAT_THRESHOLD
}
fn default_max_nlist() -> usize {
    DEFAULT_MAX_NLIST
}
fn default_nprobe() -> usize {
    1
}
fn default_kmeans_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}
fn default_seed() -> u64 {
    42
}
fn default_k() -> usize {
    3
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_rate_limit_requests() -> usize {
    10
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            debug: false,
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_record_chars: default_min_record_chars(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            cache_dir: default_cache_dir(),
            show_download_progress: false,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            flat_threshold: default_flat_threshold(),
            max_nlist: default_max_nlist(),
            nprobe: default_nprobe(),
            kmeans_max_iterations: default_kmeans_max_iterations(),
            seed: default_seed(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: 0,
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkingOptions {
        ChunkingOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            min_record_chars: self.min_record_chars,
        }
    }
}

impl IndexConfig {
    pub fn kmeans_options(&self) -> KMeansOptions {
        KMeansOptions {
            max_iterations: self.kmeans_max_iterations,
            seed: self.seed,
        }
    }
}

impl SearchConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .kbsearch directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path))
            // Double underscore separates nested levels, single underscore
            // stays within field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
    }

    /// Find the settings file by looking for a .kbsearch directory
    /// from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(SETTINGS_FILE));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments under `root`
    pub fn init_config_file(
        root: impl AsRef<Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.as_ref().join(CONFIG_DIR).join(SETTINGS_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, Self::template())?;
        Ok(config_path)
    }

    fn template() -> String {
        let defaults = Settings::default();
        format!(
            r#"# kbsearch configuration
#
# Every value can be overridden with an environment variable prefixed KB_,
# using __ between sections: KB_SEARCH__CACHE_TTL_SECS=60

# Version of the configuration schema
version = {version}

# Directory holding knowledge_base.idx, .chunks.json and .manifest.json
index_path = "{index_path}"

# Global debug mode (debug-level logs unless RUST_LOG is set)
debug = false

[chunking]
# Maximum chunk length in characters
chunk_size = {chunk_size}
# Trailing words of a chunk repeated at the start of the next (0 disables)
chunk_overlap = {chunk_overlap}
# Records shorter than this after trimming are skipped
min_record_chars = {min_record_chars}

[embedding]
# fastembed model: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15,
# BGEBaseENV15, MultilingualE5Small; or "hashing" for offline use
model = "{model}"
# Texts per embedding call while building
batch_size = {batch_size}
# Where model files are downloaded
# cache_dir = "{cache_dir}"
show_download_progress = false

[index]
# Corpora below this many chunks use an exact flat index
flat_threshold = {flat_threshold}
# Inverted lists are min(max_nlist, sqrt(chunks))
max_nlist = {max_nlist}
# Lists scanned per query (widened automatically until k candidates)
nprobe = {nprobe}
kmeans_max_iterations = {kmeans_max_iterations}
seed = {seed}

[search]
# Results returned when -k is not given
default_k = {default_k}
# Cached results expire after this many seconds
cache_ttl_secs = {cache_ttl_secs}
# Maximum cached queries, oldest evicted first (0 = unbounded)
cache_max_entries = 0
# Sliding-window rate limit per caller
rate_limit_requests = {rate_limit_requests}
rate_limit_window_secs = {rate_limit_window_secs}
# Attempts per search and backoff before the second (doubles each time)
retry_max_attempts = {retry_max_attempts}
retry_base_delay_ms = {retry_base_delay_ms}
"#,
            version = defaults.version,
            index_path = defaults.index_path.display(),
            chunk_size = defaults.chunking.chunk_size,
            chunk_overlap = defaults.chunking.chunk_overlap,
            min_record_chars = defaults.chunking.min_record_chars,
            model = defaults.embedding.model,
            batch_size = defaults.embedding.batch_size,
            cache_dir = defaults.embedding.cache_dir.display(),
            flat_threshold = defaults.index.flat_threshold,
            max_nlist = defaults.index.max_nlist,
            nprobe = defaults.index.nprobe,
            kmeans_max_iterations = defaults.index.kmeans_max_iterations,
            seed = defaults.index.seed,
            default_k = defaults.search.default_k,
            cache_ttl_secs = defaults.search.cache_ttl_secs,
            rate_limit_requests = defaults.search.rate_limit_requests,
            rate_limit_window_secs = defaults.search.rate_limit_window_secs,
            retry_max_attempts = defaults.search.retry_max_attempts,
            retry_base_delay_ms = defaults.search.retry_base_delay_ms,
        )
    }
}
