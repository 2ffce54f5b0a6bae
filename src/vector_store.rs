//! # VectorStore
//!
//! Persistent embedding index for the anime catalog.
//!
//! This module wraps a [HNSW](https://arxiv.org/abs/1603.09320) approximate
//! nearest-neighbor index (`hora` crate) together with the chunk table and the
//! raw vectors, and a [`VectorStoreBuilder`] that turns the processed catalog into
//! a persisted store.
//!
//! ## Responsibilities
//! - **Chunking**: each processed record is split into fixed-size pieces (see [`crate::chunker`]).
//! - **Embedding**: every chunk goes through the configured [`Embedder`].
//! - **Indexing**: vectors are inserted into a HNSW index keyed by insertion order.
//! - **Persistence**: the store is written to a staging directory next to the
//!   target and renamed into place, so a failed build never leaves a partial index.
//!
//! ## On-disk layout
//! ```text
//! <index_dir>/manifest.yaml    model id, dimension, chunk size, counts, catalog digest
//! <index_dir>/chunks.bin       bincode: chunk table + vectors
//! <index_dir>/hnsw_index.bin   hora dump
//! ```
//!
//! ## Ranking
//! HNSW supplies candidates; candidates are re-ranked by exact Euclidean distance
//! with ties broken by insertion order. Small stores are scanned exhaustively.
//!
//! ## Quick Example
//! ```no_run
//! use anime_recommender::config::EmbeddingConfig;
//! use anime_recommender::embeddings::load_embedder;
//! use anime_recommender::vector_store::VectorStoreBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = load_embedder(&EmbeddingConfig::default())?;
//! let mut builder = VectorStoreBuilder::new("data/processed_anime_data.csv", "hnsw_db", embedder);
//! let store = builder.build_and_save_vectorstore()?;
//! for hit in store.retrieve("space cowboys", 4)? {
//!     println!("{:.3} {}", hit.distance, hit.chunk.title);
//! }
//! # Ok(()) }
//! ```

use hora::core::ann_index::{ANNIndex, SerializableIndex};
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressIterator, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::chunker::{DocumentChunk, split_text};
use crate::data_loader::read_processed;
use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, Error, Result};

const MANIFEST_FILE: &str = "manifest.yaml";
const CHUNKS_FILE: &str = "chunks.bin";
const HNSW_FILE: &str = "hnsw_index.bin";

// HNSW over-fetch before exact re-ranking.
const CANDIDATE_FACTOR: usize = 8;
const MIN_CANDIDATES: usize = 64;

/// Metadata describing a persisted store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexManifest {
    /// Embedding model the vectors came from. Queries must use the same one.
    pub model_id: String,
    pub dimension: usize,
    pub chunk_size: usize,
    pub chunk_count: usize,
    /// blake3 of the processed catalog file the store was built from.
    pub catalog_digest: String,
    /// RFC 3339 build timestamp.
    pub built_at: String,
}

#[derive(Serialize, Deserialize)]
struct StoredEntries {
    chunks: Vec<DocumentChunk>,
    vectors: Vec<Vec<f32>>,
}

/// A retrieved chunk and its distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub distance: f32,
}

/// HNSW index plus chunk table, usable as a read-only retriever once built.
pub struct VectorStore {
    index: HNSWIndex<f32, usize>,
    dimension: usize,
    embedder: Arc<dyn Embedder>,
    chunks: Vec<DocumentChunk>,
    vectors: Vec<Vec<f32>>,
    manifest: IndexManifest,
}

impl VectorStore {
    /// Create an empty store sized for `embedder`'s vectors.
    pub fn new(embedder: Arc<dyn Embedder>, chunk_size: usize) -> Self {
        let dimension = embedder.dimension();
        let manifest = IndexManifest {
            model_id: embedder.model_id().to_string(),
            dimension,
            chunk_size,
            chunk_count: 0,
            catalog_digest: String::new(),
            built_at: String::new(),
        };
        Self {
            index: HNSWIndex::new(dimension, &HNSWParams::default()),
            dimension,
            embedder,
            chunks: Vec::new(),
            vectors: Vec::new(),
            manifest,
        }
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

    /// Look up a chunk by its id (insertion position).
    pub fn get_content_by_id(&self, id: usize) -> Option<&DocumentChunk> {
        self.chunks.get(id)
    }

    /// Add a vector and its chunk. The chunk's `id` is overwritten with the
    /// assigned insertion position, which is returned.
    ///
    /// # Notes
    /// Call [`build`](Self::build) before querying.
    pub fn add_vector_with_content(
        &mut self,
        vector: Vec<f32>,
        mut chunk: DocumentChunk,
    ) -> Result<usize> {
        if vector.len() != self.dimension {
            return Err(Error::IndexBuild(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        let id = self.chunks.len();
        self.index
            .add(&vector, id)
            .map_err(|e| Error::IndexBuild(format!("add failed: {e}")))?;
        chunk.id = id;
        self.chunks.push(chunk);
        self.vectors.push(vector);
        self.manifest.chunk_count = self.chunks.len();
        Ok(id)
    }

    /// Finalize (build) the HNSW graph.
    pub fn build(&mut self) -> Result<()> {
        self.index
            .build(Metric::Euclidean)
            .map_err(|e| Error::IndexBuild(format!("build failed: {e}")))
    }

    /// The `top_k` chunks closest to `vector`, nearest first.
    ///
    /// Ties are broken by insertion order.
    pub fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        if vector.len() != self.dimension {
            return Err(EmbeddingError::Inference(format!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimension
            ))
            .into());
        }
        if top_k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let wanted = (top_k * CANDIDATE_FACTOR).max(MIN_CANDIDATES);
        let candidates: Vec<usize> = if self.chunks.len() <= wanted {
            (0..self.chunks.len()).collect()
        } else {
            self.index.search(vector, wanted)
        };

        let mut scored: Vec<(f32, usize)> = candidates
            .into_iter()
            .filter(|id| *id < self.vectors.len())
            .map(|id| (Self::calc_euclidean_distance(vector, &self.vectors[id]), id))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.dedup_by_key(|(_, id)| *id);

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(distance, id)| ScoredChunk {
                chunk: self.chunks[id].clone(),
                distance,
            })
            .collect())
    }

    /// Embed `query` and return its `top_k` nearest chunks.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let vector = self.embed_text_to_vector(query)?;
        self.search(&vector, top_k)
    }

    /// Embed text with the store's embedder.
    pub fn embed_text_to_vector(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embedder.embed(text)?)
    }

    /// Euclidean distance between two equal-length vectors.
    pub fn calc_euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    fn write_to(&mut self, dir: &Path) -> Result<()> {
        let io = |e: std::io::Error| Error::IndexBuild(format!("{}: {e}", dir.display()));

        let manifest = serde_yaml::to_string(&self.manifest)
            .map_err(|e| Error::IndexBuild(e.to_string()))?;
        fs::write(dir.join(MANIFEST_FILE), manifest).map_err(io)?;

        let entries = StoredEntries {
            chunks: self.chunks.clone(),
            vectors: self.vectors.clone(),
        };
        let bytes = bincode::serde::encode_to_vec(&entries, bincode::config::standard())
            .map_err(|e| Error::IndexBuild(e.to_string()))?;
        fs::write(dir.join(CHUNKS_FILE), bytes).map_err(io)?;

        let hnsw_path = dir.join(HNSW_FILE);
        let hnsw_path = hnsw_path
            .to_str()
            .ok_or_else(|| Error::IndexBuild(format!("non UTF-8 path {}", dir.display())))?;
        self.index
            .dump(hnsw_path)
            .map_err(|e| Error::IndexBuild(format!("hnsw dump failed: {e}")))?;
        Ok(())
    }

    /// Persist into `dir`, replacing whatever was there only once the new store
    /// is fully written.
    pub fn persist(&mut self, dir: &Path) -> Result<()> {
        let io = |e: std::io::Error| Error::IndexBuild(format!("{}: {e}", dir.display()));
        let parent = match dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(io)?;

        let staging = tempfile::Builder::new()
            .prefix(".hnsw-staging-")
            .tempdir_in(&parent)
            .map_err(io)?;
        self.write_to(staging.path())?;
        // tempdirs are created owner-only; readers may run as another user.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staging.path(), fs::Permissions::from_mode(0o755)).map_err(io)?;
        }

        // Keep the previous store aside until the new one is in place.
        let previous = tempfile::Builder::new()
            .prefix(".hnsw-previous-")
            .tempdir_in(&parent)
            .map_err(io)?;
        let previous_path = previous.path().join("index");
        let had_previous = dir.exists();
        if had_previous {
            fs::rename(dir, &previous_path).map_err(io)?;
        }
        if let Err(e) = fs::rename(staging.path(), dir) {
            if had_previous {
                if let Err(restore) = fs::rename(&previous_path, dir) {
                    error!("Failed to restore previous index at {}: {restore}", dir.display());
                }
            }
            return Err(io(e));
        }
        debug!("Published index to {}", dir.display());
        Ok(())
    }

    /// Load a store persisted by [`persist`](Self::persist).
    ///
    /// # Errors
    /// [`Error::IndexLoad`] when the directory is missing, any file is unreadable,
    /// or the files disagree with each other or with `embedder`'s dimension.
    pub fn load(dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::index_load(dir, "directory does not exist"));
        }

        let manifest = fs::read_to_string(dir.join(MANIFEST_FILE))
            .map_err(|e| Error::index_load(dir, format!("{MANIFEST_FILE}: {e}")))?;
        let manifest: IndexManifest = serde_yaml::from_str(&manifest)
            .map_err(|e| Error::index_load(dir, format!("{MANIFEST_FILE}: {e}")))?;

        let bytes = fs::read(dir.join(CHUNKS_FILE))
            .map_err(|e| Error::index_load(dir, format!("{CHUNKS_FILE}: {e}")))?;
        let (entries, _): (StoredEntries, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| Error::index_load(dir, format!("{CHUNKS_FILE}: {e}")))?;

        if entries.chunks.len() != manifest.chunk_count || entries.vectors.len() != manifest.chunk_count {
            return Err(Error::index_load(
                dir,
                format!(
                    "manifest lists {} chunks, found {} chunks and {} vectors",
                    manifest.chunk_count,
                    entries.chunks.len(),
                    entries.vectors.len()
                ),
            ));
        }
        if entries.vectors.iter().any(|v| v.len() != manifest.dimension) {
            return Err(Error::index_load(dir, "stored vector with wrong dimension"));
        }
        if entries.chunks.iter().enumerate().any(|(i, c)| c.id != i) {
            return Err(Error::index_load(dir, "chunk ids out of order"));
        }
        if embedder.dimension() != manifest.dimension {
            return Err(Error::index_load(
                dir,
                format!(
                    "embedder produces {}-d vectors, index holds {}-d",
                    embedder.dimension(),
                    manifest.dimension
                ),
            ));
        }
        if embedder.model_id() != manifest.model_id {
            warn!(
                "Index was built with {} but queries will use {}",
                manifest.model_id,
                embedder.model_id()
            );
        }

        let hnsw_path = dir.join(HNSW_FILE);
        let hnsw_path = hnsw_path
            .to_str()
            .ok_or_else(|| Error::index_load(dir, "non UTF-8 path"))?;
        let index: HNSWIndex<f32, usize> = HNSWIndex::load(hnsw_path)
            .map_err(|e| Error::index_load(dir, format!("{HNSW_FILE}: {e}")))?;

        Ok(Self {
            index,
            dimension: manifest.dimension,
            embedder,
            chunks: entries.chunks,
            vectors: entries.vectors,
            manifest,
        })
    }
}

/// Lifecycle of the store a builder manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Unbuilt,
    Building,
    Persisted,
    Loaded,
}

/// Builds a store from the processed catalog and persists it, or loads one back.
pub struct VectorStoreBuilder {
    csv_path: PathBuf,
    persist_dir: PathBuf,
    chunk_size: usize,
    parallel_embedding: bool,
    embedder: Arc<dyn Embedder>,
    state: StoreState,
}

impl VectorStoreBuilder {
    pub fn new(
        csv_path: impl Into<PathBuf>,
        persist_dir: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            csv_path: csv_path.into(),
            persist_dir: persist_dir.into(),
            chunk_size: 1000,
            parallel_embedding: true,
            embedder,
            state: StoreState::Unbuilt,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_parallel_embedding(mut self, parallel: bool) -> Self {
        self.parallel_embedding = parallel;
        self
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn persist_dir(&self) -> &Path {
        &self.persist_dir
    }

    /// Chunk, embed and index the processed catalog, then publish it to the
    /// persist directory.
    ///
    /// # Errors
    /// - [`Error::CatalogMissing`] if the processed file is absent or has no records.
    /// - [`Error::DataLoad`] if it can't be parsed.
    /// - [`Error::Embedding`] / [`Error::IndexBuild`] for later failures.
    ///
    /// On any error the persist directory is left untouched.
    pub fn build_and_save_vectorstore(&mut self) -> Result<VectorStore> {
        self.state = StoreState::Building;
        match self.build_inner() {
            Ok(store) => {
                self.state = StoreState::Persisted;
                Ok(store)
            }
            Err(e) => {
                error!("Vector store build failed: {e}");
                self.state = StoreState::Unbuilt;
                Err(e)
            }
        }
    }

    fn build_inner(&self) -> Result<VectorStore> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than zero".into()));
        }
        if !self.csv_path.is_file() {
            return Err(Error::CatalogMissing {
                path: self.csv_path.clone(),
                reason: "file does not exist".into(),
            });
        }
        let catalog_bytes =
            fs::read(&self.csv_path).map_err(|e| Error::data_load(&self.csv_path, e))?;
        let records = read_processed(&self.csv_path).map_err(|e| Error::data_load(&self.csv_path, e))?;
        if records.is_empty() {
            return Err(Error::CatalogMissing {
                path: self.csv_path.clone(),
                reason: "no records".into(),
            });
        }

        let chunks: Vec<DocumentChunk> = records
            .iter()
            .enumerate()
            .flat_map(|(record_index, record)| {
                split_text(&record.combined_info, self.chunk_size)
                    .into_iter()
                    .map(move |(offset, text)| DocumentChunk {
                        id: 0,
                        record_index,
                        offset,
                        title: record.title.clone(),
                        text,
                    })
            })
            .collect();
        info!(
            "Embedding {} chunks from {} records",
            chunks.len(),
            records.len()
        );

        let vectors = self.embed_chunks(&chunks)?;

        let mut store = VectorStore::new(self.embedder.clone(), self.chunk_size);
        for (vector, chunk) in vectors.into_iter().zip(chunks) {
            store.add_vector_with_content(vector, chunk)?;
        }
        store.build()?;
        store.manifest.catalog_digest = blake3::hash(&catalog_bytes).to_hex().to_string();
        store.manifest.built_at = chrono::Utc::now().to_rfc3339();

        store.persist(&self.persist_dir)?;
        info!(
            "Persisted {} chunks to {}",
            store.len(),
            self.persist_dir.display()
        );
        Ok(store)
    }

    fn embed_chunks(&self, chunks: &[DocumentChunk]) -> Result<Vec<Vec<f32>>> {
        let progress = ProgressBar::new(chunks.len() as u64).with_style(
            ProgressStyle::with_template("{spinner} embedding [{bar:40}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        let embedder = self.embedder.as_ref();

        let vectors = if self.parallel_embedding {
            chunks
                .par_iter()
                .progress_with(progress.clone())
                .map(|chunk| embedder.embed(&chunk.text))
                .collect::<std::result::Result<Vec<_>, _>>()
        } else {
            chunks
                .iter()
                .progress_with(progress.clone())
                .map(|chunk| embedder.embed(&chunk.text))
                .collect::<std::result::Result<Vec<_>, _>>()
        };
        progress.finish_and_clear();
        Ok(vectors?)
    }

    /// Load the persisted store.
    ///
    /// # Errors
    /// [`Error::IndexLoad`] if the directory is missing or corrupt.
    pub fn load_vector_store(&mut self) -> Result<VectorStore> {
        let store = VectorStore::load(&self.persist_dir, self.embedder.clone())
            .inspect_err(|e| error!("{e}"))?;
        info!(
            "Loaded {} chunks from {}",
            store.len(),
            self.persist_dir.display()
        );
        self.state = StoreState::Loaded;
        Ok(store)
    }
}
