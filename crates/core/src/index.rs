use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::models::{DocChunk, RetrievedPassage};

pub const INDEX_FORMAT_VERSION: u32 = 2;

const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.json";

#[async_trait]
pub trait VectorIndex {
    async fn add_chunks(
        &self,
        chunks: &[DocChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexError>;

    /// Nearest passages for `query_vector`, best-first. An empty index
    /// yields an empty list, not an error.
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, IndexError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexManifest {
    format_version: u32,
    embedder_id: String,
    dimensions: usize,
    chunk_count: usize,
    built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    chunk: DocChunk,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOpenOptions {
    /// Loading an artifact whose manifest is missing or from another format
    /// version executes no checks on its contents; callers must opt in.
    pub allow_untrusted: bool,
}

/// Flat cosine-similarity index persisted as a directory artifact:
/// `manifest.json` plus `chunks.json`. Built once offline, loaded many
/// times by the query path.
pub struct FlatIndex {
    embedder_id: String,
    dimensions: usize,
    entries: RwLock<Vec<StoredChunk>>,
}

impl FlatIndex {
    pub fn new(embedder_id: impl Into<String>, dimensions: usize) -> Self {
        Self {
            embedder_id: embedder_id.into(),
            dimensions,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn open(dir: &Path, options: IndexOpenOptions) -> Result<Self, IndexError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let chunks_path = dir.join(CHUNKS_FILE);

        if !chunks_path.exists() {
            return Err(IndexError::Missing(dir.display().to_string()));
        }

        let manifest: Option<IndexManifest> = match fs::read_to_string(&manifest_path) {
            Ok(raw) => serde_json::from_str(&raw).ok(),
            Err(_) => None,
        };

        let trusted = manifest
            .as_ref()
            .is_some_and(|m| m.format_version == INDEX_FORMAT_VERSION);

        if !trusted && !options.allow_untrusted {
            let details = match &manifest {
                Some(m) => format!(
                    "format version {} instead of {}",
                    m.format_version, INDEX_FORMAT_VERSION
                ),
                None => "missing or unreadable manifest".to_string(),
            };
            return Err(IndexError::UntrustedFormat { details });
        }

        let raw = fs::read_to_string(&chunks_path)?;
        let entries: Vec<StoredChunk> = serde_json::from_str(&raw)?;

        let (embedder_id, dimensions) = match manifest {
            Some(m) => (m.embedder_id, m.dimensions),
            // legacy artifact: recover the dimension from the data itself
            None => (
                String::new(),
                entries.first().map(|e| e.vector.len()).unwrap_or(0),
            ),
        };

        Ok(Self {
            embedder_id,
            dimensions,
            entries: RwLock::new(entries),
        })
    }

    /// Writes the artifact to a scratch directory next to `dir`, then swaps
    /// it into place, so an online reader never observes a half-written
    /// index.
    pub fn persist(&self, dir: &Path) -> Result<(), IndexError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| IndexError::Request("index lock poisoned".to_string()))?;

        let manifest = IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            embedder_id: self.embedder_id.clone(),
            dimensions: self.dimensions,
            chunk_count: entries.len(),
            built_at: Utc::now(),
        };

        let scratch = scratch_dir(dir);
        fs::create_dir_all(&scratch)?;
        fs::write(
            scratch.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        fs::write(scratch.join(CHUNKS_FILE), serde_json::to_string(&*entries)?)?;

        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        fs::rename(&scratch, dir)?;
        Ok(())
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Errors when the index was built by a different embedder than the one
    /// the query path is about to use.
    pub fn check_embedder(&self, current_id: &str) -> Result<(), IndexError> {
        if !self.embedder_id.is_empty() && self.embedder_id != current_id {
            return Err(IndexError::EmbedderMismatch {
                indexed: self.embedder_id.clone(),
                current: current_id.to_string(),
            });
        }
        Ok(())
    }
}

fn scratch_dir(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("index");
    dir.with_file_name(format!(".{}.build-{}", name, std::process::id()))
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn add_chunks(
        &self,
        chunks: &[DocChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexError> {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::Request(format!(
                "embedding count {} does not match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        for embedding in embeddings {
            if embedding.len() != self.dimensions {
                return Err(IndexError::DimensionMismatch {
                    found: embedding.len(),
                    expected: self.dimensions,
                });
            }
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| IndexError::Request("index lock poisoned".to_string()))?;
        entries.extend(
            chunks
                .iter()
                .zip(embeddings.iter())
                .map(|(chunk, vector)| StoredChunk {
                    chunk: chunk.clone(),
                    vector: vector.clone(),
                }),
        );
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, IndexError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| IndexError::Request("index lock poisoned".to_string()))?;

        if entries.is_empty() {
            return Ok(Vec::new());
        }

        if query_vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                found: query_vector.len(),
                expected: self.dimensions,
            });
        }

        let mut scored: Vec<(f32, &StoredChunk)> = entries
            .iter()
            .map(|entry| (cosine_similarity(query_vector, &entry.vector), entry))
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, entry)| RetrievedPassage {
                chunk_id: entry.chunk.chunk_id.clone(),
                source_path: entry.chunk.source_path.clone(),
                text: entry.chunk.text.clone(),
                score,
            })
            .collect())
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    let left_norm: f32 = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let right_norm: f32 = right.iter().map(|v| v * v).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}
