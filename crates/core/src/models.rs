use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_path: String,
    pub title: String,
    pub page: u32,
    pub chunk_index: u64,
    pub text: String,
}

/// One retrieved passage, ordered best-first by the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk_id: String,
    pub source_path: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingLimits {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl Default for ChunkingLimits {
    fn default() -> Self {
        Self {
            chunk_chars: 1_000,
            overlap_chars: 200,
            min_chars: 40,
        }
    }
}

impl ChunkingLimits {
    /// Overlap must stay strictly below the chunk size or the overlap
    /// splitter cannot make forward progress.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_chars == 0 {
            return Err(IngestError::InvalidChunkLimits(
                "chunk_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.chunk_chars {
            return Err(IngestError::InvalidChunkLimits(format!(
                "overlap_chars {} must be smaller than chunk_chars {}",
                self.overlap_chars, self.chunk_chars
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ChunkingLimits;

    #[test]
    fn default_limits_are_valid() {
        assert!(ChunkingLimits::default().validate().is_ok());
    }

    #[test]
    fn overlap_equal_to_chunk_size_is_rejected() {
        let limits = ChunkingLimits {
            chunk_chars: 100,
            overlap_chars: 100,
            min_chars: 10,
        };
        assert!(limits.validate().is_err());
    }
}
