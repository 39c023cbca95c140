use sha2::{Digest, Sha256};

use crate::error::IngestError;
use crate::models::{ChunkingLimits, DocChunk, DocumentRecord};

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(normalize_whitespace)
        .filter(|paragraph| !paragraph.is_empty())
        .collect()
}

/// Packs paragraphs into chunks of at most `chunk_chars` characters, then
/// re-splits anything still oversized with `overlap_chars` of overlap
/// between consecutive pieces.
pub fn pack_chunks(text: &str, limits: ChunkingLimits) -> Result<Vec<String>, IngestError> {
    limits.validate()?;

    let mut packed = Vec::new();
    let mut current = String::new();

    for paragraph in split_paragraphs(text) {
        if current.is_empty() {
            current = paragraph;
            continue;
        }

        if current.len() + paragraph.len() + 1 <= limits.chunk_chars {
            current.push(' ');
            current.push_str(&paragraph);
        } else {
            packed.push(std::mem::replace(&mut current, paragraph));
        }
    }

    if !current.is_empty() {
        packed.push(current);
    }

    let mut chunks = Vec::new();
    for piece in packed {
        if piece.len() <= limits.chunk_chars {
            chunks.push(piece);
            continue;
        }

        let chars: Vec<char> = piece.chars().collect();
        let stride = limits.chunk_chars - limits.overlap_chars;
        let mut start = 0;
        while start < chars.len() {
            let end = (start + limits.chunk_chars).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += stride;
        }
    }

    Ok(chunks)
}

/// Builds chunk records for one page of a document. `cursor` is the running
/// chunk index across the whole document; the updated value is returned so
/// the caller can thread it through subsequent pages.
pub fn build_page_chunks(
    document: &DocumentRecord,
    page: u32,
    page_text: &str,
    limits: ChunkingLimits,
    cursor: u64,
) -> Result<(Vec<DocChunk>, u64), IngestError> {
    let mut chunks = Vec::new();
    let mut next_index = cursor;

    for text in pack_chunks(page_text, limits)? {
        if text.len() < limits.min_chars {
            continue;
        }

        chunks.push(DocChunk {
            chunk_id: make_chunk_id(&document.document_id, page, next_index, &text),
            document_id: document.document_id.clone(),
            source_path: document.source_path.clone(),
            title: document.title.clone(),
            page,
            chunk_index: next_index,
            text,
        });

        next_index = next_index.saturating_add(1);
    }

    Ok((chunks, next_index))
}

fn make_chunk_id(document_id: &str, page: u32, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(page.to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> DocumentRecord {
        DocumentRecord {
            document_id: "doc-1".to_string(),
            title: "Test".to_string(),
            source_path: "/tmp/test.pdf".to_string(),
            checksum: "checksum".to_string(),
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn short_paragraphs_are_packed_together() {
        let limits = ChunkingLimits {
            chunk_chars: 100,
            overlap_chars: 10,
            min_chars: 1,
        };
        let chunks = pack_chunks("first paragraph\n\nsecond paragraph", limits).unwrap();
        assert_eq!(chunks, vec!["first paragraph second paragraph".to_string()]);
    }

    #[test]
    fn oversized_text_is_split_with_overlap() {
        let limits = ChunkingLimits {
            chunk_chars: 10,
            overlap_chars: 4,
            min_chars: 1,
        };
        let chunks = pack_chunks("abcdefghijklmnop", limits).unwrap();
        assert_eq!(chunks[0], "abcdefghij");
        // next piece starts 6 chars in, repeating the last 4 of the previous
        assert!(chunks[1].starts_with("ghij"));
        for chunk in &chunks {
            assert!(chunk.len() <= 10);
        }
    }

    #[test]
    fn invalid_limits_are_rejected() {
        let limits = ChunkingLimits {
            chunk_chars: 10,
            overlap_chars: 10,
            min_chars: 1,
        };
        assert!(pack_chunks("anything", limits).is_err());
    }

    #[test]
    fn page_chunks_carry_document_identity_and_running_index() {
        let limits = ChunkingLimits {
            chunk_chars: 50,
            overlap_chars: 5,
            min_chars: 5,
        };
        let (chunks, cursor) = build_page_chunks(
            &record(),
            3,
            "A paragraph about vitamins.\n\nAnother paragraph about minerals.",
            limits,
            7,
        )
        .unwrap();

        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].document_id, "doc-1");
        assert_eq!(chunks[0].page, 3);
        assert_eq!(chunks[0].chunk_index, 7);
        assert_eq!(cursor, 7 + chunks.len() as u64);
    }

    #[test]
    fn chunk_ids_are_deterministic() {
        let limits = ChunkingLimits {
            min_chars: 5,
            ..ChunkingLimits::default()
        };
        let (first, _) = build_page_chunks(&record(), 1, "Some page text about food.", limits, 0).unwrap();
        let (second, _) = build_page_chunks(&record(), 1, "Some page text about food.", limits, 0).unwrap();
        assert_eq!(first[0].chunk_id, second[0].chunk_id);
    }
}
