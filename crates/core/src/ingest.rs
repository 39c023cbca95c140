use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunking::build_page_chunks;
use crate::config::ParseServiceConfig;
use crate::error::IngestError;
use crate::extractor::extract_page_texts;
use crate::models::{ChunkingLimits, DocChunk, DocumentRecord};

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub chunks: Vec<DocChunk>,
    pub documents: Vec<DocumentRecord>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Walks `folder`, extracts and chunks every PDF it can read, and reports
/// the rest with reasons. A single unreadable file never aborts the batch.
pub fn ingest_folder_chunks(
    folder: &Path,
    limits: ChunkingLimits,
    parse_service: Option<&ParseServiceConfig>,
) -> Result<IngestionReport, IngestError> {
    limits.validate()?;
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let mut chunks = Vec::new();
    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();
    let mut cursor = 0u64;

    for path in files {
        let build_result = (|| {
            let record = build_document_record(&path)?;
            let pages = extract_page_texts(&path, parse_service)?;
            let mut file_chunks = Vec::new();

            for page in pages {
                let (page_chunks, next_cursor) =
                    build_page_chunks(&record, page.number, &page.text, limits, cursor)?;
                cursor = next_cursor;
                file_chunks.extend(page_chunks);
            }

            Ok::<_, IngestError>((record, file_chunks))
        })();

        match build_result {
            Ok((record, file_chunks)) => {
                documents.push(record);
                chunks.extend(file_chunks);
            }
            Err(error) => skipped_files.push(SkippedPdf {
                path,
                reason: error.to_string(),
            }),
        }
    }

    Ok(IngestionReport {
        chunks,
        documents,
        skipped_files,
    })
}

fn build_document_record(path: &Path) -> Result<DocumentRecord, IngestError> {
    let checksum = digest_file(path)?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })?;

    Ok(DocumentRecord {
        document_id: generate_document_id(path),
        title: name.to_string(),
        source_path: path.to_string_lossy().to_string(),
        checksum,
        ingested_at: Utc::now(),
    })
}

fn generate_document_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{digest_file, discover_pdf_files, ingest_folder_chunks};
    use crate::models::ChunkingLimits;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.pdf"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt")).and_then(|mut file| file.write_all(b"not a pdf"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.pdf");
        fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn ingestion_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = ingest_folder_chunks(dir.path(), ChunkingLimits::default(), None);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn unreadable_pdfs_are_skipped_with_reasons() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;

        let report = ingest_folder_chunks(dir.path(), ChunkingLimits::default(), None)?;

        assert_eq!(report.chunks.len(), 0);
        assert_eq!(report.documents.len(), 0);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("unreadable.pdf")
        );
        assert!(!report.skipped_files[0].reason.is_empty());
        Ok(())
    }
}
