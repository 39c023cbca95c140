use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::config::ParseServiceConfig;
use crate::error::IngestError;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

/// Local extraction straight from the PDF content streams. Used when no
/// parsing-service key is configured, and as the fallback when the service
/// call fails.
#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ParseRequest {
    file_name: String,
    pdf_base64: String,
    result_format: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct ParseResponse {
    pages: Option<Vec<ParsedPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ParsedPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Remote document parsing service. Ships the PDF bytes and gets back
/// page-level text, which handles scanned documents the local extractor
/// cannot read.
pub struct RemoteParseExtractor {
    config: ParseServiceConfig,
}

impl RemoteParseExtractor {
    pub fn new(config: ParseServiceConfig) -> Self {
        Self { config }
    }
}

impl PdfExtractor for RemoteParseExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        tokio::task::block_in_place(|| self.extract_pages_blocking(path))
    }
}

impl RemoteParseExtractor {
    fn extract_pages_blocking(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

        let pdf = std::fs::read(path)?;
        let payload = ParseRequest {
            file_name: file_name.to_string(),
            pdf_base64: STANDARD.encode(pdf),
            result_format: "text",
        };

        let response = Client::new()
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()?;

        if !response.status().is_success() {
            return Err(IngestError::ParseService(format!(
                "parsing request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: ParseResponse = response.json()?;
        let pages = response_to_pages(&payload, path)?;
        Ok(pages)
    }
}

/// Extracts page text for one PDF. The remote service is preferred when
/// configured; local extraction covers the unconfigured and degraded cases.
pub fn extract_page_texts(
    path: &Path,
    parse_service: Option<&ParseServiceConfig>,
) -> Result<Vec<PageText>, IngestError> {
    let Some(config) = parse_service else {
        return LopdfExtractor.extract_pages(path);
    };

    match RemoteParseExtractor::new(config.clone()).extract_pages(path) {
        Ok(pages) => Ok(pages),
        Err(service_error) => {
            warn!(path = %path.display(), error = %service_error, "parsing service failed; falling back to local extraction");
            LopdfExtractor.extract_pages(path).map_err(|local_error| {
                IngestError::PdfParse(format!(
                    "{local_error}; parsing service also failed: {service_error}"
                ))
            })
        }
    }
}

fn response_to_pages(payload: &ParseResponse, path: &Path) -> Result<Vec<PageText>, IngestError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_ref().map(|value| value.trim().to_string())?;
                if text.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: page.page.unwrap_or(1),
                        text,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, piece)| {
                let normalized = piece.trim().to_string();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: normalized,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::ParseService(format!(
        "parsing service returned no readable text for {}",
        path.display()
    )))
}
