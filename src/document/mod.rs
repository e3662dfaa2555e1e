//! Raw text extraction from uploaded résumé files.
//!
//! Dispatch is purely by extension: PDFs get direct text extraction with an OCR
//! fallback for scans, images go straight to OCR, DOCX files are read paragraph
//! by paragraph. Extraction failures degrade to an empty string; only an
//! unsupported extension or an unreadable file is an error.

pub mod docx;
pub mod pdf;

use crate::ocr::{OcrInput, OcrProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Below this many characters a PDF is treated as a scan.
pub const SCAN_THRESHOLD_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    UnsupportedExtension(String),

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
    Docx,
}

impl DocumentKind {
    /// Accepts `pdf`, `.PDF`, `jpeg`, ... in any case.
    pub fn from_extension(extension: &str) -> Result<Self, ExtractError> {
        let normalized = extension.trim().trim_start_matches('.').to_lowercase();
        match normalized.as_str() {
            "pdf" => Ok(Self::Pdf),
            "jpg" | "jpeg" | "png" => Ok(Self::Image),
            "docx" => Ok(Self::Docx),
            _ => Err(ExtractError::UnsupportedExtension(extension.to_string())),
        }
    }
}

/// Whether direct PDF text is too short to be a real text layer.
pub fn needs_ocr(text: &str) -> bool {
    text.trim().chars().count() < SCAN_THRESHOLD_CHARS
}

/// Text extractor with a pluggable OCR backend.
#[derive(Clone)]
pub struct DocumentExtractor {
    ocr: Arc<dyn OcrProvider>,
}

impl DocumentExtractor {
    pub fn new(ocr: Arc<dyn OcrProvider>) -> Self {
        Self { ocr }
    }

    /// Extract raw text from the file at `path`, dispatching on `extension`.
    pub async fn extract(&self, path: &Path, extension: &str) -> Result<String, ExtractError> {
        let kind = DocumentKind::from_extension(extension)?;
        let data = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();

        info!(
            "Extracting text from {} ({} bytes, {:?})",
            filename,
            data.len(),
            kind
        );

        let text = match kind {
            DocumentKind::Pdf => self.extract_pdf(filename, data).await,
            DocumentKind::Image => self.run_ocr(OcrInput::Image { filename, data }).await,
            DocumentKind::Docx => {
                match tokio::task::spawn_blocking(move || docx::extract_text(&data)).await {
                    Ok(Ok(text)) => text,
                    Ok(Err(e)) => {
                        warn!("DOCX extraction failed: {:#}", e);
                        String::new()
                    }
                    Err(e) => {
                        warn!("DOCX extraction task failed: {}", e);
                        String::new()
                    }
                }
            }
        };

        info!("Extracted {} chars", text.chars().count());
        Ok(text)
    }

    async fn extract_pdf(&self, filename: String, data: Vec<u8>) -> String {
        let (text, data) = tokio::task::spawn_blocking(move || {
            let text = pdf::extract_text(&data).unwrap_or_else(|e| {
                warn!("Direct PDF text extraction failed: {:#}", e);
                String::new()
            });
            (text, data)
        })
        .await
        .unwrap_or_else(|e| {
            warn!("PDF extraction task failed: {}", e);
            (String::new(), Vec::new())
        });

        if !needs_ocr(&text) || data.is_empty() {
            return text;
        }

        info!(
            "PDF {} yielded only {} chars, treating as scan",
            filename,
            text.trim().chars().count()
        );
        let ocr_text = self.run_ocr(OcrInput::Pdf { filename, data }).await;
        if ocr_text.trim().is_empty() {
            text
        } else {
            ocr_text
        }
    }

    async fn run_ocr(&self, input: OcrInput) -> String {
        match self.ocr.process(&input).await {
            Ok(result) => {
                info!(
                    "OCR ({}) produced {} pages for {}",
                    result.provider_name,
                    result.total_pages,
                    input.filename()
                );
                let blank = result.blank_pages();
                if !blank.is_empty() {
                    warn!("OCR found no text on pages {:?} of {}", blank, input.filename());
                }
                result.text
            }
            Err(e) => {
                warn!("OCR ({}) failed for {}: {:#}", self.ocr.name(), input.filename(), e);
                String::new()
            }
        }
    }
}
