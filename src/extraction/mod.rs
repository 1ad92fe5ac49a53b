//! Text extraction from staged documents.
//!
//! The pipeline only sees the [`TextExtractor`] trait. [`DocumentTextExtractor`] picks a
//! strategy from the file extension: PDFs go through `pdf-extract` on the blocking pool,
//! plain-text formats are read directly.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PLAIN_TEXT_EXTENSIONS: [&str; 5] = ["txt", "md", "csv", "json", "log"];

/// Errors raised while turning a staged document into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Staged file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// No extraction strategy exists for the file extension.
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
    /// The PDF parser rejected the document.
    #[error("Failed to parse PDF: {0}")]
    Pdf(String),
    /// Extraction succeeded but produced only whitespace.
    #[error("Document contains no extractable text")]
    EmptyText,
    /// Blocking extraction task panicked or was cancelled.
    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Interface implemented by text extraction backends.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Produce the raw text contained in the document at `path`.
    async fn extract(&self, path: &Path) -> Result<String, ExtractionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentKind {
    Pdf,
    PlainText,
}

impl DocumentKind {
    fn detect(path: &Path) -> Result<Self, ExtractionError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            ext if PLAIN_TEXT_EXTENSIONS.contains(&ext) => Ok(Self::PlainText),
            "" => Err(ExtractionError::UnsupportedFormat(
                "file has no extension".to_string(),
            )),
            other => Err(ExtractionError::UnsupportedFormat(format!(".{other}"))),
        }
    }
}

/// Extension-dispatching extractor for PDFs and plain-text documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentTextExtractor;

impl DocumentTextExtractor {
    /// Construct a new extractor.
    pub const fn new() -> Self {
        Self
    }

    async fn extract_pdf(path: &Path) -> Result<String, ExtractionError> {
        let path_buf = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text(&path_buf).map_err(|e| ExtractionError::Pdf(e.to_string()))
        })
        .await
        .map_err(|e| ExtractionError::Task(e.to_string()))?
    }

    async fn extract_plain_text(path: &Path) -> Result<String, ExtractionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ExtractionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl TextExtractor for DocumentTextExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let kind = DocumentKind::detect(path)?;
        tracing::debug!(path = %path.display(), kind = ?kind, "Extracting document text");

        let text = match kind {
            DocumentKind::Pdf => Self::extract_pdf(path).await?,
            DocumentKind::PlainText => Self::extract_plain_text(path).await?,
        };

        if text.trim().is_empty() {
            return Err(ExtractionError::EmptyText);
        }
        Ok(text)
    }
}
