//! Core data types and error definitions for the ingestion pipeline.

use crate::extraction::ExtractionError;
use crate::pipeline::artifact::ArtifactError;
use crate::pipeline::cleanup::WipeTicket;
use crate::structuring::{Record, StructuringError};
use bytes::Bytes;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Field the pipeline adds to every record, naming the upload it came from.
pub const FILE_NAME_FIELD: &str = "fileName";

/// A named document received from the caller.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Caller-supplied file name, echoed back as `fileName`.
    pub name: String,
    /// Raw document bytes.
    pub content: Bytes,
}

impl UploadedFile {
    /// Build an upload from a name and any byte container.
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Outcome of a batch that was fully processed and persisted.
///
/// Dropping `wipe` (or calling [`WipeTicket::submit`]) queues the deferred artifact wipe, so
/// the HTTP layer keeps the ticket alive until the response body has been handed off.
#[derive(Debug)]
pub struct ProcessedBatch {
    /// Identifier used in logs and for the batch staging directory.
    pub batch_id: Uuid,
    /// One record per upload, in upload order.
    pub records: Vec<Record>,
    /// Pending wipe of the output artifact.
    pub wipe: WipeTicket,
}

/// Errors raised while staging an upload to disk.
#[derive(Debug, Error)]
pub enum StagingError {
    /// Staging directory could not be created.
    #[error("Failed to create staging directory {}: {source}", .path.display())]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Upload bytes could not be written.
    #[error("Failed to write staged file {}: {source}", .path.display())]
    Write {
        /// Staging path being written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

/// Failure of one step in a single file's processing.
#[derive(Debug, Error)]
pub enum FileError {
    /// Upload could not be written to the staging area.
    #[error(transparent)]
    Staging(#[from] StagingError),
    /// Staged document could not be turned into text.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Extracted text could not be turned into a record.
    #[error(transparent)]
    Structuring(#[from] StructuringError),
}

impl FileError {
    /// Short name of the pipeline step that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Staging(_) => "staging",
            Self::Extraction(_) => "extraction",
            Self::Structuring(_) => "structuring",
        }
    }
}

/// Errors that abort a batch.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// A file failed to stage, extract, or structure; no records are returned.
    #[error("Error while processing {file_name}: {source}")]
    File {
        /// Name of the upload that failed.
        file_name: String,
        /// Failing step and its cause.
        #[source]
        source: FileError,
    },
    /// Every file was processed but the output artifact could not be written.
    #[error("Processed all files but failed to save output: {0}")]
    Persistence(#[from] ArtifactError),
}

impl ProcessingError {
    /// Name of the offending upload, when a single file caused the failure.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::File { file_name, .. } => Some(file_name),
            Self::Persistence(_) => None,
        }
    }

    /// Short name of the step that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::File { source, .. } => source.stage(),
            Self::Persistence(_) => "persistence",
        }
    }
}
