//! Ingestion pipeline: scoped staging, extraction, structuring, output persistence, and the
//! deferred output wipe.

pub mod artifact;
pub mod cleanup;
mod service;
pub mod staging;
pub mod types;

pub use artifact::{ArtifactError, ArtifactStore, FileArtifactStore};
pub use cleanup::{CleanupQueue, WipeTicket};
pub use service::{IngestionPipeline, PipelineApi};
pub use types::{
    FILE_NAME_FIELD, FileError, ProcessedBatch, ProcessingError, StagingError, UploadedFile,
};
