//! Persistence of the batch output artifact.
//!
//! The artifact is a single JSON array: either the records of the last successful batch or
//! `[]` once the deferred wipe has run. Writes go to a uniquely named sibling file that is
//! then renamed over the artifact, so readers never observe a half-written document.

use crate::structuring::Record;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const EMPTY_ARTIFACT: &[u8] = b"[]";

/// Errors raised while reading or writing the output artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Filesystem operation on the artifact failed.
    #[error("Artifact I/O failed for {}: {source}", .path.display())]
    Io {
        /// Path being written or read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Records could not be serialized.
    #[error("Failed to serialize records: {0}")]
    Serialize(#[source] serde_json::Error),
    /// Artifact exists but is not a JSON array of objects.
    #[error("Artifact {} is not a JSON array of records: {source}", .path.display())]
    Corrupt {
        /// Artifact path.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Storage capability for the output artifact.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Replace the artifact with the given records.
    async fn persist(&self, records: &[Record]) -> Result<(), ArtifactError>;

    /// Replace the artifact with an empty array. Safe to call repeatedly.
    async fn wipe(&self) -> Result<(), ArtifactError>;

    /// Read the current artifact; a missing artifact reads as empty.
    async fn read(&self) -> Result<Vec<Record>, ArtifactError>;
}

/// Artifact store backed by one JSON file at a fixed path.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    path: PathBuf,
}

impl FileArtifactStore {
    /// Store the artifact at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ArtifactError {
        ArtifactError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn replace_contents(&self, contents: &[u8]) -> Result<(), ArtifactError> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let temp_path = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        if let Err(source) = tokio::fs::write(&temp_path, contents).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(self.io_error(source));
        }
        if let Err(source) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(self.io_error(source));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn persist(&self, records: &[Record]) -> Result<(), ArtifactError> {
        let contents = serde_json::to_vec_pretty(records).map_err(ArtifactError::Serialize)?;
        self.replace_contents(&contents).await?;
        tracing::info!(
            path = %self.path.display(),
            records = records.len(),
            "Persisted output artifact"
        );
        Ok(())
    }

    async fn wipe(&self) -> Result<(), ArtifactError> {
        self.replace_contents(EMPTY_ARTIFACT).await?;
        tracing::info!(path = %self.path.display(), "Wiped output artifact");
        Ok(())
    }

    async fn read(&self) -> Result<Vec<Record>, ArtifactError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(self.io_error(err)),
        };
        serde_json::from_slice(&contents).map_err(|source| ArtifactError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }
}
