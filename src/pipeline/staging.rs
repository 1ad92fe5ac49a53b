//! Scoped on-disk staging for uploads.
//!
//! Each batch gets its own directory under the staging root, and each upload is written to
//! `<batch dir>/<position>-<base name>`. Both the directory and the files are guards that
//! delete themselves on drop, which covers normal completion, `?` early returns, and the
//! enclosing future being dropped mid-batch.

use crate::pipeline::types::{StagingError, UploadedFile};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const FALLBACK_FILE_NAME: &str = "upload";

/// Per-batch staging directory, removed with everything in it on drop.
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Create `<root>/<batch_id>`, creating the root on demand.
    pub async fn create(root: &Path, batch_id: Uuid) -> Result<Self, StagingError> {
        let dir = root.join(batch_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StagingError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        tracing::debug!(dir = %dir.display(), "Created staging area");
        Ok(Self { dir })
    }

    /// Directory holding this batch's staged files.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write an upload's bytes to disk, overwriting any file already at that path.
    ///
    /// The upload is consumed; its bytes are released once the write finishes.
    pub async fn stage(
        &self,
        position: usize,
        upload: UploadedFile,
    ) -> Result<StagedFile, StagingError> {
        let path = self
            .dir
            .join(format!("{position}-{}", staged_base_name(&upload.name)));
        // Guard first so a partial write is still cleaned up.
        let staged = StagedFile { path };
        let write_error = |source: std::io::Error| StagingError::Write {
            path: staged.path.clone(),
            source,
        };

        let mut file = tokio::fs::File::create(&staged.path)
            .await
            .map_err(write_error)?;
        file.write_all(&upload.content).await.map_err(write_error)?;
        file.flush().await.map_err(write_error)?;
        drop(upload);

        tracing::debug!(
            path = %staged.path.display(),
            "Staged upload"
        );
        Ok(staged)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(dir = %self.dir.display(), error = %err, "Failed to remove staging area");
            }
        }
    }
}

/// Staged copy of one upload, deleted on drop.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /// Location of the staged bytes.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "Removed staged file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Failed to remove staged file");
            }
        }
    }
}

/// Last path component of a caller-supplied name, so uploads cannot escape the batch dir.
fn staged_base_name(name: &str) -> &str {
    match name.rsplit(['/', '\\']).next() {
        Some(base) if !base.is_empty() && base != "." && base != ".." => base,
        _ => FALLBACK_FILE_NAME,
    }
}
