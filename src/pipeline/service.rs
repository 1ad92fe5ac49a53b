//! Ingestion pipeline coordinating staging, extraction, structuring, and output persistence.

use crate::{
    config::Config,
    extraction::{DocumentTextExtractor, TextExtractor},
    metrics::{MetricsSnapshot, PipelineMetrics},
    pipeline::{
        artifact::{ArtifactStore, FileArtifactStore},
        cleanup::CleanupQueue,
        staging::StagingArea,
        types::{FILE_NAME_FIELD, FileError, ProcessedBatch, ProcessingError, UploadedFile},
    },
    structuring::{Record, Structurer, StructuringError, build_structurer},
};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Turns a batch of uploads into records, persists them, and schedules the output wipe.
///
/// Files are handled one at a time in upload order. The first failing file aborts the batch
/// and nothing is persisted. Construct once near process start and share through an `Arc`.
pub struct IngestionPipeline {
    extractor: Arc<dyn TextExtractor>,
    structurer: Arc<dyn Structurer>,
    artifacts: Arc<dyn ArtifactStore>,
    cleanup: CleanupQueue,
    staging_root: PathBuf,
    metrics: Arc<PipelineMetrics>,
}

/// Abstraction over the pipeline used by the HTTP surface.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Process a batch of uploads; see [`IngestionPipeline::process`].
    async fn process(&self, files: Vec<UploadedFile>) -> Result<ProcessedBatch, ProcessingError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl IngestionPipeline {
    /// Build a pipeline from configuration using the document extractor and the configured
    /// AI structurer.
    pub fn from_config(config: &Config) -> Result<Self, StructuringError> {
        let structurer = build_structurer(config)?;
        tracing::info!(
            staging_dir = %config.staging_dir.display(),
            output_path = %config.output_path.display(),
            "Initializing ingestion pipeline"
        );
        Ok(Self::with_components(
            Arc::new(DocumentTextExtractor::new()),
            structurer,
            Arc::new(FileArtifactStore::new(config.output_path.clone())),
            config.staging_dir.clone(),
            config.wipe_delay(),
        ))
    }

    /// Assemble a pipeline from explicit collaborators and spawn its cleanup worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_components(
        extractor: Arc<dyn TextExtractor>,
        structurer: Arc<dyn Structurer>,
        artifacts: Arc<dyn ArtifactStore>,
        staging_root: impl Into<PathBuf>,
        wipe_delay: Duration,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let (cleanup, _worker) =
            CleanupQueue::spawn(artifacts.clone(), metrics.clone(), wipe_delay);
        Self {
            extractor,
            structurer,
            artifacts,
            cleanup,
            staging_root: staging_root.into(),
            metrics,
        }
    }

    /// Root directory under which batches are staged.
    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Queue that runs deferred artifact wipes.
    pub fn cleanup(&self) -> &CleanupQueue {
        &self.cleanup
    }

    /// Store holding the output artifact.
    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// Process a batch of uploads.
    ///
    /// On success the records are returned in upload order, each carrying `fileName`, and the
    /// artifact holds exactly those records. The returned [`ProcessedBatch::wipe`] ticket
    /// queues the artifact wipe when dropped. On failure no records are returned, the
    /// artifact is left untouched, and no staged file survives.
    pub async fn process(
        &self,
        files: Vec<UploadedFile>,
    ) -> Result<ProcessedBatch, ProcessingError> {
        let batch_id = Uuid::new_v4();
        let file_count = files.len();
        tracing::info!(%batch_id, files = file_count, "Processing batch");

        let records = match self.process_files(batch_id, files).await {
            Ok(records) => records,
            Err(error) => {
                self.metrics.record_failure();
                tracing::error!(
                    %batch_id,
                    file = error.file_name().unwrap_or_default(),
                    stage = error.stage(),
                    error = %error,
                    "Batch aborted"
                );
                return Err(error);
            }
        };
        debug_assert_eq!(records.len(), file_count);

        if let Err(error) = self.artifacts.persist(&records).await {
            self.metrics.record_failure();
            tracing::error!(%batch_id, error = %error, "Failed to persist batch output");
            return Err(ProcessingError::Persistence(error));
        }

        self.metrics.record_batch(records.len() as u64);
        tracing::info!(%batch_id, records = records.len(), "Batch processed");

        Ok(ProcessedBatch {
            batch_id,
            records,
            wipe: self.cleanup.ticket(batch_id),
        })
    }

    async fn process_files(
        &self,
        batch_id: Uuid,
        files: Vec<UploadedFile>,
    ) -> Result<Vec<Record>, ProcessingError> {
        let mut records = Vec::with_capacity(files.len());
        let Some(first) = files.first() else {
            return Ok(records);
        };

        let area = StagingArea::create(&self.staging_root, batch_id)
            .await
            .map_err(|source| ProcessingError::File {
                file_name: first.name.clone(),
                source: source.into(),
            })?;

        for (position, upload) in files.into_iter().enumerate() {
            let file_name = upload.name.clone();
            let record = self
                .process_file(&area, position, upload)
                .await
                .map_err(|source| ProcessingError::File {
                    file_name: file_name.clone(),
                    source,
                })?;
            tracing::debug!(%batch_id, position, file = %file_name, "File processed");
            records.push(record);
        }

        Ok(records)
    }

    async fn process_file(
        &self,
        area: &StagingArea,
        position: usize,
        upload: UploadedFile,
    ) -> Result<Record, FileError> {
        let file_name = upload.name.clone();
        let staged = area.stage(position, upload).await?;
        let text = self.extractor.extract(staged.path()).await?;
        let mut record = self.structurer.structure(&text).await?;
        record.insert(FILE_NAME_FIELD.to_string(), Value::String(file_name));
        Ok(record)
    }

    /// Return the current pipeline metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl PipelineApi for IngestionPipeline {
    async fn process(&self, files: Vec<UploadedFile>) -> Result<ProcessedBatch, ProcessingError> {
        IngestionPipeline::process(self, files).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        IngestionPipeline::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractionError;
    use crate::pipeline::artifact::ArtifactError;
    use crate::pipeline::types::FileError;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Reads staged text and records which paths existed at extraction time.
    #[derive(Default)]
    struct RecordingExtractor {
        fail_on: Option<String>,
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl TextExtractor for RecordingExtractor {
        async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
            self.seen.lock().expect("lock").push(path.to_path_buf());
            let text = std::fs::read_to_string(path).map_err(|source| ExtractionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if self.fail_on.as_deref() == Some(text.as_str()) {
                return Err(ExtractionError::Pdf("corrupt xref table".into()));
            }
            Ok(text)
        }
    }

    /// Maps `field=<value>` text to `{"field": value}`; text `fail` is a provider error.
    #[derive(Default)]
    struct ScriptedStructurer {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Structurer for ScriptedStructurer {
        async fn structure(&self, text: &str) -> Result<Record, StructuringError> {
            self.calls.lock().expect("lock").push(text.to_string());
            if text == "fail" {
                return Err(StructuringError::GenerationFailed(
                    "provider returned 503 Service Unavailable".into(),
                ));
            }
            let value = text.strip_prefix("field=").unwrap_or(text);
            Ok(json!({ "field": value }).as_object().cloned().expect("object"))
        }
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl ArtifactStore for ReadOnlyStore {
        async fn persist(&self, _records: &[Record]) -> Result<(), ArtifactError> {
            Err(ArtifactError::Io {
                path: "output.json".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }

        async fn wipe(&self) -> Result<(), ArtifactError> {
            Ok(())
        }

        async fn read(&self) -> Result<Vec<Record>, ArtifactError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        dir: TempDir,
        extractor: Arc<RecordingExtractor>,
        structurer: Arc<ScriptedStructurer>,
        pipeline: IngestionPipeline,
    }

    impl Harness {
        fn new(extractor: RecordingExtractor) -> Self {
            let dir = TempDir::new().expect("tempdir");
            let extractor = Arc::new(extractor);
            let structurer = Arc::new(ScriptedStructurer::default());
            let pipeline = IngestionPipeline::with_components(
                extractor.clone(),
                structurer.clone(),
                Arc::new(FileArtifactStore::new(dir.path().join("output.json"))),
                dir.path().join("uploads"),
                Duration::ZERO,
            );
            Self {
                dir,
                extractor,
                structurer,
                pipeline,
            }
        }

        fn artifact_path(&self) -> PathBuf {
            self.dir.path().join("output.json")
        }

        fn staged_entries(&self) -> usize {
            match std::fs::read_dir(self.pipeline.staging_root()) {
                Ok(entries) => entries.count(),
                Err(_) => 0,
            }
        }
    }

    fn uploads(items: &[(&str, &str)]) -> Vec<UploadedFile> {
        items
            .iter()
            .map(|(name, text)| UploadedFile::new(*name, text.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn records_follow_upload_order_and_carry_file_names() {
        let harness = Harness::new(RecordingExtractor::default());

        let batch = harness
            .pipeline
            .process(uploads(&[
                ("A.txt", "field=x"),
                ("B.txt", "field=y"),
                ("C.txt", "field=z"),
            ]))
            .await
            .expect("batch");

        let values: Vec<_> = batch
            .records
            .iter()
            .map(|record| (record["field"].clone(), record["fileName"].clone()))
            .collect();
        assert_eq!(
            values,
            vec![
                (json!("x"), json!("A.txt")),
                (json!("y"), json!("B.txt")),
                (json!("z"), json!("C.txt")),
            ]
        );
        assert_eq!(harness.staged_entries(), 0);
        assert_eq!(harness.pipeline.metrics_snapshot().files_processed, 3);
    }

    #[tokio::test]
    async fn pipeline_overrides_structurer_file_name() {
        struct NamingStructurer;

        #[async_trait]
        impl Structurer for NamingStructurer {
            async fn structure(&self, _text: &str) -> Result<Record, StructuringError> {
                Ok(json!({"fileName": "guessed.pdf"})
                    .as_object()
                    .cloned()
                    .expect("object"))
            }
        }

        let dir = TempDir::new().expect("tempdir");
        let pipeline = IngestionPipeline::with_components(
            Arc::new(RecordingExtractor::default()),
            Arc::new(NamingStructurer),
            Arc::new(FileArtifactStore::new(dir.path().join("output.json"))),
            dir.path().join("uploads"),
            Duration::ZERO,
        );

        let batch = pipeline
            .process(uploads(&[("real.txt", "body")]))
            .await
            .expect("batch");
        assert_eq!(batch.records[0]["fileName"], "real.txt");
    }

    #[tokio::test]
    async fn empty_batch_persists_empty_array() {
        let harness = Harness::new(RecordingExtractor::default());

        let batch = harness.pipeline.process(Vec::new()).await.expect("batch");

        assert!(batch.records.is_empty());
        let raw = std::fs::read_to_string(harness.artifact_path()).expect("artifact");
        assert_eq!(serde_json::from_str::<Value>(&raw).expect("json"), json!([]));
    }

    #[tokio::test]
    async fn nth_file_failure_discards_earlier_records_and_stops() {
        let harness = Harness::new(RecordingExtractor::default());

        let error = harness
            .pipeline
            .process(uploads(&[
                ("A.txt", "field=x"),
                ("B.txt", "fail"),
                ("C.txt", "field=z"),
            ]))
            .await
            .expect_err("second file fails");

        assert_eq!(error.file_name(), Some("B.txt"));
        assert_eq!(error.stage(), "structuring");
        assert!(error.to_string().contains("Error while processing B.txt"));
        assert_eq!(
            *harness.structurer.calls.lock().expect("lock"),
            vec!["field=x".to_string(), "fail".to_string()]
        );
        assert!(!harness.artifact_path().exists());
        assert_eq!(harness.staged_entries(), 0);
        assert_eq!(harness.pipeline.metrics_snapshot().batches_failed, 1);
    }

    #[tokio::test]
    async fn extraction_failure_removes_staged_file() {
        let harness = Harness::new(RecordingExtractor {
            fail_on: Some("corrupt".into()),
            ..Default::default()
        });

        let error = harness
            .pipeline
            .process(uploads(&[("scan.pdf", "corrupt")]))
            .await
            .expect_err("extraction fails");

        assert!(matches!(
            error,
            ProcessingError::File {
                source: FileError::Extraction(_),
                ..
            }
        ));
        let seen = harness.extractor.seen.lock().expect("lock").clone();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].exists());
        assert_eq!(harness.staged_entries(), 0);
    }

    #[tokio::test]
    async fn staging_failure_names_first_file() {
        let dir = TempDir::new().expect("tempdir");
        let blocker = dir.path().join("uploads");
        std::fs::write(&blocker, "not a directory").expect("write");
        let pipeline = IngestionPipeline::with_components(
            Arc::new(RecordingExtractor::default()),
            Arc::new(ScriptedStructurer::default()),
            Arc::new(FileArtifactStore::new(dir.path().join("output.json"))),
            blocker,
            Duration::ZERO,
        );

        let error = pipeline
            .process(uploads(&[("A.txt", "field=x")]))
            .await
            .expect_err("staging fails");

        assert_eq!(error.file_name(), Some("A.txt"));
        assert_eq!(error.stage(), "staging");
    }

    #[tokio::test]
    async fn duplicate_names_process_their_own_bytes() {
        let harness = Harness::new(RecordingExtractor::default());

        let batch = harness
            .pipeline
            .process(uploads(&[("same.txt", "field=1"), ("same.txt", "field=2")]))
            .await
            .expect("batch");

        assert_eq!(batch.records[0]["field"], "1");
        assert_eq!(batch.records[1]["field"], "2");
    }

    #[tokio::test]
    async fn persistence_failure_is_distinct_from_file_failure() {
        let dir = TempDir::new().expect("tempdir");
        let pipeline = IngestionPipeline::with_components(
            Arc::new(RecordingExtractor::default()),
            Arc::new(ScriptedStructurer::default()),
            Arc::new(ReadOnlyStore),
            dir.path().join("uploads"),
            Duration::ZERO,
        );

        let error = pipeline
            .process(uploads(&[("A.txt", "field=x")]))
            .await
            .expect_err("persist fails");

        assert!(matches!(error, ProcessingError::Persistence(_)));
        assert_eq!(error.file_name(), None);
        assert_eq!(error.stage(), "persistence");
    }

    #[tokio::test]
    async fn cancelled_batch_still_cleans_staging() {
        struct StallingExtractor;

        #[async_trait]
        impl TextExtractor for StallingExtractor {
            async fn extract(&self, _path: &Path) -> Result<String, ExtractionError> {
                std::future::pending().await
            }
        }

        let dir = TempDir::new().expect("tempdir");
        let staging_root = dir.path().join("uploads");
        let pipeline = IngestionPipeline::with_components(
            Arc::new(StallingExtractor),
            Arc::new(ScriptedStructurer::default()),
            Arc::new(FileArtifactStore::new(dir.path().join("output.json"))),
            staging_root.clone(),
            Duration::ZERO,
        );

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            pipeline.process(uploads(&[("A.txt", "field=x")])),
        )
        .await;

        assert!(outcome.is_err());
        let remaining = std::fs::read_dir(&staging_root).expect("root").count();
        assert_eq!(remaining, 0);
    }
}
