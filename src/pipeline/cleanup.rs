//! Deferred wipe of the output artifact.
//!
//! A successful batch hands back a [`WipeTicket`]. The ticket submits a wipe job to the
//! [`CleanupQueue`] when it is submitted explicitly or dropped; the HTTP layer parks it inside
//! the response body so the job is queued only once the payload has left the handler. A
//! single background worker drains the queue in submission order. Wipe failures are logged
//! and counted, never retried, and never reach a request.

use crate::metrics::PipelineMetrics;
use crate::pipeline::artifact::ArtifactStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

enum CleanupJob {
    Wipe { batch_id: Uuid, submitted: Instant },
    Barrier(oneshot::Sender<()>),
}

/// Submission side of the cleanup worker.
#[derive(Clone)]
pub struct CleanupQueue {
    sender: mpsc::UnboundedSender<CleanupJob>,
}

impl CleanupQueue {
    /// Spawn the cleanup worker on the current Tokio runtime.
    ///
    /// The worker exits once the queue and every outstanding ticket have been dropped.
    pub fn spawn(
        store: Arc<dyn ArtifactStore>,
        metrics: Arc<PipelineMetrics>,
        delay: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(receiver, store, metrics, delay));
        (Self { sender }, worker)
    }

    /// Issue a ticket that wipes the artifact once submitted or dropped.
    pub fn ticket(&self, batch_id: Uuid) -> WipeTicket {
        WipeTicket {
            sender: Some(self.sender.clone()),
            batch_id,
        }
    }

    /// Wait until every job submitted before this call has finished.
    pub async fn drain(&self) {
        let (done, finished) = oneshot::channel();
        if self.sender.send(CleanupJob::Barrier(done)).is_err() {
            return;
        }
        let _ = finished.await;
    }
}

/// Pending wipe of the output artifact for one batch.
#[derive(Debug)]
pub struct WipeTicket {
    sender: Option<mpsc::UnboundedSender<CleanupJob>>,
    batch_id: Uuid,
}

impl WipeTicket {
    /// Batch whose output this ticket wipes.
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Queue the wipe now.
    pub fn submit(mut self) {
        self.dispatch();
    }

    fn dispatch(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        let batch_id = self.batch_id;
        let job = CleanupJob::Wipe {
            batch_id,
            submitted: Instant::now(),
        };
        if sender.send(job).is_err() {
            tracing::warn!(%batch_id, "Cleanup worker stopped; output artifact not wiped");
        } else {
            tracing::debug!(%batch_id, "Queued output artifact wipe");
        }
    }
}

impl Drop for WipeTicket {
    fn drop(&mut self) {
        self.dispatch();
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<CleanupJob>,
    store: Arc<dyn ArtifactStore>,
    metrics: Arc<PipelineMetrics>,
    delay: Duration,
) {
    while let Some(job) = receiver.recv().await {
        match job {
            CleanupJob::Wipe {
                batch_id,
                submitted,
            } => {
                // Delay counts from submission so queued wipes do not stack their waits.
                tokio::time::sleep_until(submitted + delay).await;
                match store.wipe().await {
                    Ok(()) => {
                        metrics.record_wipe(true);
                        tracing::info!(%batch_id, "Cleared output artifact");
                    }
                    Err(error) => {
                        metrics.record_wipe(false);
                        tracing::error!(%batch_id, error = %error, "Could not clear output artifact");
                    }
                }
            }
            CleanupJob::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Cleanup worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::artifact::{ArtifactError, FileArtifactStore};
    use crate::structuring::Record;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct FailingStore;

    #[async_trait]
    impl ArtifactStore for FailingStore {
        async fn persist(&self, _records: &[Record]) -> Result<(), ArtifactError> {
            Ok(())
        }

        async fn wipe(&self) -> Result<(), ArtifactError> {
            Err(ArtifactError::Io {
                path: "output.json".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }

        async fn read(&self) -> Result<Vec<Record>, ArtifactError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn dropped_ticket_wipes_artifact() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(FileArtifactStore::new(dir.path().join("output.json")));
        let metrics = Arc::new(PipelineMetrics::new());
        let (queue, _worker) = CleanupQueue::spawn(store.clone(), metrics.clone(), Duration::ZERO);

        let record = json!({"field": "x"}).as_object().cloned().expect("object");
        store.persist(&[record]).await.expect("persist");

        let ticket = queue.ticket(Uuid::new_v4());
        queue.drain().await;
        assert_eq!(store.read().await.expect("read").len(), 1);

        drop(ticket);
        queue.drain().await;
        assert!(store.read().await.expect("read").is_empty());
        assert_eq!(metrics.snapshot().wipes_completed, 1);
    }

    #[tokio::test]
    async fn submitted_ticket_wipes_once() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(FileArtifactStore::new(dir.path().join("output.json")));
        let metrics = Arc::new(PipelineMetrics::new());
        let (queue, _worker) = CleanupQueue::spawn(store, metrics.clone(), Duration::ZERO);

        queue.ticket(Uuid::new_v4()).submit();
        queue.drain().await;

        assert_eq!(metrics.snapshot().wipes_completed, 1);
    }

    #[tokio::test]
    async fn wipe_failures_are_counted_not_raised() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (queue, _worker) =
            CleanupQueue::spawn(Arc::new(FailingStore), metrics.clone(), Duration::ZERO);

        queue.ticket(Uuid::new_v4()).submit();
        queue.ticket(Uuid::new_v4()).submit();
        queue.drain().await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.wipes_failed, 2);
        assert_eq!(snapshot.wipes_completed, 0);
    }

    #[tokio::test]
    async fn worker_stops_when_all_senders_are_gone() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (queue, worker) = CleanupQueue::spawn(Arc::new(FailingStore), metrics, Duration::ZERO);

        drop(queue);
        worker.await.expect("worker exits cleanly");
    }

    #[tokio::test]
    async fn queued_wipes_share_one_delay() {
        let metrics = Arc::new(PipelineMetrics::new());
        let delay = Duration::from_millis(150);
        let (queue, _worker) = CleanupQueue::spawn(Arc::new(FailingStore), metrics.clone(), delay);

        let started = std::time::Instant::now();
        for _ in 0..4 {
            queue.ticket(Uuid::new_v4()).submit();
        }
        queue.drain().await;

        let elapsed = started.elapsed();
        assert!(elapsed >= delay, "wipe ran before its delay: {elapsed:?}");
        assert!(elapsed < delay * 3, "delays stacked: {elapsed:?}");
        assert_eq!(metrics.snapshot().wipes_failed, 4);
    }
}
