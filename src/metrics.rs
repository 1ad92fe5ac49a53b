use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    batches_succeeded: AtomicU64,
    batches_failed: AtomicU64,
    files_processed: AtomicU64,
    wipes_completed: AtomicU64,
    wipes_failed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a batch that was processed and persisted.
    pub fn record_batch(&self, file_count: u64) {
        self.batches_succeeded.fetch_add(1, Ordering::Relaxed);
        self.files_processed.fetch_add(file_count, Ordering::Relaxed);
    }

    /// Record a batch that was aborted.
    pub fn record_failure(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a deferred wipe.
    pub fn record_wipe(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.wipes_completed
        } else {
            &self.wipes_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_succeeded: self.batches_succeeded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            wipes_completed: self.wipes_completed.load(Ordering::Relaxed),
            wipes_failed: self.wipes_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Batches fully processed and persisted since startup.
    pub batches_succeeded: u64,
    /// Batches aborted by a staging, extraction, structuring, or persistence failure.
    pub batches_failed: u64,
    /// Files contributing records to successful batches.
    pub files_processed: u64,
    /// Deferred wipes that reset the artifact.
    pub wipes_completed: u64,
    /// Deferred wipes that could not reset the artifact.
    pub wipes_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_batches_and_files() {
        let metrics = PipelineMetrics::new();
        metrics.record_batch(2);
        metrics.record_batch(3);
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_succeeded, 2);
        assert_eq!(snapshot.files_processed, 5);
        assert_eq!(snapshot.batches_failed, 1);
    }

    #[test]
    fn wipes_are_split_by_outcome() {
        let metrics = PipelineMetrics::new();
        metrics.record_wipe(true);
        metrics.record_wipe(true);
        metrics.record_wipe(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.wipes_completed, 2);
        assert_eq!(snapshot.wipes_failed, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        assert_eq!(PipelineMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
