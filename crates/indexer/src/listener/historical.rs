//! Batch replay of a closed block range.
//!
//! Batches run strictly one after another. Each batch is retried as a whole
//! with a fixed delay; a batch that keeps failing is logged and skipped. The
//! checkpoint moves to the end of every batch either way, and the
//! unprocessed sweep picks up whatever failed inside it.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};

use crate::checkpoint::SyncCheckpoint;
use crate::config::SyncConfig;
use crate::error::{IngestionError, Result};
use crate::pipeline::{IngestPipeline, IngestReport};
use crate::retry::RetryExecutor;
use crate::shutdown::ShutdownSignal;

/// Summary of one [`HistoricalSync::sync_range`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Batches attempted
    pub batches: u64,
    /// Batches skipped after exhausting their retries
    pub failed_batches: u64,
    /// Event counters over all batches
    pub events: IngestReport,
    /// Last block the checkpoint was advanced to
    pub last_block: Option<u64>,
    /// The run stopped early on shutdown
    pub cancelled: bool,
    /// The run was refused because another one was active
    pub skipped: bool,
}

/// Historical sync engine.
#[derive(Debug)]
pub struct HistoricalSync {
    pipeline: IngestPipeline,
    checkpoint: SyncCheckpoint,
    config: SyncConfig,
    in_progress: AtomicBool,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl HistoricalSync {
    /// Create the engine.
    pub fn new(pipeline: IngestPipeline, checkpoint: SyncCheckpoint, config: SyncConfig) -> Self {
        Self {
            pipeline,
            checkpoint,
            config,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Whether a run is active.
    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Replay `[start, end]` in batches of `batch_size` blocks.
    ///
    /// `start > end` and a concurrent call are both no-ops with a warning.
    /// Only a failure to persist the checkpoint is returned as an error.
    pub async fn sync_range(
        &self,
        start: u64,
        end: u64,
        shutdown: &ShutdownSignal,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        if start > end {
            warn!(start, end, "Ignoring sync of empty block range");
            return Ok(report);
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(start, end, "Historical sync already in progress, ignoring request");
            report.skipped = true;
            return Ok(report);
        }
        let _guard = RunGuard(&self.in_progress);

        let batch_size = self.config.batch_size.max(1);
        let retry = RetryExecutor::new(self.config.batch_retry()).with_shutdown(shutdown.clone());

        info!(
            start,
            end,
            batch_size,
            "Starting historical sync of {} blocks",
            end - start + 1
        );

        let mut batch_start = start;
        loop {
            if shutdown.is_triggered() {
                report.cancelled = true;
                break;
            }

            let batch_end = batch_start.saturating_add(batch_size - 1).min(end);
            report.batches += 1;

            let result = retry
                .execute("sync_batch", || self.pipeline.ingest_range(batch_start, batch_end))
                .await;

            match result {
                Ok(batch) => {
                    if batch.events > 0 {
                        info!(
                            batch_start,
                            batch_end,
                            processed = batch.processed,
                            failed = batch.failed,
                            duplicates = batch.duplicates,
                            "Batch complete"
                        );
                    }
                    report.events.merge(&batch);
                }
                Err(IngestionError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(err) => {
                    error!(batch_start, batch_end, error = %err, "Batch failed, skipping");
                    report.failed_batches += 1;
                }
            }

            self.checkpoint.advance(batch_end).await?;
            report.last_block = Some(batch_end);

            if batch_end >= end {
                break;
            }
            if !shutdown.sleep(self.config.batch_delay()).await {
                report.cancelled = true;
                break;
            }
            batch_start = batch_end + 1;
        }

        if report.cancelled {
            info!(last_block = ?report.last_block, "Historical sync interrupted by shutdown");
        } else {
            info!(
                batches = report.batches,
                failed_batches = report.failed_batches,
                processed = report.events.processed,
                failed = report.events.failed,
                "Historical sync finished"
            );
        }
        Ok(report)
    }
}
