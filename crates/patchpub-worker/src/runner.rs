//! Batch orchestration: take a batch, process each item under retry, commit

use std::io;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::pipeline::{ItemFailureReason, ItemOutcome, RecordProcessor};
use crate::queue::{WorkItem, WorkQueue};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::source::ConnectionSource;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to commit queue checkpoint {path}: {source}")]
    Commit {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub batch_size: usize,
    /// Stop after the first batch instead of draining the queue
    pub one_batch_only: bool,
    pub retry: RetryPolicy,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            batch_size: 3,
            one_batch_only: true,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Raw lines taken from the queue
    pub lines: usize,
    /// Items parsed from those lines
    pub items: usize,
    pub success_count: usize,
    pub failures: Vec<(String, ItemFailureReason)>,
    /// Set when a fatal fault stopped the batch
    pub aborted: Option<String>,
    pub committed: bool,
    /// Lines left in the queue after this batch
    pub remaining: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub published: usize,
    pub failed: usize,
    pub aborted: bool,
}

pub struct BatchRunner {
    queue: WorkQueue,
    processor: RecordProcessor,
    settings: RunnerSettings,
}

impl BatchRunner {
    pub fn new(queue: WorkQueue, processor: RecordProcessor, settings: RunnerSettings) -> Self {
        Self {
            queue,
            processor,
            settings,
        }
    }

    /// Process batches until the queue is empty, a batch aborts, a batch makes
    /// no progress, or after one batch when configured so.
    pub async fn run<C: ConnectionSource>(&self, source: &C) -> Result<RunSummary, RunnerError> {
        let mut summary = RunSummary::default();

        while let Some(report) = self.run_batch(source).await? {
            summary.batches += 1;
            summary.published += report.success_count;
            summary.failed += report.failures.len();

            if report.aborted.is_some() {
                summary.aborted = true;
                break;
            }
            if self.settings.one_batch_only {
                break;
            }
            if report.success_count == 0 {
                warn!("Batch published nothing, stopping to avoid reprocessing the same lines");
                break;
            }
        }

        info!(
            batches = summary.batches,
            published = summary.published,
            failed = summary.failed,
            aborted = summary.aborted,
            "Run finished"
        );
        Ok(summary)
    }

    /// Process one batch. Returns `None` when the queue is empty.
    pub async fn run_batch<C: ConnectionSource>(
        &self,
        source: &C,
    ) -> Result<Option<BatchReport>, RunnerError> {
        let batch = self.queue.load_batch(self.settings.batch_size).await;
        if batch.is_empty() {
            info!(path = %self.queue.checkpoint_path().display(), "Queue is empty");
            return Ok(None);
        }

        if let Err(e) = self.queue.record_consumed(&batch.lines).await {
            error!(
                path = %self.queue.ledger_path().display(),
                error = %e,
                "Failed to append to processed ledger"
            );
        }

        info!(
            lines = batch.lines.len(),
            items = batch.items.len(),
            queued_after = batch.remainder.len(),
            "Processing batch"
        );

        let executor = RetryExecutor::new(source, self.settings.retry);
        let mut report = BatchReport {
            lines: batch.lines.len(),
            items: batch.items.len(),
            ..Default::default()
        };

        for item in &batch.items {
            match self.processor.process(&executor, item).await {
                ItemOutcome::Success(_) => {
                    if !report.failures.is_empty() {
                        warn!(
                            identifier = %item.identifier,
                            "Item published after an earlier failure in this batch; \
                             the checkpoint drops lines from the front of the batch"
                        );
                    }
                    report.success_count += 1;
                },
                ItemOutcome::ItemFailure(reason) => {
                    report.failures.push((item.identifier.clone(), reason));
                },
                ItemOutcome::FatalAbort(err) => {
                    error!(identifier = %item.identifier, error = %err, "Fatal fault, stopping batch");
                    report.aborted = Some(err.to_string());
                    break;
                },
            }
        }

        if report.success_count > 0 {
            let tail = batch.surviving_tail(report.success_count);
            self.queue
                .commit(tail, &batch.remainder)
                .await
                .map_err(|source| RunnerError::Commit {
                    path: self.queue.checkpoint_path().display().to_string(),
                    source,
                })?;
            report.committed = true;
            report.remaining = tail.len() + batch.remainder.len();
            info!(
                published = report.success_count,
                remaining = report.remaining,
                "Queue checkpoint committed"
            );
        } else {
            report.remaining = batch.lines.len() + batch.remainder.len();
            warn!("No item in the batch was published, queue left unchanged");
        }

        Ok(Some(report))
    }

    /// Process a single item outside the queue.
    pub async fn process_one<C: ConnectionSource>(&self, source: &C, item: &WorkItem) -> ItemOutcome {
        let executor = RetryExecutor::new(source, self.settings.retry);
        self.processor.process(&executor, item).await
    }
}
