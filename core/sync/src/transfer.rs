//! In-process transfer between two sessions.
//!
//! The driver plays the transport role: it walks the receiving catalog in
//! order, pulls batches from the sending session, hands them to the receiving
//! session and saves the checkpoint after every applied batch. A saved
//! checkpoint never passes a resource that failed to encode or apply.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fhirlink_common::{Error, ItemFailure, Result};

use crate::catalog::DataType;
use crate::checkpoint::{safe_mark, Checkpoint, CheckpointStore};
use crate::counter::RecordCount;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::session::Session;
use crate::state::{TransferEntry, TransferProgress};

/// Summary of a completed transfer.
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Per-type progress, every entry done.
    pub progress: TransferProgress,
    /// Checkpoint as last saved.
    pub checkpoint: Checkpoint,
    /// What the sender counted before the first batch.
    pub expected: RecordCount,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Drives a full exchange from a sending to a receiving session.
pub struct TransferDriver {
    source: Arc<Session>,
    target: Arc<Session>,
    checkpoints: Arc<dyn CheckpointStore>,
    retry: RetryExecutor,
    cancel: CancellationToken,
}

impl TransferDriver {
    /// Create a driver. Retries follow the receiving session's `max_retries`.
    pub fn new(
        source: Arc<Session>,
        target: Arc<Session>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let retry = RetryExecutor::new(RetryConfig::from(target.config()));
        Self {
            source,
            target,
            checkpoints,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the retry configuration.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = RetryExecutor::new(config);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run before the next batch.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Transfer everything newer than the saved checkpoint.
    ///
    /// Types are handled one after the other in the receiver's catalog order.
    /// Types the sender does not offer are skipped. Store failures are retried
    /// with backoff; any other error stops the run with the checkpoint of the
    /// last applied batch already saved.
    ///
    /// # Errors
    /// - `Error::Cancelled` if the token fired between two batches
    /// - `Error::BatchRejected` if the receiver could not apply any item of a batch
    /// - `Error::Store` or `Error::Io` once retries are exhausted
    pub async fn run(&self) -> Result<TransferReport> {
        let started = Instant::now();
        let mut checkpoint = self.checkpoints.load().await?;

        let plan: Vec<DataType> = self
            .target
            .catalog()
            .iter()
            .filter(|t| {
                let offered = self.source.catalog().contains(t.name());
                if !offered {
                    warn!("Peer does not offer {}, skipping", t.name());
                }
                offered
            })
            .cloned()
            .collect();

        let source = self.source.as_ref();
        let starting_point = &checkpoint;
        let expected = self
            .retry
            .execute(|| async move { source.count_all(starting_point).await })
            .await?;
        info!(
            "Starting transfer of {} resources across {} data types",
            expected.total,
            plan.len()
        );

        let mut progress = TransferProgress::new(&plan, &checkpoint);
        for data_type in &plan {
            let Some(entry) = progress.get_mut(data_type.name()) else {
                continue;
            };
            if let Err(e) = self.transfer_type(data_type, &mut checkpoint, entry).await {
                entry.mark_failed(e.to_string());
                match e {
                    Error::Cancelled => info!("Transfer cancelled during {}", data_type.name()),
                    _ => error!("Transfer of {} failed: {}", data_type.name(), e),
                }
                return Err(e);
            }
        }
        progress.finish();

        let duration = started.elapsed();
        info!(
            "Transfer finished in {:?}: {} sent, {} applied, {} failed",
            duration,
            progress.total_sent(),
            progress.total_applied(),
            progress.total_failed()
        );

        Ok(TransferReport {
            progress,
            checkpoint,
            expected,
            duration,
        })
    }

    async fn transfer_type(
        &self,
        data_type: &DataType,
        checkpoint: &mut Checkpoint,
        entry: &mut TransferEntry,
    ) -> Result<()> {
        let name = data_type.name();
        let source = self.source.as_ref();
        let target = self.target.as_ref();
        let since = checkpoint.get(name);
        let mut window = source.first_window()?;
        let mut held: Vec<ItemFailure> = Vec::new();

        info!("Transferring {} from checkpoint {}", name, since);

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let outbound = self
                .retry
                .execute(|| async move { source.produce_batch(name, since, window).await })
                .await?;

            if outbound.is_exhausted() {
                entry.mark_done();
                info!(
                    "{} done after {} batches at checkpoint {}",
                    name,
                    entry.batches,
                    checkpoint.get(name)
                );
                return Ok(());
            }

            let prior = checkpoint.get(name);
            let batch = &outbound.batch;
            let inbound = self
                .retry
                .execute(|| async move { target.apply_batch(name, prior, batch).await })
                .await?;

            let failed = outbound.failures.len() + inbound.failures.len();
            held.extend(outbound.failures.iter().cloned());
            held.extend(inbound.failures.iter().cloned());
            let mark = safe_mark(prior, inbound.high_water_mark, &held);
            if mark < inbound.high_water_mark {
                warn!(
                    "Holding {} checkpoint at {} below {} failed resources",
                    name,
                    mark,
                    held.len()
                );
            }

            if checkpoint.advance(name, mark) {
                let saved = &*checkpoint;
                let store = self.checkpoints.as_ref();
                self.retry
                    .execute(|| async move { store.save(saved).await })
                    .await?;
            }

            entry.record_batch(
                outbound.page_len,
                outbound.batch.len() as u64,
                checkpoint.get(name),
                inbound.applied as u64,
                failed as u64,
            )?;
            debug!(
                "{} batch {} acknowledged up to {}",
                name,
                entry.batches,
                checkpoint.get(name)
            );

            window = window.advance(outbound.page_len);
        }
    }
}
