//! Outbound side: extract, serialize and stamp batches.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use fhirlink_common::{Error, ItemFailure, Resource, Result, Timestamp};

use crate::catalog::DataType;
use crate::reader::ResourceBatchReader;
use crate::registry::CodecRegistry;
use crate::wire::{BatchWindow, WireBatch};

/// A batch ready to send, with the resources that could not be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundBatch {
    /// Envelope for the peer.
    pub batch: WireBatch,
    /// Number of resources the page contained, including skipped ones.
    pub page_len: usize,
    /// Resources skipped because they failed to serialize.
    pub failures: Vec<ItemFailure>,
}

impl OutboundBatch {
    /// True when the page was empty: nothing is left at this checkpoint and
    /// the caller should move on to the next data type.
    pub fn is_exhausted(&self) -> bool {
        self.page_len == 0
    }
}

/// Produces wire batches for requested (type, checkpoint, window) triples.
///
/// Never persists checkpoints: the returned high-water mark is for the caller
/// to save once the peer has applied the batch.
#[derive(Clone)]
pub struct SenderEngine {
    reader: ResourceBatchReader,
    registry: Arc<CodecRegistry>,
    max_concurrency: usize,
}

impl SenderEngine {
    /// Create a sender.
    pub fn new(
        reader: ResourceBatchReader,
        registry: Arc<CodecRegistry>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            reader,
            registry,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Load a page and serialize it.
    ///
    /// Resources are encoded on blocking worker threads, at most
    /// `max_concurrency` at a time, and re-joined in page order. A resource
    /// that fails to encode is logged, reported in `failures` and left out of
    /// the envelope; the rest of the page still goes out.
    ///
    /// # Postconditions
    /// - `batch.resources` keep the page's last-updated order
    /// - `batch.high_water_mark == max(checkpoint, max last_updated of page)`
    ///
    /// # Errors
    /// - `Error::NotFound` if no codec is registered for the type
    /// - `Error::Store` if the page query fails
    pub async fn produce_batch(
        &self,
        data_type: &DataType,
        checkpoint: Timestamp,
        window: BatchWindow,
    ) -> Result<OutboundBatch> {
        let codec = self.registry.resolve(data_type.name())?;
        let page = self.reader.load_page(data_type, checkpoint, window).await?;

        if page.is_empty() {
            debug!("No {} resources left from {}", data_type.name(), checkpoint);
            return Ok(OutboundBatch {
                batch: WireBatch::empty(data_type.name(), checkpoint),
                page_len: 0,
                failures: Vec::new(),
            });
        }

        let page_len = page.len();
        let high_water_mark = page
            .iter()
            .map(Resource::last_updated)
            .fold(checkpoint, Timestamp::max);

        let encoded: Vec<(usize, Option<String>, Timestamp, Result<String>)> =
            stream::iter(page.into_iter().enumerate())
                .map(|(index, resource)| {
                    let codec = codec.clone();
                    async move {
                        let id = resource.id().map(str::to_string);
                        let last_updated = resource.last_updated();
                        let result = tokio::task::spawn_blocking(move || codec.encode(&resource))
                            .await
                            .unwrap_or_else(|e| {
                                Err(Error::Serialization(format!("Encoder task failed: {}", e)))
                            });
                        (index, id, last_updated, result)
                    }
                })
                .buffered(self.max_concurrency)
                .collect()
                .await;

        let mut resources = Vec::with_capacity(page_len);
        let mut failures = Vec::new();
        for (index, id, last_updated, result) in encoded {
            match result {
                Ok(payload) => resources.push(payload),
                Err(e) => {
                    warn!(
                        "Skipping {} resource {:?} at position {}: {}",
                        data_type.name(),
                        id,
                        index,
                        e
                    );
                    failures.push(
                        ItemFailure::new(index, id, e.to_string()).with_last_updated(last_updated),
                    );
                }
            }
        }

        debug!(
            "Prepared {} batch: {} sent, {} skipped, high-water mark {}",
            data_type.name(),
            resources.len(),
            failures.len(),
            high_water_mark
        );

        Ok(OutboundBatch {
            batch: WireBatch {
                data_type_name: data_type.name().to_string(),
                resources,
                high_water_mark,
            },
            page_len,
            failures,
        })
    }
}
