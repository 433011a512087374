//! Inbound side: decode and upsert batches from the peer.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use fhirlink_common::{Error, ItemFailure, Result, Timestamp};
use fhirlink_store::{ResourceStore, UpsertOutcome};

use crate::catalog::DataType;
use crate::codec::ResourceCodec;
use crate::registry::CodecRegistry;
use crate::wire::WireBatch;

/// Outcome of applying one inbound batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundResult {
    /// Checkpoint to persist once this result is acknowledged.
    pub high_water_mark: Timestamp,
    /// Resources that were stored.
    pub applied: usize,
    /// Of the stored resources, how many were new.
    pub created: usize,
    /// Resources that could not be decoded or stored, by batch position.
    pub failures: Vec<ItemFailure>,
}

struct Applied {
    last_updated: Timestamp,
    outcome: UpsertOutcome,
}

/// Applies wire batches to the local store.
#[derive(Clone)]
pub struct ReceiverEngine {
    store: Arc<dyn ResourceStore>,
    registry: Arc<CodecRegistry>,
    max_concurrency: usize,
}

impl ReceiverEngine {
    /// Create a receiver.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        registry: Arc<CodecRegistry>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            registry,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Decode and upsert every payload of `batch`.
    ///
    /// Items are processed concurrently, at most `max_concurrency` at a time.
    /// The high-water mark is computed only after every item has finished, and
    /// only over items that were stored: `max(prior_mark, last_updated of
    /// applied)`. Resources without an id get a fresh one before the upsert.
    /// Failures carry the resource's last-updated instant whenever the payload
    /// decoded, so the caller can keep its checkpoint from passing them.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if the batch belongs to another data type
    /// - `Error::NotFound` if no codec is registered for the type
    /// - `Error::BatchRejected` if the batch is non-empty and no item applied;
    ///   the prior mark stands
    pub async fn apply_batch(
        &self,
        data_type: &DataType,
        prior_mark: Timestamp,
        batch: &WireBatch,
    ) -> Result<InboundResult> {
        if batch.data_type_name != data_type.name() {
            return Err(Error::InvalidInput(format!(
                "Batch for {} received as {}",
                batch.data_type_name,
                data_type.name()
            )));
        }
        let codec = self.registry.resolve(data_type.name())?;

        if batch.is_empty() {
            return Ok(InboundResult {
                high_water_mark: prior_mark,
                applied: 0,
                created: 0,
                failures: Vec::new(),
            });
        }

        let outcomes: Vec<std::result::Result<Applied, ItemFailure>> =
            stream::iter(batch.resources.iter().enumerate())
                .map(|(index, payload)| {
                    let codec = codec.clone();
                    let store = self.store.clone();
                    let payload = payload.clone();
                    async move { apply_one(index, payload, codec, store).await }
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;

        let mut high_water_mark = prior_mark;
        let mut applied = 0;
        let mut created = 0;
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(item) => {
                    applied += 1;
                    if item.outcome == UpsertOutcome::Created {
                        created += 1;
                    }
                    high_water_mark = high_water_mark.max(item.last_updated);
                }
                Err(failure) => {
                    warn!("Failed to apply {} item {}", data_type.name(), failure);
                    failures.push(failure);
                }
            }
        }
        failures.sort_by_key(|f| f.index);

        if applied == 0 {
            return Err(Error::BatchRejected {
                data_type: data_type.name().to_string(),
                failures,
            });
        }

        debug!(
            "Applied {} batch: {} stored ({} new), {} failed, high-water mark {}",
            data_type.name(),
            applied,
            created,
            failures.len(),
            high_water_mark
        );

        Ok(InboundResult {
            high_water_mark,
            applied,
            created,
            failures,
        })
    }
}

async fn apply_one(
    index: usize,
    payload: String,
    codec: Arc<dyn ResourceCodec>,
    store: Arc<dyn ResourceStore>,
) -> std::result::Result<Applied, ItemFailure> {
    let decoded = tokio::task::spawn_blocking(move || codec.decode(&payload))
        .await
        .unwrap_or_else(|e| Err(Error::Serialization(format!("Decoder task failed: {}", e))));

    let mut resource = decoded.map_err(|e| ItemFailure::new(index, None, e.to_string()))?;
    let id = resource.ensure_id().to_string();
    let last_updated = resource.last_updated();

    match store.upsert(resource).await {
        Ok(outcome) => Ok(Applied {
            last_updated,
            outcome,
        }),
        Err(e) => Err(
            ItemFailure::new(index, Some(id), e.to_string()).with_last_updated(last_updated),
        ),
    }
}
