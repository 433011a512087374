//! Paged extraction of resources in checkpoint order.

use std::sync::Arc;
use tracing::debug;

use fhirlink_common::{Resource, Result, Timestamp};
use fhirlink_store::{ResourceQuery, ResourceStore};

use crate::catalog::DataType;
use crate::wire::BatchWindow;

/// Reads pages of one resource type, oldest first, from a checkpoint on.
///
/// The lower bound is inclusive: resuming from a checkpoint re-reads resources
/// stamped exactly at the checkpoint, which upsert on the receiving side makes
/// harmless, instead of risking a gap.
#[derive(Clone)]
pub struct ResourceBatchReader {
    store: Arc<dyn ResourceStore>,
}

impl ResourceBatchReader {
    /// Create a reader over `store`.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Load one page of `data_type` with `last_updated >= checkpoint`.
    ///
    /// The page may be shorter than `window.size`, or empty at the end of data.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if the window is empty
    /// - `Error::Store` if the query fails; the same request may be retried
    pub async fn load_page(
        &self,
        data_type: &DataType,
        checkpoint: Timestamp,
        window: BatchWindow,
    ) -> Result<Vec<Resource>> {
        window.validate()?;

        let query = ResourceQuery::updated_since(data_type.name(), checkpoint)
            .page(window.offset, window.size);
        let page = self.store.query(&query).await?;

        debug!(
            "Loaded {} {} resources from checkpoint {} at offset {}",
            page.len(),
            data_type.name(),
            checkpoint,
            window.offset
        );
        Ok(page)
    }
}
