//! Record counting for progress reporting.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use fhirlink_common::Result;
use fhirlink_store::{LastUpdatedFilter, ResourceStore};

use crate::catalog::DataTypeCatalog;
use crate::checkpoint::Checkpoint;
use crate::wire::ProgressEnvelope;

/// Resources left to transfer, in total and per resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCount {
    pub total: u64,
    pub per_type: BTreeMap<String, u64>,
}

impl RecordCount {
    /// Count for one resource type, 0 if it is not part of the count.
    pub fn for_type(&self, resource_type: &str) -> u64 {
        self.per_type.get(resource_type).copied().unwrap_or(0)
    }
}

/// Counts beyond `i64::MAX` saturate.
impl From<&RecordCount> for ProgressEnvelope {
    fn from(count: &RecordCount) -> Self {
        Self {
            total: i64::try_from(count.total).unwrap_or(i64::MAX),
            per_type: count
                .per_type
                .iter()
                .map(|(name, n)| (name.clone(), i64::try_from(*n).unwrap_or(i64::MAX)))
                .collect(),
        }
    }
}

/// Counts resources at or after each type's checkpoint.
#[derive(Clone)]
pub struct RecordCounter {
    store: Arc<dyn ResourceStore>,
}

impl RecordCounter {
    /// Create a counter over `store`.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Count every catalog entry with the store's count query.
    ///
    /// Uses the same `last_updated >= checkpoint` predicate as paging, so the
    /// total equals what repeated paging from `checkpoint` would return.
    ///
    /// # Errors
    /// - `Error::Store` if any count query fails
    pub async fn count_all(
        &self,
        catalog: &DataTypeCatalog,
        checkpoint: &Checkpoint,
    ) -> Result<RecordCount> {
        let mut count = RecordCount::default();

        for data_type in catalog {
            let since = checkpoint.get(data_type.name());
            let n = self
                .store
                .count(data_type.name(), &LastUpdatedFilter::since(since))
                .await?;

            debug!("{} {} records since {}", n, data_type.name(), since);
            count.total += n;
            count.per_type.insert(data_type.name().to_string(), n);
        }

        Ok(count)
    }
}
