//! Resource store trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fhirlink_common::{Resource, Result, Timestamp};

/// Filter on the `_lastUpdated` index: matches resources with
/// `last_updated >= since`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastUpdatedFilter {
    /// Inclusive lower bound in epoch millis.
    pub since: Timestamp,
}

impl LastUpdatedFilter {
    /// Match everything at or after `since`.
    pub fn since(since: Timestamp) -> Self {
        Self { since }
    }

    /// Check whether a resource passes the filter.
    pub fn matches(&self, resource: &Resource) -> bool {
        resource.last_updated() >= self.since
    }
}

/// Sort order on the `_lastUpdated` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// A paged query against one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuery {
    /// Resource type to search.
    pub resource_type: String,
    /// Last-updated predicate.
    pub filter: LastUpdatedFilter,
    /// Sort order by last-updated.
    pub sort: SortOrder,
    /// Number of matching resources to skip.
    pub offset: usize,
    /// Maximum number of resources to return.
    pub limit: usize,
}

impl ResourceQuery {
    /// Query `resource_type` for resources updated at or after `since`, oldest first.
    pub fn updated_since(resource_type: impl Into<String>, since: Timestamp) -> Self {
        Self {
            resource_type: resource_type.into(),
            filter: LastUpdatedFilter::since(since),
            sort: SortOrder::Ascending,
            offset: 0,
            limit: usize::MAX,
        }
    }

    /// Set the page to fetch.
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    /// No resource with that id existed.
    Created,
    /// An existing resource with that id was replaced.
    Updated,
}

/// Clinical resource store.
///
/// Implementations must serialize conflicting writes to the same resource id;
/// the replication core adds no locking of its own.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get the store name (e.g., "memory").
    fn name(&self) -> &str;

    /// Check whether the store understands a resource type name.
    fn is_valid_type(&self, resource_type: &str) -> bool;

    /// Search resources.
    ///
    /// # Postconditions
    /// - Every returned resource matches `query.filter`
    /// - Results are ordered by last-updated per `query.sort`, ties by id
    /// - At most `query.limit` results, after skipping `query.offset`
    ///
    /// # Errors
    /// - `Error::Store` on query failure
    async fn query(&self, query: &ResourceQuery) -> Result<Vec<Resource>>;

    /// Count resources matching a filter without materializing them.
    async fn count(&self, resource_type: &str, filter: &LastUpdatedFilter) -> Result<u64>;

    /// Create the resource, or replace the stored resource with the same id.
    ///
    /// # Preconditions
    /// - Resource has an id
    ///
    /// # Errors
    /// - `Error::InvalidInput` if the resource has no id or an unknown type
    /// - `Error::Store` on write failure
    async fn upsert(&self, resource: Resource) -> Result<UpsertOutcome>;

    /// Load a resource by type and id.
    ///
    /// # Errors
    /// - `Error::NotFound` if no such resource exists
    async fn get(&self, resource_type: &str, id: &str) -> Result<Resource>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_is_inclusive() {
        let filter = LastUpdatedFilter::since(200);
        let at = Resource::new("Patient", "a", 200).unwrap();
        let before = Resource::new("Patient", "b", 199).unwrap();
        let after = Resource::new("Patient", "c", 201).unwrap();

        assert!(filter.matches(&at));
        assert!(!filter.matches(&before));
        assert!(filter.matches(&after));
    }

    #[test]
    fn test_query_builder() {
        let query = ResourceQuery::updated_since("Encounter", 10).page(20, 5);
        assert_eq!(query.resource_type, "Encounter");
        assert_eq!(query.filter.since, 10);
        assert_eq!(query.sort, SortOrder::Ascending);
        assert_eq!(query.offset, 20);
        assert_eq!(query.limit, 5);
    }

    #[test]
    fn test_query_serialization() {
        let query = ResourceQuery::updated_since("Patient", 150).page(0, 10);
        let json = serde_json::to_string(&query).unwrap();
        let restored: ResourceQuery = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, query);
    }
}
