//! Common error types for fhirlink.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::Timestamp;

/// A single item of a batch that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    /// Position of the item within its batch.
    pub index: usize,
    /// Logical id of the resource, when it could be determined.
    pub resource_id: Option<String>,
    /// Last-updated instant of the resource, when it could be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Timestamp>,
    /// Human readable cause.
    pub reason: String,
}

impl ItemFailure {
    /// Create a new failure record.
    pub fn new(index: usize, resource_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            index,
            resource_id,
            last_updated: None,
            reason: reason.into(),
        }
    }

    /// Attach the resource's last-updated instant.
    pub fn with_last_updated(mut self, last_updated: Timestamp) -> Self {
        self.last_updated = Some(last_updated);
        self
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_id {
            Some(id) => write!(f, "#{} ({}): {}", self.index, id, self.reason),
            None => write!(f, "#{}: {}", self.index, self.reason),
        }
    }
}

/// Top-level error type for fhirlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Query, count or upsert against the resource store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A single resource could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The sync configuration cannot be used to start a session.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every item of an inbound batch failed to apply.
    #[error("All {} items of the {data_type} batch failed to apply", failures.len())]
    BatchRejected {
        data_type: String,
        failures: Vec<ItemFailure>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The transfer was cancelled between batches.
    #[error("Transfer cancelled")]
    Cancelled,

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether repeating the same request from the last good checkpoint may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Store("db locked".to_string()).is_retryable());
        assert!(Error::Io(std::io::Error::other("disk")).is_retryable());
        assert!(!Error::Config("empty catalog".to_string()).is_retryable());
        assert!(!Error::Serialization("bad json".to_string()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_batch_rejected_message() {
        let err = Error::BatchRejected {
            data_type: "Patient".to_string(),
            failures: vec![
                ItemFailure::new(0, Some("p1".to_string()), "store offline"),
                ItemFailure::new(1, None, "not json"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "All 2 items of the Patient batch failed to apply"
        );
    }

    #[test]
    fn test_item_failure_display() {
        let with_id = ItemFailure::new(3, Some("obs-9".to_string()), "boom");
        let without_id = ItemFailure::new(4, None, "boom");
        assert_eq!(with_id.to_string(), "#3 (obs-9): boom");
        assert_eq!(without_id.to_string(), "#4: boom");
    }
}
