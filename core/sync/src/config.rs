//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use fhirlink_common::{Error, Result};

/// What to do with configured resource type names the store does not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidTypePolicy {
    /// Drop unrecognized names and log a warning.
    #[default]
    Drop,
    /// Fail catalog resolution on the first unrecognized name.
    Reject,
}

/// Configuration for a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Explicit resource types to synchronize. `None` or empty selects the defaults.
    pub resources_to_sync: Option<Vec<String>>,
    /// Handling of unrecognized names in `resources_to_sync`.
    pub invalid_type_policy: InvalidTypePolicy,
    /// Resources per batch.
    pub batch_size: usize,
    /// Upper bound on resources encoded or applied concurrently.
    pub max_concurrency: usize,
    /// Maximum number of retries for store operations.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub retry_initial_delay_ms: u64,
    /// Cap on the backoff delay, in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resources_to_sync: None,
            invalid_type_policy: InvalidTypePolicy::Drop,
            batch_size: 25,
            max_concurrency: 4,
            max_retries: 3,
            retry_initial_delay_ms: 500,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl SyncConfig {
    /// Set the explicit resource type list.
    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources_to_sync = Some(resources.into_iter().map(Into::into).collect());
        self
    }

    /// Set the invalid type policy.
    pub fn with_invalid_type_policy(mut self, policy: InvalidTypePolicy) -> Self {
        self.invalid_type_policy = policy;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the concurrency limit.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Check numeric limits.
    ///
    /// # Errors
    /// - `Error::Config` if `batch_size` or `max_concurrency` is zero
    /// - `Error::Config` if the retry delay cap is below the initial delay
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batchSize must be greater than zero".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(Error::Config(
                "maxConcurrency must be greater than zero".to_string(),
            ));
        }
        if self.retry_max_delay_ms < self.retry_initial_delay_ms {
            return Err(Error::Config(
                "retryMaxDelayMs must not be below retryInitialDelayMs".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&content)
    }
}
