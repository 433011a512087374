//! Per-type checkpoints and their persistence.
//!
//! Engines read checkpoints and return new high-water marks, but never write
//! them. Whoever drives the exchange saves a checkpoint only after the batch
//! that produced it has been applied on the receiving side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

use fhirlink_common::{Error, ItemFailure, Result, Timestamp};

/// Last-seen timestamp per resource type, in epoch millis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint {
    marks: BTreeMap<String, Timestamp>,
}

impl Checkpoint {
    /// Create an empty checkpoint: every type starts at the epoch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp for a resource type, 0 when absent.
    pub fn get(&self, resource_type: &str) -> Timestamp {
        self.marks.get(resource_type).copied().unwrap_or(0)
    }

    /// Set a resource type's timestamp, also allowing it to move backwards.
    pub fn set(&mut self, resource_type: impl Into<String>, mark: Timestamp) {
        self.marks.insert(resource_type.into(), mark);
    }

    /// Move a resource type's timestamp forward to `mark`.
    ///
    /// Returns `true` if the checkpoint changed. A mark below the current
    /// value is ignored.
    pub fn advance(&mut self, resource_type: &str, mark: Timestamp) -> bool {
        let current = self.get(resource_type);
        if mark > current {
            self.marks.insert(resource_type.to_string(), mark);
            true
        } else {
            false
        }
    }

    /// Builder form of [`Checkpoint::set`].
    pub fn with(mut self, resource_type: impl Into<String>, mark: Timestamp) -> Self {
        self.set(resource_type, mark);
        self
    }

    /// All explicit entries.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Timestamp)> {
        self.marks.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Highest checkpoint that stays at or below every failed item.
///
/// A failure with a known instant caps the mark at that instant, so the
/// inclusive lower bound sends the resource again. A failure whose instant is
/// unknown keeps the mark at `prior_mark`.
pub fn safe_mark<'a>(
    prior_mark: Timestamp,
    mark: Timestamp,
    failures: impl IntoIterator<Item = &'a ItemFailure>,
) -> Timestamp {
    failures
        .into_iter()
        .fold(mark, |mark, failure| match failure.last_updated {
            Some(ts) => mark.min(ts.max(prior_mark)),
            None => prior_mark,
        })
        .max(prior_mark)
}

/// Durable home for the checkpoint of a peer exchange.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the last saved checkpoint, or an empty one.
    async fn load(&self) -> Result<Checkpoint>;

    /// Replace the saved checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Checkpoint store kept in memory.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoint: RwLock<Checkpoint>,
}

impl MemoryCheckpointStore {
    /// Create a store holding `checkpoint`.
    pub fn new(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint: RwLock::new(checkpoint),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Checkpoint> {
        Ok(self.checkpoint.read().await.clone())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self.checkpoint.write().await = checkpoint.clone();
        Ok(())
    }
}

/// Checkpoint store backed by a JSON file.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store at `path`. The file is created on first save.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Location of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Checkpoint> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Checkpoint::new());
        }
        let content = fs::read_to_string(&self.path).await?;
        Checkpoint::from_json(&content)
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, checkpoint.to_json()?).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_type_defaults_to_epoch() {
        let checkpoint = Checkpoint::new().with("Patient", 150);
        assert_eq!(checkpoint.get("Patient"), 150);
        assert_eq!(checkpoint.get("Observation"), 0);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut checkpoint = Checkpoint::new();
        assert!(checkpoint.advance("Patient", 200));
        assert!(!checkpoint.advance("Patient", 100));
        assert!(!checkpoint.advance("Patient", 200));
        assert_eq!(checkpoint.get("Patient"), 200);
    }

    #[test]
    fn test_json_is_plain_map() {
        let checkpoint = Checkpoint::new().with("Patient", 150).with("Observation", 0);
        let value: serde_json::Value =
            serde_json::from_str(&checkpoint.to_json().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"Patient": 150, "Observation": 0}));
        assert_eq!(Checkpoint::from_json(&checkpoint.to_json().unwrap()).unwrap(), checkpoint);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCheckpointStore::default();
        assert_eq!(store.load().await.unwrap(), Checkpoint::new());

        let checkpoint = Checkpoint::new().with("Group", 9);
        store.save(&checkpoint).await.unwrap();
        assert_eq!(store.load().await.unwrap(), checkpoint);
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));

        assert_eq!(store.load().await.unwrap(), Checkpoint::new());

        let checkpoint = Checkpoint::new().with("Patient", 300);
        store.save(&checkpoint).await.unwrap();
        assert_eq!(store.load().await.unwrap(), checkpoint);
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let store = FileCheckpointStore::new(&path);
        assert!(matches!(store.load().await, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_safe_mark_caps_at_failed_item() {
        let failures = vec![
            ItemFailure::new(0, Some("p1".to_string()), "refused").with_last_updated(100),
            ItemFailure::new(2, Some("p3".to_string()), "refused").with_last_updated(250),
        ];
        assert_eq!(safe_mark(50, 300, &failures), 100);
        assert_eq!(safe_mark(50, 300, []), 300);
    }

    #[test]
    fn test_safe_mark_unknown_instant_holds_prior() {
        let failures = vec![
            ItemFailure::new(0, Some("p1".to_string()), "refused").with_last_updated(100),
            ItemFailure::new(1, None, "not json"),
        ];
        assert_eq!(safe_mark(50, 300, &failures), 50);
    }

    #[test]
    fn test_safe_mark_never_below_prior() {
        let failures = vec![ItemFailure::new(0, None, "x").with_last_updated(10)];
        assert_eq!(safe_mark(50, 300, &failures), 50);
    }
}
