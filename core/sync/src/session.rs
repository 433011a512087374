//! Per-exchange sync session.
//!
//! A session binds one resolved catalog to one store and one codec registry.
//! It is the only entry point a transport needs: it announces the data types,
//! produces batches on the sending side and applies them on the receiving side.

use std::sync::Arc;
use tracing::info;

use fhirlink_common::{Error, Result, Timestamp};
use fhirlink_store::ResourceStore;

use crate::catalog::{DataType, DataTypeCatalog};
use crate::checkpoint::Checkpoint;
use crate::config::SyncConfig;
use crate::counter::{RecordCount, RecordCounter};
use crate::reader::ResourceBatchReader;
use crate::receiver::{InboundResult, ReceiverEngine};
use crate::registry::CodecRegistry;
use crate::sender::{OutboundBatch, SenderEngine};
use crate::wire::{BatchWindow, DataTypeDescriptor, ProgressEnvelope, WireBatch};

/// Sync state for one peer exchange.
pub struct Session {
    config: SyncConfig,
    catalog: DataTypeCatalog,
    store: Arc<dyn ResourceStore>,
    sender: SenderEngine,
    receiver: ReceiverEngine,
    counter: RecordCounter,
}

impl Session {
    /// Open a session over `store`.
    ///
    /// # Errors
    /// - `Error::Config` if the configuration is invalid, the catalog resolves
    ///   empty, or a catalog type has no codec in `registry`
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn ResourceStore>,
        registry: Arc<CodecRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = DataTypeCatalog::resolve(&config, |name| store.is_valid_type(name))?;

        if let Some(missing) = catalog.iter().find(|t| !registry.has_codec(t.name())) {
            return Err(Error::Config(format!(
                "No codec registered for resource type '{}'",
                missing.name()
            )));
        }

        info!(
            "Opened sync session on {} store with {} data types: {}",
            store.name(),
            catalog.len(),
            catalog.names().join(", ")
        );

        let sender = SenderEngine::new(
            ResourceBatchReader::new(store.clone()),
            registry.clone(),
            config.max_concurrency,
        );
        let receiver = ReceiverEngine::new(store.clone(), registry, config.max_concurrency);
        let counter = RecordCounter::new(store.clone());

        Ok(Self {
            config,
            catalog,
            store,
            sender,
            receiver,
            counter,
        })
    }

    /// The resolved catalog.
    pub fn catalog(&self) -> &DataTypeCatalog {
        &self.catalog
    }

    /// The configuration the session was opened with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Descriptors to announce to the peer, in sync order.
    pub fn descriptors(&self) -> Vec<DataTypeDescriptor> {
        self.catalog.iter().map(DataTypeDescriptor::from).collect()
    }

    /// Look up a catalog entry.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if `name` is not part of this session
    pub fn data_type(&self, name: &str) -> Result<&DataType> {
        self.catalog.get(name).ok_or_else(|| {
            Error::InvalidInput(format!("Resource type '{}' is not part of this session", name))
        })
    }

    /// First window of the configured batch size.
    pub fn first_window(&self) -> Result<BatchWindow> {
        BatchWindow::first(self.config.batch_size)
    }

    /// Produce the outbound batch for `name` at `checkpoint`.
    pub async fn produce_batch(
        &self,
        name: &str,
        checkpoint: Timestamp,
        window: BatchWindow,
    ) -> Result<OutboundBatch> {
        let data_type = self.data_type(name)?;
        self.sender.produce_batch(data_type, checkpoint, window).await
    }

    /// Apply an inbound batch for `name` on top of `prior_mark`.
    pub async fn apply_batch(
        &self,
        name: &str,
        prior_mark: Timestamp,
        batch: &WireBatch,
    ) -> Result<InboundResult> {
        let data_type = self.data_type(name)?;
        self.receiver.apply_batch(data_type, prior_mark, batch).await
    }

    /// Count what is left to transfer from `checkpoint`.
    pub async fn count_all(&self, checkpoint: &Checkpoint) -> Result<RecordCount> {
        self.counter.count_all(&self.catalog, checkpoint).await
    }

    /// Progress envelope for the peer.
    pub async fn progress(&self, checkpoint: &Checkpoint) -> Result<ProgressEnvelope> {
        let count = self.count_all(checkpoint).await?;
        Ok(ProgressEnvelope::from(&count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InvalidTypePolicy;
    use crate::registry::create_default_registry;
    use fhirlink_common::Resource;
    use fhirlink_store::MemoryStore;

    fn patients(stamps: &[i64]) -> Arc<dyn ResourceStore> {
        Arc::new(
            MemoryStore::from_resources(stamps.iter().enumerate().map(|(i, ts)| {
                Resource::new("Patient", format!("p{}", i), *ts).unwrap()
            }))
            .unwrap(),
        )
    }

    fn session(config: SyncConfig, store: Arc<dyn ResourceStore>) -> Result<Session> {
        Session::new(config, store, Arc::new(create_default_registry()))
    }

    #[test]
    fn test_default_catalog() {
        let session = session(SyncConfig::default(), patients(&[])).unwrap();
        let descriptors = session.descriptors();

        assert_eq!(descriptors.len(), 6);
        assert_eq!(
            descriptors[0],
            DataTypeDescriptor {
                name: "Group".to_string(),
                encoding_kind: crate::catalog::Encoding::Json,
                order: 0,
            }
        );
        assert_eq!(descriptors[5].name, "Encounter");
    }

    #[test]
    fn test_missing_codec_is_config_error() {
        let result = Session::new(
            SyncConfig::default().with_resources(["Patient"]),
            patients(&[]),
            Arc::new(CodecRegistry::new()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = session(SyncConfig::default().with_batch_size(0), patients(&[]));
        assert!(matches!(result, Err(Error::Config(_))));

        let result = session(
            SyncConfig::default()
                .with_resources(["Patient", "Spaceship"])
                .with_invalid_type_policy(InvalidTypePolicy::Reject),
            patients(&[]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unknown_type_is_invalid_input() {
        let session = session(
            SyncConfig::default().with_resources(["Patient"]),
            patients(&[100]),
        )
        .unwrap();

        let window = session.first_window().unwrap();
        let result = session.produce_batch("Observation", 0, window).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let result = session
            .apply_batch("Observation", 0, &WireBatch::empty("Observation", 0))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_progress_envelope() {
        let session = session(
            SyncConfig::default().with_resources(["Patient", "Observation"]),
            patients(&[100, 200, 300]),
        )
        .unwrap();

        let progress = session
            .progress(&Checkpoint::new().with("Patient", 150))
            .await
            .unwrap();
        assert_eq!(progress.total, 2);
        assert_eq!(progress.per_type.get("Patient"), Some(&2));
        assert_eq!(progress.per_type.get("Observation"), Some(&0));
    }

    #[tokio::test]
    async fn test_produce_then_apply() {
        let source = session(SyncConfig::default(), patients(&[100, 200, 300])).unwrap();
        let target_store = Arc::new(MemoryStore::new());
        let target = session(SyncConfig::default(), target_store.clone()).unwrap();

        let outbound = source
            .produce_batch("Patient", 150, source.first_window().unwrap())
            .await
            .unwrap();
        let inbound = target
            .apply_batch("Patient", 150, &outbound.batch)
            .await
            .unwrap();

        assert_eq!(inbound.applied, 2);
        assert_eq!(inbound.high_water_mark, 300);
        assert_eq!(target_store.len().unwrap(), 2);
    }
}
