//! End-to-end behavior of two sessions exchanging batches by hand.

use std::sync::Arc;

use fhirlink_common::{Error, Resource, Result};
use fhirlink_store::{MemoryStore, ResourceStore};
use fhirlink_sync::{
    create_default_registry, BatchWindow, Checkpoint, CheckpointStore, CodecRegistry, Encoding,
    JsonCodec, MemoryCheckpointStore, ResourceCodec, Session, SyncConfig, TransferDriver,
    WireBatch,
};

fn store_with(resources: Vec<Resource>) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::from_resources(resources).unwrap())
}

fn patients(stamps: &[i64]) -> Vec<Resource> {
    stamps
        .iter()
        .enumerate()
        .map(|(i, ts)| Resource::new("Patient", format!("p{}", i + 1), *ts).unwrap())
        .collect()
}

fn open(config: SyncConfig, store: Arc<MemoryStore>) -> Session {
    Session::new(config, store, Arc::new(create_default_registry())).unwrap()
}

fn patient_config(batch_size: usize) -> SyncConfig {
    SyncConfig::default()
        .with_resources(["Patient"])
        .with_batch_size(batch_size)
}

fn decoded_stamps(batch: &WireBatch) -> Vec<i64> {
    let codec = JsonCodec::new(batch.data_type_name.clone());
    batch
        .resources
        .iter()
        .map(|p| codec.decode(p).unwrap().last_updated())
        .collect()
}

#[tokio::test]
async fn worked_example_from_checkpoint_150() {
    let session = open(patient_config(10), store_with(patients(&[100, 200, 300])));
    let checkpoint = Checkpoint::new().with("Patient", 150);

    let count = session.count_all(&checkpoint).await.unwrap();
    assert_eq!(count.total, 2);
    assert_eq!(count.for_type("Patient"), 2);

    let window = BatchWindow::new(0, 10).unwrap();
    let first = session.produce_batch("Patient", 150, window).await.unwrap();
    assert_eq!(decoded_stamps(&first.batch), vec![200, 300]);
    assert_eq!(first.batch.high_water_mark, 300);

    let next = session.produce_batch("Patient", 300, window).await.unwrap();
    let codec = JsonCodec::new("Patient");
    let ids: Vec<_> = next
        .batch
        .resources
        .iter()
        .map(|p| codec.decode(p).unwrap().id().map(str::to_string))
        .collect();
    // The boundary resource comes back once more; nothing newer is left.
    assert_eq!(ids, vec![Some("p3".to_string())]);

    let past_end = session.produce_batch("Patient", 301, window).await.unwrap();
    assert!(past_end.is_exhausted());
    assert_eq!(past_end.batch.high_water_mark, 301);
}

#[tokio::test]
async fn pages_are_ordered_and_disjoint() {
    let stamps = [900, 100, 500, 300, 700, 200, 800, 400, 600];
    let session = open(patient_config(4), store_with(patients(&stamps)));

    let mut window = session.first_window().unwrap();
    let mut seen = Vec::new();
    loop {
        let outbound = session.produce_batch("Patient", 0, window).await.unwrap();
        if outbound.is_exhausted() {
            break;
        }
        let page = decoded_stamps(&outbound.batch);
        assert!(page.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(outbound.batch.high_water_mark, *page.last().unwrap());
        seen.extend(page);
        window = window.advance(outbound.page_len);
    }

    let mut expected = stamps.to_vec();
    expected.sort_unstable();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn round_trip_and_redelivery() {
    let source_store = store_with(patients(&[100, 200, 300]));
    let target_store = Arc::new(MemoryStore::new());
    let source = open(patient_config(10), source_store.clone());
    let target = open(patient_config(10), target_store.clone());

    let outbound = source
        .produce_batch("Patient", 0, source.first_window().unwrap())
        .await
        .unwrap();
    let first = target.apply_batch("Patient", 0, &outbound.batch).await.unwrap();
    assert_eq!(first.high_water_mark, 300);
    assert_eq!(first.created, 3);
    assert_eq!(target_store.snapshot().unwrap(), source_store.snapshot().unwrap());

    let again = target
        .apply_batch("Patient", first.high_water_mark, &outbound.batch)
        .await
        .unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.high_water_mark, 300);
    assert_eq!(target_store.snapshot().unwrap(), source_store.snapshot().unwrap());
}

#[tokio::test]
async fn mark_never_moves_back() {
    let target = open(patient_config(10), Arc::new(MemoryStore::new()));
    let codec = JsonCodec::new("Patient");
    let stale = WireBatch {
        data_type_name: "Patient".to_string(),
        resources: vec![codec
            .encode(&Resource::new("Patient", "old", 50).unwrap())
            .unwrap()],
        high_water_mark: 50,
    };

    let result = target.apply_batch("Patient", 400, &stale).await.unwrap();
    assert_eq!(result.applied, 1);
    assert_eq!(result.high_water_mark, 400);
}

#[tokio::test]
async fn count_matches_paging_across_types() {
    let mut resources = patients(&[10, 20, 30, 40, 50]);
    resources.extend(
        (1..=4).map(|i| Resource::new("Observation", format!("o{}", i), i * 15).unwrap()),
    );
    let config = SyncConfig::default()
        .with_resources(["Observation", "Patient"])
        .with_batch_size(2);
    let session = open(config, store_with(resources));
    let checkpoint = Checkpoint::new().with("Patient", 25).with("Observation", 30);

    let count = session.count_all(&checkpoint).await.unwrap();

    let mut paged = 0;
    for data_type in session.catalog() {
        let since = checkpoint.get(data_type.name());
        let mut window = session.first_window().unwrap();
        loop {
            let outbound = session
                .produce_batch(data_type.name(), since, window)
                .await
                .unwrap();
            if outbound.is_exhausted() {
                break;
            }
            paged += outbound.page_len as u64;
            window = window.advance(outbound.page_len);
        }
    }

    assert_eq!(count.for_type("Patient"), 3);
    assert_eq!(count.for_type("Observation"), 3);
    assert_eq!(count.total, paged);
}

#[tokio::test]
async fn catalog_order_follows_configuration() {
    let config = SyncConfig::default().with_resources(["Observation", "NotAType", "Patient"]);
    let session = open(config, Arc::new(MemoryStore::new()));

    let names: Vec<_> = session.descriptors().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["Observation", "Patient"]);
    assert_eq!(session.data_type("Patient").unwrap().order(), 1);
}

#[tokio::test]
async fn store_restricted_types_are_dropped() {
    let store = Arc::new(MemoryStore::with_types(["Patient"]));
    assert!(!store.is_valid_type("Observation"));

    let session = open(
        SyncConfig::default().with_resources(["Patient", "Observation"]),
        store,
    );
    assert_eq!(session.catalog().names(), vec!["Patient".to_string()]);
}

#[tokio::test]
async fn unknown_type_is_rejected_by_session() {
    let session = open(patient_config(10), Arc::new(MemoryStore::new()));
    let result = session
        .produce_batch("Encounter", 0, session.first_window().unwrap())
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn completion_is_stable_once_reached() {
    let session = open(patient_config(2), store_with(patients(&[100, 200, 300])));

    let mut window = session.first_window().unwrap();
    let mut mark = 0;
    loop {
        let outbound = session.produce_batch("Patient", 0, window).await.unwrap();
        if outbound.is_exhausted() {
            assert!(outbound.batch.is_empty());
            break;
        }
        mark = mark.max(outbound.batch.high_water_mark);
        window = window.advance(outbound.page_len);
    }
    assert_eq!(mark, 300);

    // Asking again from the same position keeps reporting the end.
    for _ in 0..3 {
        let again = session.produce_batch("Patient", 0, window).await.unwrap();
        assert!(again.is_exhausted());
        assert_eq!(again.batch.high_water_mark, 0);
    }
    let past_end = BatchWindow::first(2).unwrap();
    for _ in 0..3 {
        let again = session.produce_batch("Patient", 301, past_end).await.unwrap();
        assert!(again.is_exhausted());
        assert_eq!(again.batch.high_water_mark, 301);
    }
}

/// Encodes every patient except one.
struct SkippingCodec {
    inner: JsonCodec,
    skip: &'static str,
}

impl ResourceCodec for SkippingCodec {
    fn encoding(&self) -> Encoding {
        Encoding::Json
    }

    fn encode(&self, resource: &Resource) -> Result<String> {
        if resource.id() == Some(self.skip) {
            return Err(Error::Serialization("unsupported extension".to_string()));
        }
        self.inner.encode(resource)
    }

    fn decode(&self, payload: &str) -> Result<Resource> {
        self.inner.decode(payload)
    }
}

#[tokio::test]
async fn partial_batch_never_saves_past_failed_item() {
    let mut registry = CodecRegistry::new();
    registry
        .register(
            "Patient",
            Arc::new(SkippingCodec {
                inner: JsonCodec::new("Patient"),
                skip: "p2",
            }),
        )
        .unwrap();
    let source = Session::new(
        patient_config(3),
        store_with(patients(&[100, 200, 300, 400])),
        Arc::new(registry),
    )
    .unwrap();
    let target_store = Arc::new(MemoryStore::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::default());

    let report = TransferDriver::new(
        Arc::new(source),
        Arc::new(open(patient_config(3), target_store.clone())),
        checkpoints.clone(),
    )
    .run()
    .await
    .unwrap();

    let saved = checkpoints.load().await.unwrap().get("Patient");
    assert!(saved <= 200);
    assert_eq!(report.checkpoint.get("Patient"), saved);
    assert!(target_store.get("Patient", "p2").await.is_err());
    assert_eq!(target_store.len().unwrap(), 3);
}
