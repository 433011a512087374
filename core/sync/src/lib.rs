//! fhirlink Sync Engine
//!
//! This module provides the peer-to-peer replication core, including:
//! - Catalog of resource types and their sync order
//! - Paged extraction from a checkpoint and batch serialization
//! - Idempotent ingestion with high-water mark reporting
//! - Record counting for progress reporting
//! - Checkpoint persistence and an in-process transfer driver

pub mod catalog;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod counter;
pub mod reader;
pub mod receiver;
pub mod registry;
pub mod retry;
pub mod sender;
pub mod session;
pub mod state;
pub mod transfer;
pub mod wire;

// Re-export main types
pub use catalog::{DEFAULT_RESOURCE_TYPES, DataType, DataTypeCatalog, Encoding};
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use codec::{JsonCodec, ResourceCodec};
pub use config::{InvalidTypePolicy, SyncConfig};
pub use counter::{RecordCount, RecordCounter};
pub use reader::ResourceBatchReader;
pub use receiver::{InboundResult, ReceiverEngine};
pub use registry::{CodecRegistry, create_default_registry};
pub use retry::{RetryConfig, RetryExecutor};
pub use sender::{OutboundBatch, SenderEngine};
pub use session::Session;
pub use state::{TransferEntry, TransferProgress, TransferState};
pub use transfer::{TransferDriver, TransferReport};
pub use wire::{BatchWindow, DataTypeDescriptor, ProgressEnvelope, WireBatch};
