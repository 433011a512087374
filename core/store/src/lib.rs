//! Resource store abstraction for fhirlink.
//!
//! This module provides the trait-based interface the replication core uses
//! to read and write clinical resources, plus an in-memory implementation.
//!
//! # Design Principles
//! - Store isolation: the sync core never sees how resources are indexed
//! - Async operations: every call that may touch disk or a database is async
//! - Upsert by id: writes are create-or-replace, so redelivery is harmless

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{LastUpdatedFilter, ResourceQuery, ResourceStore, SortOrder, UpsertOutcome};
