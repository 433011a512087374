//! Common utilities and types shared across fhirlink modules.
//!
//! This module provides the error taxonomy, the opaque resource envelope and
//! the table of resource types understood by the replication core.

pub mod error;
pub mod fhir;
pub mod types;

pub use error::{Error, ItemFailure, Result};
pub use types::{Resource, Timestamp};
