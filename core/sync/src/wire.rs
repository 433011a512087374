//! Messages that cross the device-to-device link.
//!
//! All envelopes are JSON with camelCase field names. Framing, chunking and
//! handshakes belong to the transport.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use fhirlink_common::{Error, Result, Timestamp};

use crate::catalog::{DataType, Encoding};

/// Page of a resource type to fetch: `size` resources after skipping `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWindow {
    pub offset: usize,
    pub size: usize,
}

impl BatchWindow {
    /// Create a window.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if `size` is zero
    pub fn new(offset: usize, size: usize) -> Result<Self> {
        let window = Self { offset, size };
        window.validate()?;
        Ok(window)
    }

    /// First window of the given size.
    pub fn first(size: usize) -> Result<Self> {
        Self::new(0, size)
    }

    /// The window following this one after `consumed` resources were returned.
    pub fn advance(self, consumed: usize) -> Self {
        Self {
            offset: self.offset + consumed,
            size: self.size,
        }
    }

    /// Check the window is usable.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::InvalidInput(
                "Batch window size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Descriptor announcing a data type to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTypeDescriptor {
    pub name: String,
    pub encoding_kind: Encoding,
    pub order: u32,
}

impl From<&DataType> for DataTypeDescriptor {
    fn from(data_type: &DataType) -> Self {
        Self {
            name: data_type.name().to_string(),
            encoding_kind: data_type.encoding(),
            order: data_type.order(),
        }
    }
}

impl From<DataTypeDescriptor> for DataType {
    fn from(descriptor: DataTypeDescriptor) -> Self {
        DataType::new(descriptor.name, descriptor.encoding_kind, descriptor.order)
    }
}

/// One batch of serialized resources plus the high-water mark it reaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBatch {
    /// Resource type of every payload.
    pub data_type_name: String,
    /// Serialized resources in last-updated order.
    pub resources: Vec<String>,
    /// Highest last-updated timestamp covered by this batch.
    pub high_water_mark: Timestamp,
}

impl WireBatch {
    /// Create an empty batch that leaves `checkpoint` unchanged.
    pub fn empty(data_type_name: impl Into<String>, checkpoint: Timestamp) -> Self {
        Self {
            data_type_name: data_type_name.into(),
            resources: Vec::new(),
            high_water_mark: checkpoint,
        }
    }

    /// Number of payloads.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Check if the batch carries no payloads.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Serialize the envelope.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize an envelope.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Progress figures shared with the peer and the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEnvelope {
    pub total: i64,
    pub per_type: BTreeMap<String, i64>,
}

impl ProgressEnvelope {
    /// Serialize the envelope.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize an envelope.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
