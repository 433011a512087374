//! Codec registry for name-driven resource type resolution.

use std::collections::HashMap;
use std::sync::Arc;

use fhirlink_common::fhir::R4_RESOURCE_TYPES;
use fhirlink_common::{Error, Result};

use crate::codec::{JsonCodec, ResourceCodec};

/// Registry mapping resource type names to codecs.
///
/// Built once at startup and shared by every session, so that a type name
/// received from a peer resolves to a codec without any reflective lookup.
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn ResourceCodec>>,
}

impl CodecRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register a codec.
    ///
    /// # Preconditions
    /// - `resource_type` must be unique within the registry
    ///
    /// # Errors
    /// - Returns error if the name is already registered
    pub fn register(
        &mut self,
        resource_type: impl Into<String>,
        codec: Arc<dyn ResourceCodec>,
    ) -> Result<()> {
        let resource_type = resource_type.into();
        if self.codecs.contains_key(&resource_type) {
            return Err(Error::AlreadyExists(format!(
                "Codec for '{}' is already registered",
                resource_type
            )));
        }
        self.codecs.insert(resource_type, codec);
        Ok(())
    }

    /// Resolve the codec for a resource type.
    ///
    /// # Errors
    /// - Codec not found
    pub fn resolve(&self, resource_type: &str) -> Result<Arc<dyn ResourceCodec>> {
        self.codecs.get(resource_type).cloned().ok_or_else(|| {
            Error::NotFound(format!("No codec registered for '{}'", resource_type))
        })
    }

    /// Get list of registered resource types.
    pub fn resource_types(&self) -> Vec<String> {
        self.codecs.keys().cloned().collect()
    }

    /// Check if a codec is registered.
    pub fn has_codec(&self, resource_type: &str) -> bool {
        self.codecs.contains_key(resource_type)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with a JSON codec for every FHIR R4 resource type.
pub fn create_default_registry() -> CodecRegistry {
    let mut registry = CodecRegistry::new();
    for resource_type in R4_RESOURCE_TYPES {
        registry
            .codecs
            .insert(resource_type.to_string(), Arc::new(JsonCodec::new(*resource_type)));
    }
    registry
}
