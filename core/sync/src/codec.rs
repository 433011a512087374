//! Resource codecs for the wire encoding.

use fhirlink_common::{Error, Resource, Result};

use crate::catalog::Encoding;

/// Encodes and decodes resources of one type for the wire.
pub trait ResourceCodec: Send + Sync {
    /// Encoding produced by this codec.
    fn encoding(&self) -> Encoding;

    /// Serialize a resource.
    ///
    /// # Errors
    /// - `Error::Serialization` if the resource is not of this codec's type
    fn encode(&self, resource: &Resource) -> Result<String>;

    /// Deserialize a payload.
    ///
    /// # Errors
    /// - `Error::Serialization` if the payload is malformed or of another type
    fn decode(&self, payload: &str) -> Result<Resource>;
}

/// JSON codec for a single resource type.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    resource_type: String,
}

impl JsonCodec {
    /// Create a codec for `resource_type`.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
        }
    }

    /// Resource type handled by this codec.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn check_type(&self, resource: &Resource) -> Result<()> {
        if resource.resource_type() != self.resource_type {
            return Err(Error::Serialization(format!(
                "Expected {} but got {}",
                self.resource_type,
                resource.resource_type()
            )));
        }
        Ok(())
    }
}

impl ResourceCodec for JsonCodec {
    fn encoding(&self) -> Encoding {
        Encoding::Json
    }

    fn encode(&self, resource: &Resource) -> Result<String> {
        self.check_type(resource)?;
        Ok(serde_json::to_string(resource.body())?)
    }

    fn decode(&self, payload: &str) -> Result<Resource> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        let resource = Resource::from_value(value)?;
        self.check_type(&resource)?;
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_patient() -> Resource {
        Resource::new("Patient", "patient-123456", 1_600_000_000_123)
            .unwrap()
            .with_field("active", json!(true))
            .with_field("birthDate", json!("1999-10-03"))
            .with_field("gender", json!("male"))
            .with_field("address", json!([{"city": "Nairobi", "country": "Kenya"}]))
            .with_field("name", json!([{"given": ["Kiptoo"], "family": "Maina"}]))
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let codec = JsonCodec::new("Patient");
        let patient = test_patient();

        let payload = codec.encode(&patient).unwrap();
        let decoded = codec.decode(&payload).unwrap();

        assert_eq!(decoded.id(), patient.id());
        assert_eq!(decoded.last_updated(), patient.last_updated());
        assert_eq!(decoded.field("address"), patient.field("address"));
        assert_eq!(decoded, patient);
    }

    #[test]
    fn test_encode_wrong_type_fails() {
        let codec = JsonCodec::new("Observation");
        assert!(matches!(
            codec.encode(&test_patient()),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_decode_wrong_type_fails() {
        let payload = JsonCodec::new("Patient").encode(&test_patient()).unwrap();
        assert!(JsonCodec::new("Group").decode(&payload).is_err());
    }

    #[test]
    fn test_decode_malformed_fails() {
        let codec = JsonCodec::new("Patient");
        assert!(matches!(codec.decode("{not json"), Err(Error::Serialization(_))));
        assert!(matches!(
            codec.decode(r#"{"resourceType":"Patient","id":"p1"}"#),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_decode_real_group_payload() {
        let payload = r##"{"resourceType":"Group","id":"1122f50c-5499-4eaa-bd53-a5364371a2ba","meta":{"versionId":"5","lastUpdated":"2022-06-23T14:55:37.217+00:00","source":"#75f9db2107ef0977"},"active":true,"type":"person","name":"new family","member":[{"entity":{"reference":"Patient/7d84a2d0-8706-485a-85f5-8313f16bafa1"}}]}"##;
        let group = JsonCodec::new("Group").decode(payload).unwrap();
        assert_eq!(group.id(), Some("1122f50c-5499-4eaa-bd53-a5364371a2ba"));
        assert_eq!(group.field("name"), Some(&json!("new family")));
    }
}
