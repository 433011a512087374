//! Common types used throughout fhirlink.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Parse an RFC 3339 instant (as found in `meta.lastUpdated`) into epoch millis.
pub fn parse_instant(value: &str) -> crate::Result<Timestamp> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| crate::Error::Serialization(format!("Invalid instant '{}': {}", value, e)))
}

/// Format epoch millis as an RFC 3339 instant with millisecond precision.
pub fn format_instant(timestamp: Timestamp) -> crate::Result<String> {
    Utc.timestamp_millis_opt(timestamp)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| {
            crate::Error::InvalidInput(format!("Timestamp out of range: {}", timestamp))
        })
}

/// An opaque clinical resource.
///
/// The replication core never interprets the clinical content. It only reads the
/// envelope fields every FHIR resource carries: `resourceType`, `id` and
/// `meta.lastUpdated`. Everything else travels untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Resource {
    resource_type: String,
    id: Option<String>,
    last_updated: Timestamp,
    body: Value,
}

impl Resource {
    /// Create a minimal resource carrying only its envelope fields.
    ///
    /// # Errors
    /// - `resource_type` is empty
    /// - `last_updated` cannot be represented as an instant
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        last_updated: Timestamp,
    ) -> crate::Result<Self> {
        let resource_type = resource_type.into();
        if resource_type.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Resource type cannot be empty".to_string(),
            ));
        }

        let mut body = Map::new();
        body.insert("resourceType".to_string(), Value::String(resource_type));
        let id = id.into();
        if !id.is_empty() {
            body.insert("id".to_string(), Value::String(id));
        }
        let mut meta = Map::new();
        meta.insert(
            "lastUpdated".to_string(),
            Value::String(format_instant(last_updated)?),
        );
        body.insert("meta".to_string(), Value::Object(meta));

        Self::from_value(Value::Object(body))
    }

    /// Build a resource from its JSON representation.
    ///
    /// # Errors
    /// - Value is not a JSON object
    /// - `resourceType` missing or not a string
    /// - `id` present but not a string
    /// - `meta.lastUpdated` missing or not an RFC 3339 instant
    pub fn from_value(body: Value) -> crate::Result<Self> {
        let object = body.as_object().ok_or_else(|| {
            crate::Error::Serialization("Resource must be a JSON object".to_string())
        })?;

        let resource_type = match object.get("resourceType") {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            _ => {
                return Err(crate::Error::Serialization(
                    "Resource is missing 'resourceType'".to_string(),
                ))
            }
        };

        let id = match object.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) if id.is_empty() => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(_) => {
                return Err(crate::Error::Serialization(format!(
                    "{} has a non-string 'id'",
                    resource_type
                )))
            }
        };

        let last_updated = object
            .get("meta")
            .and_then(|meta| meta.get("lastUpdated"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                crate::Error::Serialization(format!(
                    "{} is missing 'meta.lastUpdated'",
                    resource_type
                ))
            })
            .and_then(parse_instant)?;

        Ok(Self {
            resource_type,
            id,
            last_updated,
            body,
        })
    }

    /// Add a content field.
    ///
    /// The envelope keys (`resourceType`, `id`, `meta`) belong to the resource
    /// itself and are left untouched.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        if matches!(key, "resourceType" | "id" | "meta") {
            return self;
        }
        if let Value::Object(object) = &mut self.body {
            object.insert(key.to_string(), value);
        }
        self
    }

    /// Resource type name (e.g. "Patient").
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Logical id, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Last modification time in epoch millis.
    pub fn last_updated(&self) -> Timestamp {
        self.last_updated
    }

    /// Get a top-level field of the resource body.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Full JSON body.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Assign a fresh logical id if the resource has none, returning the id.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_none() {
            let id = Uuid::new_v4().to_string();
            if let Value::Object(object) = &mut self.body {
                object.insert("id".to_string(), Value::String(id.clone()));
            }
            self.id = Some(id);
        }
        self.id.as_deref().unwrap_or_default()
    }

    /// Consume the resource, returning its JSON body.
    pub fn into_value(self) -> Value {
        self.body
    }
}

impl TryFrom<Value> for Resource {
    type Error = crate::Error;

    fn try_from(value: Value) -> crate::Result<Self> {
        Self::from_value(value)
    }
}

impl From<Resource> for Value {
    fn from(resource: Resource) -> Self {
        resource.body
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}/{}", self.resource_type, id),
            None => write!(f, "{}/<unassigned>", self.resource_type),
        }
    }
}
