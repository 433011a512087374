//! Catalog of resource types eligible for sync.
//!
//! Both peers resolve the same configuration into the same ordered catalog, so
//! they walk resource types in the same sequence and their progress figures
//! line up.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, warn};

use fhirlink_common::{Error, Result};

use crate::config::{InvalidTypePolicy, SyncConfig};

/// Resource types synchronized when the configuration does not name any.
pub const DEFAULT_RESOURCE_TYPES: &[&str] = &[
    "Group",
    "Patient",
    "Questionnaire",
    "QuestionnaireResponse",
    "Observation",
    "Encounter",
];

/// Wire encoding of a data type's payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "JSON")]
    Json,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Json => write!(f, "JSON"),
        }
    }
}

/// A named, ordered category of resource being synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataType {
    name: String,
    encoding: Encoding,
    order: u32,
}

impl DataType {
    /// Create a data type.
    pub fn new(name: impl Into<String>, encoding: Encoding, order: u32) -> Self {
        Self {
            name: name.into(),
            encoding,
            order,
        }
    }

    /// Resource type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload encoding.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Position in the session's sync sequence.
    pub fn order(&self) -> u32 {
        self.order
    }
}

impl Ord for DataType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .cmp(&other.order)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.encoding.cmp(&other.encoding))
    }
}

impl PartialOrd for DataType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.order)
    }
}

/// Ordered set of data types for one sync session, unique by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTypeCatalog {
    types: BTreeSet<DataType>,
}

impl DataTypeCatalog {
    /// Resolve the catalog for a configuration.
    ///
    /// An explicit, non-empty `resources_to_sync` list is filtered through
    /// `is_valid_type` according to the configured policy; otherwise the
    /// defaults are used. Each type's order is its position in the resolved
    /// sequence, and duplicate names keep their first position.
    ///
    /// # Errors
    /// - `Error::Config` if the policy is `Reject` and a name is not recognized
    /// - `Error::Config` if no valid type remains
    pub fn resolve<F>(config: &SyncConfig, is_valid_type: F) -> Result<Self>
    where
        F: Fn(&str) -> bool,
    {
        let configured: Vec<&str> = match &config.resources_to_sync {
            Some(names) if !names.is_empty() => names.iter().map(String::as_str).collect(),
            _ => {
                debug!("No resources configured for sync, using defaults");
                DEFAULT_RESOURCE_TYPES.to_vec()
            }
        };

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(configured.len());
        for name in configured {
            if !is_valid_type(name) {
                match config.invalid_type_policy {
                    InvalidTypePolicy::Drop => {
                        warn!("Dropping unrecognized resource type '{}'", name);
                        continue;
                    }
                    InvalidTypePolicy::Reject => {
                        return Err(Error::Config(format!(
                            "Unrecognized resource type '{}'",
                            name
                        )));
                    }
                }
            }
            if seen.insert(name) {
                resolved.push(name);
            }
        }

        if resolved.is_empty() {
            return Err(Error::Config(
                "No valid resource types to synchronize".to_string(),
            ));
        }

        Ok(Self::from_names(resolved))
    }

    /// Build a catalog from names in sync order, without validation.
    ///
    /// Later duplicates of a name are ignored.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut types = BTreeSet::new();
        for name in names {
            let name = name.into();
            if seen.insert(name.clone()) {
                let order = types.len() as u32;
                types.insert(DataType::new(name, Encoding::Json, order));
            }
        }
        Self { types }
    }

    /// Iterate data types in sync order.
    pub fn iter(&self) -> impl Iterator<Item = &DataType> {
        self.types.iter()
    }

    /// Look up a data type by name.
    pub fn get(&self, name: &str) -> Option<&DataType> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Check if a resource type is part of the catalog.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names in sync order.
    pub fn names(&self) -> Vec<String> {
        self.types.iter().map(|t| t.name.clone()).collect()
    }

    /// Number of data types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl<'a> IntoIterator for &'a DataTypeCatalog {
    type Item = &'a DataType;
    type IntoIter = std::collections::btree_set::Iter<'a, DataType>;

    fn into_iter(self) -> Self::IntoIter {
        self.types.iter()
    }
}
