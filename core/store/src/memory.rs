//! In-memory resource store.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::fs;
use tracing::debug;

use fhirlink_common::fhir::R4_RESOURCE_TYPES;
use fhirlink_common::{Error, Resource, Result};

use crate::store::{LastUpdatedFilter, ResourceQuery, ResourceStore, SortOrder, UpsertOutcome};

/// Resources of one type, keyed by logical id.
type TypeTable = HashMap<String, Resource>;

/// In-memory resource store.
///
/// Useful for testing, demos and the command-line tool. Contents can be
/// imported from and exported to a JSON snapshot (an array of resources).
pub struct MemoryStore {
    tables: RwLock<HashMap<String, TypeTable>>,
    valid_types: HashSet<String>,
}

impl MemoryStore {
    /// Create an empty store that accepts every FHIR R4 resource type.
    pub fn new() -> Self {
        Self::with_types(R4_RESOURCE_TYPES.iter().copied())
    }

    /// Create an empty store that accepts only the given resource types.
    pub fn with_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: RwLock::new(HashMap::new()),
            valid_types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a store pre-populated with resources.
    ///
    /// Resources without an id are rejected, as with [`ResourceStore::upsert`].
    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Result<Self> {
        let store = Self::new();
        for resource in resources {
            store.insert(resource)?;
        }
        Ok(store)
    }

    /// Load a store from a JSON snapshot file.
    ///
    /// A missing file yields an empty store.
    pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await? {
            debug!("No snapshot at {}, starting empty", path.display());
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path).await?;
        let resources: Vec<Resource> = serde_json::from_str(&content)?;
        debug!("Loaded {} resources from {}", resources.len(), path.display());
        Self::from_resources(resources)
    }

    /// Write the store contents to a JSON snapshot file.
    ///
    /// The snapshot is written next to the target and renamed into place.
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(&self.snapshot()?)?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// All resources, ordered by type, then last-updated, then id.
    pub fn snapshot(&self) -> Result<Vec<Resource>> {
        let tables = self.read()?;
        let mut types: Vec<&String> = tables.keys().collect();
        types.sort();

        let mut resources = Vec::new();
        for resource_type in types {
            let mut rows: Vec<Resource> = tables[resource_type].values().cloned().collect();
            sort_rows(&mut rows, SortOrder::Ascending);
            resources.extend(rows);
        }
        Ok(resources)
    }

    /// Total number of stored resources.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.values().map(HashMap::len).sum())
    }

    /// Check if the store holds no resources.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, TypeTable>>> {
        self.tables
            .read()
            .map_err(|_| Error::Store("Memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, TypeTable>>> {
        self.tables
            .write()
            .map_err(|_| Error::Store("Memory store lock poisoned".to_string()))
    }

    fn insert(&self, resource: Resource) -> Result<UpsertOutcome> {
        if !self.valid_types.contains(resource.resource_type()) {
            return Err(Error::InvalidInput(format!(
                "Unknown resource type: {}",
                resource.resource_type()
            )));
        }
        let id = resource
            .id()
            .ok_or_else(|| Error::InvalidInput(format!("{} has no id", resource)))?
            .to_string();

        let mut tables = self.write()?;
        let table = tables
            .entry(resource.resource_type().to_string())
            .or_default();

        match table.insert(id, resource) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Created),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_rows(rows: &mut [Resource], order: SortOrder) {
    rows.sort_by(|a, b| {
        a.last_updated()
            .cmp(&b.last_updated())
            .then_with(|| a.id().cmp(&b.id()))
    });
    if order == SortOrder::Descending {
        rows.reverse();
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_valid_type(&self, resource_type: &str) -> bool {
        self.valid_types.contains(resource_type)
    }

    async fn query(&self, query: &ResourceQuery) -> Result<Vec<Resource>> {
        let tables = self.read()?;
        let Some(table) = tables.get(&query.resource_type) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<Resource> = table
            .values()
            .filter(|r| query.filter.matches(r))
            .cloned()
            .collect();
        sort_rows(&mut rows, query.sort);

        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn count(&self, resource_type: &str, filter: &LastUpdatedFilter) -> Result<u64> {
        let tables = self.read()?;
        Ok(tables
            .get(resource_type)
            .map(|table| table.values().filter(|r| filter.matches(r)).count() as u64)
            .unwrap_or(0))
    }

    async fn upsert(&self, resource: Resource) -> Result<UpsertOutcome> {
        self.insert(resource)
    }

    async fn get(&self, resource_type: &str, id: &str) -> Result<Resource> {
        self.read()?
            .get(resource_type)
            .and_then(|table| table.get(id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{}/{}", resource_type, id)))
    }
}
