//! Descriptive records about stored artifacts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use depot_digest::{serde::HexDigest, Sha256, Sha256Hash};
use itertools::Itertools;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use url::Url;

use crate::identity::ArtifactId;

/// The content type recorded for artifacts whose type is not known.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Describes a stored artifact.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// The string form of the artifact's [`ArtifactId`].
    pub id: String,

    /// The package name as requested, e.g. `@types/node`.
    pub name: String,

    /// The package version.
    pub version: String,

    /// The ecosystem the package belongs to.
    pub ecosystem: String,

    /// Where the artifact was downloaded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,

    /// The SHA-256 of the full payload, if it was computed.
    #[serde_as(as = "Option<HexDigest<Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Sha256Hash>,

    /// The size of the payload in bytes.
    pub size: u64,

    /// When the artifact was fetched.
    pub fetched_at: DateTime<Utc>,

    /// The key the payload is stored under.
    pub storage_key: String,

    /// The media type of the payload.
    pub content_type: String,
}

impl ArtifactMetadata {
    /// A record that only knows where an artifact is stored. Used when an
    /// artifact is loaded without a metadata record.
    pub fn minimal(id: &ArtifactId, storage_key: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            name: id.name().unwrap_or_default().to_owned(),
            version: id.version().unwrap_or_default().to_owned(),
            ecosystem: id.ecosystem().to_owned(),
            url: None,
            sha256: None,
            size: 0,
            fetched_at: Utc::now(),
            storage_key: storage_key.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_owned(),
        }
    }

    fn package_key(&self) -> Option<PackageKey> {
        (!self.name.is_empty() && !self.version.is_empty()).then(|| PackageKey {
            ecosystem: self.ecosystem.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
        })
    }
}

/// Filters for [`MetadataStore::list`]. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataQuery {
    /// Only return records of this ecosystem.
    pub ecosystem: Option<String>,
    /// Only return records with this package name.
    pub name: Option<String>,
    /// Only return records with this version.
    pub version: Option<String>,
    /// The number of matching records to skip.
    pub offset: usize,
    /// The maximum number of records to return.
    pub limit: Option<usize>,
}

impl MetadataQuery {
    fn matches(&self, metadata: &ArtifactMetadata) -> bool {
        fn field_matches(filter: &Option<String>, value: &str) -> bool {
            filter
                .as_deref()
                .map_or(true, |filter| filter.is_empty() || filter == value)
        }
        field_matches(&self.ecosystem, &metadata.ecosystem)
            && field_matches(&self.name, &metadata.name)
            && field_matches(&self.version, &metadata.version)
    }
}

/// An error returned by a [`MetadataStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    /// No record matches the lookup.
    #[error("no metadata found for {0}")]
    NotFound(String),

    /// The record is missing a required field.
    #[error("invalid metadata: {0}")]
    Validation(String),
}

/// Stores [`ArtifactMetadata`] records, indexed by identifier and by package
/// coordinates.
pub trait MetadataStore: Send + Sync {
    /// Inserts or replaces the record for `metadata.id`.
    fn put(&self, metadata: ArtifactMetadata) -> Result<(), MetadataError>;

    /// Returns the record with the given identifier.
    fn get(&self, id: &str) -> Result<ArtifactMetadata, MetadataError>;

    /// Returns the record stored for the given package coordinates.
    fn get_by_package(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
    ) -> Result<ArtifactMetadata, MetadataError>;

    /// Makes the record of `id` reachable through additional package
    /// coordinates, e.g. for a package whose content is identical to one
    /// that is already stored. The record itself is left untouched.
    ///
    /// Fails with [`MetadataError::NotFound`] if there is no record for `id`.
    fn link_package(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
        id: &str,
    ) -> Result<(), MetadataError>;

    /// Removes the record with the given identifier together with every
    /// package coordinate pointing at it. Removing a record that does not
    /// exist is not an error.
    fn delete(&self, id: &str) -> Result<(), MetadataError>;

    /// Returns the records matching `query`, ordered by identifier.
    fn list(&self, query: &MetadataQuery) -> Result<Vec<ArtifactMetadata>, MetadataError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PackageKey {
    ecosystem: String,
    name: String,
    version: String,
}

#[derive(Debug, Default)]
struct Indexes {
    by_id: HashMap<String, ArtifactMetadata>,
    by_package: HashMap<PackageKey, String>,
}

/// A [`MetadataStore`] that keeps records in memory.
///
/// Both indexes live behind a single lock so they are always updated
/// together.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    indexes: RwLock<Indexes>,
}

impl InMemoryMetadataStore {
    /// Constructs an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored records.
    pub fn len(&self) -> usize {
        self.indexes.read().by_id.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn put(&self, metadata: ArtifactMetadata) -> Result<(), MetadataError> {
        if metadata.id.is_empty() {
            return Err(MetadataError::Validation(
                "the artifact id must not be empty".to_owned(),
            ));
        }

        let mut indexes = self.indexes.write();
        let previous_key = indexes
            .by_id
            .get(&metadata.id)
            .and_then(ArtifactMetadata::package_key);
        if let Some(previous_key) = previous_key {
            if indexes.by_package.get(&previous_key) == Some(&metadata.id) {
                indexes.by_package.remove(&previous_key);
            }
        }
        if let Some(key) = metadata.package_key() {
            indexes.by_package.insert(key, metadata.id.clone());
        }
        indexes.by_id.insert(metadata.id.clone(), metadata);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<ArtifactMetadata, MetadataError> {
        self.indexes
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(id.to_owned()))
    }

    fn get_by_package(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
    ) -> Result<ArtifactMetadata, MetadataError> {
        let key = PackageKey {
            ecosystem: ecosystem.to_owned(),
            name: name.to_owned(),
            version: version.to_owned(),
        };
        let not_found = || MetadataError::NotFound(format!("{ecosystem}:{name}:{version}"));

        let indexes = self.indexes.upgradable_read();
        let Some(id) = indexes.by_package.get(&key) else {
            return Err(not_found());
        };
        if let Some(metadata) = indexes.by_id.get(id) {
            return Ok(metadata.clone());
        }

        // The secondary index points at a record that no longer exists.
        let mut indexes = RwLockUpgradableReadGuard::upgrade(indexes);
        indexes.by_package.remove(&key);
        Err(not_found())
    }

    fn link_package(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
        id: &str,
    ) -> Result<(), MetadataError> {
        if name.is_empty() || version.is_empty() {
            return Err(MetadataError::Validation(
                "the package name and version must not be empty".to_owned(),
            ));
        }
        let mut indexes = self.indexes.write();
        if !indexes.by_id.contains_key(id) {
            return Err(MetadataError::NotFound(id.to_owned()));
        }
        indexes.by_package.insert(
            PackageKey {
                ecosystem: ecosystem.to_owned(),
                name: name.to_owned(),
                version: version.to_owned(),
            },
            id.to_owned(),
        );
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), MetadataError> {
        let mut indexes = self.indexes.write();
        if indexes.by_id.remove(id).is_some() {
            indexes.by_package.retain(|_, linked| linked != id);
        }
        Ok(())
    }

    fn list(&self, query: &MetadataQuery) -> Result<Vec<ArtifactMetadata>, MetadataError> {
        let indexes = self.indexes.read();
        Ok(indexes
            .by_id
            .values()
            .filter(|metadata| query.matches(metadata))
            .sorted_by(|a, b| a.id.cmp(&b.id))
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn record(ecosystem: &str, name: &str, version: &str) -> ArtifactMetadata {
        ArtifactMetadata {
            id: format!("{ecosystem}:{name}:{version}"),
            name: name.to_owned(),
            version: version.to_owned(),
            ecosystem: ecosystem.to_owned(),
            url: None,
            sha256: None,
            size: 3,
            fetched_at: Utc::now(),
            storage_key: format!("artifacts/{ecosystem}/{name}/{version}/artifact"),
            content_type: DEFAULT_CONTENT_TYPE.to_owned(),
        }
    }

    #[test]
    fn test_put_and_get() {
        let store = InMemoryMetadataStore::new();
        let metadata = record("npm", "lodash", "4.17.21");
        store.put(metadata.clone()).unwrap();

        assert_eq!(store.get("npm:lodash:4.17.21").unwrap(), metadata);
        assert_eq!(
            store.get_by_package("npm", "lodash", "4.17.21").unwrap(),
            metadata
        );
    }

    #[test]
    fn test_empty_id_is_rejected() {
        let store = InMemoryMetadataStore::new();
        let mut metadata = record("npm", "lodash", "4.17.21");
        metadata.id.clear();
        assert_matches!(store.put(metadata), Err(MetadataError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_missing_records() {
        let store = InMemoryMetadataStore::new();
        assert_matches!(store.get("npm:x:1"), Err(MetadataError::NotFound(_)));
        assert_matches!(
            store.get_by_package("npm", "x", "1"),
            Err(MetadataError::NotFound(_))
        );
    }

    #[test]
    fn test_records_without_coordinates_are_not_indexed_by_package() {
        let store = InMemoryMetadataStore::new();
        let mut metadata = record("npm", "lodash", "4.17.21");
        metadata.id = "npm:0123456789abcdef".to_owned();
        metadata.version.clear();
        store.put(metadata).unwrap();

        assert!(store.get("npm:0123456789abcdef").is_ok());
        assert_matches!(
            store.get_by_package("npm", "lodash", ""),
            Err(MetadataError::NotFound(_))
        );
    }

    #[test]
    fn test_delete_removes_both_indexes() {
        let store = InMemoryMetadataStore::new();
        store.put(record("npm", "lodash", "4.17.21")).unwrap();
        store.delete("npm:lodash:4.17.21").unwrap();

        assert_matches!(
            store.get("npm:lodash:4.17.21"),
            Err(MetadataError::NotFound(_))
        );
        assert_matches!(
            store.get_by_package("npm", "lodash", "4.17.21"),
            Err(MetadataError::NotFound(_))
        );
        // Deleting again is fine.
        store.delete("npm:lodash:4.17.21").unwrap();
    }

    #[test]
    fn test_linked_packages_share_a_record() {
        let store = InMemoryMetadataStore::new();
        store.put(record("npm", "left-pad", "1.3.0")).unwrap();
        store
            .link_package("npm", "pad-left", "2.0.0", "npm:left-pad:1.3.0")
            .unwrap();

        let linked = store.get_by_package("npm", "pad-left", "2.0.0").unwrap();
        assert_eq!(linked.id, "npm:left-pad:1.3.0");
        assert_eq!(linked.name, "left-pad");
        assert_eq!(store.len(), 1);

        assert_matches!(
            store.link_package("npm", "other", "1.0.0", "npm:missing:1.0.0"),
            Err(MetadataError::NotFound(_))
        );
        assert_matches!(
            store.link_package("npm", "", "1.0.0", "npm:left-pad:1.3.0"),
            Err(MetadataError::Validation(_))
        );

        store.delete("npm:left-pad:1.3.0").unwrap();
        assert!(store.indexes.read().by_package.is_empty());
    }

    #[test]
    fn test_dangling_secondary_entry_is_healed() {
        let store = InMemoryMetadataStore::new();
        store.put(record("npm", "lodash", "4.17.21")).unwrap();
        store.indexes.write().by_id.remove("npm:lodash:4.17.21");

        assert_matches!(
            store.get_by_package("npm", "lodash", "4.17.21"),
            Err(MetadataError::NotFound(_))
        );
        assert!(store.indexes.read().by_package.is_empty());
    }

    #[test]
    fn test_list_filters_sorts_and_pages() {
        let store = InMemoryMetadataStore::new();
        for (name, version) in [("b", "1"), ("a", "2"), ("a", "1"), ("c", "1")] {
            store.put(record("npm", name, version)).unwrap();
        }
        store.put(record("pypi", "a", "1")).unwrap();

        let ids = |query: MetadataQuery| {
            store
                .list(&query)
                .unwrap()
                .into_iter()
                .map(|m| m.id)
                .collect::<Vec<_>>()
        };

        assert_eq!(
            ids(MetadataQuery {
                ecosystem: Some("npm".to_owned()),
                ..Default::default()
            }),
            vec!["npm:a:1", "npm:a:2", "npm:b:1", "npm:c:1"]
        );
        assert_eq!(
            ids(MetadataQuery {
                name: Some("a".to_owned()),
                ecosystem: Some(String::new()),
                ..Default::default()
            }),
            vec!["npm:a:1", "npm:a:2", "pypi:a:1"]
        );
        assert_eq!(
            ids(MetadataQuery {
                ecosystem: Some("npm".to_owned()),
                offset: 1,
                limit: Some(2),
                ..Default::default()
            }),
            vec!["npm:a:2", "npm:b:1"]
        );
        assert!(ids(MetadataQuery {
            offset: 10,
            ..Default::default()
        })
        .is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let version = format!("{i}.{j}");
                        store.put(record("npm", "pkg", &version)).unwrap();
                        store.get_by_package("npm", "pkg", &version).unwrap();
                        if j % 2 == 0 {
                            store.delete(&format!("npm:pkg:{version}")).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 8 * 25);
    }

    #[test]
    fn test_metadata_serializes_hash_as_hex() {
        let mut metadata = record("npm", "lodash", "4.17.21");
        metadata.sha256 = Some(depot_digest::compute_bytes_digest::<Sha256>("abc"));
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            json["sha256"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let parsed: ArtifactMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, metadata);
    }
}
