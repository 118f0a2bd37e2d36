use std::{
    io::{self, Cursor, Read},
    sync::Arc,
};

use depot_digest::{HashingReader, Sha256, Sha256Hash};
use simple_spawn_blocking::{tokio::run_blocking_task, Cancelled};

use crate::{
    backend::{BoxRead, ByteStore, ByteStoreError},
    identity::{generate_id, ArtifactId, ArtifactInfo, IdentityStrategy},
    metadata::{ArtifactMetadata, MetadataError, MetadataStore},
};

/// Configures a [`StorageManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// How identifiers are derived. Fixed for the lifetime of the manager.
    pub strategy: IdentityStrategy,

    /// Compute the SHA-256 of every payload, even when the strategy does not
    /// need it.
    pub compute_hash: bool,

    /// Skip writing payloads whose identifier is already stored.
    pub cache_enabled: bool,

    /// Namespace prefix prepended to every storage key.
    pub key_prefix: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            strategy: IdentityStrategy::default(),
            compute_hash: false,
            cache_enabled: true,
            key_prefix: None,
        }
    }
}

/// The outcome of [`StorageManager::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// The identifier the payload is stored under.
    pub id: ArtifactId,
    /// The key the payload is stored under.
    pub storage_key: String,
    /// The SHA-256 of the payload, if it was computed.
    pub sha256: Option<Sha256Hash>,
    /// The size of the payload in bytes.
    pub size: u64,
    /// True if the payload was already stored and nothing was written.
    pub deduplicated: bool,
}

/// An error returned by the [`StorageManager`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The artifact is not stored.
    #[error("artifact {0} was not found")]
    NotFound(String),

    /// A metadata operation was requested but no metadata store is
    /// configured.
    #[error("metadata is not enabled for this storage manager")]
    MetadataDisabled,

    /// Reading the payload from the caller failed.
    #[error("failed to read the artifact payload")]
    Read(#[source] io::Error),

    /// The byte store failed.
    #[error("storage operation on '{key}' failed")]
    Store {
        /// The key that was accessed.
        key: String,
        /// The underlying error.
        #[source]
        source: ByteStoreError,
    },

    /// The metadata store failed.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The payload of an artifact was removed but its metadata record was
    /// not.
    #[error("removed the payload of {id} but failed to remove its metadata")]
    PartialDelete {
        /// The artifact that was being deleted.
        id: String,
        /// The metadata error.
        #[source]
        source: MetadataError,
    },

    /// The blocking task was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<Cancelled> for StorageError {
    fn from(_: Cancelled) -> Self {
        StorageError::Cancelled
    }
}

impl StorageError {
    /// Returns true if the error means the requested artifact or record does
    /// not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) | StorageError::Metadata(MetadataError::NotFound(_)) => true,
            StorageError::Store { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    fn store(key: &str, id: &ArtifactId, source: ByteStoreError) -> Self {
        if source.is_not_found() {
            StorageError::NotFound(id.to_string())
        } else {
            StorageError::Store {
                key: key.to_owned(),
                source,
            }
        }
    }
}

/// Stores artifacts in a [`ByteStore`] under identifiers derived by an
/// [`IdentityStrategy`], optionally recording [`ArtifactMetadata`].
///
/// Byte store and metadata calls are blocking and run on the blocking thread
/// pool.
#[derive(Clone)]
pub struct StorageManager {
    store: Arc<dyn ByteStore>,
    metadata: Option<Arc<dyn MetadataStore>>,
    config: StorageConfig,
}

impl StorageManager {
    /// Constructs a manager without metadata.
    pub fn new(store: Arc<dyn ByteStore>, config: StorageConfig) -> Self {
        Self {
            store,
            metadata: None,
            config,
        }
    }

    /// Records metadata in `metadata`.
    #[must_use]
    pub fn with_metadata(self, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            metadata: Some(metadata),
            ..self
        }
    }

    /// The configuration of this manager.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The underlying byte store.
    pub fn byte_store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }

    /// Returns true if a metadata store is configured.
    pub fn metadata_enabled(&self) -> bool {
        self.metadata.is_some()
    }

    /// The storage key of `id` under this manager's prefix.
    pub fn key_for(&self, id: &ArtifactId) -> String {
        id.storage_key(self.config.key_prefix.as_deref())
    }

    /// The identifier `info` would be stored under without knowing its
    /// content. Only meaningful for the convention strategy.
    pub fn predict_id(&self, info: &ArtifactInfo) -> Option<ArtifactId> {
        (!self.config.strategy.requires_content_hash())
            .then(|| generate_id(info, self.config.strategy, None))
    }

    /// Reads `reader` to the end and stores the payload.
    ///
    /// The payload is hashed while it is buffered if the strategy or the
    /// configuration asks for it. With caching enabled, a payload whose
    /// identifier is already stored is not written again and the result is
    /// marked as [deduplicated](StoredArtifact::deduplicated).
    pub async fn store(
        &self,
        info: &ArtifactInfo,
        reader: impl Read + Send + 'static,
    ) -> Result<StoredArtifact, StorageError> {
        let hash = self.config.compute_hash || self.config.strategy.requires_content_hash();
        let (payload, sha256) = run_blocking_task(move || buffer(reader, hash)).await?;

        let id = generate_id(info, self.config.strategy, sha256.as_ref());
        let storage_key = self.key_for(&id);
        let size = payload.len() as u64;

        if self.config.cache_enabled && self.exists(&id).await? {
            tracing::debug!(%id, "artifact already stored, skipping write");
            return Ok(StoredArtifact {
                id,
                storage_key,
                sha256,
                size,
                deduplicated: true,
            });
        }

        let store = self.store.clone();
        let key = storage_key.clone();
        run_blocking_task(move || {
            store
                .put(&key, &mut Cursor::new(payload))
                .map_err(|source| StorageError::Store { key, source })
        })
        .await?;

        tracing::debug!(%id, key = %storage_key, size, "stored artifact");
        Ok(StoredArtifact {
            id,
            storage_key,
            sha256,
            size,
            deduplicated: false,
        })
    }

    /// Opens the payload of `id`.
    pub async fn get(&self, id: &ArtifactId) -> Result<BoxRead, StorageError> {
        let store = self.store.clone();
        let key = self.key_for(id);
        let id = id.clone();
        run_blocking_task(move || store.get(&key).map_err(|e| StorageError::store(&key, &id, e)))
            .await
    }

    /// Returns true if `id` is stored.
    ///
    /// A metadata record counts as proof of existence; without one the byte
    /// store is consulted.
    pub async fn exists(&self, id: &ArtifactId) -> Result<bool, StorageError> {
        if let Some(metadata) = &self.metadata {
            if metadata.get(&id.to_string()).is_ok() {
                return Ok(true);
            }
        }
        let store = self.store.clone();
        let key = self.key_for(id);
        let id = id.clone();
        run_blocking_task(move || {
            store
                .exists(&key)
                .map_err(|e| StorageError::store(&key, &id, e))
        })
        .await
    }

    /// Removes the payload of `id` and then its metadata record.
    ///
    /// A payload that is already gone does not keep the record alive; the
    /// call only fails with [`StorageError::NotFound`] if neither existed.
    pub async fn delete(&self, id: &ArtifactId) -> Result<(), StorageError> {
        let store = self.store.clone();
        let key = self.key_for(id);
        let owned_id = id.clone();
        let removed_payload = run_blocking_task(move || match store.delete(&key) {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(StorageError::store(&key, &owned_id, e)),
        })
        .await?;

        let mut removed_record = false;
        if let Some(metadata) = &self.metadata {
            let id = id.to_string();
            removed_record = metadata.get(&id).is_ok();
            metadata
                .delete(&id)
                .map_err(|source| StorageError::PartialDelete { id, source })?;
        }

        if !removed_payload && !removed_record {
            return Err(StorageError::NotFound(id.to_string()));
        }
        if !removed_payload {
            tracing::debug!(%id, "payload was already gone, removed the metadata record");
        }
        Ok(())
    }

    /// Records `metadata`.
    pub fn store_metadata(&self, metadata: ArtifactMetadata) -> Result<(), StorageError> {
        Ok(self.metadata_store()?.put(metadata)?)
    }

    /// Makes the metadata record of `id` reachable through the coordinates of
    /// `info`.
    pub fn link_metadata(&self, info: &ArtifactInfo, id: &ArtifactId) -> Result<(), StorageError> {
        Ok(self.metadata_store()?.link_package(
            &info.ecosystem,
            &info.name,
            &info.version,
            &id.to_string(),
        )?)
    }

    /// Returns the metadata record of `id`.
    pub fn get_metadata(&self, id: &ArtifactId) -> Result<ArtifactMetadata, StorageError> {
        Ok(self.metadata_store()?.get(&id.to_string())?)
    }

    /// Returns the metadata record stored for the given package coordinates.
    pub fn get_metadata_by_package(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
    ) -> Result<ArtifactMetadata, StorageError> {
        Ok(self
            .metadata_store()?
            .get_by_package(ecosystem, name, version)?)
    }

    fn metadata_store(&self) -> Result<&Arc<dyn MetadataStore>, StorageError> {
        self.metadata.as_ref().ok_or(StorageError::MetadataDisabled)
    }
}

fn buffer(
    reader: impl Read,
    hash: bool,
) -> Result<(Vec<u8>, Option<Sha256Hash>), StorageError> {
    let mut payload = Vec::new();
    if hash {
        let mut reader = HashingReader::<_, Sha256>::new(reader);
        reader.read_to_end(&mut payload).map_err(StorageError::Read)?;
        let (_, sha256, _) = reader.finalize();
        Ok((payload, Some(sha256)))
    } else {
        let mut reader = reader;
        reader.read_to_end(&mut payload).map_err(StorageError::Read)?;
        Ok((payload, None))
    }
}
