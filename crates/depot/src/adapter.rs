use std::{
    io::{Cursor, Read},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use chrono::Utc;
use depot_archive::ArchiveReader;
use depot_digest::{compute_bytes_digest, parse_digest_from_hex, Sha256, Sha256Hash};
use depot_networking::{fetch_with_mirrors, CancellationToken, FetchConfig};
use depot_storage::{
    ArtifactId, ArtifactInfo, ArtifactMetadata, ByteStore, FsByteStore, IdentityStrategy,
    InMemoryMetadataStore, MemoryByteStore, MetadataStore, StorageConfig, StorageError,
    StorageManager,
};
use reqwest_middleware::ClientWithMiddleware;
use simple_spawn_blocking::tokio::run_blocking_task;
use tempfile::TempDir;
use url::Url;

use crate::{
    config::{AdapterConfig, ConfigError},
    error::FetchError,
    package::PackageReader,
    registry::{NpmRegistry, RegistryUrlBuilder},
};

/// An adapter for the npm registry.
pub type NpmAdapter = EcosystemAdapter<NpmRegistry>;

/// Fetches packages of one ecosystem, stores them and hands out readers.
///
/// Construct one with [`AdapterBuilder`].
pub struct EcosystemAdapter<B> {
    urls: B,
    registry: Url,
    config: AdapterConfig,
    fetch: FetchConfig,
    storage: StorageManager,
}

impl<B> std::fmt::Debug for EcosystemAdapter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcosystemAdapter")
            .field("registry", &self.registry.as_str())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The checksum a caller expects, parsed ahead of any download.
#[derive(Debug)]
struct ExpectedChecksum {
    raw: String,
    digest: Sha256Hash,
}

impl<B: RegistryUrlBuilder> EcosystemAdapter<B> {
    /// The configuration of this adapter.
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// The storage manager artifacts are stored with.
    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Downloads the package described by `info` unless it is already
    /// stored, and returns a reader for it.
    pub async fn fetch(&self, info: &ArtifactInfo) -> Result<PackageReader, FetchError> {
        self.fetch_with_cancellation(info, &CancellationToken::new())
            .await
    }

    /// Like [`Self::fetch`], but aborts the download when `cancel` is
    /// cancelled.
    #[tracing::instrument(
        skip_all,
        fields(ecosystem = %info.ecosystem, package = %info.name, version = %info.version)
    )]
    pub async fn fetch_with_cancellation(
        &self,
        info: &ArtifactInfo,
        cancel: &CancellationToken,
    ) -> Result<PackageReader, FetchError> {
        let expected = self.validate(info)?;

        if self.config.cache_enabled {
            if let Some(id) = self.find_stored(info).await? {
                tracing::debug!(%id, "cache hit");
                return self.load(&id).await;
            }
            tracing::debug!("cache miss");
        }

        let urls = self.candidate_urls(info)?;
        let outcome = fetch_with_mirrors(&urls, &self.fetch, cancel)
            .await
            .map_err(|source| {
                if source.is_cancelled() {
                    FetchError::Cancelled
                } else {
                    FetchError::Download {
                        package: package_name(info),
                        source,
                    }
                }
            })?;
        tracing::debug!(
            url = %depot_networking::redact_url(&outcome.url),
            attempts = outcome.attempts,
            size = outcome.bytes.len(),
            "downloaded artifact"
        );

        verify_checksum(info, expected.as_ref(), &outcome.bytes)?;
        self.store(info, outcome.bytes, Some(outcome.url)).await
    }

    /// Opens a stored artifact.
    ///
    /// Falls back to minimal metadata if no metadata record exists.
    #[tracing::instrument(skip_all, fields(%id))]
    pub async fn load(&self, id: &ArtifactId) -> Result<PackageReader, FetchError> {
        let exists = self
            .storage
            .exists(id)
            .await
            .map_err(|source| FetchError::Load {
                id: id.to_string(),
                source,
            })?;
        if !exists {
            return Err(FetchError::NotFound(id.to_string()));
        }

        let storage_key = self.storage.key_for(id);
        let metadata = if self.storage.metadata_enabled() {
            self.storage.get_metadata(id).unwrap_or_else(|err| {
                tracing::debug!(error = %err, "no metadata record, using defaults");
                ArtifactMetadata::minimal(id, storage_key.clone())
            })
        } else {
            ArtifactMetadata::minimal(id, storage_key.clone())
        };

        let archive = ArchiveReader::new(self.storage.byte_store().clone(), storage_key);
        Ok(PackageReader::new(metadata, archive, None))
    }

    /// Stores a package whose archive the caller already has, as if it had
    /// been fetched. The checksum in `info` is verified if present.
    pub async fn load_from_source(
        &self,
        info: &ArtifactInfo,
        source: impl Read + Send + 'static,
    ) -> Result<PackageReader, FetchError> {
        let expected = self.validate(info)?;
        let package = package_name(info);
        let bytes = run_blocking_task(move || {
            let mut source = source;
            let mut buf = Vec::new();
            source
                .read_to_end(&mut buf)
                .map_err(|source| FetchError::Source { package, source })?;
            Ok::<_, FetchError>(Bytes::from(buf))
        })
        .await?;

        verify_checksum(info, expected.as_ref(), &bytes)?;
        self.store(info, bytes, info.url.clone()).await
    }

    /// Returns the metadata recorded for the package described by `info`.
    pub async fn get_metadata(&self, info: &ArtifactInfo) -> Result<ArtifactMetadata, FetchError> {
        self.storage
            .get_metadata_by_package(&info.ecosystem, &info.name, &info.version)
            .map_err(|source| {
                if source.is_not_found() {
                    FetchError::NotFound(package_name(info))
                } else {
                    FetchError::Load {
                        id: package_name(info),
                        source,
                    }
                }
            })
    }

    /// Returns true if the package described by `info` is stored.
    ///
    /// Only the convention strategy can predict an identifier without the
    /// artifact's content; other strategies always report `false`.
    pub async fn exists(&self, info: &ArtifactInfo) -> Result<bool, FetchError> {
        let Some(id) = self.storage.predict_id(info) else {
            return Ok(false);
        };
        self.storage
            .exists(&id)
            .await
            .map_err(|source| FetchError::Load {
                id: id.to_string(),
                source,
            })
    }

    /// The locations `info` is downloaded from, in order.
    pub fn candidate_urls(&self, info: &ArtifactInfo) -> Result<Vec<Url>, FetchError> {
        if let Some(url) = &info.url {
            return Ok(vec![url.clone()]);
        }
        std::iter::once(&self.registry)
            .chain(self.config.mirrors.iter())
            .map(|registry| {
                self.urls
                    .artifact_url(registry, &info.name, &info.version)
                    .map_err(|err| FetchError::InvalidRequest {
                        package: package_name(info),
                        reason: format!("cannot build a download url: {err}"),
                    })
            })
            .collect()
    }

    fn validate(&self, info: &ArtifactInfo) -> Result<Option<ExpectedChecksum>, FetchError> {
        let invalid = |reason: String| FetchError::InvalidRequest {
            package: package_name(info),
            reason,
        };
        if info.ecosystem != self.urls.ecosystem() {
            return Err(invalid(format!(
                "expected a {} package, got {}",
                self.urls.ecosystem(),
                info.ecosystem
            )));
        }
        if info.name.is_empty() || info.version.is_empty() {
            return Err(invalid("the name and version are required".to_owned()));
        }

        let Some(checksum) = info.checksum.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if checksum.is_empty() {
            return Ok(None);
        }
        let hex = checksum.strip_prefix("sha256:").unwrap_or(checksum);
        match parse_digest_from_hex::<Sha256>(hex) {
            Some(digest) => Ok(Some(ExpectedChecksum {
                raw: checksum.to_owned(),
                digest,
            })),
            None => Err(invalid(format!("'{checksum}' is not a sha256 checksum"))),
        }
    }

    /// Looks up an already stored artifact for `info`.
    async fn find_stored(&self, info: &ArtifactInfo) -> Result<Option<ArtifactId>, FetchError> {
        if let Some(id) = self.storage.predict_id(info) {
            let exists = self
                .storage
                .exists(&id)
                .await
                .map_err(|source| FetchError::Load {
                    id: id.to_string(),
                    source,
                })?;
            return Ok(exists.then_some(id));
        }

        // Hash based identifiers are only known once the content is; the
        // metadata records them by package coordinates.
        if !self.storage.metadata_enabled() {
            return Ok(None);
        }
        let Ok(metadata) =
            self.storage
                .get_metadata_by_package(&info.ecosystem, &info.name, &info.version)
        else {
            return Ok(None);
        };
        Ok(metadata.id.parse().ok())
    }

    async fn store(
        &self,
        info: &ArtifactInfo,
        bytes: Bytes,
        origin: Option<Url>,
    ) -> Result<PackageReader, FetchError> {
        let (storage, staging) = if self.config.persist_artifacts {
            (self.storage.clone(), None)
        } else {
            self.staging_storage(info)?
        };

        let stored = storage
            .store(info, Cursor::new(bytes))
            .await
            .map_err(|source| FetchError::Store {
                package: package_name(info),
                source,
            })?;

        let fresh = ArtifactMetadata {
            id: stored.id.to_string(),
            name: info.name.clone(),
            version: info.version.clone(),
            ecosystem: info.ecosystem.clone(),
            url: origin.as_ref().map(depot_networking::redact_url),
            sha256: stored.sha256,
            size: stored.size,
            fetched_at: Utc::now(),
            storage_key: stored.storage_key.clone(),
            content_type: self.urls.content_type().to_owned(),
        };
        let store_error = |source: StorageError| FetchError::Store {
            package: package_name(info),
            source,
        };
        let existing = if stored.deduplicated && storage.metadata_enabled() {
            storage.get_metadata(&stored.id).ok()
        } else {
            None
        };
        let metadata = match existing {
            // Keep the record of whoever stored the content first, and make
            // it reachable through this package too.
            Some(existing) => {
                storage
                    .link_metadata(info, &stored.id)
                    .map_err(store_error)?;
                existing
            }
            None if storage.metadata_enabled() => {
                storage
                    .store_metadata(fresh.clone())
                    .map_err(store_error)?;
                fresh
            }
            None => fresh,
        };

        tracing::debug!(
            id = %stored.id,
            key = %stored.storage_key,
            deduplicated = stored.deduplicated,
            "stored artifact"
        );
        let archive = ArchiveReader::new(storage.byte_store().clone(), stored.storage_key);
        Ok(PackageReader::new(metadata, archive, staging))
    }

    /// A private store for an artifact that must not be persisted.
    fn staging_storage(
        &self,
        info: &ArtifactInfo,
    ) -> Result<(StorageManager, Option<TempDir>), FetchError> {
        let config = StorageConfig {
            cache_enabled: false,
            ..self.storage.config().clone()
        };
        let Some(temp_dir) = &self.config.temp_dir else {
            return Ok((
                StorageManager::new(Arc::new(MemoryByteStore::new()), config),
                None,
            ));
        };

        let staging_error = |source: std::io::Error| FetchError::Source {
            package: package_name(info),
            source,
        };
        let dir = tempfile::Builder::new()
            .prefix("depot-")
            .tempdir_in(temp_dir)
            .map_err(staging_error)?;
        let store = FsByteStore::new(dir.path()).map_err(staging_error)?;
        Ok((StorageManager::new(Arc::new(store), config), Some(dir)))
    }
}

fn package_name(info: &ArtifactInfo) -> String {
    format!("{}:{}@{}", info.ecosystem, info.name, info.version)
}

fn verify_checksum(
    info: &ArtifactInfo,
    expected: Option<&ExpectedChecksum>,
    bytes: &[u8],
) -> Result<(), FetchError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = compute_bytes_digest::<Sha256>(bytes);
    if actual == expected.digest {
        return Ok(());
    }
    Err(FetchError::ChecksumMismatch {
        package: package_name(info),
        expected: expected.raw.clone(),
        actual: format!("{actual:x}"),
    })
}

/// Builds an [`EcosystemAdapter`].
///
/// The byte store is required; everything else has a default. All settings
/// are validated by [`AdapterBuilder::build`].
pub struct AdapterBuilder<B = NpmRegistry> {
    urls: B,
    store: Arc<dyn ByteStore>,
    metadata: Option<Arc<dyn MetadataStore>>,
    client: Option<ClientWithMiddleware>,
    config: AdapterConfig,
}

impl AdapterBuilder<NpmRegistry> {
    /// Starts building an npm adapter that stores artifacts in `store`.
    pub fn npm(store: Arc<dyn ByteStore>) -> Self {
        Self::new(NpmRegistry, store)
    }
}

impl<B: RegistryUrlBuilder> AdapterBuilder<B> {
    /// Starts building an adapter for the ecosystem described by `urls`.
    pub fn new(urls: B, store: Arc<dyn ByteStore>) -> Self {
        Self {
            urls,
            store,
            metadata: None,
            client: None,
            config: AdapterConfig::default(),
        }
    }

    /// Replaces all settings.
    #[must_use]
    pub fn with_config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables or disables serving stored artifacts without downloading.
    #[must_use]
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    /// Enables or disables writing fetched artifacts to the byte store.
    #[must_use]
    pub fn with_persist_artifacts(mut self, enabled: bool) -> Self {
        self.config.persist_artifacts = enabled;
        self
    }

    /// Enables or disables metadata records.
    #[must_use]
    pub fn with_metadata(mut self, enabled: bool) -> Self {
        self.config.metadata_enabled = enabled;
        self
    }

    /// Records metadata in `store` instead of an in-memory store.
    #[must_use]
    pub fn with_metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(store);
        self.config.metadata_enabled = true;
        self
    }

    /// Sets the timeout of a single download attempt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the number of retries after the first download attempt.
    #[must_use]
    pub fn with_retry_attempts(mut self, retries: u32) -> Self {
        self.config.retry_attempts = Some(retries);
        self
    }

    /// Sets the base and maximum delay between download attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, base: Duration, max: Duration) -> Self {
        self.config.retry_delay = base;
        self.config.max_retry_delay = max;
        self
    }

    /// Uses `client` for all requests.
    #[must_use]
    pub fn with_client(mut self, client: impl Into<ClientWithMiddleware>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Nests every storage key below `prefix`.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = Some(prefix.into());
        self
    }

    /// Stages artifacts that are not persisted below `dir`.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    /// Sets how artifact identifiers are derived.
    #[must_use]
    pub fn with_strategy(mut self, strategy: IdentityStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Always computes the content hash of stored artifacts.
    #[must_use]
    pub fn with_content_hash_in_id(mut self, enabled: bool) -> Self {
        self.config.content_hash_in_id = enabled;
        self
    }

    /// Downloads from `registry` instead of the ecosystem's public registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Url) -> Self {
        self.config.registry = Some(registry);
        self
    }

    /// Adds a registry that is tried when the previous ones fail.
    #[must_use]
    pub fn with_mirror(mut self, mirror: Url) -> Self {
        self.config.mirrors.push(mirror);
        self
    }

    /// Replaces the list of mirrors.
    #[must_use]
    pub fn with_mirrors(mut self, mirrors: impl IntoIterator<Item = Url>) -> Self {
        self.config.mirrors = mirrors.into_iter().collect();
        self
    }

    /// Sets the user agent sent with requests.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Validates the settings and constructs the adapter.
    pub fn build(self) -> Result<EcosystemAdapter<B>, ConfigError> {
        self.config.validate()?;

        let registry = match &self.config.registry {
            Some(registry) => registry.clone(),
            None => Url::parse(self.urls.default_registry()).map_err(|err| {
                ConfigError::InvalidValue("registry".to_owned(), err.to_string())
            })?,
        };

        let mut fetch = self.config.fetch_config();
        if let Some(client) = self.client {
            fetch = fetch.with_client(client);
        }

        let mut storage = StorageManager::new(self.store, self.config.storage_config());
        if self.config.metadata_enabled {
            let metadata = self
                .metadata
                .unwrap_or_else(|| Arc::new(InMemoryMetadataStore::new()));
            storage = storage.with_metadata(metadata);
        }

        Ok(EcosystemAdapter {
            urls: self.urls,
            registry,
            config: self.config,
            fetch,
            storage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn adapter() -> NpmAdapter {
        AdapterBuilder::npm(Arc::new(MemoryByteStore::new()))
            .with_registry(Url::parse("https://registry.example.com/").unwrap())
            .with_mirror(Url::parse("https://mirror.example.com/npm/").unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_candidate_urls() {
        let urls = adapter()
            .candidate_urls(&ArtifactInfo::new("npm", "@scope/pkg", "1.0.0"))
            .unwrap();
        assert_eq!(
            urls.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec![
                "https://registry.example.com/@scope/pkg/-/pkg-1.0.0.tgz",
                "https://mirror.example.com/npm/@scope/pkg/-/pkg-1.0.0.tgz",
            ]
        );
    }

    #[test]
    fn test_explicit_url_bypasses_mirrors() {
        let explicit = Url::parse("https://cdn.example.com/custom.tgz").unwrap();
        let info = ArtifactInfo::new("npm", "pkg", "1.0.0").with_url(explicit.clone());
        assert_eq!(adapter().candidate_urls(&info).unwrap(), vec![explicit]);
    }

    #[test]
    fn test_default_registry() {
        let adapter = AdapterBuilder::npm(Arc::new(MemoryByteStore::new()))
            .build()
            .unwrap();
        let urls = adapter
            .candidate_urls(&ArtifactInfo::new("npm", "lodash", "4.17.21"))
            .unwrap();
        assert_eq!(
            urls[0].as_str(),
            "https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz"
        );
    }

    #[test]
    fn test_build_rejects_invalid_settings() {
        let result = AdapterBuilder::npm(Arc::new(MemoryByteStore::new()))
            .with_timeout(Duration::ZERO)
            .build();
        assert_matches!(result, Err(ConfigError::InvalidValue(field, _)) if field == "timeout");
    }

    #[test]
    fn test_validate_request() {
        let adapter = adapter();

        assert_matches!(
            adapter.validate(&ArtifactInfo::new("pypi", "requests", "2.0.0")),
            Err(FetchError::InvalidRequest { .. })
        );
        assert_matches!(
            adapter.validate(&ArtifactInfo::new("npm", "", "1.0.0")),
            Err(FetchError::InvalidRequest { .. })
        );
        assert_matches!(
            adapter.validate(&ArtifactInfo::new("npm", "a", "1").with_checksum("md5:abc")),
            Err(FetchError::InvalidRequest { .. })
        );
        assert!(adapter
            .validate(&ArtifactInfo::new("npm", "a", "1").with_checksum(""))
            .unwrap()
            .is_none());

        let hex = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        for checksum in [hex.to_owned(), format!("sha256:{hex}")] {
            let expected = adapter
                .validate(&ArtifactInfo::new("npm", "a", "1").with_checksum(checksum))
                .unwrap()
                .unwrap();
            assert_eq!(expected.digest, compute_bytes_digest::<Sha256>("abc"));
        }
    }

    #[test]
    fn test_verify_checksum() {
        let info = ArtifactInfo::new("npm", "a", "1");
        let expected = ExpectedChecksum {
            raw: "sha256:00".to_owned(),
            digest: compute_bytes_digest::<Sha256>("expected"),
        };
        verify_checksum(&info, Some(&expected), b"expected").unwrap();
        verify_checksum(&info, None, b"anything").unwrap();

        let err = verify_checksum(&info, Some(&expected), b"tampered").unwrap_err();
        assert!(err.is_checksum_mismatch());
        assert_matches!(
            err,
            FetchError::ChecksumMismatch { actual, .. }
                if actual == format!("{:x}", compute_bytes_digest::<Sha256>("tampered"))
        );
    }
}
