#![deny(missing_docs)]

//! Fetch package archives from ecosystem registries, store them under
//! stable identifiers and read their contents without unpacking them.
//!
//! An [`EcosystemAdapter`] ties the workspace together: it downloads an
//! artifact with retries and mirror fallback, verifies an optional checksum,
//! stores the bytes and a metadata record through a [`StorageManager`] and
//! hands out a [`PackageReader`] backed by a lazily built archive index.
//! Repeated fetches of a stored artifact are served without network traffic.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use depot::{AdapterBuilder, ArtifactInfo, FsByteStore};
//!
//! let store = Arc::new(FsByteStore::new("/var/cache/depot")?);
//! let adapter = AdapterBuilder::npm(store).build()?;
//!
//! let package = adapter
//!     .fetch(&ArtifactInfo::new("npm", "lodash", "4.17.21"))
//!     .await?;
//! let _manifest = package.read_to_vec("package/package.json").await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod config;
mod error;
mod package;
pub mod registry;

pub use adapter::{AdapterBuilder, EcosystemAdapter, NpmAdapter};
pub use config::{AdapterConfig, ConfigError};
pub use error::FetchError;
pub use package::PackageReader;
pub use registry::{NpmRegistry, RegistryUrlBuilder, NPM_REGISTRY};

pub use depot_archive::{ArchiveEntry, ArchiveError, ArchiveFileReader, ExtractResult};
pub use depot_networking::CancellationToken;
pub use depot_storage::{
    ArtifactId, ArtifactInfo, ArtifactMetadata, ByteStore, FsByteStore, IdentityStrategy,
    InMemoryMetadataStore, MemoryByteStore, MetadataStore, StorageManager,
};
