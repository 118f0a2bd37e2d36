#![deny(missing_docs)]

//! Storage for fetched artifacts.
//!
//! The crate is organised leaves first:
//!
//! - [`identity`]: maps package coordinates (and optionally a content hash)
//!   to an [`ArtifactId`] under one of three [`IdentityStrategy`]s.
//! - [`key`]: maps an identifier to the hierarchical key it is stored under.
//! - [`backend`]: the [`ByteStore`] capability with filesystem and in-memory
//!   implementations.
//! - [`metadata`]: descriptive records about stored artifacts, see
//!   [`MetadataStore`].
//! - [`StorageManager`]: ties the above together and provides store, get,
//!   exists and delete at the identifier level, deduplicating identical
//!   content when a content-hash strategy is used.

pub mod backend;
pub mod identity;
pub mod key;
mod manager;
pub mod metadata;

pub use backend::{validate_key, BoxRead, ByteStore, ByteStoreError, FsByteStore, MemoryByteStore};
pub use identity::{generate_id, ArtifactId, ArtifactInfo, IdentityStrategy, ParseArtifactIdError};
pub use key::{extraction_prefix, key_for};
pub use manager::{StorageConfig, StorageError, StorageManager, StoredArtifact};
pub use metadata::{
    ArtifactMetadata, InMemoryMetadataStore, MetadataError, MetadataQuery, MetadataStore,
};
