use std::io::Read;

use depot_archive::{
    ArchiveEntry, ArchiveError, ArchiveFileReader, ArchiveReader, ExtractResult,
};
use depot_storage::ArtifactMetadata;
use simple_spawn_blocking::tokio::run_blocking_task;
use tempfile::TempDir;

/// A fetched or loaded package.
///
/// Gives indexed read access to the package archive. Readers of artifacts
/// that were not persisted own their staging area, which is removed when the
/// reader is dropped.
#[derive(Debug)]
pub struct PackageReader {
    metadata: ArtifactMetadata,
    archive: ArchiveReader,
    _staging: Option<TempDir>,
}

impl PackageReader {
    pub(crate) fn new(
        metadata: ArtifactMetadata,
        archive: ArchiveReader,
        staging: Option<TempDir>,
    ) -> Self {
        Self {
            metadata,
            archive,
            _staging: staging,
        }
    }

    /// The metadata of the package artifact.
    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    /// The identifier of the artifact.
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// The underlying archive reader.
    pub fn archive(&self) -> &ArchiveReader {
        &self.archive
    }

    /// Returns the archive entry at `path`.
    pub async fn get_entry(&self, path: &str) -> Result<ArchiveEntry, ArchiveError> {
        self.archive.get_entry(path).await
    }

    /// Lists the regular files of the package.
    pub async fn list_files(&self) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        self.archive.list_entries(true).await
    }

    /// Opens a file of the package for streaming.
    pub async fn read_file(&self, path: &str) -> Result<ArchiveFileReader, ArchiveError> {
        self.archive.read_file(path).await
    }

    /// Reads a file of the package into memory.
    pub async fn read_to_vec(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut reader = self.archive.read_file(path).await?;
        let key = self.archive.key().to_owned();
        run_blocking_task(move || {
            let mut contents = Vec::with_capacity(reader.size() as usize);
            reader
                .read_to_end(&mut contents)
                .map_err(|source| ArchiveError::Read { key, source })?;
            Ok(contents)
        })
        .await
    }

    /// Extracts the package next to its artifact.
    pub async fn extract(&self) -> Result<ExtractResult, ArchiveError> {
        self.archive.extract().await
    }
}
