use std::{
    error::Error,
    fmt,
    io::{self, Read, Take},
    sync::Arc,
};

use depot_storage::{BoxRead, ByteStore};
use flate2::read::GzDecoder;
use simple_spawn_blocking::tokio::run_blocking_task;
use tokio::sync::OnceCell;

use crate::{
    error::ArchiveError,
    index::{normalize_path, ArchiveEntry, ArchiveIndex},
};

/// Reads a tar.gz archive stored in a [`ByteStore`].
///
/// The archive is indexed on first use. Concurrent first callers wait for a
/// single build; a failed build is retried by the next caller. The index is
/// never invalidated because stored archives do not change.
pub struct ArchiveReader {
    store: Arc<dyn ByteStore>,
    key: String,
    index: OnceCell<Arc<ArchiveIndex>>,
}

impl fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("key", &self.key)
            .field("indexed", &self.index.initialized())
            .finish()
    }
}

impl ArchiveReader {
    /// Constructs a reader for the archive stored under `key`. Nothing is
    /// read until the first operation.
    pub fn new(store: Arc<dyn ByteStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            index: OnceCell::new(),
        }
    }

    /// The storage key of the archive.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The byte store the archive is read from.
    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }

    /// Returns true once the index has been built.
    pub fn is_indexed(&self) -> bool {
        self.index.initialized()
    }

    /// Returns the index of the archive, building it if needed.
    pub async fn index(&self) -> Result<Arc<ArchiveIndex>, ArchiveError> {
        self.index
            .get_or_try_init(|| async {
                let store = self.store.clone();
                let key = self.key.clone();
                let index = run_blocking_task(move || {
                    let reader = open(store.as_ref(), &key)?;
                    ArchiveIndex::build(reader).map_err(ArchiveError::read(&key))
                })
                .await?;
                tracing::debug!(key = %self.key, entries = index.len(), "indexed archive");
                Ok::<_, ArchiveError>(Arc::new(index))
            })
            .await
            .cloned()
    }

    /// Returns the entry with the given path.
    pub async fn get_entry(&self, path: &str) -> Result<ArchiveEntry, ArchiveError> {
        self.index()
            .await?
            .get(path)
            .cloned()
            .ok_or_else(|| ArchiveError::EntryNotFound(normalize_path(path).to_owned()))
    }

    /// Lists the entries of the archive in archive order, optionally
    /// excluding directories.
    pub async fn list_entries(&self, files_only: bool) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let index = self.index().await?;
        Ok(index
            .entries()
            .filter(|entry| !files_only || !entry.is_dir)
            .cloned()
            .collect())
    }

    /// Streams the archive from the start and calls `callback` for every
    /// regular file with a reader limited to that file's contents.
    ///
    /// This does not use the index. The first error returned by `callback`
    /// stops the enumeration and is returned as [`ArchiveError::Callback`].
    pub async fn enum_files<F, E>(&self, callback: F) -> Result<(), ArchiveError>
    where
        F: FnMut(&ArchiveEntry, &mut dyn Read) -> Result<(), E> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let store = self.store.clone();
        let key = self.key.clone();
        run_blocking_task(move || for_each_file(store.as_ref(), &key, callback)).await
    }

    /// Opens a single file of the archive.
    ///
    /// The path is checked against the index first, so a missing path fails
    /// without reopening the archive. The returned reader performs blocking
    /// reads.
    pub async fn read_file(&self, path: &str) -> Result<ArchiveFileReader, ArchiveError> {
        let entry = self.get_entry(path).await?;
        if entry.is_dir {
            return Err(ArchiveError::NotAFile(entry.path));
        }

        let store = self.store.clone();
        let key = self.key.clone();
        run_blocking_task(move || open_file(store.as_ref(), &key, entry)).await
    }
}

/// A reader over the contents of a single archive file.
///
/// Dropping the reader closes the tar stream, the decompressor and the
/// underlying artifact stream, in that order.
pub struct ArchiveFileReader {
    path: String,
    size: u64,
    inner: Take<GzDecoder<BoxRead>>,
}

impl ArchiveFileReader {
    /// The path of the file inside the archive.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl fmt::Debug for ArchiveFileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveFileReader")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("remaining", &self.inner.limit())
            .finish()
    }
}

impl Read for ArchiveFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

pub(crate) fn open(store: &dyn ByteStore, key: &str) -> Result<BoxRead, ArchiveError> {
    store.get(key).map_err(|source| ArchiveError::Open {
        key: key.to_owned(),
        source,
    })
}

pub(crate) fn for_each_file<F, E>(
    store: &dyn ByteStore,
    key: &str,
    mut callback: F,
) -> Result<(), ArchiveError>
where
    F: FnMut(&ArchiveEntry, &mut dyn Read) -> Result<(), E>,
    E: Into<Box<dyn Error + Send + Sync>>,
{
    let mut archive = tar::Archive::new(GzDecoder::new(open(store, key)?));
    for entry in archive.entries().map_err(ArchiveError::read(key))? {
        let mut entry = entry.map_err(ArchiveError::read(key))?;
        let Some(info) = ArchiveEntry::from_tar(&entry).map_err(ArchiveError::read(key))? else {
            continue;
        };
        if info.is_dir {
            continue;
        }
        let mut contents = (&mut entry).take(info.size);
        callback(&info, &mut contents).map_err(|e| ArchiveError::Callback {
            path: info.path.clone(),
            source: e.into(),
        })?;
    }
    Ok(())
}

/// Scans the archive for the header at `entry.offset` and hands out the
/// decompressed stream positioned at its contents.
fn open_file(
    store: &dyn ByteStore,
    key: &str,
    entry: ArchiveEntry,
) -> Result<ArchiveFileReader, ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(open(store, key)?));

    let mut found = false;
    for candidate in archive.entries().map_err(ArchiveError::read(key))? {
        let candidate = candidate.map_err(ArchiveError::read(key))?;
        if candidate.raw_file_position() == entry.offset {
            found = true;
            break;
        }
    }
    if !found {
        return Err(ArchiveError::EntryNotFound(entry.path));
    }

    // The tar reader stops right after the matching header, so the inner
    // stream is positioned at the first byte of the file.
    Ok(ArchiveFileReader {
        inner: archive.into_inner().take(entry.size),
        path: entry.path,
        size: entry.size,
    })
}
