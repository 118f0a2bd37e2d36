use std::{error::Error, io};

use depot_storage::ByteStoreError;
use simple_spawn_blocking::Cancelled;

/// An error that can occur while reading a stored archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The archive does not contain an entry with the requested path.
    #[error("the archive does not contain '{0}'")]
    EntryNotFound(String),

    /// The requested path is a directory.
    #[error("'{0}' is a directory")]
    NotAFile(String),

    /// The archive could not be opened from the byte store.
    #[error("failed to open archive '{key}'")]
    Open {
        /// The storage key of the archive.
        key: String,
        /// The underlying error.
        #[source]
        source: ByteStoreError,
    },

    /// The archive could not be decompressed or is not a valid tar stream.
    #[error("failed to read archive '{key}'")]
    Read {
        /// The storage key of the archive.
        key: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A callback passed to [`crate::ArchiveReader::enum_files`] failed.
    #[error("processing '{path}' failed")]
    Callback {
        /// The archive entry that was being processed.
        path: String,
        /// The error returned by the callback.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },

    /// The extraction destination is not a usable key prefix.
    #[error("'{0}' is not a valid extraction destination")]
    InvalidDestination(String),

    /// Listing the extraction destination failed.
    #[error("failed to inspect the extraction destination '{prefix}'")]
    Destination {
        /// The destination prefix.
        prefix: String,
        /// The underlying error.
        #[source]
        source: ByteStoreError,
    },

    /// The blocking task was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<Cancelled> for ArchiveError {
    fn from(_: Cancelled) -> Self {
        ArchiveError::Cancelled
    }
}

impl ArchiveError {
    /// Returns true if the archive or the requested entry does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ArchiveError::EntryNotFound(_) => true,
            ArchiveError::Open { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub(crate) fn read(key: &str) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| ArchiveError::Read {
            key: key.to_owned(),
            source,
        }
    }
}
