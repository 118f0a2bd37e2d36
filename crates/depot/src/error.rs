use std::io;

use depot_storage::StorageError;

/// An error returned by an [`EcosystemAdapter`](crate::EcosystemAdapter).
///
/// The variant names the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request cannot be served as given, e.g. because its checksum is
    /// not a SHA-256 hex digest. Raised before any network traffic.
    #[error("invalid request for {package}: {reason}")]
    InvalidRequest {
        /// The requested package.
        package: String,
        /// What is wrong with the request.
        reason: String,
    },

    /// The artifact could not be downloaded from any location.
    #[error("failed to download {package}")]
    Download {
        /// The requested package.
        package: String,
        /// The underlying error.
        #[source]
        source: depot_networking::FetchError,
    },

    /// The downloaded artifact does not match the expected checksum.
    #[error("checksum mismatch for {package}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The requested package.
        package: String,
        /// The expected SHA-256, as given by the caller.
        expected: String,
        /// The SHA-256 of the received bytes.
        actual: String,
    },

    /// Reading a caller supplied artifact failed.
    #[error("failed to read the artifact of {package}")]
    Source {
        /// The requested package.
        package: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The artifact could not be stored.
    #[error("failed to store {package}")]
    Store {
        /// The requested package.
        package: String,
        /// The underlying error.
        #[source]
        source: StorageError,
    },

    /// A stored artifact could not be opened.
    #[error("failed to load {id}")]
    Load {
        /// The artifact identifier.
        id: String,
        /// The underlying error.
        #[source]
        source: StorageError,
    },

    /// The artifact or its metadata does not exist.
    #[error("{0} was not found")]
    NotFound(String),

    /// The operation was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<simple_spawn_blocking::Cancelled> for FetchError {
    fn from(_: simple_spawn_blocking::Cancelled) -> Self {
        FetchError::Cancelled
    }
}

impl FetchError {
    /// Returns true if the artifact does not exist, locally or at the
    /// registry.
    pub fn is_not_found(&self) -> bool {
        match self {
            FetchError::NotFound(_) => true,
            FetchError::Download { source, .. } => source.is_not_found(),
            FetchError::Load { source, .. } | FetchError::Store { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }

    /// Returns true if the downloaded bytes did not match the expected
    /// checksum.
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, FetchError::ChecksumMismatch { .. })
    }

    /// Returns true if retrying the operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Download { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Returns true if the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        match self {
            FetchError::Cancelled => true,
            FetchError::Download { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
