//! The byte store capability and its implementations.
//!
//! A [`ByteStore`] maps string keys to opaque byte payloads. Keys are
//! hierarchical, `/`-separated paths relative to the root of the store. The
//! interface is blocking: async callers are expected to move calls onto the
//! blocking pool, which is what [`crate::StorageManager`] does.

mod fs;
mod memory;

pub use fs::FsByteStore;
pub use memory::MemoryByteStore;

use std::io::{self, Read};

/// A boxed reader over the contents of a stored object.
pub type BoxRead = Box<dyn Read + Send + 'static>;

/// A key/value store for opaque byte payloads.
///
/// Implementations must be safe to share between threads. Concurrent writers
/// to the same key are allowed; the last completed write wins.
pub trait ByteStore: Send + Sync {
    /// Stores everything `reader` yields under `key`, replacing any previous
    /// value. Returns the number of bytes written.
    fn put(&self, key: &str, reader: &mut dyn Read) -> Result<u64, ByteStoreError>;

    /// Opens the object stored under `key` for reading.
    fn get(&self, key: &str) -> Result<BoxRead, ByteStoreError>;

    /// Returns true if an object is stored under `key`.
    fn exists(&self, key: &str) -> Result<bool, ByteStoreError>;

    /// Removes the object stored under `key`. Fails with
    /// [`ByteStoreError::NotFound`] if there is none.
    fn delete(&self, key: &str) -> Result<(), ByteStoreError>;

    /// Returns all keys that start with `prefix`, in lexicographic order.
    fn list(&self, prefix: &str) -> Result<Vec<String>, ByteStoreError>;
}

/// An error returned by a [`ByteStore`].
#[derive(Debug, thiserror::Error)]
pub enum ByteStoreError {
    /// Nothing is stored under the key.
    #[error("no object is stored under '{0}'")]
    NotFound(String),

    /// The key is empty, absolute or tries to escape the store.
    #[error("'{0}' is not a valid storage key")]
    InvalidKey(String),

    /// The underlying medium failed.
    #[error("i/o error while accessing '{key}'")]
    Io {
        /// The key that was being accessed.
        key: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

impl ByteStoreError {
    /// Returns true if the error indicates the key does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ByteStoreError::NotFound(_))
    }

    pub(crate) fn io(key: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            ByteStoreError::NotFound(key.to_owned())
        } else {
            ByteStoreError::Io {
                key: key.to_owned(),
                source,
            }
        }
    }
}

/// Directory used by stores for in-flight writes. Keys may not start with it.
pub(crate) const STAGING_DIR: &str = ".tmp";

/// Rejects keys that are empty, absolute, contain `\`, contain empty, `.` or
/// `..` segments, or point into the staging area.
pub fn validate_key(key: &str) -> Result<(), ByteStoreError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        || key.split('/').next() == Some(STAGING_DIR);
    if invalid {
        Err(ByteStoreError::InvalidKey(key.to_owned()))
    } else {
        Ok(())
    }
}
