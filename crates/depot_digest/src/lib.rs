#![deny(missing_docs)]

//! Hashing helpers used throughout depot to content-address artifacts.
//!
//! Artifacts are identified and verified by their SHA-256 digest. This crate
//! wraps the [RustCrypto/hashes](https://github.com/RustCrypto/hashes)
//! implementation with the handful of operations the rest of the workspace
//! needs:
//!
//! - [`compute_bytes_digest`]: hash an in-memory buffer.
//! - [`parse_digest_from_hex`]: parse a hex digest, e.g. a caller supplied
//!   checksum.
//! - [`truncated_hex`]: render the leading bytes of a digest, which is how
//!   content hashes are embedded in artifact identifiers.
//! - [`HashingReader`]: a [`Read`] adapter that hashes everything that flows
//!   through it, so a payload can be buffered and hashed in a single pass.
//!
//! ```
//! use depot_digest::{compute_bytes_digest, truncated_hex, Sha256};
//!
//! let hash = compute_bytes_digest::<Sha256>("Hello, world!");
//! assert_eq!(truncated_hex(&hash, 4), "315f5bdb");
//! ```

#[cfg(feature = "serde")]
pub mod serde;

pub use digest;

use digest::{Digest, Output};
use std::io::Read;

pub use sha2::Sha256;

/// A type alias for the output of a SHA256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: Digest + Default>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses a hash hex string to a digest. Returns `None` if the string is not
/// valid hex or has the wrong length for the digest.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}

/// Returns the lowercase hex encoding of the first `bytes` bytes of `digest`.
///
/// Asking for more bytes than the digest holds returns the full digest.
pub fn truncated_hex(digest: &[u8], bytes: usize) -> String {
    hex::encode(&digest[..bytes.min(digest.len())])
}

/// A simple object that provides a [`Read`] implementation that also
/// immediately hashes the bytes read from it. Call
/// [`HashingReader::finalize`] to retrieve both the original `impl Read`
/// object as well as the hash and the number of bytes that passed through.
pub struct HashingReader<R, D: Digest> {
    reader: R,
    hasher: D,
    bytes_read: u64,
}

impl<R, D: Digest + Default> HashingReader<R, D> {
    /// Constructs a new instance from a reader and a new (empty) hasher.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: Default::default(),
            bytes_read: 0,
        }
    }
}

impl<R, D: Digest> HashingReader<R, D> {
    /// Returns the number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consumes this instance and returns the original reader, the hash of
    /// all bytes read from this instance and the number of bytes read.
    pub fn finalize(self) -> (R, Output<D>, u64) {
        (self.reader, self.hasher.finalize(), self.bytes_read)
    }
}

impl<R: Read, D: Digest> Read for HashingReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.hasher.update(&buf[..bytes_read]);
        self.bytes_read += bytes_read as u64;
        Ok(bytes_read)
    }
}
