#![deny(missing_docs)]

//! Random access into gzip compressed tar archives kept in a
//! [`ByteStore`](depot_storage::ByteStore).
//!
//! An [`ArchiveReader`] streams the archive once, on first use, to build an
//! [`ArchiveIndex`] of every file and directory it contains. Lookups and
//! listings are served from that index afterwards. Reading a file opens the
//! archive again and scans forward to the entry, so no part of the archive
//! is ever unpacked to disk unless [`ArchiveReader::extract`] is called.

mod error;
mod extract;
mod index;
mod reader;

pub use error::ArchiveError;
pub use extract::ExtractResult;
pub use index::{ArchiveEntry, ArchiveIndex};
pub use reader::{ArchiveFileReader, ArchiveReader};
