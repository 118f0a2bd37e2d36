use std::io::{self, Read};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use indexmap::IndexMap;

/// A file or directory inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// The path of the entry without a leading `./` or trailing `/`.
    pub path: String,
    /// The size of the entry's contents in bytes. Zero for directories.
    pub size: u64,
    /// The modification time recorded in the archive.
    pub modified: Option<DateTime<Utc>>,
    /// True if the entry is a directory.
    pub is_dir: bool,
    /// The offset of the entry's contents in the decompressed tar stream.
    pub offset: u64,
}

impl ArchiveEntry {
    /// Describes a tar entry. Returns `None` for entries that are neither a
    /// regular file nor a directory.
    pub(crate) fn from_tar<R: Read>(entry: &tar::Entry<'_, R>) -> io::Result<Option<Self>> {
        let header = entry.header();
        let entry_type = header.entry_type();
        let is_dir = if entry_type.is_dir() {
            true
        } else if entry_type.is_file() {
            false
        } else {
            return Ok(None);
        };

        let path = normalize_path(&String::from_utf8_lossy(&entry.path_bytes())).to_owned();
        if path.is_empty() {
            return Ok(None);
        }

        let modified = header
            .mtime()
            .ok()
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Ok(Some(Self {
            path,
            size: if is_dir { 0 } else { entry.size() },
            modified,
            is_dir,
            offset: entry.raw_file_position(),
        }))
    }
}

/// Strips leading `./` components and trailing slashes.
pub(crate) fn normalize_path(path: &str) -> &str {
    let mut path = path.trim_end_matches('/');
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    if path == "." {
        ""
    } else {
        path
    }
}

/// The entries of an archive by path, in archive order.
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    entries: IndexMap<String, ArchiveEntry>,
    built_at: DateTime<Utc>,
}

impl ArchiveIndex {
    /// Streams a gzip compressed tar archive and records every file and
    /// directory in it. A path that occurs more than once refers to its last
    /// occurrence, which is the one that wins when unpacking.
    pub fn build(reader: impl Read) -> io::Result<Self> {
        let mut archive = tar::Archive::new(GzDecoder::new(reader));
        let mut entries = IndexMap::new();
        for entry in archive.entries()? {
            let entry = entry?;
            if let Some(entry) = ArchiveEntry::from_tar(&entry)? {
                entries.insert(entry.path.clone(), entry);
            }
        }
        Ok(Self {
            entries,
            built_at: Utc::now(),
        })
    }

    /// Returns the entry with the given path.
    pub fn get(&self, path: &str) -> Option<&ArchiveEntry> {
        self.entries.get(normalize_path(path))
    }

    /// All entries, in archive order.
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> + '_ {
        self.entries.values()
    }

    /// All regular files, in archive order.
    pub fn files(&self) -> impl Iterator<Item = &ArchiveEntry> + '_ {
        self.entries().filter(|entry| !entry.is_dir)
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the archive contains no files or directories.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// When the index was built.
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}
