use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use super::{validate_key, BoxRead, ByteStore, ByteStoreError, STAGING_DIR};

/// A [`ByteStore`] backed by a directory on the local filesystem.
///
/// Every key maps to a file below the root directory. Writes go to a
/// temporary file in `<root>/.tmp` first and are moved into place once
/// complete, so readers never observe a partially written object.
#[derive(Debug, Clone)]
pub struct FsByteStore {
    root: PathBuf,
}

impl FsByteStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs_err::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The directory this store writes to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ByteStoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn write_atomic(&self, path: &Path, reader: &mut dyn Read) -> io::Result<u64> {
        let temp_dir = self.root.join(STAGING_DIR);
        fs_err::create_dir_all(&temp_dir)?;
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let mut temp = tempfile::Builder::new().tempfile_in(&temp_dir)?;
        let written = io::copy(reader, &mut temp)?;
        temp.flush()?;

        // Last writer wins: a concurrent put of the same key simply replaces
        // ours.
        temp.persist(path).map_err(|e| e.error)?;
        Ok(written)
    }

    /// Removes directories left empty by a delete, walking up to the root.
    fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if std::fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl ByteStore for FsByteStore {
    fn put(&self, key: &str, reader: &mut dyn Read) -> Result<u64, ByteStoreError> {
        let path = self.path_for(key)?;
        self.write_atomic(&path, reader)
            .map_err(|e| ByteStoreError::Io {
                key: key.to_owned(),
                source: e,
            })
    }

    fn get(&self, key: &str) -> Result<BoxRead, ByteStoreError> {
        let path = self.path_for(key)?;
        let file = fs_err::File::open(path).map_err(|e| ByteStoreError::io(key, e))?;
        Ok(Box::new(file))
    }

    fn exists(&self, key: &str) -> Result<bool, ByteStoreError> {
        let path = self.path_for(key)?;
        match std::fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ByteStoreError::io(key, e)),
        }
    }

    fn delete(&self, key: &str) -> Result<(), ByteStoreError> {
        let path = self.path_for(key)?;
        fs_err::remove_file(&path).map_err(|e| ByteStoreError::io(key, e))?;
        self.prune_empty_parents(&path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, ByteStoreError> {
        // Only walk the deepest directory the prefix fully names.
        let start = match prefix.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => self.root.join(dir),
            _ => self.root.clone(),
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let walker = walkdir::WalkDir::new(&start)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && entry.path().parent() == Some(self.root.as_path())
                    && entry.file_name() == STAGING_DIR)
            });
        for entry in walker {
            let entry = entry.map_err(|e| ByteStoreError::Io {
                key: prefix.to_owned(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
