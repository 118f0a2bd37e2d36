use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
};

use bytes::Bytes;
use parking_lot::RwLock;

use super::{validate_key, BoxRead, ByteStore, ByteStoreError};

/// A [`ByteStore`] that keeps every object in memory.
///
/// Useful for tests and for staging artifacts that should not outlive the
/// process.
#[derive(Debug, Default)]
pub struct MemoryByteStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryByteStore {
    /// Constructs an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ByteStore for MemoryByteStore {
    fn put(&self, key: &str, reader: &mut dyn Read) -> Result<u64, ByteStoreError> {
        validate_key(key)?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| ByteStoreError::io(key, e))?;
        let len = buf.len() as u64;
        self.objects.write().insert(key.to_owned(), Bytes::from(buf));
        Ok(len)
    }

    fn get(&self, key: &str) -> Result<BoxRead, ByteStoreError> {
        validate_key(key)?;
        let bytes = self
            .objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ByteStoreError::NotFound(key.to_owned()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn exists(&self, key: &str) -> Result<bool, ByteStoreError> {
        validate_key(key)?;
        Ok(self.objects.read().contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<(), ByteStoreError> {
        validate_key(key)?;
        match self.objects.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(ByteStoreError::NotFound(key.to_owned())),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, ByteStoreError> {
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_owned()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_put_get_roundtrip() {
        let store = MemoryByteStore::new();
        let written = store.put("a/b", &mut &b"hello"[..]).unwrap();
        assert_eq!(written, 5);

        let mut contents = String::new();
        store
            .get("a/b")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hello");
        assert!(store.exists("a/b").unwrap());
    }

    #[test]
    fn test_last_write_wins() {
        let store = MemoryByteStore::new();
        store.put("k", &mut &b"first"[..]).unwrap();
        store.put("k", &mut &b"second"[..]).unwrap();

        let mut contents = Vec::new();
        store.get("k").unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"second");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_keys() {
        let store = MemoryByteStore::new();
        assert!(!store.exists("nope").unwrap());
        assert_matches!(store.get("nope").map(|_| ()), Err(ByteStoreError::NotFound(_)));
        assert_matches!(store.delete("nope"), Err(ByteStoreError::NotFound(_)));
    }

    #[test]
    fn test_list_by_prefix() {
        let store = MemoryByteStore::new();
        for key in ["x/extracted/b", "x/extracted/a", "x/artifact", "y/artifact"] {
            store.put(key, &mut &b""[..]).unwrap();
        }
        assert_eq!(
            store.list("x/extracted/").unwrap(),
            vec!["x/extracted/a", "x/extracted/b"]
        );
        assert_eq!(store.list("x/").unwrap().len(), 3);
        assert!(store.list("z/").unwrap().is_empty());
    }
}
