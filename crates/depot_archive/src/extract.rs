use depot_storage::{extraction_prefix, ByteStore, ByteStoreError};
use simple_spawn_blocking::tokio::run_blocking_task;

use crate::{
    error::ArchiveError,
    reader::{for_each_file, ArchiveReader},
};

/// The outcome of extracting an archive into its byte store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractResult {
    /// The key prefix the files were written below. Ends with `/`.
    pub extraction_key: String,
    /// The number of files written, or found at the destination if it was
    /// already populated.
    pub file_count: usize,
    /// The number of bytes written. Zero when the extraction was skipped.
    pub total_bytes: u64,
    /// True if the destination already held files and nothing was written.
    pub already_extracted: bool,
    /// Archive paths that could not be written.
    pub failed: Vec<String>,
    /// Archive paths that were skipped because they would escape the
    /// destination.
    pub skipped: Vec<String>,
}

impl ArchiveReader {
    /// Extracts every file next to the archive, below
    /// `<artifact directory>/extracted/`.
    pub async fn extract(&self) -> Result<ExtractResult, ArchiveError> {
        self.extract_to(&extraction_prefix(self.key())).await
    }

    /// Writes every regular file of the archive to the byte store below
    /// `prefix`.
    ///
    /// If anything is already stored below `prefix` the extraction is
    /// skipped and only the number of existing files is reported. Files that
    /// fail to write do not abort the extraction; they are logged and listed
    /// in [`ExtractResult::failed`].
    pub async fn extract_to(&self, prefix: &str) -> Result<ExtractResult, ArchiveError> {
        let prefix = prefix.trim_start_matches('/').trim_end_matches('/');
        if prefix.is_empty() || prefix.split('/').any(|segment| segment == "..") {
            return Err(ArchiveError::InvalidDestination(prefix.to_owned()));
        }
        let prefix = format!("{prefix}/");

        let store = self.store().clone();
        let key = self.key().to_owned();
        let Extraction { result, errors } =
            run_blocking_task(move || extract(store.as_ref(), &key, prefix)).await?;

        if result.already_extracted {
            tracing::debug!(
                destination = %result.extraction_key,
                files = result.file_count,
                "archive already extracted"
            );
            return Ok(result);
        }

        for path in &result.skipped {
            tracing::warn!(%path, "skipping archive entry outside of the destination");
        }
        for (path, err) in &errors {
            tracing::warn!(%path, error = %err, "failed to extract file");
        }
        if !result.failed.is_empty() {
            tracing::warn!(
                key = %self.key(),
                destination = %result.extraction_key,
                written = result.file_count,
                failed = result.failed.len(),
                "archive was only partially extracted"
            );
        }
        Ok(result)
    }
}

struct Extraction {
    result: ExtractResult,
    errors: Vec<(String, ByteStoreError)>,
}

fn extract(store: &dyn ByteStore, key: &str, prefix: String) -> Result<Extraction, ArchiveError> {
    let existing = store
        .list(&prefix)
        .map_err(|source| ArchiveError::Destination {
            prefix: prefix.clone(),
            source,
        })?;
    let mut result = ExtractResult {
        file_count: existing.len(),
        already_extracted: !existing.is_empty(),
        extraction_key: prefix,
        total_bytes: 0,
        failed: Vec::new(),
        skipped: Vec::new(),
    };
    let mut errors = Vec::new();
    if result.already_extracted {
        return Ok(Extraction { result, errors });
    }

    for_each_file(store, key, |entry, contents| {
        let Some(relative) = contained_path(&entry.path) else {
            result.skipped.push(entry.path.clone());
            return Ok::<_, std::convert::Infallible>(());
        };
        let destination = format!("{}{relative}", result.extraction_key);
        match store.put(&destination, contents) {
            Ok(written) => {
                result.file_count += 1;
                result.total_bytes += written;
            }
            Err(err) => {
                result.failed.push(entry.path.clone());
                errors.push((entry.path.clone(), err));
            }
        }
        Ok(())
    })?;
    Ok(Extraction { result, errors })
}

/// Returns `path` if it is relative and does not climb out of its root.
fn contained_path(path: &str) -> Option<&str> {
    let escapes = path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|segment| segment == "..");
    (!escapes).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{tarball, tarball_with_raw_names};
    use depot_storage::MemoryByteStore;
    use rstest::rstest;
    use std::{io::Read, sync::Arc};

    const KEY: &str = "artifacts/npm/test/1.0.0/artifact";

    fn reader_for(archive: &[u8]) -> (Arc<MemoryByteStore>, ArchiveReader) {
        let store = Arc::new(MemoryByteStore::new());
        store.put(KEY, &mut &archive[..]).unwrap();
        let reader = ArchiveReader::new(store.clone(), KEY);
        (store, reader)
    }

    fn read(store: &MemoryByteStore, key: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        store.get(key).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[rstest]
    #[case("package/index.js", true)]
    #[case("package/..hidden", true)]
    #[case("../evil", false)]
    #[case("package/../../evil", false)]
    #[case("/etc/passwd", false)]
    fn test_contained_path(#[case] path: &str, #[case] contained: bool) {
        assert_eq!(contained_path(path).is_some(), contained);
    }

    #[tokio::test]
    async fn test_extract_is_idempotent() {
        let archive = tarball(&[("package/a.txt", "aaa"), ("package/lib/b.txt", "bb")]);
        let (store, reader) = reader_for(&archive);

        let first = reader.extract().await.unwrap();
        assert_eq!(
            first.extraction_key,
            "artifacts/npm/test/1.0.0/extracted/"
        );
        assert!(!first.already_extracted);
        assert_eq!(first.file_count, 2);
        assert_eq!(first.total_bytes, 5);
        assert_eq!(
            read(&store, "artifacts/npm/test/1.0.0/extracted/package/lib/b.txt"),
            b"bb"
        );

        let second = reader.extract().await.unwrap();
        assert!(second.already_extracted);
        assert_eq!(second.extraction_key, first.extraction_key);
        assert_eq!(second.file_count, 2);
        assert_eq!(second.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_extract_to_custom_prefix() {
        let archive = tarball(&[("package/a.txt", "aaa")]);
        let (store, reader) = reader_for(&archive);

        let result = reader.extract_to("/unpacked/test/").await.unwrap();
        assert_eq!(result.extraction_key, "unpacked/test/");
        assert_eq!(read(&store, "unpacked/test/package/a.txt"), b"aaa");
    }

    #[rstest]
    #[case("")]
    #[case("/")]
    #[case("a/../b")]
    #[tokio::test]
    async fn test_extract_to_rejects_bad_prefixes(#[case] prefix: &str) {
        let (_store, reader) = reader_for(&tarball(&[]));
        assert!(matches!(
            reader.extract_to(prefix).await,
            Err(ArchiveError::InvalidDestination(_))
        ));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_extract_skips_escaping_paths() {
        let archive =
            tarball_with_raw_names(&[("../evil.txt", "evil"), ("package/ok.txt", "ok")]);
        let (store, reader) = reader_for(&archive);

        let result = reader.extract().await.unwrap();
        assert_eq!(result.file_count, 1);
        assert_eq!(result.skipped, vec!["../evil.txt".to_owned()]);
        assert!(store.exists("artifacts/npm/test/1.0.0/extracted/package/ok.txt").unwrap());
        assert_eq!(store.list("artifacts/npm/test/").unwrap().len(), 2);
        assert!(logs_contain("skipping archive entry outside of the destination"));
    }

    /// Refuses writes to a single key.
    struct FailingStore {
        inner: MemoryByteStore,
        poisoned: String,
    }

    impl ByteStore for FailingStore {
        fn put(&self, key: &str, reader: &mut dyn Read) -> Result<u64, ByteStoreError> {
            if key == self.poisoned {
                return Err(ByteStoreError::Io {
                    key: key.to_owned(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.put(key, reader)
        }

        fn get(&self, key: &str) -> Result<depot_storage::BoxRead, ByteStoreError> {
            self.inner.get(key)
        }

        fn exists(&self, key: &str) -> Result<bool, ByteStoreError> {
            self.inner.exists(key)
        }

        fn delete(&self, key: &str) -> Result<(), ByteStoreError> {
            self.inner.delete(key)
        }

        fn list(&self, prefix: &str) -> Result<Vec<String>, ByteStoreError> {
            self.inner.list(prefix)
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_partial_extraction_is_reported() {
        let archive = tarball(&[
            ("package/a.txt", "a"),
            ("package/b.txt", ""),
            ("package/c.txt", "c"),
        ]);
        let store = Arc::new(FailingStore {
            inner: MemoryByteStore::new(),
            poisoned: "out/package/b.txt".to_owned(),
        });
        store.put(KEY, &mut archive.as_slice()).unwrap();
        let reader = ArchiveReader::new(store.clone(), KEY);

        let result = reader.extract_to("out").await.unwrap();
        assert_eq!(result.file_count, 2);
        assert_eq!(result.failed, vec!["package/b.txt".to_owned()]);
        assert!(store.exists("out/package/c.txt").unwrap());
        assert!(logs_contain("archive was only partially extracted"));
    }
}
