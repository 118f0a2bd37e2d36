//! Maps artifact identifiers to the keys their bytes are stored under.
//!
//! | strategy     | key                                              |
//! |--------------|--------------------------------------------------|
//! | convention   | `artifacts/{ecosystem}/{name}/{version}/artifact` |
//! | content-hash | `artifacts/{ecosystem}/{hash}/artifact`           |
//! | hybrid       | `artifacts/{ecosystem}/{name}/{version}-{hash}/artifact` |
//!
//! Keys are optionally nested below a namespace prefix.

use crate::identity::ArtifactId;

const ARTIFACT_FILE: &str = "artifact";
const EXTRACTED_DIR: &str = "extracted";

impl ArtifactId {
    /// Returns the storage key of this artifact below `prefix`.
    pub fn storage_key(&self, prefix: Option<&str>) -> String {
        let relative = match self {
            ArtifactId::Convention {
                ecosystem,
                name,
                version,
            } => format!("artifacts/{ecosystem}/{name}/{version}/{ARTIFACT_FILE}"),
            ArtifactId::ContentHash { ecosystem, hash } => {
                format!("artifacts/{ecosystem}/{hash}/{ARTIFACT_FILE}")
            }
            ArtifactId::Hybrid {
                ecosystem,
                name,
                version,
                hash,
            } => format!("artifacts/{ecosystem}/{name}/{version}-{hash}/{ARTIFACT_FILE}"),
        };
        with_prefix(prefix, relative)
    }
}

/// Returns the storage key for the identifier string `id`.
///
/// The layout is chosen by the number of `:` separated fields alone; fields
/// are not validated. Identifiers without 2, 3 or 4 fields are returned
/// unchanged.
pub fn key_for(id: &str, prefix: Option<&str>) -> String {
    let fields = id.split(':').map(str::to_owned).collect::<Vec<_>>();
    let id = match <[String; 2]>::try_from(fields) {
        Ok([ecosystem, hash]) => ArtifactId::ContentHash { ecosystem, hash },
        Err(fields) => match <[String; 3]>::try_from(fields) {
            Ok([ecosystem, name, version]) => ArtifactId::Convention {
                ecosystem,
                name,
                version,
            },
            Err(fields) => match <[String; 4]>::try_from(fields) {
                Ok([ecosystem, name, version, hash]) => ArtifactId::Hybrid {
                    ecosystem,
                    name,
                    version,
                    hash,
                },
                Err(_) => return id.to_owned(),
            },
        },
    };
    id.storage_key(prefix)
}

/// The key prefix below which the contents of the archive stored at
/// `storage_key` are extracted. Always ends with `/`.
pub fn extraction_prefix(storage_key: &str) -> String {
    let parent = match storage_key.rsplit_once('/') {
        Some((parent, ARTIFACT_FILE)) => parent,
        None if storage_key == ARTIFACT_FILE => "",
        _ => storage_key,
    };
    if parent.is_empty() {
        format!("{EXTRACTED_DIR}/")
    } else {
        format!("{parent}/{EXTRACTED_DIR}/")
    }
}

fn with_prefix(prefix: Option<&str>, relative: String) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}/{relative}"),
        _ => relative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{generate_id, ArtifactInfo, IdentityStrategy};
    use depot_digest::{compute_bytes_digest, Sha256};
    use rstest::rstest;

    #[rstest]
    #[case("npm:lodash:4.17.21", None, "artifacts/npm/lodash/4.17.21/artifact")]
    #[case("npm:315f5bdb76d078c4", None, "artifacts/npm/315f5bdb76d078c4/artifact")]
    #[case(
        "npm:lodash:4.17.21:315f5bdb",
        None,
        "artifacts/npm/lodash/4.17.21-315f5bdb/artifact"
    )]
    #[case(
        "npm:lodash:4.17.21",
        Some("cache"),
        "cache/artifacts/npm/lodash/4.17.21/artifact"
    )]
    #[case(
        "npm:lodash:4.17.21",
        Some("/tenants/a/"),
        "tenants/a/artifacts/npm/lodash/4.17.21/artifact"
    )]
    #[case("npm:lodash:4.17.21", Some(""), "artifacts/npm/lodash/4.17.21/artifact")]
    #[case("npm::1.0.0", None, "artifacts/npm//1.0.0/artifact")]
    #[case("npm:", None, "artifacts/npm//artifact")]
    fn test_key_for(#[case] id: &str, #[case] prefix: Option<&str>, #[case] expected: &str) {
        assert_eq!(key_for(id, prefix), expected);
    }

    #[rstest]
    #[case("npm")]
    #[case("")]
    #[case("a:b:c:d:e")]
    fn test_unrecognized_ids_pass_through(#[case] id: &str) {
        assert_eq!(key_for(id, Some("prefix")), id);
    }

    #[test]
    fn test_generated_ids_are_always_recognized() {
        let hash = compute_bytes_digest::<Sha256>("contents");
        let info = ArtifactInfo::new("npm", "@scope/pkg", "1.0.0");
        for strategy in [
            IdentityStrategy::Convention,
            IdentityStrategy::ContentHash,
            IdentityStrategy::Hybrid,
        ] {
            let id = generate_id(&info, strategy, Some(&hash)).to_string();
            let key = key_for(&id, None);
            assert_ne!(key, id);
            assert!(key.starts_with("artifacts/npm/"));
            assert!(key.ends_with("/artifact"));
        }
    }

    #[test]
    fn test_key_is_stable() {
        let info = ArtifactInfo::new("npm", "@types/node", "20.1.0");
        let id = generate_id(&info, IdentityStrategy::Convention, None);
        assert_eq!(
            id.storage_key(None),
            "artifacts/npm/types-node/20.1.0/artifact"
        );
        assert_eq!(id.storage_key(None), key_for(&id.to_string(), None));
    }

    #[rstest]
    #[case(
        "artifacts/npm/lodash/4.17.21/artifact",
        "artifacts/npm/lodash/4.17.21/extracted/"
    )]
    #[case("custom/key", "custom/key/extracted/")]
    #[case("artifact", "extracted/")]
    #[case("blobs/myartifact", "blobs/myartifact/extracted/")]
    fn test_extraction_prefix(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(extraction_prefix(key), expected);
    }
}
