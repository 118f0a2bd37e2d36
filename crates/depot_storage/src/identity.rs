//! Artifact identities.
//!
//! Every stored artifact is addressed by an [`ArtifactId`]. Which shape the
//! identifier takes is decided by the [`IdentityStrategy`] of the storage
//! manager, see [`generate_id`].

use std::{convert::Infallible, fmt, fmt::Display, str::FromStr};

use depot_digest::{truncated_hex, Sha256Hash};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use url::Url;

/// The number of digest bytes embedded in a content-hash identifier.
pub const CONTENT_HASH_BYTES: usize = 8;

/// The number of digest bytes embedded in a hybrid identifier.
pub const HYBRID_HASH_BYTES: usize = 4;

/// Describes an artifact a caller wants to fetch or store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactInfo {
    /// The ecosystem the package belongs to, e.g. `npm`.
    pub ecosystem: String,

    /// The package name as the ecosystem spells it, e.g. `@types/node`.
    pub name: String,

    /// The version of the package.
    pub version: String,

    /// An explicit location to download from. When set, registry mirrors are
    /// not consulted.
    pub url: Option<Url>,

    /// The expected SHA-256 of the artifact as hex, optionally prefixed with
    /// `sha256:`. Empty or missing disables verification.
    pub checksum: Option<String>,
}

impl ArtifactInfo {
    /// Constructs a new descriptor without an explicit url or checksum.
    pub fn new(
        ecosystem: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            ecosystem: ecosystem.into(),
            name: name.into(),
            version: version.into(),
            url: None,
            checksum: None,
        }
    }

    /// Sets the explicit download location.
    #[must_use]
    pub fn with_url(self, url: Url) -> Self {
        Self {
            url: Some(url),
            ..self
        }
    }

    /// Sets the expected checksum.
    #[must_use]
    pub fn with_checksum(self, checksum: impl Into<String>) -> Self {
        Self {
            checksum: Some(checksum.into()),
            ..self
        }
    }
}

/// Determines how an [`ArtifactId`] is derived for a stored artifact.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub enum IdentityStrategy {
    /// `ecosystem:name:version`. Cheap, but two different payloads stored
    /// under the same coordinates replace each other.
    #[default]
    Convention,

    /// `ecosystem:hash` where `hash` is the leading 8 bytes of the SHA-256 of
    /// the payload. Identical payloads are stored once.
    ContentHash,

    /// `ecosystem:name:version:hash` with a 4 byte hash suffix.
    Hybrid,
}

impl IdentityStrategy {
    /// Parses a strategy name. Unknown names fall back to
    /// [`IdentityStrategy::Convention`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "content-hash" | "content_hash" | "contenthash" => IdentityStrategy::ContentHash,
            "hybrid" => IdentityStrategy::Hybrid,
            _ => IdentityStrategy::Convention,
        }
    }

    /// Returns true if identifiers of this strategy embed a content hash, which
    /// means the payload has to be read in full before an id can be assigned.
    pub fn requires_content_hash(self) -> bool {
        matches!(self, IdentityStrategy::ContentHash | IdentityStrategy::Hybrid)
    }

    /// The canonical name of the strategy.
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityStrategy::Convention => "convention",
            IdentityStrategy::ContentHash => "content-hash",
            IdentityStrategy::Hybrid => "hybrid",
        }
    }
}

impl Display for IdentityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityStrategy {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

/// Identifies a stored artifact.
///
/// The string form joins the fields with `:` and is what metadata records are
/// keyed by. All textual fields are canonical (see [`canonicalize`]) so they
/// never contain `:` or `/`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub enum ArtifactId {
    /// See [`IdentityStrategy::Convention`].
    Convention {
        /// Canonical ecosystem name.
        ecosystem: String,
        /// Canonical package name.
        name: String,
        /// Canonical version.
        version: String,
    },

    /// See [`IdentityStrategy::ContentHash`].
    ContentHash {
        /// Canonical ecosystem name.
        ecosystem: String,
        /// Hex encoded digest prefix.
        hash: String,
    },

    /// See [`IdentityStrategy::Hybrid`].
    Hybrid {
        /// Canonical ecosystem name.
        ecosystem: String,
        /// Canonical package name.
        name: String,
        /// Canonical version.
        version: String,
        /// Hex encoded digest prefix.
        hash: String,
    },
}

impl ArtifactId {
    /// The ecosystem of the artifact.
    pub fn ecosystem(&self) -> &str {
        match self {
            ArtifactId::Convention { ecosystem, .. }
            | ArtifactId::ContentHash { ecosystem, .. }
            | ArtifactId::Hybrid { ecosystem, .. } => ecosystem,
        }
    }

    /// The canonical package name, if the identifier carries one.
    pub fn name(&self) -> Option<&str> {
        match self {
            ArtifactId::Convention { name, .. } | ArtifactId::Hybrid { name, .. } => Some(name),
            ArtifactId::ContentHash { .. } => None,
        }
    }

    /// The canonical version, if the identifier carries one.
    pub fn version(&self) -> Option<&str> {
        match self {
            ArtifactId::Convention { version, .. } | ArtifactId::Hybrid { version, .. } => {
                Some(version)
            }
            ArtifactId::ContentHash { .. } => None,
        }
    }

    /// The embedded content hash prefix, if any.
    pub fn hash(&self) -> Option<&str> {
        match self {
            ArtifactId::ContentHash { hash, .. } | ArtifactId::Hybrid { hash, .. } => Some(hash),
            ArtifactId::Convention { .. } => None,
        }
    }

    /// The strategy that produced this identifier.
    pub fn strategy(&self) -> IdentityStrategy {
        match self {
            ArtifactId::Convention { .. } => IdentityStrategy::Convention,
            ArtifactId::ContentHash { .. } => IdentityStrategy::ContentHash,
            ArtifactId::Hybrid { .. } => IdentityStrategy::Hybrid,
        }
    }
}

impl Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactId::Convention {
                ecosystem,
                name,
                version,
            } => write!(f, "{ecosystem}:{name}:{version}"),
            ArtifactId::ContentHash { ecosystem, hash } => write!(f, "{ecosystem}:{hash}"),
            ArtifactId::Hybrid {
                ecosystem,
                name,
                version,
                hash,
            } => write!(f, "{ecosystem}:{name}:{version}:{hash}"),
        }
    }
}

/// An error returned when parsing an [`ArtifactId`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid artifact identifier")]
pub struct ParseArtifactIdError(String);

impl FromStr for ArtifactId {
    type Err = ParseArtifactIdError;

    /// Parses the `:` separated form. The shape is determined by the number
    /// of fields: 2 for content-hash, 3 for convention and 4 for hybrid.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.iter().any(|field| field.is_empty()) {
            return Err(ParseArtifactIdError(s.to_owned()));
        }
        match fields.as_slice() {
            [ecosystem, hash] => Ok(ArtifactId::ContentHash {
                ecosystem: (*ecosystem).to_owned(),
                hash: (*hash).to_owned(),
            }),
            [ecosystem, name, version] => Ok(ArtifactId::Convention {
                ecosystem: (*ecosystem).to_owned(),
                name: (*name).to_owned(),
                version: (*version).to_owned(),
            }),
            [ecosystem, name, version, hash] => Ok(ArtifactId::Hybrid {
                ecosystem: (*ecosystem).to_owned(),
                name: (*name).to_owned(),
                version: (*version).to_owned(),
                hash: (*hash).to_owned(),
            }),
            _ => Err(ParseArtifactIdError(s.to_owned())),
        }
    }
}

/// Makes a name safe to embed in an identifier and a storage key.
///
/// A leading `@` is removed and every `/` and `:` becomes `-`, so
/// `@types/node` turns into `types-node`.
pub fn canonicalize(name: &str) -> String {
    name.strip_prefix('@')
        .unwrap_or(name)
        .chars()
        .map(|c| if c == '/' || c == ':' { '-' } else { c })
        .collect()
}

/// Derives the identifier of an artifact.
///
/// `content_hash` must be provided for strategies that
/// [require it](IdentityStrategy::requires_content_hash). Without it the
/// identifier falls back to the convention shape, so this function never
/// fails.
pub fn generate_id(
    info: &ArtifactInfo,
    strategy: IdentityStrategy,
    content_hash: Option<&Sha256Hash>,
) -> ArtifactId {
    let ecosystem = canonicalize(&info.ecosystem);
    match (strategy, content_hash) {
        (IdentityStrategy::ContentHash, Some(hash)) => ArtifactId::ContentHash {
            ecosystem,
            hash: truncated_hex(hash, CONTENT_HASH_BYTES),
        },
        (IdentityStrategy::Hybrid, Some(hash)) => ArtifactId::Hybrid {
            ecosystem,
            name: canonicalize(&info.name),
            version: canonicalize(&info.version),
            hash: truncated_hex(hash, HYBRID_HASH_BYTES),
        },
        _ => ArtifactId::Convention {
            ecosystem,
            name: canonicalize(&info.name),
            version: canonicalize(&info.version),
        },
    }
}
