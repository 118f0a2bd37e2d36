//! Serialization of digests as lowercase hex strings.
//!
//! Use [`HexDigest`] with `serde_with::serde_as` to serialize a field of
//! type [`Output<D>`]:
//!
//! ```
//! use depot_digest::{serde::HexDigest, Sha256, Sha256Hash};
//! use serde_with::serde_as;
//!
//! #[serde_as]
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Record {
//!     #[serde_as(as = "HexDigest<Sha256>")]
//!     sha256: Sha256Hash,
//! }
//! ```

use std::{borrow::Cow, marker::PhantomData};

use digest::{Digest, Output};
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeAs, SerializeAs};

/// `serde_with` adapter that writes a digest as a hex string.
pub struct HexDigest<D: Digest>(PhantomData<D>);

impl<D: Digest> SerializeAs<Output<D>> for HexDigest<D> {
    fn serialize_as<S>(source: &Output<D>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(source).serialize(serializer)
    }
}

impl<'de, D: Digest> DeserializeAs<'de, Output<D>> for HexDigest<D> {
    fn deserialize_as<De>(deserializer: De) -> Result<Output<D>, De::Error>
    where
        De: Deserializer<'de>,
    {
        let str = Cow::<'de, str>::deserialize(deserializer)?;
        super::parse_digest_from_hex::<D>(str.as_ref())
            .ok_or_else(|| Error::custom("failed to parse digest"))
    }
}
