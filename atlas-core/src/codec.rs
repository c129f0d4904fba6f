//! Versioned binary encoding for entity payloads.
//!
//! Payloads are a single format-version byte followed by a `bincode` body.
//! Readers reject versions they do not understand instead of guessing.

use bincode::Options;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Current payload format version.
pub const PAYLOAD_VERSION: u8 = 1;

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload body could not be serialised.
    #[error("failed to encode payload: {source}")]
    Encode {
        /// Encoder failure from `bincode`.
        #[source]
        source: bincode::Error,
    },
    /// The payload body could not be deserialised.
    #[error("failed to decode payload: {source}")]
    Decode {
        /// Decoder failure from `bincode`.
        #[source]
        source: bincode::Error,
    },
    /// The stored bytes were empty.
    #[error("payload is empty")]
    Empty,
    /// The stored payload uses an unknown format version.
    #[error("unsupported payload version {found}; supported version is {supported}")]
    UnsupportedVersion {
        /// Version byte read from storage.
        found: u8,
        /// Version written by this build.
        supported: u8,
    },
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
}

/// Encode `value` behind the current version byte.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] when serialisation fails.
///
/// # Examples
///
/// ```
/// use atlas_core::{Sequence, decode_payload, encode_payload};
///
/// let sequence = Sequence::new(7, vec![1, 2, 3]);
/// let bytes = encode_payload(&sequence).expect("encode");
/// let decoded: Sequence = decode_payload(&bytes).expect("decode");
/// assert_eq!(decoded, sequence);
/// ```
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = vec![PAYLOAD_VERSION];
    options()
        .serialize_into(&mut bytes, value)
        .map_err(|source| CodecError::Encode { source })?;
    Ok(bytes)
}

/// Decode a payload written by [`encode_payload`].
///
/// # Errors
///
/// Returns [`CodecError`] for empty input, unknown versions and malformed
/// bodies.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let (version, body) = bytes.split_first().ok_or(CodecError::Empty)?;
    if *version != PAYLOAD_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: *version,
            supported: PAYLOAD_VERSION,
        });
    }
    options()
        .deserialize(body)
        .map_err(|source| CodecError::Decode { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Collection, EntityKind, MemberRef, PointBody, Revision, Tags};
    use rstest::rstest;

    #[rstest]
    fn collection_payload_keeps_member_kinds_and_roles() {
        let mut collection = Collection::new(
            3,
            vec![
                MemberRef::new(EntityKind::Sequence, 10, "outer"),
                MemberRef::new(EntityKind::Point, 10, "admin_centre"),
            ],
        );
        collection.tags = Tags::from_pairs([("type", "multipolygon")]);
        collection.revision = Some(Revision {
            version: 2,
            timestamp: 1_700_000_000,
            changeset: 99,
            uid: 5,
            user: "mapper".into(),
        });
        let bytes = encode_payload(&collection).expect("encode");
        let decoded: Collection = decode_payload(&bytes).expect("decode");
        assert_eq!(decoded, collection);
    }

    #[rstest]
    fn rejects_unknown_version() {
        let mut bytes = encode_payload(&PointBody::default()).expect("encode");
        if let Some(first) = bytes.first_mut() {
            *first = 9;
        }
        assert!(matches!(
            decode_payload::<PointBody>(&bytes),
            Err(CodecError::UnsupportedVersion { found: 9, .. })
        ));
    }

    #[rstest]
    fn rejects_empty_input() {
        assert!(matches!(
            decode_payload::<PointBody>(&[]),
            Err(CodecError::Empty)
        ));
    }

    #[rstest]
    fn rejects_truncated_body() {
        let bytes = encode_payload(&Tags::from_pairs([("name", "River")])).expect("encode");
        let truncated = bytes.get(..bytes.len() - 2).expect("long enough");
        assert!(matches!(
            decode_payload::<Tags>(truncated),
            Err(CodecError::Decode { .. })
        ));
    }
}
