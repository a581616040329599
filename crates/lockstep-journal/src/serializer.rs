//! Serialization collaborator and checksum policy.
//!
//! Checksums are always computed over a model's serialized form, so the
//! serializer must be deterministic byte-for-byte for identical logical
//! state. [`JsonSerializer`] satisfies that for models built from structs
//! and ordered maps.

use serde::Serialize;
use serde::de::DeserializeOwned;
use xxhash_rust::xxh3::xxh3_64;

use crate::model::JournalModel;

/// Errors produced by the serialization collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// The model could not be encoded.
    #[error("failed to serialize model: {message}")]
    Encode {
        /// Description of the failure.
        message: String,
    },

    /// The blob could not be decoded into a model.
    #[error("failed to deserialize model: {message}")]
    Decode {
        /// Description of the failure.
        message: String,
    },
}

/// Purpose of a serialization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SerializationFlags(u8);

impl SerializationFlags {
    /// No particular purpose.
    pub const NONE: Self = Self(0);
    /// Serialized only to compute a checksum; the bytes are discarded.
    pub const CHECKSUM: Self = Self(1);
    /// Serialized to be kept as a checkpoint or snapshot.
    pub const SNAPSHOT: Self = Self(1 << 1);

    /// Whether all flags of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Turns models into opaque bytes and back.
pub trait ModelSerializer<M: JournalModel> {
    /// Serialize `model` into `out`, replacing its contents.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Encode`] if the model cannot be encoded.
    fn serialize_into(
        &self,
        model: &M,
        flags: SerializationFlags,
        version: u32,
        out: &mut Vec<u8>,
    ) -> Result<(), SerializationError>;

    /// Reconstruct a model from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Decode`] if the bytes are not a valid
    /// model.
    fn deserialize(
        &self,
        bytes: &[u8],
        context: &M::Context,
        version: u32,
    ) -> Result<M, SerializationError>;
}

/// `serde_json` serializer for models that derive serde traits.
///
/// The version is not embedded; callers keep it alongside the blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<M> ModelSerializer<M> for JsonSerializer
where
    M: JournalModel + Serialize + DeserializeOwned,
{
    fn serialize_into(
        &self,
        model: &M,
        _flags: SerializationFlags,
        _version: u32,
        out: &mut Vec<u8>,
    ) -> Result<(), SerializationError> {
        out.clear();
        serde_json::to_writer(&mut *out, model).map_err(|e| SerializationError::Encode {
            message: e.to_string(),
        })
    }

    fn deserialize(
        &self,
        bytes: &[u8],
        context: &M::Context,
        _version: u32,
    ) -> Result<M, SerializationError> {
        let mut model: M = serde_json::from_slice(bytes).map_err(|e| {
            SerializationError::Decode {
                message: e.to_string(),
            }
        })?;
        model.attach_context(context);
        Ok(model)
    }
}

/// A serialized model copy.
///
/// Not `Clone`: a blob has exactly one owner.
#[derive(Debug, PartialEq, Eq)]
pub struct SnapshotBlob {
    bytes: Vec<u8>,
}

impl SnapshotBlob {
    /// Wrap serialized bytes.
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Serialize `model` into a fresh blob.
    ///
    /// # Errors
    ///
    /// Propagates [`SerializationError`] from the serializer.
    pub fn capture<M, S>(serializer: &S, model: &M, version: u32) -> Result<Self, SerializationError>
    where
        M: JournalModel,
        S: ModelSerializer<M>,
    {
        let mut bytes = Vec::new();
        serializer.serialize_into(model, SerializationFlags::SNAPSHOT, version, &mut bytes)?;
        Ok(Self { bytes })
    }

    /// The serialized bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the blob in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Checksum of the blob contents.
    pub fn checksum(&self) -> u32 {
        checksum_bytes(&self.bytes)
    }

    /// Give up ownership of the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Checksum of a serialized state: xxh3-64 folded to 32 bits.
#[allow(clippy::cast_possible_truncation)]
pub fn checksum_bytes(bytes: &[u8]) -> u32 {
    let hash = xxh3_64(bytes);
    ((hash >> 32) ^ hash) as u32
}

/// Serialize `model` into `scratch` and checksum the result.
///
/// # Errors
///
/// Propagates [`SerializationError`] from the serializer.
pub fn checksum_model<M, S>(
    serializer: &S,
    model: &M,
    version: u32,
    scratch: &mut Vec<u8>,
) -> Result<u32, SerializationError>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    serializer.serialize_into(model, SerializationFlags::CHECKSUM, version, scratch)?;
    Ok(checksum_bytes(scratch))
}

/// Copy a model through its serialized form, so the copy shares nothing
/// with the original.
///
/// # Errors
///
/// Propagates [`SerializationError`] from the serializer.
pub fn copy_model<M, S>(serializer: &S, model: &M, version: u32) -> Result<M, SerializationError>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    let blob = SnapshotBlob::capture(serializer, model, version)?;
    serializer.deserialize(blob.as_bytes(), &model.resolution_context(), version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic_and_content_sensitive() {
        let a = checksum_bytes(b"{\"hunger\":3}");
        let b = checksum_bytes(b"{\"hunger\":3}");
        let c = checksum_bytes(b"{\"hunger\":4}");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn blob_checksum_matches_bytes() {
        let blob = SnapshotBlob::from_bytes(b"state".to_vec());
        assert_eq!(blob.checksum(), checksum_bytes(b"state"));
        assert_eq!(blob.len(), 5);
        assert!(!blob.is_empty());
        assert_eq!(blob.into_bytes(), b"state".to_vec());
    }

    #[test]
    fn flags_compose() {
        let both = SerializationFlags::CHECKSUM.union(SerializationFlags::SNAPSHOT);
        assert!(both.contains(SerializationFlags::CHECKSUM));
        assert!(both.contains(SerializationFlags::SNAPSHOT));
        assert!(!SerializationFlags::NONE.contains(SerializationFlags::SNAPSHOT));
    }
}
