//! The checkpoint: the last known-good state and its checksum.
//!
//! A checkpoint is held either as a live model or as its serialized form,
//! never both. Setup and snapshot swaps store it serialized; the first
//! replay onto it materializes a live model and drops the bytes.

use crate::model::{JournalModel, SideEffects};
use crate::serializer::{ModelSerializer, SerializationError, SnapshotBlob, checksum_model, copy_model};

/// How the checkpoint state is currently held.
#[derive(Debug)]
pub enum CheckpointStorage<M> {
    /// A live model, ready for in-place replay.
    Live(M),
    /// The serialized form.
    Serialized(SnapshotBlob),
}

/// The checkpoint model and its checksum. The position lives on the
/// timeline.
#[derive(Debug)]
pub struct Checkpoint<M> {
    storage: CheckpointStorage<M>,
    checksum: u32,
}

impl<M: JournalModel> Checkpoint<M> {
    /// Take ownership of a serialized checkpoint.
    pub const fn from_blob(blob: SnapshotBlob, checksum: u32) -> Self {
        Self {
            storage: CheckpointStorage::Serialized(blob),
            checksum,
        }
    }

    /// Current storage form.
    pub const fn storage(&self) -> &CheckpointStorage<M> {
        &self.storage
    }

    /// Checksum of the checkpoint state; 0 if checksums are disabled.
    pub const fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Whether the checkpoint is currently a live model.
    pub const fn is_live(&self) -> bool {
        matches!(self.storage, CheckpointStorage::Live(_))
    }

    /// Replace the checkpoint with a serialized state. The previous storage
    /// is dropped.
    pub fn replace(&mut self, blob: SnapshotBlob, checksum: u32) {
        self.storage = CheckpointStorage::Serialized(blob);
        self.checksum = checksum;
    }

    /// Turn the checkpoint into a live model if it is serialized, and
    /// return it. A freshly materialized model gets `runtime` attached with
    /// side effects suppressed: the checkpoint never fires them.
    ///
    /// # Errors
    ///
    /// Propagates [`SerializationError`] from the serializer.
    pub fn materialize<S>(
        &mut self,
        serializer: &S,
        context: &M::Context,
        version: u32,
        runtime: &M::RuntimeData,
    ) -> Result<&mut M, SerializationError>
    where
        S: ModelSerializer<M>,
    {
        if let CheckpointStorage::Serialized(blob) = &self.storage {
            let mut model = serializer.deserialize(blob.as_bytes(), context, version)?;
            model.attach_runtime_data(runtime, SideEffects::Suppressed);
            self.storage = CheckpointStorage::Live(model);
        }
        match &mut self.storage {
            CheckpointStorage::Live(model) => Ok(model),
            CheckpointStorage::Serialized(_) => Err(SerializationError::Decode {
                message: "checkpoint could not be materialized".to_owned(),
            }),
        }
    }

    /// An independent copy of the checkpoint model, without runtime data.
    ///
    /// # Errors
    ///
    /// Propagates [`SerializationError`] from the serializer.
    pub fn copy<S>(&self, serializer: &S, context: &M::Context, version: u32) -> Result<M, SerializationError>
    where
        S: ModelSerializer<M>,
    {
        match &self.storage {
            CheckpointStorage::Live(model) => copy_model(serializer, model, version),
            CheckpointStorage::Serialized(blob) => serializer.deserialize(blob.as_bytes(), context, version),
        }
    }

    /// Recompute the checksum from the current state, or reset it to 0 when
    /// `compute` is off.
    ///
    /// # Errors
    ///
    /// Propagates [`SerializationError`] from the serializer.
    pub fn refresh_checksum<S>(
        &mut self,
        serializer: &S,
        version: u32,
        compute: bool,
        scratch: &mut Vec<u8>,
    ) -> Result<u32, SerializationError>
    where
        S: ModelSerializer<M>,
    {
        self.checksum = match (&self.storage, compute) {
            (_, false) => 0,
            (CheckpointStorage::Live(model), true) => checksum_model(serializer, model, version, scratch)?,
            (CheckpointStorage::Serialized(blob), true) => blob.checksum(),
        };
        Ok(self.checksum)
    }
}
