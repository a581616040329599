//! Deterministic state-machine journal with leader/follower checksum
//! reconciliation.
//!
//! Two copies of the same simulation stay provably consistent while only
//! exchanging operations (ticks and actions) and per-step checksums. The
//! [`Leader`] executes operations and records the checksum of every step.
//! A [`Follower`] executes the same operations against the leader's
//! checksums and, when they disagree at commit, replays from its checkpoint
//! to pinpoint the first diverging step.
//!
//! # Modules
//!
//! - [`position`] -- [`JournalPosition`], the packed `(tick, operation,
//!   step)` timeline address, and its boundary constructors.
//! - [`slot`] -- Operation footprints and per-step checksum records.
//! - [`model`] -- The [`JournalModel`] contract and the step callback.
//! - [`serializer`] -- Serialization collaborator and checksum policy.
//! - [`context`] -- Execution contexts used while staging and replaying.
//! - [`capture`] -- Double-buffered before/after capture for conflict
//!   search.
//! - [`checkpoint`] -- Live or serialized checkpoint storage.
//! - [`timeline`] -- Commit, rollback and snapshot algorithms shared by
//!   both roles.
//! - [`walker`] -- Version-checked cursor over staged steps.
//! - [`leader`] / [`follower`] -- The two journal roles.
//! - [`commit`] -- Follower commit outcomes.
//! - [`listener`] -- Synchronous before/after hooks.
//! - [`config`] -- [`JournalConfig`].
//! - [`error`] -- [`JournalError`].
//!
//! [`JournalPosition`]: position::JournalPosition
//! [`JournalModel`]: model::JournalModel
//! [`Leader`]: leader::Leader
//! [`Follower`]: follower::Follower
//! [`JournalConfig`]: config::JournalConfig
//! [`JournalError`]: error::JournalError

pub mod capture;
pub mod checkpoint;
pub mod commit;
pub mod config;
pub mod context;
pub mod error;
pub mod follower;
pub mod leader;
pub mod listener;
pub mod model;
pub mod phase;
pub mod position;
pub mod serializer;
pub mod slot;
pub mod timeline;
pub mod walker;

#[cfg(test)]
mod testing;

pub use commit::{CheckpointDrift, CommitConflict, CommitResult, SuspectOperation};
pub use config::JournalConfig;
pub use error::JournalError;
pub use follower::Follower;
pub use leader::{Leader, StageOutcome, StepChecksum};
pub use listener::JournalListener;
pub use model::{ActionResult, JournalModel, Operation, SideEffects, StepContext};
pub use position::JournalPosition;
pub use serializer::{JsonSerializer, ModelSerializer};
pub use timeline::{HistoryTarget, Timeline};
