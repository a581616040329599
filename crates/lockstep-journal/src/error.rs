//! Error types for the `lockstep-journal` crate.
//!
//! [`JournalError`] covers usage errors: they indicate a bug in the caller
//! and are never retried. Divergence between leader and follower is not an
//! error; it is reported as data through
//! [`CommitResult`](crate::commit::CommitResult).

use crate::position::{JournalPosition, PositionError};
use crate::serializer::SerializationError;

/// Errors returned by journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// The journal has not been set up yet.
    #[error("journal has not been set up")]
    NotSetUp,

    /// A staging call was made while another staging was still running,
    /// or a previous staging unwound without completing.
    #[error("re-entrant staging: an operation is already executing")]
    ReentrantStaging,

    /// An action was staged before any tick has run.
    #[error("cannot stage an action before the first tick (staged position {staged})")]
    ActionBeforeFirstTick {
        /// The staged position at the time of the call.
        staged: JournalPosition,
    },

    /// A commit target lies outside `[checkpoint, staged]`.
    #[error("commit target {target} outside [{checkpoint}, {staged}]")]
    CommitOutOfRange {
        /// Requested target.
        target: JournalPosition,
        /// Current checkpoint position.
        checkpoint: JournalPosition,
        /// Current staged position.
        staged: JournalPosition,
    },

    /// A commit target falls inside an operation.
    #[error("partial commit: {target} falls inside the operation starting at {operation_start}")]
    PartialCommit {
        /// Requested target.
        target: JournalPosition,
        /// Start of the straddled operation.
        operation_start: JournalPosition,
    },

    /// A rollback target lies outside `[checkpoint, staged]`.
    #[error("rollback target {target} outside [{checkpoint}, {staged}]")]
    RollbackOutOfRange {
        /// Requested target.
        target: JournalPosition,
        /// Current checkpoint position.
        checkpoint: JournalPosition,
        /// Current staged position.
        staged: JournalPosition,
    },

    /// A rollback target falls inside an operation.
    #[error(
        "partial rollback: {target} falls inside the operation starting at {operation_start}"
    )]
    PartialRollback {
        /// Requested target.
        target: JournalPosition,
        /// Start of the straddled operation.
        operation_start: JournalPosition,
    },

    /// A position that must be an operation boundary falls inside one.
    #[error("{position} falls inside the operation starting at {operation_start}")]
    InsideOperation {
        /// Requested position.
        position: JournalPosition,
        /// Start of the straddled operation.
        operation_start: JournalPosition,
    },

    /// A requested position lies outside the reachable window.
    #[error("position {position} outside [{checkpoint}, {staged}]")]
    PositionOutOfRange {
        /// Requested position.
        position: JournalPosition,
        /// Current checkpoint position.
        checkpoint: JournalPosition,
        /// Current staged position.
        staged: JournalPosition,
    },

    /// The operation requires a checkpoint but checkpointing is disabled.
    #[error("checkpointing is disabled for this journal")]
    CheckpointingDisabled,

    /// A walker was used after the timeline changed under it.
    #[error("stale walker: created at timeline version {expected}, timeline is at {actual}")]
    StaleWalker {
        /// Version captured by the walker.
        expected: u64,
        /// Current timeline version.
        actual: u64,
    },

    /// A commit plan was applied after the timeline changed.
    #[error("stale commit plan: built at timeline version {expected}, timeline is at {actual}")]
    StalePlan {
        /// Version captured by the plan.
        expected: u64,
        /// Current timeline version.
        actual: u64,
    },

    /// No step starts at the given position.
    #[error("no staged step starts at {0}")]
    UnknownStep(JournalPosition),

    /// An operation requested more steps than a position can address.
    #[error("operation at {start} requested too many steps")]
    TooManySteps {
        /// Start of the offending operation.
        start: JournalPosition,
    },

    /// A previous staging failed after the operation had already changed
    /// the staged model.
    #[error("staged model at {staged} no longer matches the recorded operations; roll back or set up again")]
    StagedStateLost {
        /// The staged position, which the staged model has moved past.
        staged: JournalPosition,
    },

    /// Position arithmetic failed.
    #[error("position error: {source}")]
    Position {
        /// The underlying position error.
        #[from]
        source: PositionError,
    },

    /// The serialization collaborator failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// The underlying serialization error.
        #[from]
        source: SerializationError,
    },
}
